//! 任务图构建器
//!
//! 提供流畅的API来组装子任务与依赖，build 时统一做环与依赖校验。

use crate::core::AgentError;
use crate::workflow::graph::TaskGraph;
use crate::workflow::types::{SubTask, TaskId};

/// 任务图构建器
#[derive(Default)]
pub struct TaskGraphBuilder {
    tasks: Vec<SubTask>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// 添加任务（保持加入顺序，即分解顺序）
    pub fn task(mut self, task: SubTask) -> Self {
        self.tasks.push(task);
        self
    }

    /// 设置顺序依赖
    pub fn sequential(mut self, from: impl Into<TaskId>, to: impl Into<TaskId>) -> Self {
        let from = from.into();
        let to = to.into();
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == to) {
            task.depends_on.push(from);
        }
        self
    }

    /// 设置AND依赖（所有前置任务）
    pub fn depends_on_all(mut self, task_id: impl Into<TaskId>, deps: Vec<TaskId>) -> Self {
        let id = task_id.into();
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
            task.depends_on = deps;
        }
        self
    }

    /// 构建任务图，校验失败（含环 / 未知依赖）时整体拒绝
    pub fn build(self) -> Result<TaskGraph, AgentError> {
        TaskGraph::new(self.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Route;

    #[test]
    fn test_build_fan_in_graph() {
        let graph = TaskGraphBuilder::new()
            .task(SubTask::new("get_weather: Seoul", Route::Tool).with_id("t1"))
            .task(SubTask::new("get_weather: Tokyo", Route::Tool).with_id("t2"))
            .task(SubTask::new("compare results", Route::Direct).with_id("t3"))
            .depends_on_all("t3", vec!["t1".into(), "t2".into()])
            .build()
            .expect("fan-in graph should build");

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.get("t3").unwrap().depends_on, vec!["t1", "t2"]);
    }

    #[test]
    fn test_build_sequential() {
        let graph = TaskGraphBuilder::new()
            .task(SubTask::new("step 1", Route::Direct).with_id("a"))
            .task(SubTask::new("step 2", Route::Direct).with_id("b"))
            .sequential("a", "b")
            .build()
            .unwrap();

        assert_eq!(graph.get("b").unwrap().depends_on, vec!["a"]);
    }

    #[test]
    fn test_build_rejects_cycle() {
        let result = TaskGraphBuilder::new()
            .task(SubTask::new("x", Route::Direct).with_id("x"))
            .task(SubTask::new("y", Route::Direct).with_id("y"))
            .sequential("x", "y")
            .sequential("y", "x")
            .build();

        assert!(result.is_err());
    }
}
