//! 任务依赖图
//!
//! 邻接表 + 入度表实现 DAG；构建时做拓扑排序校验，含环即构建失败，调度器不会收到带环的图。

use std::collections::HashMap;

use crate::core::AgentError;
use crate::workflow::types::{SubTask, TaskId, TaskStatus};

/// 单次请求的任务图：节点为子任务，边为数据依赖
///
/// 由一次 Orchestrator 调用独占，合成结束后随请求丢弃，无跨请求共享状态。
#[derive(Debug)]
pub struct TaskGraph {
    /// 按分解顺序保存的任务 ID（合成阶段按此顺序输出）
    order: Vec<TaskId>,
    tasks: HashMap<TaskId, SubTask>,
    /// 邻接表：任务 ID -> 依赖该任务的后继
    adjacency: HashMap<TaskId, Vec<TaskId>>,
}

impl TaskGraph {
    /// 从任务列表构建；校验依赖存在性与无环性
    pub fn new(tasks: Vec<SubTask>) -> Result<Self, AgentError> {
        let order: Vec<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
        let tasks: HashMap<TaskId, SubTask> =
            tasks.into_iter().map(|t| (t.id.clone(), t)).collect();

        let mut adjacency: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();

        for task_id in tasks.keys() {
            in_degree.insert(task_id.clone(), 0);
            adjacency.insert(task_id.clone(), Vec::new());
        }

        for (task_id, task) in &tasks {
            for dep_id in &task.depends_on {
                if !tasks.contains_key(dep_id) {
                    return Err(AgentError::UnknownDependency(dep_id.clone()));
                }
                adjacency.entry(dep_id.clone()).or_default().push(task_id.clone());
                *in_degree.entry(task_id.clone()).or_insert(0) += 1;
            }
        }

        // Kahn 拓扑排序：访问不到所有节点则含环
        let mut queue: Vec<TaskId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut visited = 0usize;
        let mut degrees = in_degree.clone();

        while let Some(id) = queue.pop() {
            visited += 1;
            if let Some(successors) = adjacency.get(&id) {
                for succ in successors {
                    if let Some(d) = degrees.get_mut(succ) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push(succ.clone());
                        }
                    }
                }
            }
        }

        if visited != tasks.len() {
            let cyclic: Vec<String> = degrees
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| id.clone())
                .collect();
            return Err(AgentError::CyclicDependency(cyclic.join(", ")));
        }

        Ok(Self {
            order,
            tasks,
            adjacency,
        })
    }

    /// 分解顺序的任务 ID
    pub fn order(&self) -> &[TaskId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SubTask> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SubTask> {
        self.tasks.get_mut(id)
    }

    /// 直接后继
    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.adjacency.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// 当前可认领的任务：Pending 且所有依赖均 Succeeded
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| {
                let task = &self.tasks[*id];
                task.status == TaskStatus::Pending
                    && task.depends_on.iter().all(|dep| {
                        self.tasks
                            .get(dep)
                            .map(|d| d.status == TaskStatus::Succeeded)
                            .unwrap_or(false)
                    })
            })
            .cloned()
            .collect()
    }

    /// 所有任务均达终态
    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    /// 将某任务的所有（传递）后继标记为 Skipped，返回被跳过的任务 ID
    pub fn skip_dependents(&mut self, failed_id: &str) -> Vec<TaskId> {
        let mut skipped = Vec::new();
        let mut stack: Vec<TaskId> = self.dependents_of(failed_id).to_vec();

        while let Some(id) = stack.pop() {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            if task.status.is_terminal() {
                continue;
            }
            task.status = TaskStatus::Skipped;
            skipped.push(id.clone());
            stack.extend(self.dependents_of(&id).iter().cloned());
        }

        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Route;
    use crate::workflow::types::SubTask;

    fn task(id: &str, deps: Vec<&str>) -> SubTask {
        SubTask::new(format!("task {}", id), Route::Direct)
            .with_id(id)
            .depends_on_all(deps.into_iter().map(String::from).collect())
    }

    #[test]
    fn test_acyclic_graph_builds() {
        let graph = TaskGraph::new(vec![
            task("a", vec![]),
            task("b", vec![]),
            task("c", vec!["a", "b"]),
        ])
        .unwrap();

        assert_eq!(graph.len(), 3);
        let mut ready = graph.ready_tasks();
        ready.sort();
        assert_eq!(ready, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_cycle_rejected_at_construction() {
        let result = TaskGraph::new(vec![
            task("a", vec!["b"]),
            task("b", vec!["a"]),
        ]);
        assert!(matches!(result, Err(AgentError::CyclicDependency(_))));
    }

    #[test]
    fn test_self_cycle_rejected() {
        let result = TaskGraph::new(vec![task("a", vec!["a"])]);
        assert!(matches!(result, Err(AgentError::CyclicDependency(_))));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let result = TaskGraph::new(vec![task("a", vec!["ghost"])]);
        assert!(matches!(result, Err(AgentError::UnknownDependency(_))));
    }

    #[test]
    fn test_dependent_becomes_ready_after_success() {
        let mut graph = TaskGraph::new(vec![task("a", vec![]), task("b", vec!["a"])]).unwrap();
        assert_eq!(graph.ready_tasks(), vec!["a".to_string()]);

        graph.get_mut("a").unwrap().status = TaskStatus::Succeeded;
        assert_eq!(graph.ready_tasks(), vec!["b".to_string()]);
    }

    #[test]
    fn test_skip_dependents_is_transitive() {
        let mut graph = TaskGraph::new(vec![
            task("a", vec![]),
            task("b", vec!["a"]),
            task("c", vec!["b"]),
        ])
        .unwrap();

        graph.get_mut("a").unwrap().status = TaskStatus::Failed;
        let mut skipped = graph.skip_dependents("a");
        skipped.sort();
        assert_eq!(skipped, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(graph.get("c").unwrap().status, TaskStatus::Skipped);
    }

    #[test]
    fn test_order_preserved() {
        let graph = TaskGraph::new(vec![
            task("first", vec![]),
            task("second", vec![]),
            task("third", vec!["first", "second"]),
        ])
        .unwrap();
        assert_eq!(graph.order(), &["first", "second", "third"]);
    }
}
