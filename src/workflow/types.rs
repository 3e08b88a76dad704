//! 任务图类型定义
//!
//! 子任务、状态、参数（字面量或对前置任务结果的引用）、执行结果与失败分类。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::router::Route;

pub type TaskId = String;

/// 子任务状态
///
/// 生命周期：Pending -> Ready -> Running -> Succeeded / Failed；
/// 重试在 Running 内部完成，尝试次数耗尽后为终态 Failed；
/// 依赖失败或被跳过的任务直接进入 Skipped，绝不进入 Running。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// 等待依赖满足
    Pending,
    /// 依赖已全部成功，可被 worker 认领
    Ready,
    /// 正在执行
    Running,
    /// 成功
    Succeeded,
    /// 失败（重试耗尽后为终态）
    Failed,
    /// 因依赖失败或请求取消而跳过
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// 子任务参数值：字面量或对另一任务输出的占位引用
///
/// 占位引用在任务 Ready 时由调度器解析为前置任务的成功 payload，
/// 分解器绝不猜测字面值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgValue {
    Literal(String),
    FromTask(TaskId),
}

/// 子任务：原子的可调度单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    /// 唯一 ID
    pub id: TaskId,
    /// 自然语言描述
    pub description: String,
    /// 执行路由
    pub route: Route,
    /// 目标能力名（TOOL 路由必填，REASONER/DIRECT 为 None）
    pub capability: Option<String>,
    /// 参数映射（未知键由工具侧按约定忽略）
    pub args: HashMap<String, ArgValue>,
    /// 依赖的任务 ID 集合
    pub depends_on: Vec<TaskId>,
    /// 当前状态
    pub status: TaskStatus,
    /// 已尝试次数
    pub attempts: u32,
}

impl SubTask {
    pub fn new(description: impl Into<String>, route: Route) -> Self {
        Self {
            id: format!("st_{}", &uuid::Uuid::new_v4().to_string()[..8]),
            description: description.into(),
            route,
            capability: None,
            args: HashMap::new(),
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
            attempts: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    pub fn depends_on_all(mut self, deps: Vec<TaskId>) -> Self {
        self.depends_on = deps;
        self
    }
}

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// 超时
    Timeout,
    /// 能力调用硬失败（异常 / 传输错误）
    Capability,
    /// 软失败：传输层成功但 payload 命中软错误标记
    SoftError,
    /// 参数校验失败，重复执行必然同样失败，不重试
    InvalidArgument,
    /// 模型调用失败
    Llm,
    /// 依赖失败导致的跳过，不重试
    DependencySkipped,
    /// 请求取消
    Cancelled,
}

impl FailureKind {
    /// 是否值得重试（确定性失败与跳过不重试）
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Capability | Self::SoftError | Self::Llm)
    }
}

/// 子任务失败描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SubTaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SubTaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// 单个子任务的最终执行结果
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub outcome: Result<String, SubTaskFailure>,
    /// 实际尝试次数（Skipped 为 0）
    pub attempts: u32,
}

impl ExecutionResult {
    pub fn succeeded(task_id: impl Into<TaskId>, payload: impl Into<String>, attempts: u32) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: Ok(payload.into()),
            attempts,
        }
    }

    pub fn failed(task_id: impl Into<TaskId>, failure: SubTaskFailure, attempts: u32) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: Err(failure),
            attempts,
        }
    }

    pub fn skipped(task_id: impl Into<TaskId>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: Err(SubTaskFailure::new(FailureKind::DependencySkipped, reason)),
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_skipped(&self) -> bool {
        matches!(&self.outcome, Err(f) if f.kind == FailureKind::DependencySkipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_retryable() {
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::SoftError.is_retryable());
        assert!(!FailureKind::InvalidArgument.is_retryable());
        assert!(!FailureKind::DependencySkipped.is_retryable());
    }

    #[test]
    fn test_subtask_builder() {
        let task = SubTask::new("get_weather: Seoul", Route::Tool)
            .with_id("t1")
            .with_capability("get_weather")
            .with_arg("location", ArgValue::Literal("Seoul".into()));

        assert_eq!(task.id, "t1");
        assert_eq!(task.capability.as_deref(), Some("get_weather"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(
            task.args.get("location"),
            Some(&ArgValue::Literal("Seoul".into()))
        );
    }
}
