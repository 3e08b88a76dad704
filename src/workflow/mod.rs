//! 任务图与调度
//!
//! 类型定义（types）、依赖图（graph）、构建器（builder）与并发调度器（scheduler）。

pub mod builder;
pub mod graph;
pub mod scheduler;
pub mod types;

pub use builder::TaskGraphBuilder;
pub use graph::TaskGraph;
pub use scheduler::{Scheduler, SchedulerConfig, SubTaskExecutor};
pub use types::{
    ArgValue, ExecutionResult, FailureKind, SubTask, SubTaskFailure, TaskId, TaskStatus,
};
