//! 错误类型
//!
//! 按请求级与子任务级分层：AgentError 只覆盖会中止整个请求的错误（空输入、环依赖）与工具层失败；
//! 路由/分解失败在组件内部降级（DIRECT / 原子任务），子任务失败由 workflow::SubTaskFailure 承载并被调度器吸收，
//! 请求取消与截止时间通过 CancellationToken 表达而非错误值。

use thiserror::Error;

/// 请求处理过程中可能出现的不可恢复错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 规范化后为空的输入，无法路由
    #[error("Empty utterance")]
    EmptyUtterance,

    /// 任务图含环，构建期拒绝，不做任何部分执行
    #[error("Cyclic dependency in task graph: {0}")]
    CyclicDependency(String),

    /// 图中引用了不存在的任务 ID
    #[error("Unknown task id in dependency: {0}")]
    UnknownDependency(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),
}
