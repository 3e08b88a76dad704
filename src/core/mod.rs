//! 核心编排层：错误类型与请求状态机

pub mod error;
pub mod orchestrator;

pub use error::AgentError;
pub use orchestrator::{Orchestrator, RequestPhase, RequestReport, RouteExecutor};
