//! Tiny MoA - Rust 本地混合智能体系统
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器（路由 -> 分解 -> 调度 -> 合成）与错误类型
//! - **decomposer**: 复合请求分解为可调度的子任务列表
//! - **llm**: 模型端口抽象与实现（OpenAI 兼容本地端点 / Mock）
//! - **memory**: 会话短期记忆
//! - **router**: 快速规则路由 + 模型分类（TOOL / REASONER / DIRECT）
//! - **synthesizer**: 按分解顺序合并子任务结果为最终回复
//! - **tools**: 工具箱（weather、search、calculate、time、shell、workspace 文件）与执行器
//! - **workflow**: 任务图（DAG）、构建器与有界并发调度器

pub mod config;
pub mod core;
pub mod decomposer;
pub mod llm;
pub mod memory;
pub mod router;
pub mod synthesizer;
pub mod tools;
pub mod workflow;

pub use crate::core::{AgentError, Orchestrator, RequestPhase, RequestReport};
