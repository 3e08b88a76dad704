//! 记忆层：会话短期记忆（最近 N 轮对话）

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role};
