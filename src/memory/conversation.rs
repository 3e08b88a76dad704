//! 会话消息与短期记忆

use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 短期记忆：最近 N 轮对话（每轮含 user + assistant，实际保留约 max_turns*2 条消息）
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        let max_messages = self.max_turns * 2;
        if self.messages.len() > max_messages {
            let overflow = self.messages.len() - max_messages;
            self.messages.drain(0..overflow);
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_truncates_to_max_turns() {
        let mut memory = ConversationMemory::new(2);
        for i in 0..6 {
            memory.push(Message::user(format!("u{}", i)));
            memory.push(Message::assistant(format!("a{}", i)));
        }
        assert_eq!(memory.messages().len(), 4);
        assert_eq!(memory.messages()[0].content, "u4");
    }
}
