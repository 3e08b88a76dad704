//! Mock LLM 客户端（用于测试，无需本地模型服务）
//!
//! MockLlmClient 回显最后一条 User 消息；ScriptedLlmClient 按脚本顺序返回预设回复，
//! 用于测试路由分类与分解计划的 JSON 解析路径。

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::LlmClient;
use crate::memory::Message;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::memory::Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("Echo from Mock: {}", last_user))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> Result<Pin<Box<dyn futures_util::Stream<Item = Result<String, String>> + Send>>, String>
    {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}

/// 脚本化客户端：按顺序弹出预设回复，脚本耗尽后返回 Err
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        self.responses
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .ok_or_else(|| "script exhausted".to_string())
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> Result<Pin<Box<dyn futures_util::Stream<Item = Result<String, String>> + Send>>, String>
    {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}
