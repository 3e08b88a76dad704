//! 合成器：将按分解顺序排列的子任务结果拼装为最终回复
//!
//! 确定性合并为底座：每个子任务要么给出成功 payload，要么给出显式的失败/跳过标记，
//! 部分成功对用户永远可见。全部失败时输出"无法完成"声明而非编造答案。
//! 多段结果可选地交给 Brain 润色成连贯回答，润色失败时回退确定性合并结果。

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::workflow::types::{ExecutionResult, FailureKind, SubTask, TaskId};

/// 合成输入项：分解顺序、任务描述与最终结果
#[derive(Debug, Clone)]
pub struct SynthesisItem {
    pub task_id: TaskId,
    pub description: String,
    pub outcome: Result<String, String>,
    pub skipped: bool,
}

impl SynthesisItem {
    /// 从任务与执行结果配对构造（结果已按分解顺序排列）
    pub fn from_results(tasks: &[SubTask], results: &[ExecutionResult]) -> Vec<Self> {
        results
            .iter()
            .map(|result| {
                let description = tasks
                    .iter()
                    .find(|t| t.id == result.task_id)
                    .map(|t| t.description.clone())
                    .unwrap_or_else(|| result.task_id.clone());
                SynthesisItem {
                    task_id: result.task_id.clone(),
                    description,
                    outcome: result
                        .outcome
                        .as_ref()
                        .map(|p| p.clone())
                        .map_err(|f| f.to_string()),
                    skipped: matches!(&result.outcome, Err(f) if f.kind == FailureKind::DependencySkipped),
                }
            })
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

const POLISH_SYSTEM_PROMPT: &str = "You are an assistant composing a final answer from sub-task results. \
Combine the sections into one coherent, concise reply in the user's language. \
Keep every fact from the sections; clearly mention any part marked FAILED or SKIPPED. \
Do not invent information that is not in the sections.";

/// 合成器：确定性合并 + 可选 Brain 润色
pub struct Synthesizer {
    llm: Option<Arc<dyn LlmClient>>,
}

impl Synthesizer {
    /// 带润色模型的合成器
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm: Some(llm) }
    }

    /// 纯确定性合成器（不调用模型）
    pub fn deterministic() -> Self {
        Self { llm: None }
    }

    /// 合成最终回复；items 必须按原始分解顺序排列
    pub async fn synthesize(&self, utterance: &str, items: &[SynthesisItem]) -> String {
        if items.is_empty() {
            return "I could not complete the request: no sub-task produced a result.".to_string();
        }

        // 全部失败/跳过：声明无法完成，绝不编造
        if items.iter().all(|i| !i.is_success()) {
            return self.inability_response(items);
        }

        // 单个成功结果直接透传，无需合并
        if items.len() == 1 {
            if let Ok(payload) = &items[0].outcome {
                return payload.clone();
            }
        }

        let merged = merge_sections(items);

        if let Some(llm) = &self.llm {
            match self.polish(llm, utterance, &merged).await {
                Ok(polished) if !polished.trim().is_empty() => return polished,
                Ok(_) => tracing::debug!("polish returned empty text, using merged sections"),
                Err(e) => tracing::warn!(error = %e, "polish failed, using merged sections"),
            }
        }

        merged
    }

    async fn polish(
        &self,
        llm: &Arc<dyn LlmClient>,
        utterance: &str,
        merged: &str,
    ) -> Result<String, String> {
        let messages = vec![
            Message::system(POLISH_SYSTEM_PROMPT),
            Message::user(format!(
                "Original request: {}\n\nSub-task results:\n{}",
                utterance, merged
            )),
        ];
        llm.complete(&messages).await
    }

    fn inability_response(&self, items: &[SynthesisItem]) -> String {
        let mut lines = vec![
            "I was unable to complete the request; every part failed or was skipped.".to_string(),
        ];
        for item in items {
            lines.push(format!("- {}: {}", item.description, marker(item)));
        }
        lines.join("\n")
    }
}

/// 按分解顺序拼接各段，失败/跳过带显式标记
fn merge_sections(items: &[SynthesisItem]) -> String {
    items
        .iter()
        .map(|item| match &item.outcome {
            Ok(payload) => format!("[{}]\n{}", item.description, payload),
            Err(_) => format!("[{}]\n{}", item.description, marker(item)),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn marker(item: &SynthesisItem) -> String {
    match &item.outcome {
        Ok(_) => "OK".to_string(),
        Err(message) if item.skipped => format!("SKIPPED ({})", message),
        Err(message) => format!("FAILED ({})", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn ok_item(id: &str, desc: &str, payload: &str) -> SynthesisItem {
        SynthesisItem {
            task_id: id.to_string(),
            description: desc.to_string(),
            outcome: Ok(payload.to_string()),
            skipped: false,
        }
    }

    fn failed_item(id: &str, desc: &str, message: &str) -> SynthesisItem {
        SynthesisItem {
            task_id: id.to_string(),
            description: desc.to_string(),
            outcome: Err(message.to_string()),
            skipped: false,
        }
    }

    fn skipped_item(id: &str, desc: &str) -> SynthesisItem {
        SynthesisItem {
            task_id: id.to_string(),
            description: desc.to_string(),
            outcome: Err("dependency failed".to_string()),
            skipped: true,
        }
    }

    #[tokio::test]
    async fn test_single_success_passed_through() {
        let s = Synthesizer::deterministic();
        let reply = s
            .synthesize("Seoul weather", &[ok_item("t1", "get_weather: Seoul", "Seoul: 15C")])
            .await;
        assert_eq!(reply, "Seoul: 15C");
    }

    #[tokio::test]
    async fn test_partial_failure_visible_in_decomposition_order() {
        let s = Synthesizer::deterministic();
        let reply = s
            .synthesize(
                "Compare Seoul Tokyo weather",
                &[
                    ok_item("t1", "get_weather: Seoul", "Seoul: 15C"),
                    failed_item("t2", "get_weather: Tokyo", "Timeout: exceeded 60s"),
                    skipped_item("t3", "Compare weather"),
                ],
            )
            .await;

        let seoul = reply.find("Seoul: 15C").expect("success payload present");
        let tokyo = reply.find("FAILED").expect("failure marker present");
        let compare = reply.find("SKIPPED").expect("skip marker present");
        assert!(seoul < tokyo && tokyo < compare);
    }

    #[tokio::test]
    async fn test_all_failed_states_inability() {
        let s = Synthesizer::deterministic();
        let reply = s
            .synthesize(
                "weather",
                &[
                    failed_item("t1", "get_weather: Seoul", "down"),
                    skipped_item("t2", "Compare weather"),
                ],
            )
            .await;
        assert!(reply.contains("unable to complete"));
        assert!(reply.contains("get_weather: Seoul"));
    }

    #[tokio::test]
    async fn test_polish_used_when_available() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            "Seoul is 15C while Tokyo is 18C, so Tokyo is warmer.",
        ]));
        let s = Synthesizer::new(llm);
        let reply = s
            .synthesize(
                "Compare Seoul and Tokyo weather",
                &[
                    ok_item("t1", "get_weather: Seoul", "Seoul: 15C"),
                    ok_item("t2", "get_weather: Tokyo", "Tokyo: 18C"),
                ],
            )
            .await;
        assert!(reply.contains("Tokyo is warmer"));
    }

    #[tokio::test]
    async fn test_polish_failure_falls_back_to_merge() {
        // 脚本耗尽：complete 返回 Err
        let llm = Arc::new(ScriptedLlmClient::new(vec![]));
        let s = Synthesizer::new(llm);
        let reply = s
            .synthesize(
                "two cities",
                &[
                    ok_item("t1", "get_weather: Seoul", "Seoul: 15C"),
                    ok_item("t2", "get_weather: Tokyo", "Tokyo: 18C"),
                ],
            )
            .await;
        assert!(reply.contains("Seoul: 15C"));
        assert!(reply.contains("Tokyo: 18C"));
    }
}
