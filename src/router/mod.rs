//! 路由器：将单条用户输入分类为执行路由（TOOL / REASONER / DIRECT）
//!
//! 两级策略：先走纯规则快速路径（注入的关键词表，不调用模型，低延迟且可确定性测试），
//! 未命中时委托 Brain 模型分类；模型输出越界或格式错误时一律回退 DIRECT，绝不让路由失败中断流水线。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::LlmClient;
use crate::memory::Message;

/// 执行路由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Route {
    /// 需要外部能力（天气、搜索、计算、命令执行）
    Tool,
    /// 编码 / 数学 / 证明类推理任务
    Reasoner,
    /// Brain 直接回复（闲聊、翻译、内部知识）
    Direct,
}

/// 路由决策
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub route: Route,
    /// TOOL 路由的能力提示（如 get_weather）
    pub capability_hint: Option<String>,
    /// 给 specialist 的优化提示词（搜索关键词 / 精确 shell 命令）
    pub specialist_prompt: Option<String>,
    /// 是否由确定性规则命中（未调用模型）
    pub fast_path: bool,
}

impl RoutingDecision {
    fn direct() -> Self {
        Self {
            route: Route::Direct,
            capability_hint: None,
            specialist_prompt: None,
            fast_path: false,
        }
    }
}

/// 注入的路由规则：能力名 -> 触发关键词，及 REASONER 关键词
///
/// 作为显式配置传入构造器，无进程级可变单例，便于隔离测试。
#[derive(Debug, Clone)]
pub struct RoutingRules {
    /// (能力名, 触发关键词列表)，按序匹配，先命中先返回
    pub tool_keywords: Vec<(String, Vec<String>)>,
    pub reasoner_keywords: Vec<String>,
}

impl RoutingRules {
    /// 纯规则匹配：命中工具关键词返回 TOOL + 能力名，命中推理关键词返回 REASONER
    pub fn match_route(&self, utterance: &str) -> Option<RoutingDecision> {
        let lower = utterance.to_lowercase();

        for (capability, keywords) in &self.tool_keywords {
            if keywords.iter().any(|kw| lower.contains(kw.as_str())) {
                return Some(RoutingDecision {
                    route: Route::Tool,
                    capability_hint: Some(capability.clone()),
                    specialist_prompt: None,
                    fast_path: true,
                });
            }
        }

        if self
            .reasoner_keywords
            .iter()
            .any(|kw| lower.contains(kw.as_str()))
        {
            return Some(RoutingDecision {
                route: Route::Reasoner,
                capability_hint: None,
                specialist_prompt: Some(utterance.to_string()),
                fast_path: true,
            });
        }

        None
    }
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self {
            tool_keywords: vec![
                (
                    "get_weather".to_string(),
                    vec!["weather".into(), "天气".into(), "气温".into(), "temperature".into()],
                ),
                (
                    "get_current_time".to_string(),
                    vec!["time".into(), "几点".into(), "时间".into(), "日期".into(), "date".into()],
                ),
                (
                    "calculate".to_string(),
                    vec!["calculate".into(), "计算".into(), "算一下".into()],
                ),
                (
                    "execute_command".to_string(),
                    vec!["version".into(), "版本".into(), "运行".into(), "执行命令".into(), "run command".into()],
                ),
                (
                    "search_web".to_string(),
                    vec!["search".into(), "搜索".into(), "查一下".into(), "news".into(), "新闻".into(), "最新".into()],
                ),
            ],
            reasoner_keywords: vec![
                "代码".into(),
                "函数".into(),
                "实现".into(),
                "算法".into(),
                "数学".into(),
                "证明".into(),
                "code".into(),
                "function".into(),
                "fibonacci".into(),
                "prove".into(),
                "math".into(),
            ],
        }
    }
}

/// Brain 分类输出的 JSON 形状
#[derive(Debug, Deserialize)]
struct ClassifyReply {
    route: String,
    #[serde(default)]
    specialist_prompt: String,
    #[serde(default)]
    tool_hint: String,
}

const CLASSIFY_SYSTEM_PROMPT: &str = r#"You are a task router. Analyze the user's request and decide how to handle it.

Available routes:
- REASONER: STRICTLY for coding tasks and complex math problems only.
- TOOL: for ANY request requiring external information (weather, news, time), checking system status, or running commands.
- DIRECT: for general conversation, greetings, translations, and internal knowledge.

Respond with a JSON object:
{"route": "REASONER" or "TOOL" or "DIRECT", "specialist_prompt": "optimized keywords or the EXACT shell command", "tool_hint": "tool name if TOOL route"}"#;

/// 路由器：规则快速路径 + Brain 模型分类
pub struct Router {
    llm: Arc<dyn LlmClient>,
    rules: RoutingRules,
}

impl Router {
    pub fn new(llm: Arc<dyn LlmClient>, rules: RoutingRules) -> Self {
        Self { llm, rules }
    }

    /// 路由一条规范化后的用户输入
    pub async fn route(&self, utterance: &str) -> RoutingDecision {
        if let Some(decision) = self.fast_match(utterance) {
            tracing::debug!(route = ?decision.route, hint = ?decision.capability_hint, "router fast path");
            return decision;
        }

        match self.llm_classify(utterance).await {
            Ok(decision) => decision,
            Err(e) => {
                // 路由失败不中断流水线，回退 DIRECT
                tracing::warn!(error = %e, "routing classification failed, falling back to DIRECT");
                RoutingDecision::direct()
            }
        }
    }

    /// 快速规则匹配（不调用模型）
    pub fn fast_match(&self, utterance: &str) -> Option<RoutingDecision> {
        self.rules.match_route(utterance)
    }

    /// Brain 模型分类，输出约束为三值枚举；解析失败由调用方回退 DIRECT
    async fn llm_classify(&self, utterance: &str) -> Result<RoutingDecision, String> {
        let messages = vec![
            Message::system(CLASSIFY_SYSTEM_PROMPT),
            Message::user(utterance.to_string()),
        ];

        let output = self.llm.complete(&messages).await?;
        let reply = parse_classify_reply(&output)?;

        let route = match reply.route.to_uppercase().as_str() {
            "TOOL" => Route::Tool,
            "REASONER" => Route::Reasoner,
            "DIRECT" => Route::Direct,
            other => return Err(format!("route outside enumeration: {}", other)),
        };

        Ok(RoutingDecision {
            route,
            capability_hint: if reply.tool_hint.is_empty() {
                None
            } else {
                Some(reply.tool_hint)
            },
            specialist_prompt: if reply.specialist_prompt.is_empty() {
                None
            } else {
                Some(reply.specialist_prompt)
            },
            fast_path: false,
        })
    }
}

/// 从模型输出中提取首个 JSON 对象并解析
fn parse_classify_reply(output: &str) -> Result<ClassifyReply, String> {
    let start = output.find('{').ok_or("no JSON object in reply")?;
    let end = output.rfind('}').ok_or("no JSON object in reply")?;
    if end <= start {
        return Err("malformed JSON braces".to_string());
    }
    serde_json::from_str(&output[start..=end]).map_err(|e| e.to_string())
}
