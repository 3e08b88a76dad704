//! 分解器：将（可能复合、可能夹杂语气词的）单条输入拆成原子子任务列表
//!
//! 两级策略：复合输入先请 Brain 生成 JSON 计划（含能力前缀强制 TOOL 的安全修正），
//! 模型失败或输出畸形时退回确定性的规则分解（按连接词/枚举分隔符切分 + 实体提取），
//! 规则分解也提不出结构时退化为单任务，绝不让分解失败中断流水线。
//! 语气词、助词、独立谓语碎片在任一路径上都会被过滤，绝不会成为独立子任务。

use std::sync::Arc;

use serde::Deserialize;

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::router::{Route, RoutingDecision, RoutingRules};
use crate::workflow::types::{ArgValue, SubTask};

/// 已知能力前缀：计划描述以此开头时强制 TOOL 路由（小模型偶尔会把工具命令标成 brain）
const TOOL_PREFIXES: &[&str] = &[
    "get_weather",
    "get_current_time",
    "search_web",
    "calculate",
    "execute_command",
    "workspace_list",
    "workspace_read",
    "workspace_write",
];

/// 注入的分解规则
#[derive(Debug, Clone)]
pub struct DecomposeRules {
    /// 连接词 / 枚举分隔符，按其切分复合输入
    pub conjunctions: Vec<String>,
    /// 比较 / 聚合触发词，命中时追加依赖全部实体任务的合成子任务
    pub comparison_triggers: Vec<String>,
    /// 语气 / 填充碎片，切分后命中即整段丢弃
    pub filler_fragments: Vec<String>,
    /// 实体提取时忽略的噪声词（能力触发词、冠词等）
    pub noise_words: Vec<String>,
}

impl Default for DecomposeRules {
    fn default() -> Self {
        Self {
            conjunctions: vec![
                " and ".into(),
                "以及".into(),
                "还有".into(),
                "然后".into(),
                "并且".into(),
                "、".into(),
                "；".into(),
                ";".into(),
            ],
            comparison_triggers: vec![
                "compare".into(),
                "对比".into(),
                "比较".into(),
                " vs ".into(),
                "哪个".into(),
                "which is".into(),
            ],
            filler_fragments: vec![
                "tell me".into(),
                "please".into(),
                "告诉我".into(),
                "麻烦".into(),
                "帮我".into(),
                "based on that".into(),
                "据此".into(),
                "谢谢".into(),
                "thanks".into(),
            ],
            noise_words: vec![
                "weather".into(),
                "天气".into(),
                "气温".into(),
                "the".into(),
                "of".into(),
                "in".into(),
                "for".into(),
                "and".into(),
                "与".into(),
                "和".into(),
                "的".into(),
            ],
        }
    }
}

/// Brain 计划输出中的单个条目
#[derive(Debug, Deserialize)]
struct PlanItem {
    #[serde(default)]
    description: String,
    #[serde(default)]
    agent: String,
}

const PLAN_SYSTEM_PROMPT: &str = r#"You are a Task Planner. Break the user's goal into a sequence of simple, executable tasks.

AGENTS:
1. 'tool': for getting data, running commands, checking weather/time, searching, calculating.
2. 'reasoner': STRICTLY for coding tasks and complex math.
3. 'brain': for summarizing, explaining, comparing already-fetched data.

RULES for 'tool' task descriptions (strict format):
- weather -> "get_weather: <city>"
- time/date -> "get_current_time: <timezone>"
- search/news -> "search_web: <keywords>"
- arithmetic -> "calculate: <expression>"
- run command -> "execute_command: <command>"
- workspace files -> "workspace_list: <subdir>" / "workspace_read: <filename>" / "workspace_write: <filename>"
- If the goal has multiple parts, generate tasks for ALL parts.
- A comparison of fetched data is a separate 'brain' task placed AFTER the fetch tasks.

EXAMPLE INPUT: "Compare Seoul and Tokyo weather, and search DeepMind news"
EXAMPLE OUTPUT:
[
  {"description": "get_weather: Seoul", "agent": "tool"},
  {"description": "get_weather: Tokyo", "agent": "tool"},
  {"description": "Compare weather of Seoul and Tokyo", "agent": "brain"},
  {"description": "search_web: DeepMind", "agent": "tool"}
]

Return ONLY the JSON list. No markdown."#;

/// 分解器：模型计划 + 规则回退
pub struct Decomposer {
    llm: Arc<dyn LlmClient>,
    rules: DecomposeRules,
    routing: RoutingRules,
}

impl Decomposer {
    pub fn new(llm: Arc<dyn LlmClient>, rules: DecomposeRules, routing: RoutingRules) -> Self {
        Self { llm, rules, routing }
    }

    /// 分解一条输入；decision 为 Router 对整条输入的路由结果
    ///
    /// 原子输入返回恰好一个子任务，路由与整条输入的路由一致。
    pub async fn decompose(&self, utterance: &str, decision: &RoutingDecision) -> Vec<SubTask> {
        if !self.is_compound(utterance, decision) {
            return vec![self.atomic_task(utterance, decision)];
        }

        match self.plan_with_model(utterance).await {
            Ok(tasks) if !tasks.is_empty() => tasks,
            Ok(_) => {
                tracing::debug!("model plan empty, using rule-based decomposition");
                self.rule_based(utterance, decision)
            }
            Err(e) => {
                tracing::warn!(error = %e, "model plan failed, using rule-based decomposition");
                self.rule_based(utterance, decision)
            }
        }
    }

    /// 复合判定：含连接词切出多段、含比较触发词、或在能力提示下提取出多个实体
    fn is_compound(&self, utterance: &str, decision: &RoutingDecision) -> bool {
        if self.contains_comparison(utterance) {
            return true;
        }
        if self.split_segments(utterance).len() > 1 {
            return true;
        }
        decision.capability_hint.is_some() && self.extract_entities(utterance).len() > 1
    }

    fn contains_comparison(&self, utterance: &str) -> bool {
        let lower = utterance.to_lowercase();
        self.rules
            .comparison_triggers
            .iter()
            .any(|t| lower.contains(t.as_str()))
    }

    /// 整条输入包装为单任务；工具任务的参数取提取出的实体（如 "Seoul weather" -> location=Seoul）
    fn atomic_task(&self, utterance: &str, decision: &RoutingDecision) -> SubTask {
        let mut task = SubTask::new(utterance, decision.route);
        if let Some(capability) = &decision.capability_hint {
            let entities = self.extract_entities(utterance);
            let argument = if entities.is_empty() {
                utterance.to_string()
            } else {
                entities.join(" ")
            };
            task = task
                .with_capability(capability.clone())
                .with_arg(arg_name(capability), ArgValue::Literal(argument));
        }
        task
    }

    /// 模型驱动的计划：JSON 列表 + 能力前缀安全修正
    async fn plan_with_model(&self, utterance: &str) -> Result<Vec<SubTask>, String> {
        let messages = vec![
            Message::system(PLAN_SYSTEM_PROMPT),
            Message::user(utterance.to_string()),
        ];
        let output = self.llm.complete(&messages).await?;
        let items = parse_plan(&output)?;

        let mut tasks: Vec<SubTask> = Vec::new();
        for item in items {
            let description = item.description.trim().to_string();
            if description.is_empty() || self.is_filler(&description) {
                tracing::debug!(fragment = %description, "dropping filler plan item");
                continue;
            }

            // 能力前缀强制 TOOL，无视模型标注的 agent
            if let Some((capability, argument)) = split_tool_prefix(&description) {
                tasks.push(
                    SubTask::new(&description, Route::Tool)
                        .with_capability(capability)
                        .with_arg(arg_name(capability), ArgValue::Literal(argument.to_string())),
                );
                continue;
            }

            let route = match item.agent.to_lowercase().as_str() {
                "tool" => Route::Tool,
                "reasoner" => Route::Reasoner,
                _ => Route::Direct,
            };

            // 比较 / 聚合任务依赖此前全部取数任务，参数引用其结果而非猜测字面值
            if route != Route::Tool && self.contains_comparison(&description) {
                let deps: Vec<String> = tasks
                    .iter()
                    .filter(|t| t.route == Route::Tool)
                    .map(|t| t.id.clone())
                    .collect();
                if !deps.is_empty() {
                    let mut compare = SubTask::new(&description, route);
                    for (i, dep) in deps.iter().enumerate() {
                        compare = compare
                            .with_arg(format!("input_{}", i + 1), ArgValue::FromTask(dep.clone()));
                    }
                    tasks.push(compare.depends_on_all(deps));
                    continue;
                }
            }

            tasks.push(SubTask::new(&description, route));
        }

        Ok(tasks)
    }

    /// 确定性规则分解：切分段落、提取实体、过滤语气碎片
    ///
    /// 对相同输入产出相同的实体集合（数量与字面参数均一致）。
    fn rule_based(&self, utterance: &str, decision: &RoutingDecision) -> Vec<SubTask> {
        // 显式比较 + 能力提示：整句做实体提取，连接词（"and"、"和"）不拆散实体组
        if self.contains_comparison(utterance) {
            if let Some(capability) = &decision.capability_hint {
                let entities = self.extract_entities(utterance);
                if entities.len() > 1 {
                    let mut tasks: Vec<SubTask> = entities
                        .into_iter()
                        .map(|entity| {
                            SubTask::new(format!("{}: {}", capability, entity), Route::Tool)
                                .with_capability(capability.clone())
                                .with_arg(arg_name(capability), ArgValue::Literal(entity))
                        })
                        .collect();
                    let deps: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
                    let mut compare = SubTask::new(
                        format!("Compare and combine the results for: {}", utterance.trim()),
                        Route::Direct,
                    );
                    for (i, dep) in deps.iter().enumerate() {
                        compare = compare
                            .with_arg(format!("input_{}", i + 1), ArgValue::FromTask(dep.clone()));
                    }
                    tasks.push(compare.depends_on_all(deps));
                    return tasks;
                }
            }
        }

        let segments = self.split_segments(utterance);

        // 多意图：每段独立路由；单段多实体：按实体展开
        let mut tasks: Vec<SubTask> = Vec::new();
        if segments.len() > 1 {
            for segment in &segments {
                let seg_decision = self
                    .routing
                    .match_route(segment)
                    .unwrap_or_else(|| RoutingDecision {
                        route: decision.route,
                        capability_hint: decision.capability_hint.clone(),
                        specialist_prompt: None,
                        fast_path: true,
                    });
                tasks.extend(self.segment_tasks(segment, &seg_decision));
            }
        } else if let Some(segment) = segments.first() {
            tasks.extend(self.segment_tasks(segment, decision));
        }

        if tasks.is_empty() {
            // 过滤后一无所有：退化为原子任务而非报错
            return vec![self.atomic_task(utterance, decision)];
        }

        // 显式比较要求：追加依赖全部实体任务的合成子任务
        if self.contains_comparison(utterance) && tasks.len() > 1 {
            let deps: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
            let mut compare = SubTask::new(
                format!("Compare and combine the results for: {}", utterance.trim()),
                Route::Direct,
            );
            for (i, dep) in deps.iter().enumerate() {
                compare =
                    compare.with_arg(format!("input_{}", i + 1), ArgValue::FromTask(dep.clone()));
            }
            tasks.push(compare.depends_on_all(deps));
        }

        tasks
    }

    /// 单个语义段展开为任务：有能力提示且多实体时逐实体展开，否则整段一个任务
    fn segment_tasks(&self, segment: &str, decision: &RoutingDecision) -> Vec<SubTask> {
        if let Some(capability) = &decision.capability_hint {
            let entities = self.extract_entities(segment);
            if entities.len() > 1 {
                return entities
                    .into_iter()
                    .map(|entity| {
                        SubTask::new(format!("{}: {}", capability, entity), Route::Tool)
                            .with_capability(capability.clone())
                            .with_arg(arg_name(capability), ArgValue::Literal(entity))
                    })
                    .collect();
            }
        }
        vec![self.atomic_task(segment, decision)]
    }

    /// 按连接词 / 枚举分隔符切分，并丢弃语气碎片与空段
    fn split_segments(&self, utterance: &str) -> Vec<String> {
        let mut segments = vec![utterance.to_string()];
        for sep in &self.rules.conjunctions {
            segments = segments
                .into_iter()
                .flat_map(|s| {
                    s.split(sep.as_str())
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .collect();
        }

        segments
            .into_iter()
            .map(|s| s.trim().trim_matches(|c: char| "。，,.!！?？".contains(c)).trim().to_string())
            .filter(|s| !s.is_empty() && !self.is_filler(s))
            .collect()
    }

    /// 语气碎片判定：整段等于某个填充短语，或去掉填充短语后只剩标点/空白
    fn is_filler(&self, segment: &str) -> bool {
        let lower = segment.to_lowercase();
        let mut stripped = lower.clone();
        for filler in &self.rules.filler_fragments {
            stripped = stripped.replace(filler.as_str(), "");
        }
        stripped
            .chars()
            .all(|c| c.is_whitespace() || c.is_ascii_punctuation() || "。，、！？".contains(c))
    }

    /// 实体提取：去掉噪声词 / 触发词 / 填充词 / 路由关键词后剩余的词元，保持原文顺序
    fn extract_entities(&self, segment: &str) -> Vec<String> {
        segment
            .split(|c: char| c.is_whitespace() || "，,、;；。!！?？".contains(c))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .filter(|token| {
                let lower = token.to_lowercase();
                !self.rules.noise_words.iter().any(|w| w == &lower)
                    && !self.rules.comparison_triggers.iter().any(|t| lower.contains(t.as_str()))
                    && !self.is_filler_word(&lower)
                    && !self.is_routing_keyword(&lower)
            })
            .map(str::to_string)
            .collect()
    }

    /// 词元是否为填充短语或其组成词：整词匹配，"Tel" 之类恰为某短语子串的词元不受影响
    fn is_filler_word(&self, lower: &str) -> bool {
        self.rules.filler_fragments.iter().any(|f| {
            f.as_str() == lower || f.split_whitespace().any(|word| word == lower)
        })
    }

    /// 词元是否命中路由关键词表（"weather"、"计算"、"search" 等不是实体）
    fn is_routing_keyword(&self, lower: &str) -> bool {
        self.routing
            .tool_keywords
            .iter()
            .flat_map(|(_, keywords)| keywords.iter())
            .any(|kw| lower == kw.as_str() || lower.contains(kw.as_str()))
    }
}

/// 能力名到默认参数键的映射
fn arg_name(capability: &str) -> &'static str {
    match capability {
        "get_weather" => "location",
        "get_current_time" => "timezone",
        "calculate" => "expression",
        "search_web" => "query",
        "execute_command" => "command",
        "workspace_list" => "path",
        "workspace_read" | "workspace_write" => "filename",
        _ => "query",
    }
}

/// 识别 "get_weather: Seoul" 形态的能力前缀
fn split_tool_prefix(description: &str) -> Option<(&'static str, &str)> {
    let lower = description.to_lowercase();
    for prefix in TOOL_PREFIXES {
        if lower.starts_with(prefix) {
            let rest = description[prefix.len()..].trim_start_matches([':', ' ']).trim();
            return Some((prefix, rest));
        }
    }
    None
}

/// 从模型输出中提取首个 JSON 列表并解析（剥离 markdown 代码块）
fn parse_plan(output: &str) -> Result<Vec<PlanItem>, String> {
    let cleaned = output.replace("```json", "").replace("```", "");
    let start = cleaned.find('[').ok_or("no JSON list in plan")?;
    let end = cleaned.rfind(']').ok_or("no JSON list in plan")?;
    if end <= start {
        return Err("malformed JSON brackets".to_string());
    }
    serde_json::from_str(&cleaned[start..=end]).map_err(|e| e.to_string())
}
