//! 请求编排器：主控流水线
//!
//! 每条请求按固定状态机推进：RECEIVED -> ROUTED -> DECOMPOSED -> SCHEDULED -> SYNTHESIZED -> DONE，
//! 任一步不可恢复错误进入终态 FAILED。DECOMPOSED 对原子输入同样执行（产出单节点图），
//! 下游组件不特判"未分解"。任务图为请求私有，随请求结束丢弃。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::decomposer::{DecomposeRules, Decomposer};
use crate::llm::{LlmClient, OpenAiClient};
use crate::memory::{ConversationMemory, Message};
use crate::router::{Route, Router, RoutingRules};
use crate::synthesizer::{SynthesisItem, Synthesizer};
use crate::tools::{
    CalculatorTool, SearchTool, ShellTool, TimeTool, ToolExecutor, ToolRegistry, WeatherTool,
    WorkspaceGuard, WorkspaceListTool, WorkspaceReadTool, WorkspaceWriteTool,
};
use crate::workflow::scheduler::{Scheduler, SchedulerConfig, SubTaskExecutor};
use crate::workflow::types::{ArgValue, FailureKind, SubTask, SubTaskFailure};
use crate::workflow::TaskGraph;

/// 请求处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    Routed,
    Decomposed,
    Scheduled,
    Synthesized,
    Done,
    Failed,
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Received => "RECEIVED",
            Self::Routed => "ROUTED",
            Self::Decomposed => "DECOMPOSED",
            Self::Scheduled => "SCHEDULED",
            Self::Synthesized => "SYNTHESIZED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// 单条请求的处理报告
#[derive(Debug, Clone)]
pub struct RequestReport {
    pub request_id: String,
    pub phase: RequestPhase,
    pub route: Route,
    pub fast_path: bool,
    pub task_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub response: String,
}

const DIRECT_SYSTEM_PROMPT: &str = "You are a helpful local assistant. \
Answer directly and concisely in the user's language, using only your own knowledge.";

const REASONER_SYSTEM_PROMPT: &str = "You are a specialist for coding and mathematical reasoning. \
Think step by step, then give a precise final answer. Use code blocks for code.";

/// 路由执行器：按子任务的路由分发到工具 / 推理模型 / Brain
///
/// 每条请求创建一个，携带该请求时刻的对话上下文快照。
pub struct RouteExecutor {
    tools: Arc<ToolExecutor>,
    brain: Arc<dyn LlmClient>,
    reasoner: Arc<dyn LlmClient>,
    context: Vec<Message>,
}

impl RouteExecutor {
    pub fn new(
        tools: Arc<ToolExecutor>,
        brain: Arc<dyn LlmClient>,
        reasoner: Arc<dyn LlmClient>,
        context: Vec<Message>,
    ) -> Self {
        Self {
            tools,
            brain,
            reasoner,
            context,
        }
    }

    /// 子任务参数转为工具 JSON（此时占位符均已被调度器解析为字面量）
    fn args_json(task: &SubTask) -> serde_json::Value {
        let map: HashMap<&str, &str> = task
            .args
            .iter()
            .filter_map(|(k, v)| match v {
                ArgValue::Literal(s) => Some((k.as_str(), s.as_str())),
                ArgValue::FromTask(_) => None,
            })
            .collect();
        serde_json::json!(map)
    }

    /// 模型类子任务的提示词：描述 + 已解析的依赖结果
    fn model_prompt(task: &SubTask) -> String {
        let mut inputs: Vec<(&String, &String)> = task
            .args
            .iter()
            .filter_map(|(k, v)| match v {
                ArgValue::Literal(s) => Some((k, s)),
                ArgValue::FromTask(_) => None,
            })
            .collect();
        if inputs.is_empty() {
            return task.description.clone();
        }
        inputs.sort_by(|a, b| a.0.cmp(b.0));
        let mut prompt = task.description.clone();
        prompt.push_str("\n\nData:\n");
        for (name, value) in inputs {
            prompt.push_str(&format!("- {}: {}\n", name, value));
        }
        prompt
    }

    async fn run_tool(&self, task: &SubTask) -> Result<String, SubTaskFailure> {
        let capability = task.capability.as_deref().ok_or_else(|| {
            SubTaskFailure::new(FailureKind::InvalidArgument, "TOOL task without capability")
        })?;

        self.tools
            .execute(capability, Self::args_json(task))
            .await
            .map_err(|e| match e {
                AgentError::ToolTimeout(name) => {
                    SubTaskFailure::new(FailureKind::Timeout, format!("tool {} timed out", name))
                }
                // 工具侧约定："Invalid ..."/"Missing ..." 为确定性参数校验失败，重试必然同样失败
                AgentError::ToolExecutionFailed(msg)
                    if msg.starts_with("Invalid") || msg.starts_with("Missing") =>
                {
                    SubTaskFailure::new(FailureKind::InvalidArgument, msg)
                }
                other => SubTaskFailure::new(FailureKind::Capability, other.to_string()),
            })
    }

    async fn run_model(
        &self,
        llm: &Arc<dyn LlmClient>,
        system_prompt: &str,
        task: &SubTask,
        with_context: bool,
    ) -> Result<String, SubTaskFailure> {
        let mut messages = vec![Message::system(system_prompt)];
        if with_context {
            messages.extend(self.context.iter().cloned());
        }
        messages.push(Message::user(Self::model_prompt(task)));

        llm.complete(&messages)
            .await
            .map_err(|e| SubTaskFailure::new(FailureKind::Llm, e))
    }
}

#[async_trait]
impl SubTaskExecutor for RouteExecutor {
    async fn execute(&self, task: &SubTask) -> Result<String, SubTaskFailure> {
        match task.route {
            Route::Tool => self.run_tool(task).await,
            Route::Reasoner => {
                self.run_model(&self.reasoner, REASONER_SYSTEM_PROMPT, task, false)
                    .await
            }
            Route::Direct => {
                self.run_model(&self.brain, DIRECT_SYSTEM_PROMPT, task, true)
                    .await
            }
        }
    }
}

/// 编排器：持有全部组件，handle 驱动一条请求走完状态机
pub struct Orchestrator {
    router: Router,
    decomposer: Decomposer,
    synthesizer: Synthesizer,
    tools: Arc<ToolExecutor>,
    brain: Arc<dyn LlmClient>,
    reasoner: Arc<dyn LlmClient>,
    scheduler_config: SchedulerConfig,
    /// 整条请求的截止时间（秒），0 为不限
    request_deadline_secs: u64,
    memory: ConversationMemory,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// 显式注入全部组件（测试用 Mock / Scripted 客户端走这里）
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        brain: Arc<dyn LlmClient>,
        reasoner: Arc<dyn LlmClient>,
        tools: Arc<ToolExecutor>,
        routing_rules: RoutingRules,
        decompose_rules: DecomposeRules,
        scheduler_config: SchedulerConfig,
        max_context_turns: usize,
    ) -> Self {
        Self {
            router: Router::new(Arc::clone(&brain), routing_rules.clone()),
            decomposer: Decomposer::new(Arc::clone(&brain), decompose_rules, routing_rules),
            synthesizer: Synthesizer::new(Arc::clone(&brain)),
            tools,
            brain,
            reasoner,
            scheduler_config,
            request_deadline_secs: 0,
            memory: ConversationMemory::new(max_context_turns),
            cancel: CancellationToken::new(),
        }
    }

    /// 设置整条请求的截止时间；到期后未完成的子任务被取消/跳过，已成功的部分结果仍会合成
    pub fn with_request_deadline(mut self, secs: u64) -> Self {
        self.request_deadline_secs = secs;
        self
    }

    /// 按配置组装：Brain / Reasoner 各连一个 OpenAI 兼容端点，注册全部内置工具
    pub fn from_config(cfg: &AppConfig) -> Self {
        let brain: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(
            Some(&cfg.llm.brain.base_url),
            &cfg.llm.brain.model,
            cfg.llm.brain.api_key.as_deref(),
        ));
        let reasoner: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(
            Some(&cfg.llm.reasoner.base_url),
            &cfg.llm.reasoner.model,
            cfg.llm.reasoner.api_key.as_deref(),
        ));

        let mut registry = ToolRegistry::new();
        registry.register(WeatherTool::new(cfg.tools.weather.timeout_secs));
        registry.register(TimeTool);
        registry.register(CalculatorTool);
        registry.register(SearchTool::new(
            cfg.tools.search.allowed_domains.clone(),
            cfg.tools.search.endpoint.clone(),
            cfg.tools.search.timeout_secs,
            cfg.tools.search.max_result_chars,
        ));
        registry.register(ShellTool::new(
            cfg.tools.shell.allowed_commands.clone(),
            cfg.tools.tool_timeout_secs,
        ));
        let workspace = WorkspaceGuard::new(&cfg.tools.workspace.root);
        registry.register(WorkspaceListTool::new(workspace.clone()));
        registry.register(WorkspaceReadTool::new(workspace.clone()));
        registry.register(WorkspaceWriteTool::new(workspace));
        let tools = Arc::new(ToolExecutor::new(registry, cfg.tools.tool_timeout_secs));

        let scheduler_config = SchedulerConfig {
            max_concurrency: cfg.scheduler.max_concurrency,
            task_timeout_secs: cfg.scheduler.task_timeout_secs,
            max_attempts: cfg.scheduler.max_attempts,
            soft_error_markers: cfg.scheduler.soft_error_markers.clone(),
        };

        Self::new(
            brain,
            reasoner,
            tools,
            RoutingRules::default(),
            DecomposeRules::default(),
            scheduler_config,
            cfg.app.max_context_turns,
        )
        .with_request_deadline(cfg.scheduler.request_deadline_secs)
    }

    /// 取消令牌：外部触发后，进行中的请求尽快收敛，未启动的子任务被跳过
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tools.tool_descriptions()
    }

    /// 清空对话记忆
    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }

    /// 处理一条用户输入，走完整条流水线
    pub async fn handle(&mut self, utterance: &str) -> Result<RequestReport, AgentError> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(AgentError::EmptyUtterance);
        }

        let request_id = format!("req_{}", &uuid::Uuid::new_v4().to_string()[..8]);
        let mut phase = RequestPhase::Received;
        tracing::info!(request_id = %request_id, phase = %phase, "request received");

        let decision = self.router.route(utterance).await;
        phase = RequestPhase::Routed;
        tracing::info!(
            request_id = %request_id,
            phase = %phase,
            route = ?decision.route,
            fast_path = decision.fast_path,
            "request routed"
        );

        // 原子输入同样走分解，产出单节点图
        let tasks = self.decomposer.decompose(utterance, &decision).await;
        phase = RequestPhase::Decomposed;
        tracing::info!(request_id = %request_id, phase = %phase, task_count = tasks.len(), "request decomposed");

        // 环 / 未知依赖在此处整体拒绝，不做部分执行
        let graph = match TaskGraph::new(tasks.clone()) {
            Ok(graph) => graph,
            Err(e) => {
                tracing::error!(request_id = %request_id, phase = %RequestPhase::Failed, error = %e, "graph construction failed");
                return Err(e);
            }
        };

        let executor = Arc::new(RouteExecutor::new(
            Arc::clone(&self.tools),
            Arc::clone(&self.brain),
            Arc::clone(&self.reasoner),
            self.memory.messages().to_vec(),
        ));
        let scheduler = Scheduler::new(executor, self.scheduler_config.clone());
        let cancel = self.cancel.child_token();
        let deadline_guard = if self.request_deadline_secs > 0 {
            let token = cancel.clone();
            let secs = self.request_deadline_secs;
            Some(tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
                tracing::warn!("request deadline exceeded after {}s, cancelling remaining subtasks", secs);
                token.cancel();
            }))
        } else {
            None
        };
        let results = scheduler.run(graph, cancel).await;
        if let Some(guard) = deadline_guard {
            guard.abort();
        }
        phase = RequestPhase::Scheduled;

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let skipped = results.iter().filter(|r| r.is_skipped()).count();
        let failed = results.len() - succeeded - skipped;
        tracing::info!(
            request_id = %request_id,
            phase = %phase,
            succeeded,
            failed,
            skipped,
            "request scheduled"
        );

        let items = SynthesisItem::from_results(&tasks, &results);
        let response = self.synthesizer.synthesize(utterance, &items).await;
        phase = RequestPhase::Synthesized;
        tracing::debug!(request_id = %request_id, phase = %phase, "request synthesized");

        self.memory.push(Message::user(utterance.to_string()));
        self.memory.push(Message::assistant(response.clone()));

        phase = RequestPhase::Done;
        tracing::info!(request_id = %request_id, phase = %phase, "request done");

        Ok(RequestReport {
            request_id,
            phase,
            route: decision.route,
            fast_path: decision.fast_path,
            task_count: tasks.len(),
            succeeded,
            failed,
            skipped,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, ScriptedLlmClient};
    use crate::tools::Tool;
    use serde_json::Value;

    struct EchoWeather;

    #[async_trait]
    impl Tool for EchoWeather {
        fn name(&self) -> &str {
            "get_weather"
        }

        fn description(&self) -> &str {
            "stub weather"
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            let location = args.get("location").and_then(|v| v.as_str()).unwrap_or("?");
            Ok(format!("{}: 15°C, clear", location))
        }
    }

    fn orchestrator_with(brain: Arc<dyn LlmClient>) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        registry.register(EchoWeather);
        registry.register(CalculatorTool);
        let tools = Arc::new(ToolExecutor::new(registry, 5));

        Orchestrator::new(
            brain,
            Arc::new(MockLlmClient),
            tools,
            RoutingRules::default(),
            DecomposeRules::default(),
            SchedulerConfig {
                task_timeout_secs: 5,
                ..SchedulerConfig::default()
            },
            10,
        )
    }

    #[tokio::test]
    async fn test_empty_utterance_rejected() {
        let mut orch = orchestrator_with(Arc::new(MockLlmClient));
        let result = orch.handle("   ").await;
        assert!(matches!(result, Err(AgentError::EmptyUtterance)));
    }

    #[tokio::test]
    async fn test_atomic_tool_request_end_to_end() {
        // 快速路径命中 get_weather，单任务图，结果直接透传
        let mut orch = orchestrator_with(Arc::new(ScriptedLlmClient::new(vec![])));
        let report = orch.handle("Seoul weather").await.unwrap();

        assert_eq!(report.phase, RequestPhase::Done);
        assert_eq!(report.route, Route::Tool);
        assert!(report.fast_path);
        assert_eq!(report.task_count, 1);
        assert_eq!(report.succeeded, 1);
        assert!(report.response.contains("15°C"));
    }

    #[tokio::test]
    async fn test_deadline_preserves_completed_results() {
        // Tokyo 分支挂起超过截止时间：到期后其被取消、比较任务被跳过，
        // Seoul 的已完成结果仍然进入最终回复
        struct SlowTokyoWeather;

        #[async_trait]
        impl Tool for SlowTokyoWeather {
            fn name(&self) -> &str {
                "get_weather"
            }

            fn description(&self) -> &str {
                "stub weather, hangs on Tokyo"
            }

            async fn execute(&self, args: Value) -> Result<String, String> {
                let location = args.get("location").and_then(|v| v.as_str()).unwrap_or("?");
                if location == "Tokyo" {
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                }
                Ok(format!("{}: 15°C, clear", location))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(SlowTokyoWeather);
        let tools = Arc::new(ToolExecutor::new(registry, 60));

        // 脚本只含分解计划的畸形回复；润色调用脚本耗尽后回退确定性合并
        let mut orch = Orchestrator::new(
            Arc::new(ScriptedLlmClient::new(vec!["no plan"])),
            Arc::new(MockLlmClient),
            tools,
            RoutingRules::default(),
            DecomposeRules::default(),
            SchedulerConfig {
                task_timeout_secs: 60,
                ..SchedulerConfig::default()
            },
            10,
        )
        .with_request_deadline(1);

        let report = orch.handle("Compare Seoul and Tokyo weather").await.unwrap();

        assert_eq!(report.task_count, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.response.contains("Seoul: 15°C"));
    }

    #[tokio::test]
    async fn test_comparison_request_builds_three_task_graph() {
        // 规则回退分解（脚本耗尽），比较任务由 Brain 合并；脚本只供 polish/比较使用
        let brain = Arc::new(ScriptedLlmClient::new(vec![
            // 分解计划请求：非 JSON，触发规则回退
            "cannot plan",
            // 比较子任务（DIRECT 路由）
            "Seoul is colder than Tokyo",
            // 合成润色
            "Seoul: 15°C; Tokyo: 15°C. Seoul is colder than Tokyo",
        ]));
        let mut orch = orchestrator_with(brain);
        let report = orch.handle("Compare Seoul Tokyo weather").await.unwrap();

        assert_eq!(report.task_count, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.phase, RequestPhase::Done);
    }
}
