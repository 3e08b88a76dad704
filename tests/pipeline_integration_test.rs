//! 流水线集成测试：路由 -> 分解 -> 调度 -> 合成端到端

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use moa::core::Orchestrator;
use moa::decomposer::DecomposeRules;
use moa::llm::{LlmClient, MockLlmClient, ScriptedLlmClient};
use moa::router::RoutingRules;
use moa::tools::{Tool, ToolExecutor, ToolRegistry};
use moa::workflow::scheduler::SchedulerConfig;
use moa::RequestPhase;

/// 测试天气工具：按调用顺序返回预设结果，并记录收到的 location 参数
struct FakeWeatherTool {
    replies: Mutex<Vec<Result<String, String>>>,
    calls: AtomicU32,
    locations: Mutex<Vec<String>>,
}

impl FakeWeatherTool {
    fn always_ok() -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            locations: Mutex::new(Vec::new()),
        }
    }

    fn scripted(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            calls: AtomicU32::new(0),
            locations: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Tool for FakeWeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "stub weather"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let location = args
            .get("location")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string();
        self.locations.lock().unwrap().push(location.clone());

        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            Ok(format!("{}: 15°C, clear", location))
        } else {
            replies.remove(0)
        }
    }
}

fn build_orchestrator(
    weather: Arc<FakeWeatherTool>,
    brain: Arc<dyn LlmClient>,
    config: SchedulerConfig,
) -> Orchestrator {
    struct SharedTool(Arc<FakeWeatherTool>);

    #[async_trait]
    impl Tool for SharedTool {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn description(&self) -> &str {
            self.0.description()
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            self.0.execute(args).await
        }
    }

    let mut registry = ToolRegistry::new();
    registry.register(SharedTool(weather));
    let tools = Arc::new(ToolExecutor::new(registry, 5));

    Orchestrator::new(
        brain,
        Arc::new(MockLlmClient),
        tools,
        RoutingRules::default(),
        DecomposeRules::default(),
        config,
        10,
    )
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        max_concurrency: 4,
        task_timeout_secs: 5,
        max_attempts: 2,
        ..SchedulerConfig::default()
    }
}

#[tokio::test]
async fn test_fast_path_weather_single_task() {
    // "Seoul weather"：快速路径 TOOL，单任务，location=Seoul
    let weather = Arc::new(FakeWeatherTool::always_ok());
    let mut orch = build_orchestrator(
        weather.clone(),
        Arc::new(ScriptedLlmClient::new(vec![])),
        fast_config(),
    );

    let report = orch.handle("Seoul weather").await.unwrap();

    assert_eq!(report.phase, RequestPhase::Done);
    assert!(report.fast_path);
    assert_eq!(report.task_count, 1);
    assert_eq!(weather.locations.lock().unwrap().as_slice(), &["Seoul"]);
    assert!(report.response.contains("15°C"));
}

#[tokio::test]
async fn test_comparison_three_task_graph() {
    // "Compare Seoul and Tokyo weather"：两个取数任务并行，比较任务随后执行
    let weather = Arc::new(FakeWeatherTool::always_ok());
    let brain = Arc::new(ScriptedLlmClient::new(vec![
        // 分解计划：畸形，触发规则回退
        "no plan",
        // 比较任务（DIRECT）
        "Both cities are 15°C",
        // 合成润色
        "Seoul and Tokyo are both 15°C and clear.",
    ]));
    let mut orch = build_orchestrator(weather.clone(), brain, fast_config());

    let report = orch.handle("Compare Seoul and Tokyo weather").await.unwrap();

    assert_eq!(report.task_count, 3);
    assert_eq!(report.succeeded, 3);
    let mut locations = weather.locations.lock().unwrap().clone();
    locations.sort();
    assert_eq!(locations, vec!["Seoul", "Tokyo"]);
}

#[tokio::test]
async fn test_multi_entity_all_run_independently() {
    // 四个城市无比较动词：4 个独立任务，全部执行，无合成依赖任务
    let weather = Arc::new(FakeWeatherTool::always_ok());
    let mut orch = build_orchestrator(
        weather.clone(),
        Arc::new(ScriptedLlmClient::new(vec!["no plan", "merged answer"])),
        fast_config(),
    );

    let report = orch.handle("Seoul Tokyo London Berlin weather").await.unwrap();

    assert_eq!(report.task_count, 4);
    assert_eq!(report.succeeded, 4);
    assert_eq!(weather.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_retry_ceiling_enforced_exactly() {
    // 前两次都失败：恰好 2 次尝试后终态 Failed，第三次的成功永远不会发生
    let weather = Arc::new(FakeWeatherTool::scripted(vec![
        Err("connection refused".to_string()),
        Err("connection refused".to_string()),
        Ok("Seoul: 15°C".to_string()),
    ]));
    let mut orch = build_orchestrator(
        weather.clone(),
        Arc::new(ScriptedLlmClient::new(vec![])),
        fast_config(),
    );

    let report = orch.handle("Seoul weather").await.unwrap();

    assert_eq!(weather.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 0);
    // 全部失败：回复声明无法完成
    assert!(report.response.contains("unable to complete"));
}

#[tokio::test]
async fn test_soft_error_payload_reclassified() {
    // 传输层成功但 payload 带软错误标记：按失败处理并耗尽重试
    let weather = Arc::new(FakeWeatherTool::scripted(vec![
        Ok("error: API timeout - please try again".to_string()),
        Ok("error: API timeout - please try again".to_string()),
    ]));
    let mut orch = build_orchestrator(
        weather.clone(),
        Arc::new(ScriptedLlmClient::new(vec![])),
        fast_config(),
    );

    let report = orch.handle("Seoul weather").await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(weather.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_dependency_failure_skips_comparison_task() {
    // 一个取数任务失败：比较任务被跳过而非执行，另一分支的成功仍然可见
    let weather = Arc::new(FakeWeatherTool::scripted(vec![
        Ok("Seoul: 15°C, clear".to_string()),
        Err("city not found".to_string()),
        Err("city not found".to_string()),
    ]));
    let brain = Arc::new(ScriptedLlmClient::new(vec![
        "no plan",
        // 合成润色（比较任务被跳过，不消耗脚本）
        "Seoul is 15°C; the Tokyo lookup failed.",
    ]));
    let mut orch = build_orchestrator(weather.clone(), brain, fast_config());

    let report = orch.handle("Compare Seoul and Tokyo weather").await.unwrap();

    assert_eq!(report.task_count, 3);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn test_no_task_left_pending_under_load() {
    // 并发度 1 的串行化调度下，所有任务仍然全部收敛到终态
    let weather = Arc::new(FakeWeatherTool::always_ok());
    let config = SchedulerConfig {
        max_concurrency: 1,
        ..fast_config()
    };
    let mut orch = build_orchestrator(
        weather.clone(),
        Arc::new(ScriptedLlmClient::new(vec!["no plan", "merged"])),
        config,
    );

    let report = orch.handle("Seoul Tokyo London Berlin weather").await.unwrap();

    assert_eq!(
        report.succeeded + report.failed + report.skipped,
        report.task_count
    );
    assert_eq!(report.succeeded, 4);
}

#[tokio::test]
async fn test_timeout_failure_is_bounded() {
    // 工具内部休眠超过子任务超时：按 Timeout 失败收敛，不会无限等待
    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "get_weather"
        }

        fn description(&self) -> &str {
            "sleeps forever"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok("too late".to_string())
        }
    }

    let mut registry = ToolRegistry::new();
    registry.register(SleepyTool);
    // 工具执行器超时 1 秒，短于调度器超时
    let tools = Arc::new(ToolExecutor::new(registry, 1));

    let mut orch = Orchestrator::new(
        Arc::new(ScriptedLlmClient::new(vec![])),
        Arc::new(MockLlmClient),
        tools,
        RoutingRules::default(),
        DecomposeRules::default(),
        SchedulerConfig {
            task_timeout_secs: 3,
            max_attempts: 1,
            ..fast_config()
        },
        10,
    );

    let report = orch.handle("Seoul weather").await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(report.response.contains("unable to complete"));
}
