//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MOA__*` 覆盖（双下划线表示嵌套，如 `MOA__LLM__BRAIN__MODEL=...`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [app] 段：应用名、对话轮数上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 对话历史保留轮数（短期记忆）
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_context_turns: default_max_context_turns(),
        }
    }
}

fn default_max_context_turns() -> usize {
    10
}

/// [llm] 段：Brain 与 Reasoner 两个本地 OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    #[serde(default)]
    pub brain: LlmEndpointSection,
    #[serde(default)]
    pub reasoner: LlmEndpointSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

/// 单个模型端点：base_url 指向本地 llama-server 或任意 OpenAI 兼容服务
#[derive(Debug, Clone, Deserialize)]
pub struct LlmEndpointSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// 本地服务通常不校验 key，保留覆盖入口
    pub api_key: Option<String>,
}

impl Default for LlmEndpointSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/v1".to_string()
}

fn default_model() -> String {
    "lfm2-1.2b".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [scheduler] 段：并发度、子任务超时、重试次数、软错误标记
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 单次子任务尝试的超时（秒）
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// 总尝试次数上限（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 成功 payload 命中任一标记即按失败处理（不区分大小写）
    #[serde(default = "default_soft_error_markers")]
    pub soft_error_markers: Vec<String>,
    /// 整条请求的截止时间（秒），0 为不限；到期取消所有未完成子任务，已成功的部分结果仍会合成
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            task_timeout_secs: default_task_timeout_secs(),
            max_attempts: default_max_attempts(),
            soft_error_markers: default_soft_error_markers(),
            request_deadline_secs: default_request_deadline_secs(),
        }
    }
}

fn default_request_deadline_secs() -> u64 {
    120
}

fn default_max_concurrency() -> usize {
    4
}

fn default_task_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    2
}

fn default_soft_error_markers() -> Vec<String> {
    vec![
        "error:".into(),
        "failed:".into(),
        "exception:".into(),
        "rate limit".into(),
        "api timeout".into(),
    ]
}

/// [tools] 段：工具超时、Shell 白名单、Search 域名、工作区根目录
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub weather: WeatherSection,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            weather: WeatherSection::default(),
            shell: ShellSection::default(),
            search: SearchSection::default(),
            workspace: WorkspaceSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.weather] 段
#[derive(Debug, Clone, Deserialize)]
pub struct WeatherSection {
    #[serde(default = "default_weather_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_weather_timeout_secs(),
        }
    }
}

fn default_weather_timeout_secs() -> u64 {
    30
}

/// [tools.shell] 段：允许执行的命令名（仅首词，如 ls、uv、cargo）
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
        }
    }
}

/// [tools.workspace] 段：文件工具的沙箱根目录
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceSection {
    #[serde(default = "default_workspace_root")]
    pub root: String,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

fn default_workspace_root() -> String {
    "workspace".to_string()
}

fn default_allowed_commands() -> Vec<String> {
    vec![
        "ls".into(),
        "cat".into(),
        "head".into(),
        "wc".into(),
        "uv".into(),
        "python".into(),
        "cargo".into(),
        "rustc".into(),
        "git".into(),
        "echo".into(),
    ]
}

/// [tools.search] 段：搜索端点、超时、最大字符数、允许的域名白名单
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            timeout_secs: default_search_timeout_secs(),
            max_result_chars: default_max_result_chars(),
            allowed_domains: default_allowed_domains(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://html.duckduckgo.com/html/?q=".to_string()
}

fn default_search_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    4000
}

fn default_allowed_domains() -> Vec<String> {
    vec![
        "html.duckduckgo.com".into(),
        "en.wikipedia.org".into(),
        "zh.wikipedia.org".into(),
        "ko.wikipedia.org".into(),
        "github.com".into(),
        "raw.githubusercontent.com".into(),
        "stackoverflow.com".into(),
        "docs.rs".into(),
        "crates.io".into(),
        "doc.rust-lang.org".into(),
        "arxiv.org".into(),
        "news.ycombinator.com".into(),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            scheduler: SchedulerSection::default(),
            tools: ToolsSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 MOA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MOA__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MOA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.scheduler.max_concurrency, 4);
        assert_eq!(cfg.scheduler.max_attempts, 2);
        assert_eq!(cfg.llm.brain.base_url, "http://127.0.0.1:8080/v1");
        assert!(!cfg.tools.search.allowed_domains.is_empty());
    }

    #[test]
    fn test_fallback_defaults_match_deserialized_defaults() {
        // 配置文件加载失败时的 AppConfig::default() 必须与空 TOML 反序列化结果一致，
        // 否则回退配置会得到 0 超时 / 空白名单
        let fallback = AppConfig::default();
        assert_eq!(fallback.scheduler.task_timeout_secs, 60);
        assert_eq!(fallback.scheduler.request_deadline_secs, 120);
        assert_eq!(fallback.tools.tool_timeout_secs, 30);
        assert_eq!(fallback.app.max_context_turns, 10);
        assert_eq!(fallback.llm.timeouts.request, 60);
        assert_eq!(fallback.tools.workspace.root, "workspace");
        assert!(!fallback.tools.shell.allowed_commands.is_empty());
        assert!(!fallback.scheduler.soft_error_markers.is_empty());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moa.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[scheduler]\nmax_concurrency = 2\nmax_attempts = 3\n\n[llm.brain]\nmodel = \"test-model\""
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.scheduler.max_concurrency, 2);
        assert_eq!(cfg.scheduler.max_attempts, 3);
        assert_eq!(cfg.llm.brain.model, "test-model");
        // 未覆盖的键保持默认
        assert_eq!(cfg.scheduler.task_timeout_secs, 60);
    }
}
