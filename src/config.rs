//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MERLIN__*` 覆盖（双下划线表示嵌套，如 `MERLIN__LLM__MODEL=deepseek-chat`）。
//! 操作目录单独放在 config/tools.toml（见 tools::ToolCatalog）。
//! SettingsHandle 持有当前生效的配置快照，reload 后原子替换，正在进行的运行不受影响。
//! [session] 的两个容量在下一次运行开始时应用到共享的 SessionMemory。

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::watch;

use crate::core::PipelineError;
use crate::tools::ToolCatalog;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub session: SessionSection,
    pub classifier: ClassifierSection,
    pub routing: RoutingSection,
    pub prompts: PromptsSection,
    pub rate_limit: RateLimitSection,
    pub engine: EngineSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：结构化调用服务端点
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 为空时按 base_url 自动选择
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: None,
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// [session] 段：会话记忆容量
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_max_history_rounds")]
    pub max_history_rounds: usize,
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
}

fn default_max_history_rounds() -> usize {
    3
}

fn default_max_concurrent_sessions() -> usize {
    200
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_history_rounds: default_max_history_rounds(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
        }
    }
}

/// [classifier] 段：复合指令 / 上下文依赖判定用的标记词
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierSection {
    #[serde(default = "default_complex_markers")]
    pub complex_markers: Vec<String>,
    #[serde(default = "default_contextual_markers")]
    pub contextual_markers: Vec<String>,
    #[serde(default = "default_continuation_markers")]
    pub continuation_markers: Vec<String>,
    /// 字符数达到该值即视为复合指令
    #[serde(default = "default_compound_min_chars")]
    pub compound_min_chars: usize,
    /// 有历史时，字符数低于该值视为依赖上下文
    #[serde(default = "default_short_command_chars")]
    pub short_command_chars: usize,
}

fn default_complex_markers() -> Vec<String> {
    vec![
        "然后".into(),
        "接着".into(),
        "之后".into(),
        "并且".into(),
        "再把".into(),
        "；".into(),
        "then".into(),
        "after that".into(),
    ]
}

fn default_contextual_markers() -> Vec<String> {
    vec![
        "它".into(),
        "它们".into(),
        "这些".into(),
        "那些".into(),
        "这列".into(),
        "那列".into(),
        "上面".into(),
        "刚才".into(),
        "刚刚".into(),
        "them".into(),
        "those".into(),
        "these".into(),
        "previous".into(),
    ]
}

fn default_continuation_markers() -> Vec<String> {
    vec![
        "也".into(),
        "还".into(),
        "再".into(),
        "同样".into(),
        "一样".into(),
        "继续".into(),
        "接着".into(),
        "另外".into(),
        "同时".into(),
        "also".into(),
        "again".into(),
        "same".into(),
    ]
}

fn default_compound_min_chars() -> usize {
    50
}

fn default_short_command_chars() -> usize {
    7
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            complex_markers: default_complex_markers(),
            contextual_markers: default_contextual_markers(),
            continuation_markers: default_continuation_markers(),
            compound_min_chars: default_compound_min_chars(),
            short_command_chars: default_short_command_chars(),
        }
    }
}

/// 工具组：名称、触发关键词、成员操作
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ToolGroup {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub operations: Vec<String>,
}

/// [routing] 段：工具组（按声明顺序匹配）与选择器前缀
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingSection {
    #[serde(default)]
    pub groups: Vec<ToolGroup>,
    #[serde(default = "default_selector_prefix")]
    pub selector_prefix: String,
}

fn default_selector_prefix() -> String {
    "route_to_".to_string()
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            selector_prefix: default_selector_prefix(),
        }
    }
}

/// [prompts] 段：提示词模板与帮助信息
#[derive(Debug, Clone, Deserialize)]
pub struct PromptsSection {
    /// 翻译用 system 提示词，`{headers}` 替换为表格列名
    #[serde(default = "default_general_base")]
    pub general_base: String,
    #[serde(default = "default_coordinator")]
    pub coordinator: String,
    #[serde(default = "default_router")]
    pub router: String,
    #[serde(default = "default_help_message")]
    pub help_message: String,
    /// 与指令完全相同（忽略大小写）时直接返回帮助信息
    #[serde(default = "default_help_phrases")]
    pub help_phrases: Vec<String>,
    /// 模型未调用任何操作且无文本回复时的兜底提示
    #[serde(default = "default_friendly_fallback")]
    pub friendly_fallback: String,
}

fn default_general_base() -> String {
    "你是表格编辑助手，负责把用户的自然语言指令翻译为操作调用。\n\
     当前表格的列名：{headers}\n\
     规则：只能使用上面出现的列名；列名无法确定时调用 ask_clarification_question；\
     只能调用提供的操作，不要编造参数。"
        .to_string()
}

fn default_coordinator() -> String {
    "你是任务拆分助手。把用户的复合指令拆分为按顺序执行的原子指令，\
     每条指令只做一件事，并保持用户原有的措辞与数值。必须调用 execute_tasks_in_order。"
        .to_string()
}

fn default_router() -> String {
    "你是路由助手。判断用户指令属于哪一类操作，并调用对应的 route_to_* 选择器。".to_string()
}

fn default_help_message() -> String {
    "我可以帮你用自然语言编辑表格：批量设置列值、按条件填充、数学运算、清洗文本、\
     拆分/合并列、排序去重、统计汇总等。直接描述你想做的修改即可。"
        .to_string()
}

fn default_help_phrases() -> Vec<String> {
    vec![
        "帮助".into(),
        "help".into(),
        "你能做什么".into(),
        "有什么功能".into(),
        "怎么用".into(),
        "功能列表".into(),
    ]
}

fn default_friendly_fallback() -> String {
    "抱歉，我没有理解这条指令。可以换个说法，或者输入「帮助」查看我能做什么。".to_string()
}

impl Default for PromptsSection {
    fn default() -> Self {
        Self {
            general_base: default_general_base(),
            coordinator: default_coordinator(),
            router: default_router(),
            help_message: default_help_message(),
            help_phrases: default_help_phrases(),
            friendly_fallback: default_friendly_fallback(),
        }
    }
}

/// [rate_limit] 段：令牌桶 + 限流退避
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    /// 令牌桶容量（允许的突发请求数）
    #[serde(default = "default_bucket_capacity")]
    pub capacity: u32,
    /// 每秒补充的令牌数
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
    /// 遇到限流时的最大尝试次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_bucket_capacity() -> u32 {
    3
}

fn default_refill_per_sec() -> f64 {
    0.5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            capacity: default_bucket_capacity(),
            refill_per_sec: default_refill_per_sec(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// [engine] 段：快照目录
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("uploads")
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

/// [tools] 段：操作目录文件
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("config/tools.toml")
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 MERLIN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MERLIN__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("MERLIN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 一次运行所需的全部外部配置：应用配置 + 操作目录
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub config: AppConfig,
    pub catalog: ToolCatalog,
}

impl PipelineSettings {
    pub fn new(config: AppConfig, catalog: ToolCatalog) -> Self {
        Self { config, catalog }
    }

    /// 加载配置与其指向的操作目录
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, PipelineError> {
        let config = load_config(config_path)?;
        let catalog = ToolCatalog::load(&config.tools.catalog_path)?;
        Ok(Self { config, catalog })
    }
}

/// 可热更新的配置句柄：每次运行开始时取一次快照
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<Arc<PipelineSettings>>>,
}

impl SettingsHandle {
    pub fn new(settings: PipelineSettings) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(settings));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<PipelineSettings> {
        self.tx.borrow().clone()
    }

    pub fn replace(&self, settings: PipelineSettings) {
        self.tx.send_replace(Arc::new(settings));
    }

    /// 重新从磁盘与环境变量加载；失败时保留旧配置
    pub fn reload(&self, config_path: Option<PathBuf>) -> Result<(), PipelineError> {
        let settings = PipelineSettings::load(config_path)?;
        tracing::info!(
            operations = settings.catalog.len(),
            groups = settings.config.routing.groups.len(),
            "settings reloaded"
        );
        self.replace(settings);
        Ok(())
    }
}
