//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LIFELINE__*` 覆盖（双下划线表示嵌套，如 `LIFELINE__STRATEGY__MAX_STEPS=5`）。
//! 进程启动时加载一次，之后只读。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub strategy: StrategySection,
    pub executor: ExecutorSection,
    /// Provider 注册表（[[providers]]），为空时注册全部内置 Provider
    pub providers: Vec<ProviderEntry>,
}

/// [app] 段：应用名、记忆目录、是否持久化会话日志
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 会话日志与历史索引所在目录
    pub memory_dir: PathBuf,
    /// 会话结束时是否写入 memory/<date>/session-<id>.json
    pub persist_sessions: bool,
    /// 自定义 prompt 模板目录（planner_*.md / proposer.md），缺省用内置模板
    pub prompts_dir: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            memory_dir: PathBuf::from("memory"),
            persist_sessions: true,
            prompts_dir: None,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock；无 API Key 时回退到 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 采样温度；缺省交给后端
    pub temperature: Option<f32>,
    /// 单次 LLM 请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            temperature: Some(0.2),
            request_timeout_secs: 60,
        }
    }
}

/// 规划模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanningMode {
    #[default]
    Conservative,
    Exploratory,
}

/// exploratory 模式下的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExplorationMode {
    #[default]
    Parallel,
    Sequential,
}

/// [strategy] 段：规划模式、步数/生命线上限、记忆回退、Proposer/Planner 超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategySection {
    pub planning_mode: PlanningMode,
    pub exploration_mode: ExplorationMode,
    pub max_steps: usize,
    pub max_lifelines_per_step: usize,
    pub memory_fallback_enabled: bool,
    /// 附加到 PlanRequest 的历史会话条数上限
    pub historical_context_limit: usize,
    pub proposer_timeout_secs: u64,
    pub planner_timeout_secs: u64,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            planning_mode: PlanningMode::Conservative,
            exploration_mode: ExplorationMode::Parallel,
            max_steps: 3,
            max_lifelines_per_step: 3,
            memory_fallback_enabled: true,
            historical_context_limit: 3,
            proposer_timeout_secs: 30,
            planner_timeout_secs: 60,
        }
    }
}

/// [executor] 段：单计划工具调用上限、单次工具调用超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub max_tool_calls_per_plan: usize,
    pub tool_timeout_secs: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_tool_calls_per_plan: 5,
            tool_timeout_secs: 30,
        }
    }
}

/// [[providers]] 条目：id 与内置实现类型（math / echo）
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// 从 config 目录加载配置，环境变量 LIFELINE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LIFELINE__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("LIFELINE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.strategy.max_steps, 3);
        assert_eq!(cfg.strategy.max_lifelines_per_step, 3);
        assert_eq!(cfg.executor.max_tool_calls_per_plan, 5);
        assert_eq!(cfg.strategy.planning_mode, PlanningMode::Conservative);
        assert!(cfg.strategy.memory_fallback_enabled);
        assert!(cfg.providers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[strategy]
planning_mode = "exploratory"
exploration_mode = "sequential"
max_steps = 4

[executor]
max_tool_calls_per_plan = 2

[[providers]]
id = "calc"
kind = "math"
"#,
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.strategy.planning_mode, PlanningMode::Exploratory);
        assert_eq!(cfg.strategy.exploration_mode, ExplorationMode::Sequential);
        assert_eq!(cfg.strategy.max_steps, 4);
        assert_eq!(cfg.strategy.max_lifelines_per_step, 3);
        assert_eq!(cfg.executor.max_tool_calls_per_plan, 2);
        assert_eq!(cfg.providers.len(), 1);
        assert!(cfg.providers[0].enabled);
    }
}
