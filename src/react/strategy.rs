//! Strategy Planner：决定规划模式与本次 Attempt 可用的工具集
//!
//! 流程：候选 Provider 的工具 → 按 tool hint 过滤（无匹配则回退到全部候选）→ 排除上一次 Attempt 失败的工具
//! （排除后为空则本次不排除）→ 记忆回退补回相似历史查询或本会话中成功过的工具 → 附加历史会话。
//! 所有覆盖都只作用于本次 Attempt，下一次 Attempt 从 StepContext 重新计算。

use std::sync::Arc;

use crate::config::{ExplorationMode, PlanningMode, StrategySection};
use crate::memory::{HistoricalEntry, HistoricalIndex, SessionMemory};
use crate::plan::ExecutionMode;
use crate::react::Perception;
use crate::tools::{ToolRouter, ToolSpec};

/// 本会话记忆回退时最多回看的成功工具数
const SESSION_FALLBACK_LIMIT: usize = 5;

/// 本次 Attempt 的规划模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// 每条生命线尽量只调用一个工具
    Conservative,
    Exploratory(ExplorationMode),
}

impl PlanMode {
    pub fn from_config(planning: PlanningMode, exploration: ExplorationMode) -> Self {
        match planning {
            PlanningMode::Conservative => PlanMode::Conservative,
            PlanningMode::Exploratory => PlanMode::Exploratory(exploration),
        }
    }

    pub fn execution(&self) -> ExecutionMode {
        match self {
            PlanMode::Exploratory(ExplorationMode::Parallel) => ExecutionMode::Parallel,
            _ => ExecutionMode::Sequential,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlanMode::Conservative => "conservative",
            PlanMode::Exploratory(ExplorationMode::Parallel) => "exploratory_parallel",
            PlanMode::Exploratory(ExplorationMode::Sequential) => "exploratory_sequential",
        }
    }
}

/// decide 的输入
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// 原始用户目标（用于历史检索）
    pub goal: &'a str,
    /// 本步的有效输入（首步为目标本身，之后为续接文本）
    pub input_text: &'a str,
    pub perception: &'a Perception,
    pub memory: &'a SessionMemory,
    /// 上一次 Attempt 失败的工具
    pub failed_tools: &'a [String],
    pub force_replan: bool,
    /// 上一次 Attempt 超出调用预算，本次改用更省的计划
    pub prefer_cheaper: bool,
    pub step: usize,
    pub max_steps: usize,
}

/// 交给 Planner-LLM 的请求
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub mode: PlanMode,
    pub tools: Vec<ToolSpec>,
    /// 最相似的历史会话（相似度由高到低）
    pub historical: Vec<HistoricalEntry>,
    pub input_text: String,
    pub perception: Perception,
    pub step: usize,
    pub max_steps: usize,
    pub force_replan: bool,
    /// 工具集为空：Planner-LLM 应直接作答
    pub no_tool_needed: bool,
    /// 由记忆回退补回的工具
    pub fallback_tools: Vec<String>,
    /// 本次被排除的失败工具
    pub excluded_tools: Vec<String>,
}

impl PlanRequest {
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }
}

/// 策略规划器：持有路由器（工具发现结果）、历史索引与策略配置
pub struct StrategyPlanner {
    router: Arc<ToolRouter>,
    index: Arc<HistoricalIndex>,
    settings: StrategySection,
}

impl StrategyPlanner {
    pub fn new(router: Arc<ToolRouter>, index: Arc<HistoricalIndex>, settings: StrategySection) -> Self {
        Self {
            router,
            index,
            settings,
        }
    }

    pub fn decide(&self, ctx: &StepContext<'_>) -> PlanRequest {
        let mode = if ctx.prefer_cheaper {
            PlanMode::Conservative
        } else {
            PlanMode::from_config(self.settings.planning_mode, self.settings.exploration_mode)
        };

        let candidates = self.candidate_tools(ctx.perception);
        let filtered = if ctx.force_replan {
            candidates.clone()
        } else {
            filter_by_hint(&candidates, ctx.perception.tool_hint.as_deref())
        };
        let (mut tools, excluded_tools) = exclude_failed(filtered, ctx.failed_tools);

        let mut fallback_tools = Vec::new();
        if self.settings.memory_fallback_enabled {
            let mut remembered = self
                .index
                .successful_tools_for(ctx.goal, self.settings.historical_context_limit);
            remembered.extend(ctx.memory.recent_successful_tools(SESSION_FALLBACK_LIMIT));
            for name in remembered {
                if tools.iter().any(|t| t.name == name) || ctx.failed_tools.contains(&name) {
                    continue;
                }
                if let Some(spec) = self.router.spec(&name) {
                    tools.push(spec.clone());
                    fallback_tools.push(name);
                }
            }
            if !fallback_tools.is_empty() {
                tracing::info!(tools = ?fallback_tools, "Memory fallback tools added");
            }
        }

        let historical = self
            .index
            .search(ctx.goal, self.settings.historical_context_limit);

        tracing::debug!(
            step = ctx.step,
            mode = mode.label(),
            tools = tools.len(),
            excluded = ?excluded_tools,
            force_replan = ctx.force_replan,
            "Strategy decided"
        );

        PlanRequest {
            mode,
            no_tool_needed: tools.is_empty(),
            tools,
            historical,
            input_text: ctx.input_text.to_string(),
            perception: ctx.perception.clone(),
            step: ctx.step,
            max_steps: ctx.max_steps,
            force_replan: ctx.force_replan,
            fallback_tools,
            excluded_tools,
        }
    }

    /// Proposer 选中的 Provider 的工具；未知 id 忽略，全部未知或未选择时取全部工具
    fn candidate_tools(&self, perception: &Perception) -> Vec<ToolSpec> {
        let known = self.router.provider_ids();
        let selected: Vec<String> = perception
            .selected_providers
            .iter()
            .filter(|p| known.contains(p.as_str()))
            .cloned()
            .collect();
        self.router.tools_from_providers(&selected)
    }
}

/// 按提示过滤：名称相等/包含、Provider id 相等或描述包含；无匹配时返回全部
pub fn filter_by_hint(tools: &[ToolSpec], hint: Option<&str>) -> Vec<ToolSpec> {
    let Some(hint) = hint.map(|h| h.trim().to_lowercase()).filter(|h| !h.is_empty()) else {
        return tools.to_vec();
    };
    let matched: Vec<ToolSpec> = tools
        .iter()
        .filter(|t| {
            let name = t.name.to_lowercase();
            name == hint
                || name.contains(&hint)
                || hint.contains(&name)
                || t.provider_id.to_lowercase() == hint
                || t.description.to_lowercase().contains(&hint)
        })
        .cloned()
        .collect();
    if matched.is_empty() {
        tools.to_vec()
    } else {
        matched
    }
}

/// 排除失败工具；若排除后为空则保留原集合（仅本次），返回 (工具集, 实际排除的工具)
pub fn exclude_failed(tools: Vec<ToolSpec>, failed: &[String]) -> (Vec<ToolSpec>, Vec<String>) {
    if failed.is_empty() {
        return (tools, Vec::new());
    }
    let (removed, kept): (Vec<ToolSpec>, Vec<ToolSpec>) =
        tools.iter().cloned().partition(|t| failed.contains(&t.name));
    if kept.is_empty() && !tools.is_empty() {
        tracing::warn!(failed = ?failed, "Excluding failed tools would leave no tools, keeping them for this attempt");
        return (tools, Vec::new());
    }
    (kept, removed.into_iter().map(|t| t.name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoProvider, MathProvider, ProviderRegistry, ToolProvider};
    use chrono::Utc;
    use serde_json::json;

    fn planner_with(settings: StrategySection, index: HistoricalIndex) -> StrategyPlanner {
        let mut reg = ProviderRegistry::new();
        reg.register(MathProvider::new("math"));
        reg.register(EchoProvider::new("echo"));
        StrategyPlanner::new(Arc::new(ToolRouter::new(reg, 5)), Arc::new(index), settings)
    }

    fn ctx<'a>(
        perception: &'a Perception,
        memory: &'a SessionMemory,
        failed: &'a [String],
        force_replan: bool,
    ) -> StepContext<'a> {
        StepContext {
            goal: "square root of 144 multiplied by factorial of 3",
            input_text: "square root of 144 multiplied by factorial of 3",
            perception,
            memory,
            failed_tools: failed,
            force_replan,
            prefer_cheaper: false,
            step: 1,
            max_steps: 3,
        }
    }

    fn hint(h: &str) -> Perception {
        Perception {
            tool_hint: Some(h.to_string()),
            ..Perception::no_hint()
        }
    }

    #[test]
    fn test_filtering_never_empty() {
        let all: Vec<ToolSpec> = MathProvider::new("math").list_tools();
        for h in ["factorial", "nonexistent", "", "math", "a very long unrelated hint"] {
            assert!(!filter_by_hint(&all, Some(h)).is_empty(), "hint {:?}", h);
        }
        assert_eq!(filter_by_hint(&all, Some("factorial")).len(), 1);
        assert_eq!(filter_by_hint(&all, Some("math")).len(), all.len());
        assert!(filter_by_hint(&[], Some("x")).is_empty());
    }

    #[test]
    fn test_failed_tool_excluded_unless_empty() {
        let all = MathProvider::new("math").list_tools();
        let (kept, excluded) = exclude_failed(all.clone(), &["divide".to_string()]);
        assert!(kept.iter().all(|t| t.name != "divide"));
        assert_eq!(excluded, vec!["divide".to_string()]);

        let only: Vec<ToolSpec> = all.into_iter().filter(|t| t.name == "divide").collect();
        let (kept, excluded) = exclude_failed(only, &["divide".to_string()]);
        assert_eq!(kept.len(), 1);
        assert!(excluded.is_empty());
    }

    #[test]
    fn test_decide_scenario_c_second_attempt() {
        let mut settings = StrategySection::default();
        settings.memory_fallback_enabled = false;
        let planner = planner_with(settings, HistoricalIndex::in_memory());
        let memory = SessionMemory::new("s");
        let p = Perception {
            selected_providers: vec!["math".to_string()],
            ..Perception::no_hint()
        };
        let failed = vec!["power".to_string()];
        let req = planner.decide(&ctx(&p, &memory, &failed, true));
        assert!(!req.tool_names().contains(&"power".to_string()));
        assert!(req.tool_names().contains(&"sqrt".to_string()));
        assert!(!req.tool_names().contains(&"echo".to_string()));
        assert_eq!(req.excluded_tools, vec!["power".to_string()]);
        assert!(req.force_replan);
    }

    #[test]
    fn test_force_replan_widens_past_hint() {
        let planner = planner_with(StrategySection::default(), HistoricalIndex::in_memory());
        let memory = SessionMemory::new("s");
        let p = hint("factorial");
        let narrow = planner.decide(&ctx(&p, &memory, &[], false));
        assert_eq!(narrow.tool_names(), vec!["factorial".to_string()]);
        let wide = planner.decide(&ctx(&p, &memory, &[], true));
        assert_eq!(wide.tools.len(), 8);
    }

    #[test]
    fn test_memory_fallback_adds_historical_success() {
        let index = HistoricalIndex::in_memory();
        index.index(HistoricalEntry {
            session_id: "old".to_string(),
            query: "square root of 81".to_string(),
            answer: Some("9".to_string()),
            tools_used: vec!["power".to_string(), "divide".to_string()],
            entities: Vec::new(),
            success: true,
            completed_at: Utc::now(),
            indexed_at: Utc::now(),
        });
        let planner = planner_with(StrategySection::default(), index);

        let mut memory = SessionMemory::new("s");
        let seq = memory.record_tool_call("echo", json!({"text": "x"}), 1, 1);
        memory.record_tool_output(seq, Ok(json!("x")));

        let p = hint("factorial");
        let failed = vec!["divide".to_string()];
        let req = planner.decide(&ctx(&p, &memory, &failed, false));
        assert_eq!(
            req.tool_names(),
            vec!["factorial".to_string(), "power".to_string(), "echo".to_string()]
        );
        assert_eq!(req.fallback_tools, vec!["power".to_string(), "echo".to_string()]);
        assert_eq!(req.historical.len(), 1);
    }

    #[test]
    fn test_prefer_cheaper_and_modes() {
        let mut settings = StrategySection::default();
        settings.planning_mode = PlanningMode::Exploratory;
        let planner = planner_with(settings, HistoricalIndex::in_memory());
        let memory = SessionMemory::new("s");
        let p = Perception::no_hint();
        let mut c = ctx(&p, &memory, &[], false);
        assert_eq!(
            planner.decide(&c).mode,
            PlanMode::Exploratory(ExplorationMode::Parallel)
        );
        c.prefer_cheaper = true;
        assert_eq!(planner.decide(&c).mode, PlanMode::Conservative);
        assert_eq!(PlanMode::Conservative.execution(), ExecutionMode::Sequential);
    }

    #[test]
    fn test_no_tools_is_valid() {
        let planner = StrategyPlanner::new(
            Arc::new(ToolRouter::new(ProviderRegistry::new(), 5)),
            Arc::new(HistoricalIndex::in_memory()),
            StrategySection::default(),
        );
        let memory = SessionMemory::new("s");
        let p = Perception::no_hint();
        let req = planner.decide(&ctx(&p, &memory, &[], false));
        assert!(req.no_tool_needed);
        assert!(req.tools.is_empty());
    }
}
