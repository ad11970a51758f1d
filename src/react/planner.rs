//! Planner-LLM 适配：PlanRequest -> 计划源文本
//!
//! 控制循环只依赖 PlanProposer trait。LlmPlanner 按规划模式选择 prompt 模板（可从 prompts 目录覆盖），
//! 拼入可用工具、计划 JSON Schema、调用预算与历史会话，交给 LlmClient 生成计划文本；文本的校验在 plan::Plan::parse。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::memory::format_entries;
use crate::react::{PlanMode, PlanRequest};
use crate::tools::{plan_schema_json, ToolSpec};

/// Planner-LLM 外部能力
#[async_trait]
pub trait PlanProposer: Send + Sync {
    async fn propose(&self, request: &PlanRequest) -> Result<String, AgentError>;
}

const NO_TOOLS: &str = "No tools available. You must solve this without calling any tools.";

const PLAN_FORMAT: &str = "Reply with exactly one JSON plan matching this schema:\n{schema}\n\n\
Each step is {\"id\": \"...\", \"tool\": \"<tool name>\", \"args\": {...}}. \
Use \"${id}\" inside args or the result text to refer to an earlier step's result. \
At most {budget} tool calls per plan.\n\
result.marker is FINAL_ANSWER when the text answers the task, or FURTHER_PROCESSING_REQUIRED when the \
text (for example fetched content) must be processed in another step.\n\
If no tool is needed you may reply with a single line: FINAL_ANSWER: <answer>";

const CONSERVATIVE_PROMPT: &str = "You plan tool calls for an agent. Be conservative: \
prefer a single tool call per plan, and only chain calls when the task cannot be answered otherwise.\n\n\
Available tools:\n{tools}\n\n{format}";

const PARALLEL_PROMPT: &str = "You plan tool calls for an agent. Explore: propose several independent \
tool calls when they help; calls that do not reference each other run concurrently.\n\n\
Available tools:\n{tools}\n\n{format}";

const SEQUENTIAL_PROMPT: &str = "You plan tool calls for an agent. Explore: propose several tool calls \
executed in order; later calls may use earlier results via ${id}.\n\n\
Available tools:\n{tools}\n\n{format}";

/// 各规划模式的 system prompt 模板（占位符：{tools}、{format}）
#[derive(Debug, Clone)]
pub struct PlannerPrompts {
    pub conservative: String,
    pub exploratory_parallel: String,
    pub exploratory_sequential: String,
}

impl Default for PlannerPrompts {
    fn default() -> Self {
        Self {
            conservative: CONSERVATIVE_PROMPT.to_string(),
            exploratory_parallel: PARALLEL_PROMPT.to_string(),
            exploratory_sequential: SEQUENTIAL_PROMPT.to_string(),
        }
    }
}

impl PlannerPrompts {
    /// 从目录读取 planner_<mode>.md，缺失的沿用内置模板
    pub fn load_from_dir(dir: &Path) -> Self {
        let mut prompts = Self::default();
        let read = |name: &str| std::fs::read_to_string(dir.join(name)).ok();
        if let Some(p) = read("planner_conservative.md") {
            prompts.conservative = p;
        }
        if let Some(p) = read("planner_exploratory_parallel.md") {
            prompts.exploratory_parallel = p;
        }
        if let Some(p) = read("planner_exploratory_sequential.md") {
            prompts.exploratory_sequential = p;
        }
        prompts
    }

    fn for_mode(&self, mode: PlanMode) -> &str {
        match mode {
            PlanMode::Conservative => &self.conservative,
            PlanMode::Exploratory(crate::config::ExplorationMode::Parallel) => {
                &self.exploratory_parallel
            }
            PlanMode::Exploratory(crate::config::ExplorationMode::Sequential) => {
                &self.exploratory_sequential
            }
        }
    }
}

/// 工具清单：每行 `- name: description`
pub fn summarize_tools(tools: &[ToolSpec]) -> String {
    if tools.is_empty() {
        return NO_TOOLS.to_string();
    }
    tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 基于 LlmClient 的 Planner
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    prompts: PlannerPrompts,
    call_budget: usize,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, call_budget: usize) -> Self {
        Self {
            llm,
            prompts: PlannerPrompts::default(),
            call_budget,
        }
    }

    pub fn with_prompts(mut self, prompts: PlannerPrompts) -> Self {
        self.prompts = prompts;
        self
    }

    /// 组装发给 LLM 的消息
    pub fn build_messages(&self, request: &PlanRequest) -> Vec<Message> {
        let format = PLAN_FORMAT
            .replace("{schema}", &plan_schema_json())
            .replace("{budget}", &self.call_budget.to_string());
        let system = self
            .prompts
            .for_mode(request.mode)
            .replace("{tools}", &summarize_tools(&request.tools))
            .replace("{format}", &format);

        let mut messages = vec![Message::system(system)];
        let history = format_entries(&request.historical);
        if !history.is_empty() {
            messages.push(Message::system(history));
        }

        let mut user = format!("Step {}/{}", request.step, request.max_steps);
        if request.force_replan {
            user.push_str(" (previous attempt failed, choose a different approach)");
        }
        if !request.excluded_tools.is_empty() {
            user.push_str(&format!(
                "\nDo not use these tools, they just failed: {}",
                request.excluded_tools.join(", ")
            ));
        }
        if !request.perception.entities.is_empty() {
            user.push_str(&format!("\nEntities: {}", request.perception.entities.join(", ")));
        }
        user.push_str("\n\n");
        user.push_str(&request.input_text);
        messages.push(Message::user(user));
        messages
    }
}

#[async_trait]
impl PlanProposer for LlmPlanner {
    async fn propose(&self, request: &PlanRequest) -> Result<String, AgentError> {
        let messages = self.build_messages(request);
        let raw = self
            .llm
            .complete(&messages)
            .await
            .map_err(AgentError::PlannerError)?;
        tracing::debug!(plan = %raw, "Planner output");
        Ok(raw)
    }
}
