//! 计划模型：解释执行的工具调用序列 + 终止指令
//!
//! Planner-LLM 的输出被解析为 `Plan`：若干 `{id, tool, args}` 步骤和一个结果指令
//! `{marker: FINAL_ANSWER | FURTHER_PROCESSING_REQUIRED, text}`。参数与结果文本里的 `${id}`
//! 引用前面步骤的结果。计划在执行前完成结构校验，校验失败不会调用任何工具。

pub mod executor;

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;

pub use executor::{
    ExecContext, ExecResult, ExecStatus, ExecutionMode, PlanExecutor, ToolCallRecord,
};

static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();

fn reference_re() -> &'static Regex {
    REFERENCE_RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z0-9_\-]+)\}").expect("reference pattern is valid")
    })
}

/// 终止标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Marker {
    #[serde(rename = "FINAL_ANSWER")]
    FinalAnswer,
    #[serde(rename = "FURTHER_PROCESSING_REQUIRED")]
    FurtherProcessingRequired,
}

impl Marker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::FinalAnswer => "FINAL_ANSWER",
            Marker::FurtherProcessingRequired => "FURTHER_PROCESSING_REQUIRED",
        }
    }
}

/// 单个工具调用步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanStep {
    /// 步骤 id，供后续 `${id}` 引用；缺省为 s1、s2 …
    #[serde(default)]
    pub id: Option<String>,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl PlanStep {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }
}

/// 计划结果指令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanResult {
    pub marker: Marker,
    /// 结果文本，可含 `${id}` 引用
    pub text: String,
}

/// 一个完整计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    pub result: PlanResult,
}

/// 计划执行得到的终止结果
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    FinalAnswer(String),
    FurtherProcessing(String),
}

impl Terminal {
    pub fn text(&self) -> &str {
        match self {
            Terminal::FinalAnswer(t) | Terminal::FurtherProcessing(t) => t,
        }
    }

    /// 渲染为 `MARKER: text`
    pub fn render(&self) -> String {
        match self {
            Terminal::FinalAnswer(t) => format!("{}: {}", Marker::FinalAnswer.as_str(), t),
            Terminal::FurtherProcessing(t) => {
                format!("{}: {}", Marker::FurtherProcessingRequired.as_str(), t)
            }
        }
    }
}

impl Plan {
    /// 零调用计划
    pub fn direct(marker: Marker, text: impl Into<String>) -> Self {
        Self {
            steps: Vec::new(),
            result: PlanResult {
                marker,
                text: text.into(),
            },
        }
    }

    /// 解析并校验 Planner-LLM 输出
    ///
    /// 接受代码块或裸文本中的 JSON 计划；也接受某一行以终止标记开头的纯文本（零调用计划），
    /// 标记前可有说明文字，整体可包在代码块里。
    pub fn parse(source: &str) -> Result<Self, AgentError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(AgentError::PlanMalformed("empty plan".to_string()));
        }

        let body = fenced_body(trimmed).unwrap_or(trimmed);
        if !body.starts_with('{') {
            if let Some(plan) = terminal_line(body).or_else(|| terminal_line(trimmed)) {
                return Ok(plan);
            }
        }

        let json_str = extract_json(body).ok_or_else(|| {
            AgentError::PlanMalformed(
                "neither a JSON plan nor a line starting with a terminal marker".to_string(),
            )
        })?;
        let mut plan: Plan = serde_json::from_str(json_str)
            .map_err(|e| AgentError::PlanMalformed(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// 结构校验：工具名非空、id 唯一、引用只指向更早的步骤
    fn validate(&mut self) -> Result<(), AgentError> {
        let mut seen: HashSet<String> = HashSet::new();
        for (i, step) in self.steps.iter_mut().enumerate() {
            if step.tool.trim().is_empty() {
                return Err(AgentError::PlanMalformed(format!(
                    "step {} has an empty tool name",
                    i + 1
                )));
            }
            let id = match step.id.as_deref().map(str::trim) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => format!("s{}", i + 1),
            };
            for r in references(&step.args) {
                if !seen.contains(&r) {
                    return Err(AgentError::PlanMalformed(format!(
                        "step '{}' references '{}' which is not an earlier step",
                        id, r
                    )));
                }
            }
            if !seen.insert(id.clone()) {
                return Err(AgentError::PlanMalformed(format!("duplicate step id '{}'", id)));
            }
            step.id = Some(id);
        }
        for r in text_references(&self.result.text) {
            if !seen.contains(&r) {
                return Err(AgentError::PlanMalformed(format!(
                    "result references unknown step '{}'",
                    r
                )));
            }
        }
        Ok(())
    }

    pub fn tool_call_count(&self) -> usize {
        self.steps.len()
    }

    /// 依赖波次：同一波内的步骤互不依赖，可并发执行；波内保持计划顺序
    pub fn waves(&self) -> Vec<Vec<usize>> {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id(), i))
            .collect();
        let mut level = vec![0usize; self.steps.len()];
        for (i, step) in self.steps.iter().enumerate() {
            let depth = references(&step.args)
                .iter()
                .filter_map(|r| index.get(r.as_str()))
                .map(|&dep| level[dep] + 1)
                .max()
                .unwrap_or(0);
            level[i] = depth;
        }
        let depth = level.iter().copied().max().map(|m| m + 1).unwrap_or(0);
        let mut waves = vec![Vec::new(); depth];
        for (i, l) in level.into_iter().enumerate() {
            waves[l].push(i);
        }
        waves
    }

    /// 用已得到的步骤结果解析终止结果
    pub fn resolve_terminal(&self, scope: &HashMap<String, Value>) -> Terminal {
        let text = interpolate(&self.result.text, scope);
        match self.result.marker {
            Marker::FinalAnswer => Terminal::FinalAnswer(text),
            Marker::FurtherProcessingRequired => Terminal::FurtherProcessing(text),
        }
    }
}

/// 第一个 ``` 代码块的内容（去掉语言标记行）
fn fenced_body(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = match rest.find('\n') {
        Some(nl) if rest[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &rest[nl + 1..],
        _ => rest,
    };
    let body = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
    Some(body.trim())
}

fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// 第一条以 `FINAL_ANSWER:` / `FURTHER_PROCESSING_REQUIRED:` 开头的行；文本取到结尾
fn terminal_line(text: &str) -> Option<Plan> {
    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim_start();
        for marker in [Marker::FinalAnswer, Marker::FurtherProcessingRequired] {
            let Some(first) = line
                .strip_prefix(marker.as_str())
                .and_then(|rest| rest.trim_start().strip_prefix(':'))
            else {
                continue;
            };
            let mut answer = first.trim().to_string();
            let tail = lines[i + 1..].join("\n");
            if !tail.trim().is_empty() {
                answer = format!("{}\n{}", answer, tail.trim_end());
            }
            return Some(Plan::direct(marker, answer.trim()));
        }
    }
    None
}

fn text_references(text: &str) -> Vec<String> {
    reference_re()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// 值中出现的所有 `${id}` 引用
pub fn references(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => text_references(s),
        Value::Array(items) => items.iter().flat_map(references).collect(),
        Value::Object(map) => map.values().flat_map(references).collect(),
        _ => Vec::new(),
    }
}

/// 结果值的文本形式：字符串不加引号，其余按 JSON 文本
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn interpolate(text: &str, scope: &HashMap<String, Value>) -> String {
    reference_re()
        .replace_all(text, |caps: &regex::Captures| match scope.get(&caps[1]) {
            Some(v) => render_value(v),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// 替换参数中的引用：整串引用替换为原 JSON 值，内嵌引用替换为其文本形式
pub fn substitute(value: &Value, scope: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = reference_re().captures(s) {
                if caps[0].len() == s.len() {
                    if let Some(v) = scope.get(&caps[1]) {
                        return v.clone();
                    }
                }
            }
            Value::String(interpolate(s, scope))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, scope)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}
