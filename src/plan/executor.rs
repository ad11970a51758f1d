//! 计划执行器（沙箱）
//!
//! 逐步解释执行一个 Plan：每次派发前检查调用预算（第 N+1 次派发直接以 BudgetExceeded 失败，不触达 Provider），
//! 只转发工具 input_schema 声明过的参数，结果存入本计划私有的作用域供 `${id}` 引用。
//! 每次派发先写 tool_call，返回后写 tool_output，计划失败也不会留下未记录的调用。
//!
//! 并行模式按依赖波次执行：同一波的调用用 join_all 并发，等全部返回并全部记录后，按计划顺序取第一个错误作为失败原因。

use std::collections::HashMap;

use futures_util::future::join_all;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ToolError};
use crate::memory::SessionMemory;
use crate::plan::{substitute, Plan, PlanStep, Terminal};
use crate::tools::ToolRouter;

/// 计划内多个工具调用的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// 一次已派发的调用
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub seq: u64,
    pub tool: String,
    pub args: Value,
    pub result: Result<Value, ToolError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecStatus {
    Success(Terminal),
    Failure(AgentError),
}

/// 执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub status: ExecStatus,
    pub tool_calls: Vec<ToolCallRecord>,
    /// 成功时为 `MARKER: text`，失败时为错误描述
    pub output_text: String,
}

impl ExecResult {
    fn success(terminal: Terminal, tool_calls: Vec<ToolCallRecord>) -> Self {
        Self {
            output_text: terminal.render(),
            status: ExecStatus::Success(terminal),
            tool_calls,
        }
    }

    fn failure(err: AgentError, tool_calls: Vec<ToolCallRecord>) -> Self {
        Self {
            output_text: err.to_string(),
            status: ExecStatus::Failure(err),
            tool_calls,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecStatus::Success(_))
    }

    pub fn error(&self) -> Option<&AgentError> {
        match &self.status {
            ExecStatus::Failure(e) => Some(e),
            ExecStatus::Success(_) => None,
        }
    }

    /// 本次执行中失败的工具（按计划顺序去重）
    pub fn failed_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for call in &self.tool_calls {
            if call.result.is_err() && !tools.contains(&call.tool) {
                tools.push(call.tool.clone());
            }
        }
        tools
    }
}

/// 计划执行器：持有单计划调用上限
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    max_calls: usize,
}

/// 单次执行的上下文（Step/Attempt 编号写入 tool_call 记录）
pub struct ExecContext<'a> {
    pub router: &'a ToolRouter,
    pub memory: &'a mut SessionMemory,
    pub step: usize,
    pub attempt: usize,
    pub cancel: &'a CancellationToken,
}

impl PlanExecutor {
    pub fn new(max_calls: usize) -> Self {
        Self { max_calls }
    }

    /// 解析并执行 Planner-LLM 输出；解析失败时不调用任何工具
    pub async fn execute_source(
        &self,
        source: &str,
        mode: ExecutionMode,
        ctx: ExecContext<'_>,
    ) -> ExecResult {
        match Plan::parse(source) {
            Ok(plan) => self.execute(&plan, mode, ctx).await,
            Err(e) => {
                tracing::warn!(error = %e, "Plan rejected before execution");
                ExecResult::failure(e, Vec::new())
            }
        }
    }

    pub async fn execute(&self, plan: &Plan, mode: ExecutionMode, ctx: ExecContext<'_>) -> ExecResult {
        let ExecContext {
            router,
            memory,
            step,
            attempt,
            cancel,
        } = ctx;
        let mut scope: HashMap<String, Value> = HashMap::new();
        let mut records: Vec<ToolCallRecord> = Vec::new();

        let waves: Vec<Vec<usize>> = match mode {
            ExecutionMode::Sequential => (0..plan.steps.len()).map(|i| vec![i]).collect(),
            ExecutionMode::Parallel => plan.waves(),
        };

        for wave in waves {
            if cancel.is_cancelled() {
                return ExecResult::failure(
                    AgentError::SessionAborted("cancelled before dispatch".to_string()),
                    records,
                );
            }
            let remaining = self.max_calls.saturating_sub(records.len());
            let allowed = wave.len().min(remaining);

            // 先按计划顺序写出 tool_call，再并发派发
            let mut pending: Vec<(u64, &PlanStep, Value)> = Vec::with_capacity(allowed);
            for &i in &wave[..allowed] {
                let step_def = &plan.steps[i];
                let args = prepare_args(step_def, &scope, router);
                let seq = memory.record_tool_call(&step_def.tool, args.clone(), step, attempt);
                pending.push((seq, step_def, args));
            }

            let results = join_all(
                pending
                    .iter()
                    .map(|(_, s, args)| dispatch(router, &s.tool, args.clone(), cancel)),
            )
            .await;

            let mut first_error: Option<ToolError> = None;
            for ((seq, step_def, args), result) in pending.into_iter().zip(results) {
                memory.record_tool_output(
                    seq,
                    result.clone().map_err(|e| e.to_string()),
                );
                match &result {
                    Ok(v) => {
                        scope.insert(step_def.id().to_string(), v.clone());
                    }
                    Err(e) => {
                        tracing::warn!(tool = %step_def.tool, error = %e, "Plan step failed");
                        if first_error.is_none() {
                            first_error = Some(e.clone());
                        }
                    }
                }
                records.push(ToolCallRecord {
                    seq,
                    tool: step_def.tool.clone(),
                    args,
                    result,
                });
            }

            if let Some(e) = first_error {
                return ExecResult::failure(AgentError::ToolInvocation(e), records);
            }
            if allowed < wave.len() {
                tracing::warn!(limit = self.max_calls, "Tool-call budget exceeded");
                return ExecResult::failure(
                    AgentError::BudgetExceeded {
                        limit: self.max_calls,
                    },
                    records,
                );
            }
        }

        let terminal = plan.resolve_terminal(&scope);
        tracing::debug!(calls = records.len(), "Plan completed");
        ExecResult::success(terminal, records)
    }
}

/// 替换引用后只保留 input_schema 声明的参数
fn prepare_args(step: &PlanStep, scope: &HashMap<String, Value>, router: &ToolRouter) -> Value {
    let args = substitute(&step.args, scope);
    let declared = router.spec(&step.tool).and_then(|s| s.declared_args());
    match (args, declared) {
        (Value::Object(map), Some(keys)) => {
            let filtered: Map<String, Value> = map
                .into_iter()
                .filter(|(k, _)| keys.contains(&k.as_str()))
                .collect();
            Value::Object(filtered)
        }
        (Value::Null, _) => Value::Object(Map::new()),
        (other, _) => other,
    }
}

async fn dispatch(
    router: &ToolRouter,
    tool: &str,
    args: Value,
    cancel: &CancellationToken,
) -> Result<Value, ToolError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ToolError::Cancelled(tool.to_string())),
        r = router.invoke(tool, args) => r,
    }
}
