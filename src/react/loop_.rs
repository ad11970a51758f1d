//! 控制主循环：Step × 生命线状态机
//!
//! Start -> Stepping(1) -> { Answered | Stepping(n+1) | Exhausted }。
//! 每个 Step 内最多 max_lifelines_per_step 次 Attempt：Proposer -> Strategy -> Planner-LLM -> PlanExecutor。
//! - FINAL_ANSWER：写入 final_answer，会话结束为 Answered
//! - FURTHER_PROCESSING_REQUIRED：携带内容进入下一步
//! - 失败：消耗一条生命线，下一次 Attempt 带上失败工具与 force_replan；生命线用尽则带失败标记升级到下一步，
//!   没有下一步则 Exhausted
//!
//! AbortHandle 触发后尽力取消进行中的调用，会话以 Aborted 结束且不写 final_answer。
//! 任一终止状态都只落盘、索引一次。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::config::StrategySection;
use crate::core::{
    AbortHandle, AgentError, AttemptOutcome, AttemptRecord, Outcome, RecoveryAction,
    RecoveryEngine, Session, StepRecord,
};
use crate::memory::{HistoricalIndex, SessionLog, SessionLogStore};
use crate::plan::{ExecContext, ExecResult, ExecStatus, PlanExecutor, Terminal};
use crate::react::{LoopEvent, PlanProposer, Proposer, StepContext, StrategyPlanner};
use crate::tools::ToolRouter;

/// 事件中预览文本的最大字符数
const PREVIEW_CHARS: usize = 200;

const SUMMARY_WORDS: &[&str] = &["summarize", "summarise", "summary", "key points", "main points"];
const ANALYSIS_WORDS: &[&str] = &[
    "analyze",
    "analyse",
    "analysis",
    "extract",
    "topics",
    "identify topics",
];

/// 单次 Attempt 的结果
struct AttemptResult {
    record: AttemptRecord,
    result: Result<Terminal, AgentError>,
}

/// Step 内生命线循环的结果
enum StepResult {
    Answered(String),
    Advance(String),
    Exhausted(AgentError),
    Aborted(String),
}

/// 控制循环：持有外部能力（Proposer / Planner-LLM）与进程级共享资源（路由器、历史索引）
pub struct LoopController {
    proposer: Arc<dyn Proposer>,
    planner: Arc<dyn PlanProposer>,
    strategy: StrategyPlanner,
    router: Arc<ToolRouter>,
    executor: PlanExecutor,
    index: Arc<HistoricalIndex>,
    recovery: RecoveryEngine,
    settings: StrategySection,
    log_store: Option<SessionLogStore>,
    event_tx: Option<mpsc::UnboundedSender<LoopEvent>>,
}

impl LoopController {
    pub fn new(
        proposer: Arc<dyn Proposer>,
        planner: Arc<dyn PlanProposer>,
        router: Arc<ToolRouter>,
        index: Arc<HistoricalIndex>,
        settings: StrategySection,
        max_tool_calls_per_plan: usize,
    ) -> Self {
        Self {
            strategy: StrategyPlanner::new(router.clone(), index.clone(), settings.clone()),
            proposer,
            planner,
            router,
            executor: PlanExecutor::new(max_tool_calls_per_plan),
            index,
            recovery: RecoveryEngine::new(),
            settings,
            log_store: None,
            event_tx: None,
        }
    }

    /// 会话结束时写入会话日志
    pub fn with_log_store(mut self, store: SessionLogStore) -> Self {
        self.log_store = Some(store);
        self
    }

    pub fn with_event_tx(mut self, tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 运行一个目标，只返回 Outcome
    pub async fn run(&self, goal: &str) -> Outcome {
        self.run_with_abort(goal, &AbortHandle::new()).await
    }

    pub async fn run_with_abort(&self, goal: &str, abort: &AbortHandle) -> Outcome {
        self.run_session(goal, abort)
            .await
            .outcome
            .unwrap_or(Outcome::Exhausted)
    }

    /// 运行一个目标并返回完整的 Session 记录
    pub async fn run_session(&self, goal: &str, abort: &AbortHandle) -> Session {
        let mut session = Session::new(uuid::Uuid::new_v4().to_string(), goal);
        tracing::info!(session_id = %session.id, "Session started");
        self.emit(LoopEvent::SessionStarted {
            session_id: session.id.clone(),
            goal: goal.to_string(),
        });

        let outcome = self.drive(&mut session, abort).await;
        self.finish(&mut session, outcome).await;
        session
    }

    async fn drive(&self, session: &mut Session, abort: &AbortHandle) -> Outcome {
        let max_steps = self.settings.max_steps;
        // 本步的基础输入（目标或续接内容），失败标记只附加在 input 上
        let mut base_input = session.goal.clone();
        let mut input = base_input.clone();
        let mut failed_tools: Vec<String> = Vec::new();
        let mut force_replan = false;
        let mut prefer_cheaper = false;

        for step in 1..=max_steps {
            tracing::info!(step, max_steps, "Step starting");
            self.emit(LoopEvent::StepStarted { step, max_steps });
            let mut record = StepRecord::new(step, input.clone());

            let result = self
                .run_step(
                    session,
                    &mut record,
                    &input,
                    abort,
                    &mut failed_tools,
                    &mut force_replan,
                    &mut prefer_cheaper,
                )
                .await;

            match result {
                StepResult::Answered(text) => {
                    session.memory.record_final_answer(&text);
                    session.steps.push(record);
                    return Outcome::Answered(text);
                }
                StepResult::Aborted(reason) => {
                    session.steps.push(record);
                    return Outcome::Aborted(reason);
                }
                StepResult::Advance(content) => {
                    let next = continuation_input(&session.goal, &content);
                    self.emit(LoopEvent::Continuation {
                        step,
                        preview: preview(&content),
                    });
                    tracing::info!(step, "Forwarding intermediate result to next step");
                    record.forwarded = Some(next.clone());
                    base_input = next.clone();
                    input = next;
                    failed_tools.clear();
                    force_replan = false;
                    prefer_cheaper = false;
                }
                StepResult::Exhausted(last_error) => {
                    let err = AgentError::LifelinesExhausted { step };
                    let action = self.recovery.handle(&err);
                    tracing::warn!(step, last_error = %last_error, action = ?action, "{}", err);
                    self.emit(LoopEvent::StepExhausted { step });
                    match action {
                        RecoveryAction::Escalate if step < max_steps => {
                            input = failure_input(&base_input, step, &last_error);
                            force_replan = true;
                        }
                        _ => {
                            session.steps.push(record);
                            break;
                        }
                    }
                }
            }
            session.steps.push(record);
        }

        tracing::warn!("Max steps reached without a final answer");
        Outcome::Exhausted
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        session: &mut Session,
        record: &mut StepRecord,
        input: &str,
        abort: &AbortHandle,
        failed_tools: &mut Vec<String>,
        force_replan: &mut bool,
        prefer_cheaper: &mut bool,
    ) -> StepResult {
        let mut last_error = AgentError::LifelinesExhausted { step: record.index };

        for attempt in 1..=self.settings.max_lifelines_per_step {
            if abort.is_aborted() {
                return StepResult::Aborted(abort_reason(abort));
            }

            let AttemptResult {
                record: mut attempt_record,
                result,
            } = self
                .run_attempt(
                    session,
                    input,
                    record.index,
                    attempt,
                    failed_tools,
                    *force_replan,
                    *prefer_cheaper,
                    abort,
                )
                .await;

            match result {
                Ok(terminal) => {
                    record.attempts.push(attempt_record);
                    return match terminal {
                        Terminal::FinalAnswer(text) => StepResult::Answered(text),
                        Terminal::FurtherProcessing(content) => StepResult::Advance(content),
                    };
                }
                Err(err) => {
                    if abort.is_aborted() || err.is_fatal() {
                        record.attempts.push(attempt_record);
                        return StepResult::Aborted(abort_reason(abort));
                    }
                    let action = self.recovery.handle(&err);
                    if let RecoveryAction::RetryExcluding(tool) = &action {
                        if !attempt_record.failed_tools.contains(tool) {
                            attempt_record.failed_tools.push(tool.clone());
                        }
                    }
                    let next_failed = attempt_record.failed_tools.clone();
                    record.attempts.push(attempt_record);
                    tracing::warn!(
                        step = record.index,
                        attempt,
                        error = %err,
                        action = ?action,
                        "Attempt failed"
                    );
                    self.emit(LoopEvent::AttemptFailed {
                        step: record.index,
                        attempt,
                        error: err.to_string(),
                        action: format!("{:?}", action),
                    });
                    if let RecoveryAction::Abort(reason) = action {
                        return StepResult::Aborted(reason);
                    }
                    *prefer_cheaper = action == RecoveryAction::RetryCheaper;
                    *failed_tools = next_failed;
                    *force_replan = true;
                    last_error = err;
                }
            }
        }

        StepResult::Exhausted(last_error)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempt(
        &self,
        session: &mut Session,
        input: &str,
        step: usize,
        attempt: usize,
        failed_tools: &[String],
        force_replan: bool,
        prefer_cheaper: bool,
        abort: &AbortHandle,
    ) -> AttemptResult {
        let failed = |mode: String, tools: Vec<String>, plan_source: Option<String>, exec: Option<&ExecResult>, err: AgentError| {
            let failed_tools: Vec<String> = exec.map(|e| e.failed_tools()).unwrap_or_default();
            AttemptResult {
                record: AttemptRecord {
                    index: attempt,
                    mode,
                    tools,
                    force_replan,
                    plan_source,
                    tool_calls: exec.map(|e| e.tool_calls.len()).unwrap_or(0),
                    outcome: AttemptOutcome::Failed(err.to_string()),
                    failed_tools,
                },
                result: Err(err),
            }
        };

        // Proposer
        let history = self
            .index
            .relevant_context(&session.goal, self.settings.historical_context_limit);
        let history = (!history.is_empty()).then_some(history);
        let perception = match bounded(
            self.proposer.perceive(input, history.as_deref()),
            Duration::from_secs(self.settings.proposer_timeout_secs),
            AgentError::ProposerTimeout,
            abort,
        )
        .await
        {
            Ok(p) => p,
            Err(e) => return failed(String::new(), Vec::new(), None, None, e),
        };
        session.add_entities(&perception.entities);

        // Strategy
        let request = self.strategy.decide(&StepContext {
            goal: &session.goal,
            input_text: input,
            perception: &perception,
            memory: &session.memory,
            failed_tools,
            force_replan,
            prefer_cheaper,
            step,
            max_steps: self.settings.max_steps,
        });
        let mode = request.mode.label().to_string();
        let tools = request.tool_names();
        tracing::info!(step, attempt, mode = %mode, tools = ?tools, "Attempt starting");
        self.emit(LoopEvent::AttemptStarted {
            step,
            attempt,
            mode: mode.clone(),
            tools: tools.clone(),
            force_replan,
        });

        // Planner-LLM
        let source = match bounded(
            self.planner.propose(&request),
            Duration::from_secs(self.settings.planner_timeout_secs),
            AgentError::PlannerTimeout,
            abort,
        )
        .await
        {
            Ok(s) => s,
            Err(e) => return failed(mode, tools, None, None, e),
        };

        // Execute
        let exec = self
            .executor
            .execute_source(
                &source,
                request.mode.execution(),
                ExecContext {
                    router: &self.router,
                    memory: &mut session.memory,
                    step,
                    attempt,
                    cancel: abort.token(),
                },
            )
            .await;
        for call in &exec.tool_calls {
            self.emit(LoopEvent::ToolCall {
                tool: call.tool.clone(),
                args: call.args.clone(),
            });
            self.emit(LoopEvent::Observation {
                tool: call.tool.clone(),
                ok: call.result.is_ok(),
                preview: match &call.result {
                    Ok(v) => preview(&crate::plan::render_value(v)),
                    Err(e) => preview(&e.to_string()),
                },
            });
        }

        match &exec.status {
            ExecStatus::Success(terminal) => {
                let outcome = match terminal {
                    Terminal::FinalAnswer(t) => AttemptOutcome::FinalAnswer(t.clone()),
                    Terminal::FurtherProcessing(t) => AttemptOutcome::Continue(t.clone()),
                };
                AttemptResult {
                    record: AttemptRecord {
                        index: attempt,
                        mode,
                        tools,
                        force_replan,
                        plan_source: Some(source),
                        tool_calls: exec.tool_calls.len(),
                        outcome,
                        failed_tools: Vec::new(),
                    },
                    result: Ok(terminal.clone()),
                }
            }
            ExecStatus::Failure(err) => failed(mode, tools, Some(source), Some(&exec), err.clone()),
        }
    }

    /// 终止状态：记录结果、落盘会话日志、写入历史索引（每个会话只执行一次）
    async fn finish(&self, session: &mut Session, outcome: Outcome) {
        if session.is_closed() {
            return;
        }
        tracing::info!(
            session_id = %session.id,
            outcome = outcome.label(),
            steps = session.steps.len(),
            attempts = session.total_attempts(),
            "Session finished"
        );
        self.emit(LoopEvent::Finished {
            outcome: outcome.label().to_string(),
        });
        session.outcome = Some(outcome);

        if let Some(store) = &self.log_store {
            let log = SessionLog::new(&session.memory, session.created_at, &session.entities);
            match store.save(&log).await {
                Ok(path) => tracing::debug!(path = %path.display(), "Session log saved"),
                Err(e) => tracing::warn!(error = %e, "Failed to save session log"),
            }
        }
        self.index
            .index_memory(&session.memory, &session.entities, Utc::now());
        if let Err(e) = self.index.persist().await {
            tracing::warn!(error = %e, "Failed to persist historical index");
        }
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// 外部调用：受超时限制，并可被会话中止打断
async fn bounded<T, F>(
    fut: F,
    limit: Duration,
    on_timeout: AgentError,
    abort: &AbortHandle,
) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>>,
{
    tokio::select! {
        _ = abort.token().cancelled() => Err(AgentError::SessionAborted(abort_reason(abort))),
        r = tokio::time::timeout(limit, fut) => r.unwrap_or(Err(on_timeout)),
    }
}

fn abort_reason(abort: &AbortHandle) -> String {
    abort.reason().unwrap_or_else(|| "aborted".to_string())
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", text.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

fn mentions_any(text: &str, words: &[&str]) -> bool {
    let lower = text.to_lowercase();
    words.iter().any(|w| lower.contains(w))
}

/// FURTHER_PROCESSING_REQUIRED 的续接输入：原始任务 + 上一步产出 + 按任务类型给出的指令
pub fn continuation_input(goal: &str, content: &str) -> String {
    let instruction = if mentions_any(goal, SUMMARY_WORDS) {
        "TASK: Summarize this content into clear, concise key points as bullet points (• or -).\n\
         Reply with FINAL_ANSWER: followed by the bullets. Do not call any tools."
    } else if mentions_any(goal, ANALYSIS_WORDS) {
        "TASK: Analyze this content and list its main topics (• or numbered list).\n\
         Reply with FINAL_ANSWER: followed by the topics. Do not call any tools."
    } else {
        "If this fully answers the task, reply with FINAL_ANSWER: <answer>.\n\
         Otherwise plan the next tool calls."
    };
    format!(
        "Original user task: {}\n\nYour last tool produced this content:\n\n{}\n\n{}",
        goal, content, instruction
    )
}

/// 生命线用尽后下一步的输入：本步基础输入加一条失败标记
fn failure_input(base: &str, step: usize, err: &AgentError) -> String {
    format!(
        "{}\n\n[Step {} failed after all attempts: {}. Use a different approach.]",
        base, step, err
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuation_variants() {
        let s = continuation_input("search renewable energy policy and summarize", "raw results");
        assert!(s.starts_with("Original user task: search renewable energy policy and summarize"));
        assert!(s.contains("raw results"));
        assert!(s.contains("key points"));

        let a = continuation_input("extract the main topics", "doc");
        assert!(a.contains("main topics"));

        let g = continuation_input("what is the weather", "sunny");
        assert!(g.contains("If this fully answers the task"));
    }

    #[test]
    fn test_failure_input_keeps_content_verbatim() {
        let err = AgentError::PlanMalformed("x".to_string());
        let content = "Original user task: t\n\n[Step 3 of the recipe] stir well";
        let next = failure_input(content, 1, &err);
        assert!(next.starts_with(content));
        assert!(next.ends_with("Use a different approach.]"));
        assert_eq!(next.matches("failed after all attempts").count(), 1);
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(300);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}
