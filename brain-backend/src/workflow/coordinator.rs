//! Workflow coordinator
//!
//! Runs a validated plan: every step whose dependencies have finished is
//! spawned on its own task, outputs of finished steps are appended to the
//! instructions of their dependents, and the coordinating agent writes the
//! final reply. Agent invocations are never retried here.

use super::types::{StepReport, StepState, WorkflowOutcome};
use crate::agents::{Agent, AgentResult, Invocation, Roster};
use crate::error::{BrainError, Result};
use crate::models::{ActionRecord, Request, Session, WorkingMemory};
use crate::routing::Plan;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 120;

pub struct Coordinator {
    step_timeout: Duration,
}

/// A spawned step, resolved with its index even when the task dies
type StepTask = BoxFuture<'static, (usize, std::result::Result<(AgentResult, Duration), JoinError>)>;

/// Run one agent invocation bounded by `timeout`. Expiry and panics come back
/// as failed results carrying the actions that completed before them.
pub async fn invoke_agent(
    agent: Arc<dyn Agent>,
    instruction: String,
    session: Arc<Session>,
    scratch: WorkingMemory,
    timeout: Duration,
) -> (AgentResult, Duration) {
    let started = Instant::now();
    let agent_id = agent.agent_id().to_string();
    let invocation = Invocation::until(tokio::time::Instant::now() + timeout);
    let call = AssertUnwindSafe(agent.handle(&instruction, &session, &scratch, &invocation)).catch_unwind();

    let result = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => {
            log::error!("[COORDINATOR] Agent '{}' panicked", agent_id);
            AgentResult::failed(
                &agent_id,
                invocation.completed(),
                BrainError::Generation("agent panicked".to_string()),
            )
        }
        Err(_) => {
            let completed = invocation.completed();
            log::warn!(
                "[COORDINATOR] Agent '{}' exceeded step timeout {:?} after {} action(s)",
                agent_id,
                timeout,
                completed.len()
            );
            AgentResult::failed(
                &agent_id,
                completed,
                BrainError::Timeout(format!("step exceeded {:?}", timeout)),
            )
        }
    };
    (result, started.elapsed())
}

fn cancel_pending(reports: &mut [StepReport]) {
    for report in reports.iter_mut().filter(|r| r.state == StepState::Pending) {
        report.state = StepState::Cancelled;
    }
}

fn first_line(text: &str) -> &str {
    text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}

/// Step instruction followed by the results it depends on
fn compose_instruction(instruction: &str, depends_on: impl Iterator<Item = usize>, reports: &[StepReport]) -> String {
    let upstream: Vec<String> = depends_on
        .map(|d| {
            let report = &reports[d];
            match report.state {
                StepState::Succeeded => format!("- step {} ({}): {}", d + 1, report.agent_id, report.content),
                _ => format!(
                    "- step {} ({}) FAILED: {}. Continue without it and say what is missing.",
                    d + 1,
                    report.agent_id,
                    report.error.as_deref().unwrap_or("no output")
                ),
            }
        })
        .collect();

    if upstream.is_empty() {
        instruction.to_string()
    } else {
        format!("{}\n\nResults from earlier steps:\n{}", instruction, upstream.join("\n"))
    }
}

fn synthesis_instruction(request: &Request, reports: &[StepReport]) -> String {
    let results: Vec<String> = reports
        .iter()
        .map(|r| match r.state {
            StepState::Succeeded => format!("[{}] {}:\n{}", r.index + 1, r.agent_id, r.content),
            _ => format!(
                "[{}] {} did not complete: {}",
                r.index + 1,
                r.agent_id,
                r.error.as_deref().unwrap_or("no output")
            ),
        })
        .collect();

    format!(
        "The user asked: \"{}\"\n\n\
         Your specialists produced these results:\n\n{}\n\n\
         Write one reply to the user that combines them. Mention anything that did not complete. \
         Do not call any tools.",
        request.text,
        results.join("\n\n")
    )
}

/// Fallback reply when synthesis fails
fn concatenate(reports: &[StepReport]) -> String {
    reports
        .iter()
        .filter_map(|r| match r.state {
            StepState::Succeeded => Some(r.content.clone()),
            StepState::Failed => Some(format!(
                "({} could not complete its part: {})",
                r.agent_id,
                r.error.as_deref().unwrap_or("unknown error")
            )),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn failure_explanation(failed: &StepReport, reports: &[StepReport], outcome_actions: &[ActionRecord]) -> String {
    let mut text = format!(
        "I couldn't complete your request: step {} ({}) failed: {}.",
        failed.index + 1,
        failed.agent_id,
        failed.error.as_deref().unwrap_or("unknown error")
    );

    let completed: Vec<String> = reports
        .iter()
        .filter(|r| r.state == StepState::Succeeded)
        .map(|r| format!("- {}: {}", r.agent_id, first_line(&r.content)))
        .collect();
    if !completed.is_empty() {
        text.push_str("\n\nCompleted before the failure:\n");
        text.push_str(&completed.join("\n"));
    }

    let done: Vec<String> = outcome_actions
        .iter()
        .filter(|a| a.succeeded)
        .map(|a| format!("• {}.{}", a.tool_name, a.method))
        .collect();
    if !done.is_empty() {
        text.push_str("\n\nActions that did go through:\n");
        text.push_str(&done.join("\n"));
    }

    let skipped: Vec<&str> = reports
        .iter()
        .filter(|r| r.state == StepState::Cancelled)
        .map(|r| r.agent_id.as_str())
        .collect();
    if !skipped.is_empty() {
        text.push_str(&format!("\n\nNot attempted: {}", skipped.join(", ")));
    }
    text
}

impl Coordinator {
    pub fn new(step_timeout: Duration) -> Self {
        Self { step_timeout }
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Execute `plan` against the roster snapshot. Returns `Err` only for a
    /// step naming an agent the roster does not have.
    pub async fn execute(
        &self,
        plan: &Plan,
        request: &Request,
        session: &Session,
        roster: &Roster,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome> {
        let agents: Vec<Arc<dyn Agent>> = plan
            .steps
            .iter()
            .map(|s| roster.resolve(&s.agent_id))
            .collect::<Result<_>>()?;
        let coordinating = roster.default_agent()?;

        let shared_session = Arc::new(session.clone());
        let mut reports: Vec<StepReport> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(index, s)| StepReport {
                index,
                agent_id: s.agent_id.clone(),
                state: StepState::Pending,
                critical: s.critical,
                content: String::new(),
                error: None,
                degraded_input: false,
                duration_ms: 0,
            })
            .collect();

        let mut scratch = session.working_memory.clone();
        let mut memory_writes = WorkingMemory::new();
        let mut actions = Vec::new();
        let mut abort: Option<(usize, BrainError)> = None;
        let mut cancelled = false;
        let mut running: FuturesUnordered<StepTask> = FuturesUnordered::new();

        log::info!("[COORDINATOR] Executing {}-step plan for session {}", plan.len(), session.session_id);

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                // dropping the join handles detaches the step tasks
                drop(running);
                cancel_pending(&mut reports);
                break;
            }

            if abort.is_some() {
                cancel_pending(&mut reports);
            } else {
                for (index, step) in plan.steps.iter().enumerate() {
                    if reports[index].state != StepState::Pending {
                        continue;
                    }
                    if step.depends_on.iter().any(|&d| !reports[d].state.is_terminal()) {
                        continue;
                    }
                    if step.depends_on.iter().any(|&d| {
                        reports[d].state == StepState::Cancelled
                            || (reports[d].state == StepState::Failed && plan.steps[d].critical)
                    }) {
                        reports[index].state = StepState::Cancelled;
                        continue;
                    }

                    let degraded = step
                        .depends_on
                        .iter()
                        .any(|&d| reports[d].state == StepState::Failed);
                    let instruction = compose_instruction(&step.instruction, step.depends_on.iter().copied(), &reports);

                    reports[index].state = StepState::Running;
                    reports[index].degraded_input = degraded;
                    log::info!(
                        "[COORDINATOR] Starting step {} ({}){}",
                        index + 1,
                        step.agent_id,
                        if degraded { " with degraded input" } else { "" }
                    );

                    let agent = agents[index].clone();
                    let session = shared_session.clone();
                    let snapshot = scratch.clone();
                    let timeout = self.step_timeout;
                    let task = tokio::spawn(invoke_agent(agent, instruction, session, snapshot, timeout));
                    running.push(async move { (index, task.await) }.boxed());
                }
            }

            if running.is_empty() {
                cancel_pending(&mut reports);
                break;
            }

            let joined = tokio::select! {
                joined = running.next() => joined,
                _ = cancel.cancelled() => continue,
            };

            let (index, result, elapsed) = match joined {
                Some((index, Ok((result, elapsed)))) => (index, result, elapsed),
                Some((index, Err(e))) => {
                    log::error!("[COORDINATOR] Step {} task died: {}", index + 1, e);
                    let failed = AgentResult::failed(
                        &reports[index].agent_id,
                        Vec::new(),
                        BrainError::Generation(format!("step task aborted: {}", e)),
                    );
                    (index, failed, Duration::ZERO)
                }
                None => break,
            };

            let AgentResult {
                content,
                actions: step_actions,
                updated_memory,
                error,
                ..
            } = result;

            reports[index].duration_ms = elapsed.as_millis() as u64;
            actions.extend(step_actions);

            match error {
                Some(err) => {
                    reports[index].state = StepState::Failed;
                    reports[index].error = Some(err.to_string());
                    if plan.steps[index].critical {
                        log::warn!("[COORDINATOR] Critical step {} failed: {}", index + 1, err);
                        if abort.is_none() {
                            abort = Some((index, err));
                        }
                    } else {
                        log::warn!("[COORDINATOR] Optional step {} failed: {}", index + 1, err);
                    }
                }
                None => {
                    log::info!(
                        "[COORDINATOR] Step {} ({}) succeeded in {}ms",
                        index + 1,
                        reports[index].agent_id,
                        reports[index].duration_ms
                    );
                    reports[index].state = StepState::Succeeded;
                    reports[index].content = content;
                    for (key, value) in updated_memory {
                        scratch.insert(key.clone(), value.clone());
                        memory_writes.insert(key, value);
                    }
                }
            }
        }

        if cancelled {
            log::warn!("[COORDINATOR] Request cancelled, discarding step results");
            return Ok(Self::cancelled_outcome(actions, reports));
        }

        if let Some((index, error)) = abort {
            let content = failure_explanation(&reports[index], &reports, &actions);
            return Ok(WorkflowOutcome {
                content,
                actions,
                memory_writes,
                steps: reports,
                synthesized: false,
                degraded: true,
                error: Some(error),
                cancelled: false,
            });
        }

        let instruction = synthesis_instruction(request, &reports);
        let (synthesis, _) = invoke_agent(
            coordinating,
            instruction,
            shared_session,
            scratch,
            self.step_timeout,
        )
        .await;

        if cancel.is_cancelled() {
            return Ok(Self::cancelled_outcome(actions, reports));
        }

        actions.extend(synthesis.actions);
        let synthesized = synthesis.error.is_none() && !synthesis.content.trim().is_empty();
        let content = if synthesized {
            for (key, value) in synthesis.updated_memory {
                memory_writes.insert(key, value);
            }
            synthesis.content
        } else {
            log::warn!(
                "[COORDINATOR] Synthesis failed ({}), concatenating step outputs",
                synthesis
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "empty reply".to_string())
            );
            concatenate(&reports)
        };

        let degraded = !synthesized
            || reports
                .iter()
                .any(|r| r.degraded_input || r.state == StepState::Failed);

        Ok(WorkflowOutcome {
            content,
            actions,
            memory_writes,
            steps: reports,
            synthesized,
            degraded,
            error: None,
            cancelled: false,
        })
    }

    fn cancelled_outcome(actions: Vec<ActionRecord>, steps: Vec<StepReport>) -> WorkflowOutcome {
        WorkflowOutcome {
            content: String::new(),
            actions,
            memory_writes: WorkingMemory::new(),
            steps,
            synthesized: false,
            degraded: true,
            error: None,
            cancelled: true,
        }
    }
}
