// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic replay of orchestrator code.
//!
//! A replay pass reconstructs an orchestration's position from history
//! and advances it with exactly one poll: every awaitable either
//! resolves from history or stays pending, so the orchestrator future
//! never actually suspends mid-pass. The poll's outcome maps to a set
//! of actions reported back to the backend.
//!
//! Panics in orchestrator code are contained to the pass and converted
//! into a Failed completion; a buggy orchestration must never take the
//! dispatch loop down with it.

pub mod context;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use tracing::{debug, warn};

use crate::config::{VersionFailureStrategy, VersionMatchPolicy};
use crate::failure::{
    self, ERROR_TYPE_ORCHESTRATOR_NOT_FOUND, ERROR_TYPE_VERSION_MISMATCH,
};
use crate::history::{OrchestrationRuntimeState, OrchestrationStatus, OrchestratorAction};
use crate::registry::TaskRegistry;

pub use context::OrchestrationContext;

/// Result of one replay pass.
#[derive(Debug)]
pub enum ReplayOutcome {
    /// Report these actions with the completion.
    Completed {
        actions: Vec<OrchestratorAction>,
        custom_status: Option<String>,
    },
    /// Do not complete; abandon the work item so another worker (or a
    /// differently-versioned one) can claim it.
    Abandon { reason: String },
}

/// Executes orchestrator replay passes against a registry.
pub struct ReplayExecutor {
    registry: Arc<TaskRegistry>,
    version_match_policy: VersionMatchPolicy,
    version_failure_strategy: VersionFailureStrategy,
    worker_version: String,
}

impl ReplayExecutor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        version_match_policy: VersionMatchPolicy,
        version_failure_strategy: VersionFailureStrategy,
        worker_version: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            version_match_policy,
            version_failure_strategy,
            worker_version: worker_version.into(),
        }
    }

    /// Run one replay pass for the given reconstructed state.
    pub fn execute(&self, instance_id: &str, state: &OrchestrationRuntimeState) -> ReplayOutcome {
        if let Some(outcome) = self.check_version(instance_id, state) {
            return outcome;
        }

        let Some(handler) = self.registry.resolve_orchestrator(&state.name) else {
            warn!(
                instance_id,
                orchestration = %state.name,
                "no orchestrator registered for work item"
            );
            return completed(vec![OrchestratorAction::CompleteOrchestration {
                status: OrchestrationStatus::Failed,
                result: None,
                failure: Some(failure::simple(
                    ERROR_TYPE_ORCHESTRATOR_NOT_FOUND,
                    format!("no orchestrator registered under '{}'", state.name),
                    true,
                )),
                carryover_events: vec![],
                new_version: None,
            }], None);
        };

        let ctx = OrchestrationContext::new(instance_id, state);
        let input = state.input.clone();

        let poll_result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let mut fut = handler.run(ctx.clone(), input);
            let waker = Waker::noop();
            let mut task_cx = Context::from_waker(waker);
            fut.as_mut().poll(&mut task_cx)
        }));

        let mut actions = ctx.take_actions();
        let custom_status = ctx.custom_status();

        let completion = match poll_result {
            Err(payload) => {
                warn!(instance_id, "orchestrator panicked during replay");
                Some(OrchestratorAction::CompleteOrchestration {
                    status: OrchestrationStatus::Failed,
                    result: None,
                    failure: Some(failure::from_panic(payload.as_ref())),
                    carryover_events: vec![],
                    new_version: None,
                })
            }
            Ok(Poll::Ready(result)) => Some(self.terminal_completion(&ctx, result)),
            Ok(Poll::Pending) => match ctx.continued_as_new() {
                Some(can) => Some(continue_as_new_completion(&ctx, can)),
                None => {
                    debug!(
                        instance_id,
                        pending_actions = actions.len(),
                        "replay pass ended awaiting new events"
                    );
                    None
                }
            },
        };

        if let Some(completion) = completion {
            actions.push(completion);
        }
        completed(actions, custom_status)
    }

    /// Returning from the orchestrator ends the execution; an earlier
    /// continue-as-new call takes precedence over the returned value.
    fn terminal_completion(
        &self,
        ctx: &OrchestrationContext,
        result: Result<Option<String>, String>,
    ) -> OrchestratorAction {
        if let Some(can) = ctx.continued_as_new() {
            return continue_as_new_completion(ctx, can);
        }
        match result {
            Ok(output) => OrchestratorAction::CompleteOrchestration {
                status: OrchestrationStatus::Completed,
                result: output,
                failure: None,
                carryover_events: vec![],
                new_version: None,
            },
            Err(message) => OrchestratorAction::CompleteOrchestration {
                status: OrchestrationStatus::Failed,
                result: None,
                failure: Some(failure::simple("OrchestrationFailure", message, false)),
                carryover_events: vec![],
                new_version: None,
            },
        }
    }

    fn check_version(
        &self,
        instance_id: &str,
        state: &OrchestrationRuntimeState,
    ) -> Option<ReplayOutcome> {
        let matches = match self.version_match_policy {
            VersionMatchPolicy::None => true,
            VersionMatchPolicy::Strict => state.version == self.worker_version,
            VersionMatchPolicy::CurrentOrOlder => {
                version_at_most(&state.version, &self.worker_version)
            }
        };
        if matches {
            return None;
        }

        warn!(
            instance_id,
            instance_version = %state.version,
            worker_version = %self.worker_version,
            "orchestration version failed match policy"
        );

        Some(match self.version_failure_strategy {
            VersionFailureStrategy::Reject => ReplayOutcome::Abandon {
                reason: format!(
                    "version '{}' does not match worker version '{}'",
                    state.version, self.worker_version
                ),
            },
            VersionFailureStrategy::Fail => completed(
                vec![OrchestratorAction::CompleteOrchestration {
                    status: OrchestrationStatus::Failed,
                    result: None,
                    failure: Some(failure::simple(
                        ERROR_TYPE_VERSION_MISMATCH,
                        format!(
                            "orchestration version '{}' is not accepted by worker version '{}'",
                            state.version, self.worker_version
                        ),
                        true,
                    )),
                    carryover_events: vec![],
                    new_version: None,
                }],
                None,
            ),
        })
    }
}

fn completed(actions: Vec<OrchestratorAction>, custom_status: Option<String>) -> ReplayOutcome {
    ReplayOutcome::Completed {
        actions,
        custom_status,
    }
}

fn continue_as_new_completion(
    ctx: &OrchestrationContext,
    can: context::ContinueAsNew,
) -> OrchestratorAction {
    OrchestratorAction::CompleteOrchestration {
        status: OrchestrationStatus::ContinuedAsNew,
        // The next execution's input travels in the result field.
        result: can.input,
        failure: None,
        carryover_events: ctx.unconsumed_external_events(),
        new_version: can.version,
    }
}

/// Numeric `major.minor.patch` comparison when both sides parse;
/// otherwise exact string equality.
fn version_at_most(candidate: &str, bound: &str) -> bool {
    match (parse_version(candidate), parse_version(bound)) {
        (Some(a), Some(b)) => a <= b,
        _ => candidate == bound,
    }
}

fn parse_version(s: &str) -> Option<(u64, u64, u64)> {
    let mut parts = s.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}
