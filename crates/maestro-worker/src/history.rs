// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Internal history and action model.
//!
//! The wire protocol carries protobuf envelopes; replay works on the
//! typed model in this module. `convert` maps between the two at the
//! processor boundary.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use maestro_protocol::worker_proto::OrchestrationStatus;
use maestro_protocol::worker_proto::TaskFailureDetails;

/// Identity of the parent orchestration for a sub-orchestration.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentInstance {
    pub instance_id: String,
    /// Id of the parent's SubOrchestrationCreated event.
    pub task_id: i32,
}

/// A single reconstructed history event.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEvent {
    /// Backend-assigned id; -1 for events with no correlation.
    pub event_id: i32,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

/// The typed payload of a history event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    ExecutionStarted {
        name: String,
        version: String,
        input: Option<String>,
        parent: Option<ParentInstance>,
    },
    ExecutionCompleted {
        status: OrchestrationStatus,
        result: Option<String>,
        failure: Option<TaskFailureDetails>,
    },
    ExecutionTerminated {
        reason: Option<String>,
    },
    TaskScheduled {
        name: String,
        input: Option<String>,
    },
    TaskCompleted {
        task_id: i32,
        result: Option<String>,
    },
    TaskFailed {
        task_id: i32,
        failure: Option<TaskFailureDetails>,
    },
    SubOrchestrationCreated {
        name: String,
        instance_id: String,
        input: Option<String>,
    },
    SubOrchestrationCompleted {
        task_id: i32,
        result: Option<String>,
    },
    SubOrchestrationFailed {
        task_id: i32,
        failure: Option<TaskFailureDetails>,
    },
    TimerCreated {
        fire_at: DateTime<Utc>,
    },
    TimerFired {
        timer_id: i32,
        fire_at: DateTime<Utc>,
    },
    /// Marks the start of a replay pass; its timestamp is the
    /// deterministic "current time" for that pass.
    OrchestratorStarted,
    OrchestratorCompleted,
    EventSent {
        instance_id: String,
        name: String,
        data: Option<String>,
    },
    EventRaised {
        name: String,
        data: Option<String>,
    },
    Generic {
        data: Option<String>,
    },
    HistoryState {
        status: OrchestrationStatus,
        custom_status: Option<String>,
    },
}

impl HistoryEvent {
    pub fn new(event_id: i32, timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            event_id,
            timestamp,
            kind,
        }
    }

    /// Rough in-memory footprint used for cache accounting. Counts the
    /// enum envelope plus owned string payloads.
    pub fn estimated_size(&self) -> usize {
        const BASE: usize = 64;
        let strings = match &self.kind {
            EventKind::ExecutionStarted {
                name,
                version,
                input,
                parent,
            } => {
                name.len()
                    + version.len()
                    + opt_len(input)
                    + parent.as_ref().map_or(0, |p| p.instance_id.len())
            }
            EventKind::ExecutionCompleted {
                result, failure, ..
            } => opt_len(result) + failure_size(failure),
            EventKind::ExecutionTerminated { reason } => opt_len(reason),
            EventKind::TaskScheduled { name, input } => name.len() + opt_len(input),
            EventKind::TaskCompleted { result, .. } => opt_len(result),
            EventKind::TaskFailed { failure, .. } => failure_size(failure),
            EventKind::SubOrchestrationCreated {
                name,
                instance_id,
                input,
            } => name.len() + instance_id.len() + opt_len(input),
            EventKind::SubOrchestrationCompleted { result, .. } => opt_len(result),
            EventKind::SubOrchestrationFailed { failure, .. } => failure_size(failure),
            EventKind::TimerCreated { .. }
            | EventKind::TimerFired { .. }
            | EventKind::OrchestratorStarted
            | EventKind::OrchestratorCompleted => 0,
            EventKind::EventSent {
                instance_id,
                name,
                data,
            } => instance_id.len() + name.len() + opt_len(data),
            EventKind::EventRaised { name, data } => name.len() + opt_len(data),
            EventKind::Generic { data } => opt_len(data),
            EventKind::HistoryState { custom_status, .. } => opt_len(custom_status),
        };
        BASE + strings
    }
}

fn opt_len(value: &Option<String>) -> usize {
    value.as_ref().map_or(0, |s| s.len())
}

fn failure_size(failure: &Option<TaskFailureDetails>) -> usize {
    let mut total = 0;
    let mut current = failure.as_ref();
    while let Some(f) = current {
        total += f.error_type.len()
            + f.error_message.len()
            + f.stack_trace.as_ref().map_or(0, |s| s.len());
        current = f.inner_failure.as_deref();
    }
    total
}

/// Estimated footprint of a whole event vector, for cache accounting.
pub fn estimated_history_size(events: &[HistoryEvent]) -> usize {
    events.iter().map(HistoryEvent::estimated_size).sum()
}

/// One side effect produced by a replay pass, correlated by `id` with
/// the completion event the backend will append later.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorAction {
    ScheduleTask {
        id: i32,
        name: String,
        input: Option<String>,
    },
    CreateTimer {
        id: i32,
        fire_at: DateTime<Utc>,
    },
    CreateSubOrchestration {
        id: i32,
        name: String,
        instance_id: String,
        input: Option<String>,
        version: Option<String>,
    },
    SendEvent {
        instance_id: String,
        name: String,
        data: Option<String>,
    },
    CompleteOrchestration {
        status: OrchestrationStatus,
        result: Option<String>,
        failure: Option<TaskFailureDetails>,
        carryover_events: Vec<HistoryEvent>,
        new_version: Option<String>,
    },
}

/// Errors detected while reconstructing runtime state from history.
#[derive(Debug, Error, PartialEq)]
pub enum HistoryError {
    #[error("history contains no ExecutionStarted event")]
    MissingExecutionStarted,

    #[error("history contains {0} ExecutionStarted events, expected exactly one")]
    DuplicateExecutionStarted(usize),
}

/// The reconstructed state of one orchestration execution: the already
/// replayed events plus the new events that triggered this work item.
#[derive(Debug, Clone)]
pub struct OrchestrationRuntimeState {
    pub name: String,
    pub version: String,
    pub input: Option<String>,
    pub parent: Option<ParentInstance>,
    pub started_at: DateTime<Utc>,
    pub past_events: Vec<HistoryEvent>,
    pub new_events: Vec<HistoryEvent>,
}

impl OrchestrationRuntimeState {
    /// Build runtime state from past and new events.
    ///
    /// Exactly one ExecutionStarted must appear across both vectors;
    /// anything else means the history is corrupt and no meaningful
    /// replay can happen.
    pub fn from_events(
        past_events: Vec<HistoryEvent>,
        new_events: Vec<HistoryEvent>,
    ) -> Result<Self, HistoryError> {
        let mut started: Option<(String, String, Option<String>, Option<ParentInstance>, DateTime<Utc>)> =
            None;
        let mut count = 0usize;

        for event in past_events.iter().chain(new_events.iter()) {
            if let EventKind::ExecutionStarted {
                name,
                version,
                input,
                parent,
            } = &event.kind
            {
                count += 1;
                if started.is_none() {
                    started = Some((
                        name.clone(),
                        version.clone(),
                        input.clone(),
                        parent.clone(),
                        event.timestamp,
                    ));
                }
            }
        }

        match count {
            0 => Err(HistoryError::MissingExecutionStarted),
            1 => {
                let (name, version, input, parent, started_at) =
                    started.ok_or(HistoryError::MissingExecutionStarted)?;
                Ok(Self {
                    name,
                    version,
                    input,
                    parent,
                    started_at,
                    past_events,
                    new_events,
                })
            }
            n => Err(HistoryError::DuplicateExecutionStarted(n)),
        }
    }

    /// All events in replay order: past first, then new.
    pub fn all_events(&self) -> impl Iterator<Item = &HistoryEvent> {
        self.past_events.iter().chain(self.new_events.iter())
    }

    /// Estimated footprint for cache accounting.
    pub fn estimated_size(&self) -> usize {
        estimated_history_size(&self.past_events) + estimated_history_size(&self.new_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(name: &str) -> HistoryEvent {
        HistoryEvent::new(
            -1,
            Utc::now(),
            EventKind::ExecutionStarted {
                name: name.to_string(),
                version: "1.0.0".to_string(),
                input: None,
                parent: None,
            },
        )
    }

    fn raised(name: &str) -> HistoryEvent {
        HistoryEvent::new(
            -1,
            Utc::now(),
            EventKind::EventRaised {
                name: name.to_string(),
                data: None,
            },
        )
    }

    #[test]
    fn from_events_accepts_exactly_one_execution_started() {
        let state =
            OrchestrationRuntimeState::from_events(vec![started("Flow")], vec![raised("go")])
                .unwrap();
        assert_eq!(state.name, "Flow");
        assert_eq!(state.version, "1.0.0");
        assert_eq!(state.past_events.len(), 1);
        assert_eq!(state.new_events.len(), 1);
    }

    #[test]
    fn from_events_rejects_missing_execution_started() {
        let err = OrchestrationRuntimeState::from_events(vec![raised("go")], vec![]).unwrap_err();
        assert_eq!(err, HistoryError::MissingExecutionStarted);
    }

    #[test]
    fn from_events_rejects_duplicate_execution_started() {
        let err =
            OrchestrationRuntimeState::from_events(vec![started("A")], vec![started("B")])
                .unwrap_err();
        assert_eq!(err, HistoryError::DuplicateExecutionStarted(2));
    }

    #[test]
    fn execution_started_in_new_events_is_accepted() {
        // First-ever work item for an instance: no past history yet.
        let state = OrchestrationRuntimeState::from_events(vec![], vec![started("Flow")]).unwrap();
        assert!(state.past_events.is_empty());
    }

    #[test]
    fn estimated_size_counts_string_payloads() {
        let small = HistoryEvent::new(-1, Utc::now(), EventKind::OrchestratorStarted);
        let big = HistoryEvent::new(
            1,
            Utc::now(),
            EventKind::TaskScheduled {
                name: "SendEmail".to_string(),
                input: Some("x".repeat(500)),
            },
        );
        assert!(big.estimated_size() > small.estimated_size() + 400);
    }

    #[test]
    fn estimated_size_walks_failure_chain() {
        let failure = TaskFailureDetails {
            error_type: "A".repeat(100),
            error_message: String::new(),
            stack_trace: None,
            inner_failure: Some(Box::new(TaskFailureDetails {
                error_type: "B".repeat(100),
                error_message: String::new(),
                stack_trace: None,
                inner_failure: None,
                is_non_retriable: false,
            })),
            is_non_retriable: false,
        };
        let event = HistoryEvent::new(
            2,
            Utc::now(),
            EventKind::TaskFailed {
                task_id: 1,
                failure: Some(failure),
            },
        );
        assert!(event.estimated_size() >= 200);
    }
}
