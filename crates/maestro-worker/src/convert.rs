// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conversion between wire protobuf messages and the internal model.
//!
//! All conversions happen at the processor boundary: inbound events are
//! converted before replay, outbound actions are converted into the
//! completion response. Unknown wire kinds fail loudly instead of being
//! silently dropped; a skipped event would corrupt replay determinism.

use chrono::{DateTime, Utc};
use thiserror::Error;

use maestro_protocol::worker_proto as wire;

use crate::history::{
    EventKind, HistoryEvent, OrchestrationStatus, OrchestratorAction, ParentInstance,
};

/// Well-known event name used to release an entity critical-section lock
/// held by a completed orchestration.
pub const LOCK_RELEASE_EVENT: &str = "__maestro_release_lock";

/// Errors raised while converting wire messages.
#[derive(Debug, Error, PartialEq)]
pub enum ConvertError {
    /// Event envelope with no recognized kind (newer protocol revision).
    #[error("unsupported history event kind (event_id {0})")]
    UnsupportedEventKind(i32),

    #[error("invalid orchestration status code {0}")]
    InvalidStatus(i32),

    #[error("timestamp out of range: {0}ms")]
    InvalidTimestamp(i64),

    /// A Failed completion must carry failure details.
    #[error("completion with status {0:?} is missing failure details")]
    MissingFailureDetails(OrchestrationStatus),
}

fn timestamp_from_ms(ms: i64) -> Result<DateTime<Utc>, ConvertError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(ConvertError::InvalidTimestamp(ms))
}

fn status_from_wire(code: i32) -> Result<OrchestrationStatus, ConvertError> {
    OrchestrationStatus::try_from(code).map_err(|_| ConvertError::InvalidStatus(code))
}

fn parent_from_wire(parent: wire::ParentInstance) -> ParentInstance {
    ParentInstance {
        instance_id: parent.instance_id,
        task_id: parent.task_id,
    }
}

fn parent_to_wire(parent: &ParentInstance) -> wire::ParentInstance {
    wire::ParentInstance {
        instance_id: parent.instance_id.clone(),
        task_id: parent.task_id,
    }
}

/// Convert a single wire event into the internal model.
pub fn event_from_wire(event: wire::HistoryEvent) -> Result<HistoryEvent, ConvertError> {
    let timestamp = timestamp_from_ms(event.timestamp_ms)?;
    let kind = match event.kind {
        Some(wire::history_event::Kind::ExecutionStarted(e)) => EventKind::ExecutionStarted {
            name: e.name,
            version: e.version,
            input: e.input,
            parent: e.parent.map(parent_from_wire),
        },
        Some(wire::history_event::Kind::ExecutionCompleted(e)) => EventKind::ExecutionCompleted {
            status: status_from_wire(e.status)?,
            result: e.result,
            failure: e.failure,
        },
        Some(wire::history_event::Kind::ExecutionTerminated(e)) => {
            EventKind::ExecutionTerminated { reason: e.reason }
        }
        Some(wire::history_event::Kind::TaskScheduled(e)) => EventKind::TaskScheduled {
            name: e.name,
            input: e.input,
        },
        Some(wire::history_event::Kind::TaskCompleted(e)) => EventKind::TaskCompleted {
            task_id: e.task_id,
            result: e.result,
        },
        Some(wire::history_event::Kind::TaskFailed(e)) => EventKind::TaskFailed {
            task_id: e.task_id,
            failure: e.failure,
        },
        Some(wire::history_event::Kind::SubOrchestrationCreated(e)) => {
            EventKind::SubOrchestrationCreated {
                name: e.name,
                instance_id: e.instance_id,
                input: e.input,
            }
        }
        Some(wire::history_event::Kind::SubOrchestrationCompleted(e)) => {
            EventKind::SubOrchestrationCompleted {
                task_id: e.task_id,
                result: e.result,
            }
        }
        Some(wire::history_event::Kind::SubOrchestrationFailed(e)) => {
            EventKind::SubOrchestrationFailed {
                task_id: e.task_id,
                failure: e.failure,
            }
        }
        Some(wire::history_event::Kind::TimerCreated(e)) => EventKind::TimerCreated {
            fire_at: timestamp_from_ms(e.fire_at_ms)?,
        },
        Some(wire::history_event::Kind::TimerFired(e)) => EventKind::TimerFired {
            timer_id: e.timer_id,
            fire_at: timestamp_from_ms(e.fire_at_ms)?,
        },
        Some(wire::history_event::Kind::OrchestratorStarted(_)) => EventKind::OrchestratorStarted,
        Some(wire::history_event::Kind::OrchestratorCompleted(_)) => {
            EventKind::OrchestratorCompleted
        }
        Some(wire::history_event::Kind::EventSent(e)) => EventKind::EventSent {
            instance_id: e.instance_id,
            name: e.name,
            data: e.data,
        },
        Some(wire::history_event::Kind::EventRaised(e)) => EventKind::EventRaised {
            name: e.name,
            data: e.data,
        },
        Some(wire::history_event::Kind::Generic(e)) => EventKind::Generic { data: e.data },
        Some(wire::history_event::Kind::HistoryState(e)) => EventKind::HistoryState {
            status: status_from_wire(e.status)?,
            custom_status: e.custom_status,
        },
        None => return Err(ConvertError::UnsupportedEventKind(event.event_id)),
    };

    Ok(HistoryEvent {
        event_id: event.event_id,
        timestamp,
        kind,
    })
}

/// Convert a vector of wire events, failing on the first unknown kind.
pub fn events_from_wire(events: Vec<wire::HistoryEvent>) -> Result<Vec<HistoryEvent>, ConvertError> {
    events.into_iter().map(event_from_wire).collect()
}

/// Convert an internal event back to its wire form.
pub fn event_to_wire(event: &HistoryEvent) -> wire::HistoryEvent {
    let kind = match &event.kind {
        EventKind::ExecutionStarted {
            name,
            version,
            input,
            parent,
        } => wire::history_event::Kind::ExecutionStarted(wire::ExecutionStartedEvent {
            name: name.clone(),
            version: version.clone(),
            input: input.clone(),
            parent: parent.as_ref().map(parent_to_wire),
        }),
        EventKind::ExecutionCompleted {
            status,
            result,
            failure,
        } => wire::history_event::Kind::ExecutionCompleted(wire::ExecutionCompletedEvent {
            status: *status as i32,
            result: result.clone(),
            failure: failure.clone(),
        }),
        EventKind::ExecutionTerminated { reason } => {
            wire::history_event::Kind::ExecutionTerminated(wire::ExecutionTerminatedEvent {
                reason: reason.clone(),
            })
        }
        EventKind::TaskScheduled { name, input } => {
            wire::history_event::Kind::TaskScheduled(wire::TaskScheduledEvent {
                name: name.clone(),
                input: input.clone(),
            })
        }
        EventKind::TaskCompleted { task_id, result } => {
            wire::history_event::Kind::TaskCompleted(wire::TaskCompletedEvent {
                task_id: *task_id,
                result: result.clone(),
            })
        }
        EventKind::TaskFailed { task_id, failure } => {
            wire::history_event::Kind::TaskFailed(wire::TaskFailedEvent {
                task_id: *task_id,
                failure: failure.clone(),
            })
        }
        EventKind::SubOrchestrationCreated {
            name,
            instance_id,
            input,
        } => wire::history_event::Kind::SubOrchestrationCreated(
            wire::SubOrchestrationCreatedEvent {
                name: name.clone(),
                instance_id: instance_id.clone(),
                input: input.clone(),
            },
        ),
        EventKind::SubOrchestrationCompleted { task_id, result } => {
            wire::history_event::Kind::SubOrchestrationCompleted(
                wire::SubOrchestrationCompletedEvent {
                    task_id: *task_id,
                    result: result.clone(),
                },
            )
        }
        EventKind::SubOrchestrationFailed { task_id, failure } => {
            wire::history_event::Kind::SubOrchestrationFailed(wire::SubOrchestrationFailedEvent {
                task_id: *task_id,
                failure: failure.clone(),
            })
        }
        EventKind::TimerCreated { fire_at } => {
            wire::history_event::Kind::TimerCreated(wire::TimerCreatedEvent {
                fire_at_ms: fire_at.timestamp_millis(),
            })
        }
        EventKind::TimerFired { timer_id, fire_at } => {
            wire::history_event::Kind::TimerFired(wire::TimerFiredEvent {
                timer_id: *timer_id,
                fire_at_ms: fire_at.timestamp_millis(),
            })
        }
        EventKind::OrchestratorStarted => {
            wire::history_event::Kind::OrchestratorStarted(wire::OrchestratorStartedEvent {})
        }
        EventKind::OrchestratorCompleted => {
            wire::history_event::Kind::OrchestratorCompleted(wire::OrchestratorCompletedEvent {})
        }
        EventKind::EventSent {
            instance_id,
            name,
            data,
        } => wire::history_event::Kind::EventSent(wire::EventSentEvent {
            instance_id: instance_id.clone(),
            name: name.clone(),
            data: data.clone(),
        }),
        EventKind::EventRaised { name, data } => {
            wire::history_event::Kind::EventRaised(wire::EventRaisedEvent {
                name: name.clone(),
                data: data.clone(),
            })
        }
        EventKind::Generic { data } => {
            wire::history_event::Kind::Generic(wire::GenericEvent { data: data.clone() })
        }
        EventKind::HistoryState {
            status,
            custom_status,
        } => wire::history_event::Kind::HistoryState(wire::HistoryStateEvent {
            status: *status as i32,
            custom_status: custom_status.clone(),
        }),
    };

    wire::HistoryEvent {
        event_id: event.event_id,
        timestamp_ms: event.timestamp.timestamp_millis(),
        kind: Some(kind),
    }
}

/// Convert one internal action to its wire form.
pub fn action_to_wire(action: &OrchestratorAction) -> Result<wire::OrchestratorAction, ConvertError> {
    let (id, kind) = match action {
        OrchestratorAction::ScheduleTask { id, name, input } => (
            *id,
            wire::orchestrator_action::Kind::ScheduleTask(wire::ScheduleTaskAction {
                name: name.clone(),
                input: input.clone(),
            }),
        ),
        OrchestratorAction::CreateTimer { id, fire_at } => (
            *id,
            wire::orchestrator_action::Kind::CreateTimer(wire::CreateTimerAction {
                fire_at_ms: fire_at.timestamp_millis(),
            }),
        ),
        OrchestratorAction::CreateSubOrchestration {
            id,
            name,
            instance_id,
            input,
            version,
        } => (
            *id,
            wire::orchestrator_action::Kind::CreateSubOrchestration(
                wire::CreateSubOrchestrationAction {
                    name: name.clone(),
                    instance_id: instance_id.clone(),
                    input: input.clone(),
                    version: version.clone(),
                },
            ),
        ),
        OrchestratorAction::SendEvent {
            instance_id,
            name,
            data,
        } => (
            -1,
            wire::orchestrator_action::Kind::SendEvent(wire::SendEventAction {
                instance_id: instance_id.clone(),
                name: name.clone(),
                data: data.clone(),
            }),
        ),
        OrchestratorAction::CompleteOrchestration {
            status,
            result,
            failure,
            carryover_events,
            new_version,
        } => {
            if *status == OrchestrationStatus::Failed && failure.is_none() {
                return Err(ConvertError::MissingFailureDetails(*status));
            }
            (
                -1,
                wire::orchestrator_action::Kind::CompleteOrchestration(
                    wire::CompleteOrchestrationAction {
                        status: *status as i32,
                        result: result.clone(),
                        failure: failure.clone(),
                        carryover_events: carryover_events.iter().map(event_to_wire).collect(),
                        new_version: new_version.clone(),
                    },
                ),
            )
        }
    };

    Ok(wire::OrchestratorAction {
        id,
        kind: Some(kind),
    })
}

/// Build the orchestrator completion response from a replay pass.
pub fn actions_to_response(
    completion_token: &str,
    instance_id: &str,
    custom_status: Option<String>,
    actions: &[OrchestratorAction],
    history_cached: bool,
) -> Result<wire::OrchestratorResponse, ConvertError> {
    Ok(wire::OrchestratorResponse {
        completion_token: completion_token.to_string(),
        instance_id: instance_id.to_string(),
        custom_status,
        actions: actions
            .iter()
            .map(action_to_wire)
            .collect::<Result<Vec<_>, _>>()?,
        history_cached,
    })
}

/// Synthetic EventSent that releases a held entity lock when the owning
/// orchestration reaches a terminal state without unlocking.
pub fn lock_release_action(lock_entity_id: &str, owner_instance_id: &str) -> OrchestratorAction {
    OrchestratorAction::SendEvent {
        instance_id: lock_entity_id.to_string(),
        name: LOCK_RELEASE_EVENT.to_string(),
        data: Some(format!("{{\"owner\":\"{}\"}}", owner_instance_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_protocol::worker_proto::TaskFailureDetails;

    fn sample_events() -> Vec<HistoryEvent> {
        let ts = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        vec![
            HistoryEvent::new(
                -1,
                ts,
                EventKind::ExecutionStarted {
                    name: "OrderFlow".to_string(),
                    version: "2.0.1".to_string(),
                    input: Some("\"order-1\"".to_string()),
                    parent: Some(ParentInstance {
                        instance_id: "parent".to_string(),
                        task_id: 4,
                    }),
                },
            ),
            HistoryEvent::new(
                1,
                ts,
                EventKind::TaskScheduled {
                    name: "Charge".to_string(),
                    input: None,
                },
            ),
            HistoryEvent::new(
                2,
                ts,
                EventKind::TaskFailed {
                    task_id: 1,
                    failure: Some(TaskFailureDetails {
                        error_type: "CardDeclined".to_string(),
                        error_message: "insufficient funds".to_string(),
                        stack_trace: None,
                        inner_failure: None,
                        is_non_retriable: true,
                    }),
                },
            ),
            HistoryEvent::new(
                3,
                ts,
                EventKind::TimerFired {
                    timer_id: 2,
                    fire_at: ts,
                },
            ),
            HistoryEvent::new(-1, ts, EventKind::OrchestratorStarted),
            HistoryEvent::new(
                -1,
                ts,
                EventKind::EventRaised {
                    name: "approval".to_string(),
                    data: Some("true".to_string()),
                },
            ),
        ]
    }

    #[test]
    fn events_survive_wire_round_trip() {
        let events = sample_events();
        let wire: Vec<_> = events.iter().map(event_to_wire).collect();
        let back = events_from_wire(wire).unwrap();
        assert_eq!(back, events);
    }

    #[test]
    fn unknown_event_kind_is_an_error_not_a_skip() {
        let unknown = wire::HistoryEvent {
            event_id: 9,
            timestamp_ms: 0,
            kind: None,
        };
        assert_eq!(
            events_from_wire(vec![unknown]).unwrap_err(),
            ConvertError::UnsupportedEventKind(9)
        );
    }

    #[test]
    fn invalid_status_code_is_rejected() {
        let event = wire::HistoryEvent {
            event_id: 1,
            timestamp_ms: 0,
            kind: Some(wire::history_event::Kind::HistoryState(
                wire::HistoryStateEvent {
                    status: 99,
                    custom_status: None,
                },
            )),
        };
        assert_eq!(
            event_from_wire(event).unwrap_err(),
            ConvertError::InvalidStatus(99)
        );
    }

    #[test]
    fn failed_completion_requires_failure_details() {
        let action = OrchestratorAction::CompleteOrchestration {
            status: OrchestrationStatus::Failed,
            result: None,
            failure: None,
            carryover_events: vec![],
            new_version: None,
        };
        assert_eq!(
            action_to_wire(&action).unwrap_err(),
            ConvertError::MissingFailureDetails(OrchestrationStatus::Failed)
        );
    }

    #[test]
    fn completion_response_carries_actions_in_order() {
        let ts = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        let actions = vec![
            OrchestratorAction::ScheduleTask {
                id: 1,
                name: "A".to_string(),
                input: None,
            },
            OrchestratorAction::CreateTimer { id: 2, fire_at: ts },
        ];
        let response =
            actions_to_response("tok", "inst", Some("busy".to_string()), &actions, true).unwrap();
        assert_eq!(response.actions.len(), 2);
        assert_eq!(response.actions[0].id, 1);
        assert_eq!(response.actions[1].id, 2);
        assert!(response.history_cached);
        assert_eq!(response.custom_status.as_deref(), Some("busy"));
    }

    #[test]
    fn carryover_events_round_trip_through_completion() {
        let ts = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        let carryover = vec![HistoryEvent::new(
            -1,
            ts,
            EventKind::EventRaised {
                name: "buffered".to_string(),
                data: None,
            },
        )];
        let action = OrchestratorAction::CompleteOrchestration {
            status: OrchestrationStatus::ContinuedAsNew,
            result: None,
            failure: None,
            carryover_events: carryover.clone(),
            new_version: Some("3.0.0".to_string()),
        };
        let wire_action = action_to_wire(&action).unwrap();
        match wire_action.kind {
            Some(wire::orchestrator_action::Kind::CompleteOrchestration(c)) => {
                assert_eq!(events_from_wire(c.carryover_events).unwrap(), carryover);
                assert_eq!(c.new_version.as_deref(), Some("3.0.0"));
            }
            other => panic!("unexpected action kind: {other:?}"),
        }
    }

    #[test]
    fn lock_release_event_targets_lock_entity() {
        let action = lock_release_action("@lock@cart", "inst-1");
        match action {
            OrchestratorAction::SendEvent {
                instance_id, name, ..
            } => {
                assert_eq!(instance_id, "@lock@cart");
                assert_eq!(name, LOCK_RELEASE_EVENT);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }
}
