// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic orchestration context.
//!
//! Orchestrator code runs as an ordinary async function against this
//! context. Every awaitable it creates (task, timer, sub-orchestration,
//! external event) resolves purely from the reconstructed history, so a
//! replay of the same history makes identical calls and observes
//! identical results. Awaitables whose outcome is not yet in history
//! stay pending; the pass ends and the pending calls are reported as
//! actions.
//!
//! Correlation ids follow the adopted-id scheme: the nth schedule call
//! of a given kind adopts the id of the nth matching scheduling event in
//! history. Calls beyond recorded history get fresh ids and produce
//! actions.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};

use maestro_protocol::worker_proto::TaskFailureDetails;

use crate::history::{EventKind, HistoryEvent, OrchestrationRuntimeState, OrchestratorAction};

struct CtxInner {
    instance_id: String,
    input: Option<String>,
    /// Full history in replay order (past then new).
    history: Vec<HistoryEvent>,
    /// Deterministic "now" for this pass.
    current_time: DateTime<Utc>,
    /// Actions produced by calls that ran past recorded history.
    actions: Vec<OrchestratorAction>,
    /// Event ids of scheduling events, per kind, in history order.
    task_schedule_ids: Vec<i32>,
    timer_schedule_ids: Vec<i32>,
    sub_schedule_ids: Vec<i32>,
    /// Cursor into the id vectors above; the next schedule call of that
    /// kind adopts the id at the cursor.
    task_cursor: usize,
    timer_cursor: usize,
    sub_cursor: usize,
    /// EventSent events already in history, and sends made this pass.
    recorded_send_count: usize,
    send_cursor: usize,
    /// Next fresh correlation id, past every id history already uses.
    next_id: i32,
    /// Per-name ordinals claimed by external event waiters.
    claimed_externals: HashMap<String, usize>,
    /// Per-name count of external events actually consumed (waiters that
    /// resolved). Raised events beyond this are carryover candidates.
    consumed_externals: HashMap<String, usize>,
    custom_status: Option<String>,
    continued_as_new: Option<ContinueAsNew>,
}

#[derive(Debug, Clone)]
pub(crate) struct ContinueAsNew {
    pub input: Option<String>,
    pub version: Option<String>,
}

/// Handle passed to orchestrator code. Cloning shares the same pass.
#[derive(Clone)]
pub struct OrchestrationContext {
    inner: Arc<Mutex<CtxInner>>,
}

impl OrchestrationContext {
    pub(crate) fn new(instance_id: &str, state: &OrchestrationRuntimeState) -> Self {
        let history: Vec<HistoryEvent> = state.all_events().cloned().collect();

        let mut task_schedule_ids = Vec::new();
        let mut timer_schedule_ids = Vec::new();
        let mut sub_schedule_ids = Vec::new();
        let mut recorded_send_count = 0usize;
        let mut max_id = 0i32;
        let mut current_time = state.started_at;

        for event in &history {
            max_id = max_id.max(event.event_id);
            match &event.kind {
                EventKind::TaskScheduled { .. } => task_schedule_ids.push(event.event_id),
                EventKind::TimerCreated { .. } => timer_schedule_ids.push(event.event_id),
                EventKind::SubOrchestrationCreated { .. } => {
                    sub_schedule_ids.push(event.event_id)
                }
                EventKind::EventSent { .. } => recorded_send_count += 1,
                // The latest pass marker fixes the deterministic clock.
                EventKind::OrchestratorStarted => current_time = event.timestamp,
                _ => {}
            }
        }

        Self {
            inner: Arc::new(Mutex::new(CtxInner {
                instance_id: instance_id.to_string(),
                input: state.input.clone(),
                history,
                current_time,
                actions: Vec::new(),
                task_schedule_ids,
                timer_schedule_ids,
                sub_schedule_ids,
                task_cursor: 0,
                timer_cursor: 0,
                sub_cursor: 0,
                recorded_send_count,
                send_cursor: 0,
                next_id: max_id + 1,
                claimed_externals: HashMap::new(),
                consumed_externals: HashMap::new(),
                custom_status: None,
                continued_as_new: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CtxInner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Instance id of the orchestration being replayed.
    pub fn instance_id(&self) -> String {
        self.lock().instance_id.clone()
    }

    /// The orchestration input from ExecutionStarted.
    pub fn input(&self) -> Option<String> {
        self.lock().input.clone()
    }

    /// Deterministic current time: stable across replays of the same
    /// history. Never use wall-clock time inside orchestrator code.
    pub fn current_utc(&self) -> DateTime<Utc> {
        self.lock().current_time
    }

    /// Schedule an activity; resolves with its result once a completion
    /// event is in history.
    pub fn schedule_task(
        &self,
        name: impl Into<String>,
        input: Option<String>,
    ) -> CompletionFuture {
        let name = name.into();
        let mut inner = self.lock();
        let id = match inner.task_schedule_ids.get(inner.task_cursor).copied() {
            Some(adopted) => {
                inner.task_cursor += 1;
                adopted
            }
            None => {
                let id = inner.fresh_id();
                inner.task_cursor += 1;
                inner.actions.push(OrchestratorAction::ScheduleTask {
                    id,
                    name,
                    input,
                });
                id
            }
        };
        CompletionFuture {
            ctx: self.inner.clone(),
            id,
            kind: CompletionKind::Task,
            done: false,
        }
    }

    /// Create a timer that fires at an absolute time.
    pub fn schedule_timer(&self, fire_at: DateTime<Utc>) -> TimerFuture {
        let mut inner = self.lock();
        let id = match inner.timer_schedule_ids.get(inner.timer_cursor).copied() {
            Some(adopted) => {
                inner.timer_cursor += 1;
                adopted
            }
            None => {
                let id = inner.fresh_id();
                inner.timer_cursor += 1;
                inner
                    .actions
                    .push(OrchestratorAction::CreateTimer { id, fire_at });
                id
            }
        };
        TimerFuture {
            ctx: self.inner.clone(),
            id,
        }
    }

    /// Create a timer relative to the deterministic current time.
    pub fn timer(&self, delay: Duration) -> TimerFuture {
        let fire_at = self.current_utc()
            + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        self.schedule_timer(fire_at)
    }

    /// Start a sub-orchestration; resolves with its terminal result.
    pub fn schedule_sub_orchestration(
        &self,
        name: impl Into<String>,
        instance_id: impl Into<String>,
        input: Option<String>,
        version: Option<String>,
    ) -> CompletionFuture {
        let name = name.into();
        let instance_id = instance_id.into();
        let mut inner = self.lock();
        let id = match inner.sub_schedule_ids.get(inner.sub_cursor).copied() {
            Some(adopted) => {
                inner.sub_cursor += 1;
                adopted
            }
            None => {
                let id = inner.fresh_id();
                inner.sub_cursor += 1;
                inner.actions.push(OrchestratorAction::CreateSubOrchestration {
                    id,
                    name,
                    instance_id,
                    input,
                    version,
                });
                id
            }
        };
        CompletionFuture {
            ctx: self.inner.clone(),
            id,
            kind: CompletionKind::SubOrchestration,
            done: false,
        }
    }

    /// Wait for a named external event. Multiple waiters on the same
    /// name consume matching events in raise order.
    pub fn wait_external_event(&self, name: impl Into<String>) -> ExternalEventFuture {
        let name = name.into();
        let mut inner = self.lock();
        let ordinal = {
            let entry = inner.claimed_externals.entry(name.clone()).or_insert(0);
            let ordinal = *entry;
            *entry += 1;
            ordinal
        };
        ExternalEventFuture {
            ctx: self.inner.clone(),
            name,
            ordinal,
            done: false,
        }
    }

    /// Send an event to another instance. Fire-and-forget.
    ///
    /// Sends already recorded as EventSent in history are replayed
    /// silently; only sends past recorded history become actions.
    pub fn send_event(
        &self,
        instance_id: impl Into<String>,
        name: impl Into<String>,
        data: Option<String>,
    ) {
        let mut inner = self.lock();
        if inner.send_cursor < inner.recorded_send_count {
            inner.send_cursor += 1;
            return;
        }
        inner.send_cursor += 1;
        inner.actions.push(OrchestratorAction::SendEvent {
            instance_id: instance_id.into(),
            name: name.into(),
            data,
        });
    }

    /// Restart this orchestration with a fresh history and new input.
    /// Takes effect when the current pass ends.
    pub fn continue_as_new(&self, input: Option<String>, version: Option<String>) {
        self.lock().continued_as_new = Some(ContinueAsNew { input, version });
    }

    /// Set the custom status string reported with the completion.
    pub fn set_custom_status(&self, status: impl Into<String>) {
        self.lock().custom_status = Some(status.into());
    }

    // Pass-level accessors used by the executor.

    pub(crate) fn take_actions(&self) -> Vec<OrchestratorAction> {
        std::mem::take(&mut self.lock().actions)
    }

    pub(crate) fn custom_status(&self) -> Option<String> {
        self.lock().custom_status.clone()
    }

    pub(crate) fn continued_as_new(&self) -> Option<ContinueAsNew> {
        self.lock().continued_as_new.clone()
    }

    /// Raised external events no waiter consumed, in raise order. These
    /// are redelivered to the next execution on continue-as-new.
    pub(crate) fn unconsumed_external_events(&self) -> Vec<HistoryEvent> {
        let inner = self.lock();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut out = Vec::new();
        for event in &inner.history {
            if let EventKind::EventRaised { name, .. } = &event.kind {
                let ordinal = {
                    let entry = seen.entry(name.clone()).or_insert(0);
                    let ordinal = *entry;
                    *entry += 1;
                    ordinal
                };
                let consumed = inner.consumed_externals.get(name).copied().unwrap_or(0);
                if ordinal >= consumed {
                    out.push(event.clone());
                }
            }
        }
        out
    }
}

impl CtxInner {
    fn fresh_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

enum CompletionKind {
    Task,
    SubOrchestration,
}

/// Future for a scheduled activity or sub-orchestration.
pub struct CompletionFuture {
    ctx: Arc<Mutex<CtxInner>>,
    id: i32,
    kind: CompletionKind,
    done: bool,
}

impl Future for CompletionFuture {
    type Output = Result<Option<String>, TaskFailureDetails>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.done {
            return Poll::Pending;
        }
        let inner = self
            .ctx
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        let outcome = inner.history.iter().find_map(|event| match (&self.kind, &event.kind) {
            (CompletionKind::Task, EventKind::TaskCompleted { task_id, result })
                if *task_id == self.id =>
            {
                Some(Ok(result.clone()))
            }
            (CompletionKind::Task, EventKind::TaskFailed { task_id, failure })
                if *task_id == self.id =>
            {
                Some(Err(unwrap_failure(failure)))
            }
            (
                CompletionKind::SubOrchestration,
                EventKind::SubOrchestrationCompleted { task_id, result },
            ) if *task_id == self.id => Some(Ok(result.clone())),
            (
                CompletionKind::SubOrchestration,
                EventKind::SubOrchestrationFailed { task_id, failure },
            ) if *task_id == self.id => Some(Err(unwrap_failure(failure))),
            _ => None,
        });

        drop(inner);
        match outcome {
            Some(result) => {
                self.done = true;
                Poll::Ready(result)
            }
            None => Poll::Pending,
        }
    }
}

/// Future for a durable timer.
pub struct TimerFuture {
    ctx: Arc<Mutex<CtxInner>>,
    id: i32,
}

impl Future for TimerFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self
            .ctx
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let fired = inner.history.iter().any(|event| {
            matches!(&event.kind, EventKind::TimerFired { timer_id, .. } if *timer_id == self.id)
        });
        if fired { Poll::Ready(()) } else { Poll::Pending }
    }
}

/// Future for a named external event.
pub struct ExternalEventFuture {
    ctx: Arc<Mutex<CtxInner>>,
    name: String,
    ordinal: usize,
    done: bool,
}

impl Future for ExternalEventFuture {
    type Output = Option<String>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.done {
            return Poll::Pending;
        }
        let mut inner = self
            .ctx
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        let found = inner
            .history
            .iter()
            .filter_map(|event| match &event.kind {
                EventKind::EventRaised { name, data } if *name == self.name => Some(data.clone()),
                _ => None,
            })
            .nth(self.ordinal);

        match found {
            Some(data) => {
                let consumed = inner
                    .consumed_externals
                    .entry(self.name.clone())
                    .or_insert(0);
                *consumed = (*consumed).max(self.ordinal + 1);
                drop(inner);
                self.done = true;
                Poll::Ready(data)
            }
            None => Poll::Pending,
        }
    }
}

fn unwrap_failure(failure: &Option<TaskFailureDetails>) -> TaskFailureDetails {
    failure.clone().unwrap_or_else(|| TaskFailureDetails {
        error_type: "Unknown".to_string(),
        error_message: "failure event without details".to_string(),
        stack_trace: None,
        inner_failure: None,
        is_non_retriable: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryEvent;
    use std::task::Waker;

    fn state(past: Vec<HistoryEvent>, new: Vec<HistoryEvent>) -> OrchestrationRuntimeState {
        let mut all = vec![HistoryEvent::new(
            -1,
            Utc::now(),
            EventKind::ExecutionStarted {
                name: "Flow".to_string(),
                version: "1.0.0".to_string(),
                input: Some("\"in\"".to_string()),
                parent: None,
            },
        )];
        all.extend(past);
        OrchestrationRuntimeState::from_events(all, new).unwrap()
    }

    fn poll_once<F: Future>(fut: &mut Pin<&mut F>) -> Poll<F::Output> {
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        fut.as_mut().poll(&mut cx)
    }

    #[test]
    fn schedule_task_beyond_history_emits_action() {
        let ctx = OrchestrationContext::new("inst", &state(vec![], vec![]));
        let fut = ctx.schedule_task("Charge", Some("5".to_string()));
        let mut fut = std::pin::pin!(fut);
        assert!(poll_once(&mut fut).is_pending());

        let actions = ctx.take_actions();
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            OrchestratorAction::ScheduleTask { name, .. } if name == "Charge"
        ));
    }

    #[test]
    fn replayed_task_adopts_history_id_and_resolves() {
        let ts = Utc::now();
        let ctx = OrchestrationContext::new(
            "inst",
            &state(
                vec![
                    HistoryEvent::new(
                        7,
                        ts,
                        EventKind::TaskScheduled {
                            name: "Charge".to_string(),
                            input: None,
                        },
                    ),
                    HistoryEvent::new(
                        8,
                        ts,
                        EventKind::TaskCompleted {
                            task_id: 7,
                            result: Some("\"ok\"".to_string()),
                        },
                    ),
                ],
                vec![],
            ),
        );

        let fut = ctx.schedule_task("Charge", None);
        let mut fut = std::pin::pin!(fut);
        match poll_once(&mut fut) {
            Poll::Ready(Ok(result)) => assert_eq!(result.as_deref(), Some("\"ok\"")),
            other => panic!("expected resolved task, got {other:?}"),
        }
        // Replayed call adopted the history id, so no new action.
        assert!(ctx.take_actions().is_empty());
    }

    #[test]
    fn failed_task_resolves_with_failure_details() {
        let ts = Utc::now();
        let ctx = OrchestrationContext::new(
            "inst",
            &state(
                vec![
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
                                error_message: "no funds".to_string(),
                                stack_trace: None,
                                inner_failure: None,
                                is_non_retriable: true,
                            }),
                        },
                    ),
                ],
                vec![],
            ),
        );

        let fut = ctx.schedule_task("Charge", None);
        let mut fut = std::pin::pin!(fut);
        match poll_once(&mut fut) {
            Poll::Ready(Err(failure)) => assert_eq!(failure.error_type, "CardDeclined"),
            other => panic!("expected failed task, got {other:?}"),
        }
    }

    #[test]
    fn timer_resolves_on_fired_event() {
        let ts = Utc::now();
        let ctx = OrchestrationContext::new(
            "inst",
            &state(
                vec![
                    HistoryEvent::new(3, ts, EventKind::TimerCreated { fire_at: ts }),
                    HistoryEvent::new(
                        4,
                        ts,
                        EventKind::TimerFired {
                            timer_id: 3,
                            fire_at: ts,
                        },
                    ),
                ],
                vec![],
            ),
        );

        let fut = ctx.schedule_timer(ts);
        let mut fut = std::pin::pin!(fut);
        assert!(poll_once(&mut fut).is_ready());
    }

    #[test]
    fn external_events_resolve_fifo_per_name() {
        let ts = Utc::now();
        let ctx = OrchestrationContext::new(
            "inst",
            &state(
                vec![],
                vec![
                    HistoryEvent::new(
                        -1,
                        ts,
                        EventKind::EventRaised {
                            name: "approval".to_string(),
                            data: Some("first".to_string()),
                        },
                    ),
                    HistoryEvent::new(
                        -1,
                        ts,
                        EventKind::EventRaised {
                            name: "approval".to_string(),
                            data: Some("second".to_string()),
                        },
                    ),
                ],
            ),
        );

        let a = ctx.wait_external_event("approval");
        let b = ctx.wait_external_event("approval");
        let c = ctx.wait_external_event("approval");

        let mut a = std::pin::pin!(a);
        let mut b = std::pin::pin!(b);
        let mut c = std::pin::pin!(c);

        assert_eq!(poll_once(&mut a), Poll::Ready(Some("first".to_string())));
        assert_eq!(poll_once(&mut b), Poll::Ready(Some("second".to_string())));
        assert!(poll_once(&mut c).is_pending());
    }

    #[test]
    fn unconsumed_externals_are_carryover_candidates() {
        let ts = Utc::now();
        let ctx = OrchestrationContext::new(
            "inst",
            &state(
                vec![],
                vec![
                    HistoryEvent::new(
                        -1,
                        ts,
                        EventKind::EventRaised {
                            name: "approval".to_string(),
                            data: Some("used".to_string()),
                        },
                    ),
                    HistoryEvent::new(
                        -1,
                        ts,
                        EventKind::EventRaised {
                            name: "approval".to_string(),
                            data: Some("buffered".to_string()),
                        },
                    ),
                ],
            ),
        );

        let fut = ctx.wait_external_event("approval");
        let mut fut = std::pin::pin!(fut);
        assert!(poll_once(&mut fut).is_ready());

        let carryover = ctx.unconsumed_external_events();
        assert_eq!(carryover.len(), 1);
        assert!(matches!(
            &carryover[0].kind,
            EventKind::EventRaised { data, .. } if data.as_deref() == Some("buffered")
        ));
    }

    #[test]
    fn current_utc_follows_latest_pass_marker() {
        let old = DateTime::<Utc>::from_timestamp_millis(1_000).unwrap();
        let newer = DateTime::<Utc>::from_timestamp_millis(2_000).unwrap();
        let ctx = OrchestrationContext::new(
            "inst",
            &state(
                vec![HistoryEvent::new(-1, old, EventKind::OrchestratorStarted)],
                vec![HistoryEvent::new(-1, newer, EventKind::OrchestratorStarted)],
            ),
        );
        assert_eq!(ctx.current_utc(), newer);
    }

    #[test]
    fn replayed_send_event_emits_no_action() {
        let ts = Utc::now();
        let ctx = OrchestrationContext::new(
            "inst",
            &state(
                vec![HistoryEvent::new(
                    -1,
                    ts,
                    EventKind::EventSent {
                        instance_id: "other".to_string(),
                        name: "ping".to_string(),
                        data: None,
                    },
                )],
                vec![],
            ),
        );

        // First send replays the recorded one, second is new.
        ctx.send_event("other", "ping", None);
        ctx.send_event("other", "pong", None);
        let actions = ctx.take_actions();
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            OrchestratorAction::SendEvent { name, .. } if name == "pong"
        ));
    }

    #[test]
    fn continue_as_new_is_recorded() {
        let ctx = OrchestrationContext::new("inst", &state(vec![], vec![]));
        ctx.continue_as_new(Some("\"next\"".to_string()), Some("2.0.0".to_string()));
        let can = ctx.continued_as_new().expect("recorded");
        assert_eq!(can.input.as_deref(), Some("\"next\""));
        assert_eq!(can.version.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn custom_status_is_reported() {
        let ctx = OrchestrationContext::new("inst", &state(vec![], vec![]));
        ctx.set_custom_status("waiting for approval");
        assert_eq!(
            ctx.custom_status().as_deref(),
            Some("waiting for approval")
        );
    }
}
