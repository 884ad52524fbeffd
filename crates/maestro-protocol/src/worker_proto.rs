// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protobuf messages for the worker protocol.
//!
//! These definitions are hand-maintained `prost` structs so the crate
//! builds without a protoc toolchain. Field tags are part of the wire
//! contract: never renumber an existing tag, only append.
//!
//! Message families:
//! - Work-item feed: `WorkerHandshake` (client -> server, first frame on
//!   the work stream), then a server -> client stream of `WorkItem`s.
//! - History streaming: `HistoryStreamRequest` -> chunked `HistoryChunk`s.
//! - Completion/abandon RPCs: oneof-wrapped `RpcRequest`/`RpcResponse`.

/// Empty liveness probe, sent once per connection before the work stream
/// is opened.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct ProbeRequest {}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct ProbeResponse {}

/// Capability announcement sent as the first frame on the work stream.
///
/// The server throttles delivery to the advertised concurrency numbers;
/// the worker itself does not enforce admission control.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WorkerHandshake {
    #[prost(uint32, tag = "1")]
    pub max_concurrent_orchestration_work_items: u32,
    #[prost(uint32, tag = "2")]
    pub max_concurrent_activity_work_items: u32,
    #[prost(uint32, tag = "3")]
    pub max_concurrent_entity_work_items: u32,
    #[prost(message, optional, tag = "4")]
    pub capabilities: Option<WorkerCapabilities>,
    #[prost(string, tag = "5")]
    pub worker_version: String,
}

/// Protocol capabilities the worker supports. Unknown flags are ignored
/// by older servers, which is the point.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct WorkerCapabilities {
    #[prost(bool, tag = "1")]
    pub history_streaming: bool,
    #[prost(bool, tag = "2")]
    pub entity_batches: bool,
}

/// One unit of dispatchable execution pushed by the server.
///
/// `completion_token` is opaque and must be echoed back exactly on the
/// completion or abandon call for this item.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WorkItem {
    #[prost(string, tag = "1")]
    pub completion_token: String,
    #[prost(oneof = "work_item::Kind", tags = "2, 3, 4, 5, 6")]
    pub kind: Option<work_item::Kind>,
}

pub mod work_item {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "2")]
        Orchestrator(super::OrchestratorRequest),
        #[prost(message, tag = "3")]
        Activity(super::ActivityRequest),
        #[prost(message, tag = "4")]
        EntityBatch(super::EntityBatchRequest),
        /// Legacy single-message entity shape with JSON-encoded operations.
        #[prost(message, tag = "5")]
        EntityOperations(super::EntityOperationsRequest),
        /// No-op; exists only to keep the idle-timeout from firing.
        #[prost(message, tag = "6")]
        HealthPing(super::HealthPing),
    }
}

impl WorkItem {
    /// Best-effort instance id for diagnostics, across all kinds that
    /// carry one.
    pub fn instance_id(&self) -> Option<&str> {
        match &self.kind {
            Some(work_item::Kind::Orchestrator(r)) => Some(&r.instance_id),
            Some(work_item::Kind::Activity(r)) => Some(&r.instance_id),
            Some(work_item::Kind::EntityBatch(r)) => Some(&r.instance_id),
            Some(work_item::Kind::EntityOperations(r)) => Some(&r.instance_id),
            Some(work_item::Kind::HealthPing(_)) | None => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct HealthPing {}

/// Orchestrator replay request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct OrchestratorRequest {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    #[prost(string, tag = "2")]
    pub execution_id: String,
    #[prost(message, repeated, tag = "3")]
    pub past_events: Vec<HistoryEvent>,
    #[prost(message, repeated, tag = "4")]
    pub new_events: Vec<HistoryEvent>,
    /// History is too large for inline delivery and must be fetched via
    /// the history streaming call.
    #[prost(bool, tag = "5")]
    pub requires_history_streaming: bool,
    /// The instance has prior history even though none was inlined; the
    /// worker should consult its cache before streaming.
    #[prost(bool, tag = "6")]
    pub history_exists: bool,
    #[prost(message, optional, tag = "7")]
    pub entity_parameters: Option<EntityParameters>,
}

/// Entity-interop conversion knobs for a single orchestrator work item.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EntityParameters {
    /// Translate entity lock traffic to/from the legacy JSON side-channel
    /// event representation.
    #[prost(bool, tag = "1")]
    pub convert_side_channel_events: bool,
    /// Entity id of a critical-section lock currently held by this
    /// orchestration, if any.
    #[prost(string, optional, tag = "2")]
    pub held_lock: Option<String>,
}

/// Activity invocation request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActivityRequest {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    #[prost(string, tag = "2")]
    pub execution_id: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, optional, tag = "4")]
    pub input: Option<String>,
    /// Correlates the result back to the scheduling TaskScheduled event.
    #[prost(int32, tag = "5")]
    pub task_id: i32,
}

/// Entity operation batch (current wire shape).
#[derive(Clone, PartialEq, prost::Message)]
pub struct EntityBatchRequest {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    #[prost(string, optional, tag = "2")]
    pub entity_state: Option<String>,
    #[prost(message, repeated, tag = "3")]
    pub operations: Vec<EntityOperation>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EntityOperation {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, optional, tag = "3")]
    pub input: Option<String>,
}

/// Legacy entity shape: operations are a JSON array in a single string.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EntityOperationsRequest {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    #[prost(string, optional, tag = "2")]
    pub entity_state: Option<String>,
    #[prost(string, tag = "3")]
    pub operations_json: String,
}

/// Runtime status of an orchestration execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum OrchestrationStatus {
    Unspecified = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Terminated = 4,
    Canceled = 5,
    ContinuedAsNew = 6,
    Pending = 7,
    Suspended = 8,
}

/// A single history event with its backend-assigned id (or -1 for events
/// that need no correlation) and UTC timestamp in milliseconds.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HistoryEvent {
    #[prost(int32, tag = "1")]
    pub event_id: i32,
    #[prost(int64, tag = "2")]
    pub timestamp_ms: i64,
    #[prost(
        oneof = "history_event::Kind",
        tags = "3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19"
    )]
    pub kind: Option<history_event::Kind>,
}

pub mod history_event {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "3")]
        ExecutionStarted(super::ExecutionStartedEvent),
        #[prost(message, tag = "4")]
        ExecutionCompleted(super::ExecutionCompletedEvent),
        #[prost(message, tag = "5")]
        ExecutionTerminated(super::ExecutionTerminatedEvent),
        #[prost(message, tag = "6")]
        TaskScheduled(super::TaskScheduledEvent),
        #[prost(message, tag = "7")]
        TaskCompleted(super::TaskCompletedEvent),
        #[prost(message, tag = "8")]
        TaskFailed(super::TaskFailedEvent),
        #[prost(message, tag = "9")]
        SubOrchestrationCreated(super::SubOrchestrationCreatedEvent),
        #[prost(message, tag = "10")]
        SubOrchestrationCompleted(super::SubOrchestrationCompletedEvent),
        #[prost(message, tag = "11")]
        SubOrchestrationFailed(super::SubOrchestrationFailedEvent),
        #[prost(message, tag = "12")]
        TimerCreated(super::TimerCreatedEvent),
        #[prost(message, tag = "13")]
        TimerFired(super::TimerFiredEvent),
        #[prost(message, tag = "14")]
        OrchestratorStarted(super::OrchestratorStartedEvent),
        #[prost(message, tag = "15")]
        OrchestratorCompleted(super::OrchestratorCompletedEvent),
        #[prost(message, tag = "16")]
        EventSent(super::EventSentEvent),
        #[prost(message, tag = "17")]
        EventRaised(super::EventRaisedEvent),
        #[prost(message, tag = "18")]
        Generic(super::GenericEvent),
        #[prost(message, tag = "19")]
        HistoryState(super::HistoryStateEvent),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ParentInstance {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    /// Id of the parent's SubOrchestrationCreated event.
    #[prost(int32, tag = "2")]
    pub task_id: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExecutionStartedEvent {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(string, optional, tag = "3")]
    pub input: Option<String>,
    #[prost(message, optional, tag = "4")]
    pub parent: Option<ParentInstance>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExecutionCompletedEvent {
    #[prost(enumeration = "OrchestrationStatus", tag = "1")]
    pub status: i32,
    #[prost(string, optional, tag = "2")]
    pub result: Option<String>,
    #[prost(message, optional, tag = "3")]
    pub failure: Option<TaskFailureDetails>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExecutionTerminatedEvent {
    #[prost(string, optional, tag = "1")]
    pub reason: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TaskScheduledEvent {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, optional, tag = "2")]
    pub input: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TaskCompletedEvent {
    #[prost(int32, tag = "1")]
    pub task_id: i32,
    #[prost(string, optional, tag = "2")]
    pub result: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TaskFailedEvent {
    #[prost(int32, tag = "1")]
    pub task_id: i32,
    #[prost(message, optional, tag = "2")]
    pub failure: Option<TaskFailureDetails>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubOrchestrationCreatedEvent {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub instance_id: String,
    #[prost(string, optional, tag = "3")]
    pub input: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubOrchestrationCompletedEvent {
    #[prost(int32, tag = "1")]
    pub task_id: i32,
    #[prost(string, optional, tag = "2")]
    pub result: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubOrchestrationFailedEvent {
    #[prost(int32, tag = "1")]
    pub task_id: i32,
    #[prost(message, optional, tag = "2")]
    pub failure: Option<TaskFailureDetails>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct TimerCreatedEvent {
    #[prost(int64, tag = "1")]
    pub fire_at_ms: i64,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct TimerFiredEvent {
    #[prost(int32, tag = "1")]
    pub timer_id: i32,
    #[prost(int64, tag = "2")]
    pub fire_at_ms: i64,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct OrchestratorStartedEvent {}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct OrchestratorCompletedEvent {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EventSentEvent {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, optional, tag = "3")]
    pub data: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EventRaisedEvent {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, optional, tag = "2")]
    pub data: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GenericEvent {
    #[prost(string, optional, tag = "1")]
    pub data: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HistoryStateEvent {
    #[prost(enumeration = "OrchestrationStatus", tag = "1")]
    pub status: i32,
    #[prost(string, optional, tag = "2")]
    pub custom_status: Option<String>,
}

/// Structured failure with a recursive cause chain.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TaskFailureDetails {
    #[prost(string, tag = "1")]
    pub error_type: String,
    #[prost(string, tag = "2")]
    pub error_message: String,
    #[prost(string, optional, tag = "3")]
    pub stack_trace: Option<String>,
    #[prost(message, optional, boxed, tag = "4")]
    pub inner_failure: Option<Box<TaskFailureDetails>>,
    #[prost(bool, tag = "5")]
    pub is_non_retriable: bool,
}

/// One side-effect action produced by an orchestrator replay pass. The
/// small integer `id` correlates future completion events back to this
/// action.
#[derive(Clone, PartialEq, prost::Message)]
pub struct OrchestratorAction {
    #[prost(int32, tag = "1")]
    pub id: i32,
    #[prost(oneof = "orchestrator_action::Kind", tags = "2, 3, 4, 5, 6")]
    pub kind: Option<orchestrator_action::Kind>,
}

pub mod orchestrator_action {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "2")]
        ScheduleTask(super::ScheduleTaskAction),
        #[prost(message, tag = "3")]
        CreateSubOrchestration(super::CreateSubOrchestrationAction),
        #[prost(message, tag = "4")]
        CreateTimer(super::CreateTimerAction),
        #[prost(message, tag = "5")]
        SendEvent(super::SendEventAction),
        #[prost(message, tag = "6")]
        CompleteOrchestration(super::CompleteOrchestrationAction),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ScheduleTaskAction {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, optional, tag = "2")]
    pub input: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateSubOrchestrationAction {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub instance_id: String,
    #[prost(string, optional, tag = "3")]
    pub input: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub version: Option<String>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct CreateTimerAction {
    #[prost(int64, tag = "1")]
    pub fire_at_ms: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SendEventAction {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, optional, tag = "3")]
    pub data: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CompleteOrchestrationAction {
    #[prost(enumeration = "OrchestrationStatus", tag = "1")]
    pub status: i32,
    #[prost(string, optional, tag = "2")]
    pub result: Option<String>,
    #[prost(message, optional, tag = "3")]
    pub failure: Option<TaskFailureDetails>,
    /// External events to redeliver to the next execution on
    /// continue-as-new.
    #[prost(message, repeated, tag = "4")]
    pub carryover_events: Vec<HistoryEvent>,
    #[prost(string, optional, tag = "5")]
    pub new_version: Option<String>,
}

/// Orchestrator completion report.
#[derive(Clone, PartialEq, prost::Message)]
pub struct OrchestratorResponse {
    #[prost(string, tag = "1")]
    pub completion_token: String,
    #[prost(string, tag = "2")]
    pub instance_id: String,
    #[prost(string, optional, tag = "3")]
    pub custom_status: Option<String>,
    #[prost(message, repeated, tag = "4")]
    pub actions: Vec<OrchestratorAction>,
    /// True when the worker's cache holds this instance's history, so the
    /// server may omit it from the next work item.
    #[prost(bool, tag = "5")]
    pub history_cached: bool,
}

/// Activity completion report.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActivityResponse {
    #[prost(string, tag = "1")]
    pub completion_token: String,
    #[prost(string, tag = "2")]
    pub instance_id: String,
    #[prost(int32, tag = "3")]
    pub task_id: i32,
    #[prost(string, optional, tag = "4")]
    pub result: Option<String>,
    #[prost(message, optional, tag = "5")]
    pub failure: Option<TaskFailureDetails>,
}

/// Entity batch completion report.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EntityBatchResponse {
    #[prost(string, tag = "1")]
    pub completion_token: String,
    #[prost(string, tag = "2")]
    pub instance_id: String,
    #[prost(message, repeated, tag = "3")]
    pub results: Vec<EntityOperationResult>,
    #[prost(string, optional, tag = "4")]
    pub entity_state: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EntityOperationResult {
    #[prost(string, optional, tag = "1")]
    pub result: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub failure: Option<TaskFailureDetails>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AbandonOrchestratorRequest {
    #[prost(string, tag = "1")]
    pub completion_token: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AbandonActivityRequest {
    #[prost(string, tag = "1")]
    pub completion_token: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AbandonEntityRequest {
    #[prost(string, tag = "1")]
    pub completion_token: String,
}

/// Secondary streaming fetch of an instance's full history.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HistoryStreamRequest {
    #[prost(string, tag = "1")]
    pub instance_id: String,
    #[prost(string, tag = "2")]
    pub execution_id: String,
    #[prost(bool, tag = "3")]
    pub for_work_item_processing: bool,
}

/// One chunk of a streamed history response. Chunks are concatenated in
/// arrival order.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HistoryChunk {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<HistoryEvent>,
}

/// Acknowledgement for completion and abandon calls.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CompletionAck {
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// The server no longer owns this instance (claimed or completed by
    /// another worker).
    #[prost(bool, tag = "2")]
    pub not_found: bool,
    #[prost(string, optional, tag = "3")]
    pub error: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcError {
    #[prost(string, tag = "1")]
    pub code: String,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Wrapper for unary worker -> server calls.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcRequest {
    #[prost(oneof = "rpc_request::Request", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
    pub request: Option<rpc_request::Request>,
}

pub mod rpc_request {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "1")]
        Probe(super::ProbeRequest),
        #[prost(message, tag = "2")]
        CompleteOrchestrator(super::OrchestratorResponse),
        #[prost(message, tag = "3")]
        CompleteActivity(super::ActivityResponse),
        #[prost(message, tag = "4")]
        CompleteEntity(super::EntityBatchResponse),
        #[prost(message, tag = "5")]
        AbandonOrchestrator(super::AbandonOrchestratorRequest),
        #[prost(message, tag = "6")]
        AbandonActivity(super::AbandonActivityRequest),
        #[prost(message, tag = "7")]
        AbandonEntity(super::AbandonEntityRequest),
        #[prost(message, tag = "8")]
        FetchHistory(super::HistoryStreamRequest),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcResponse {
    #[prost(oneof = "rpc_response::Response", tags = "1, 2, 3")]
    pub response: Option<rpc_response::Response>,
}

pub mod rpc_response {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "1")]
        Probe(super::ProbeResponse),
        #[prost(message, tag = "2")]
        Completion(super::CompletionAck),
        #[prost(message, tag = "3")]
        Error(super::RpcError),
    }
}

impl OrchestrationStatus {
    /// Terminal statuses end the instance; the worker drops its cached
    /// history for them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed
                | OrchestrationStatus::Failed
                | OrchestrationStatus::Terminated
                | OrchestrationStatus::Canceled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn work_item_round_trip() {
        let item = WorkItem {
            completion_token: "tok-1".to_string(),
            kind: Some(work_item::Kind::Activity(ActivityRequest {
                instance_id: "inst-1".to_string(),
                execution_id: "exec-1".to_string(),
                name: "SendEmail".to_string(),
                input: Some("{\"to\":\"a@b.c\"}".to_string()),
                task_id: 3,
            })),
        };

        let bytes = item.encode_to_vec();
        let decoded = WorkItem::decode(&bytes[..]).unwrap();
        assert_eq!(item, decoded);
        assert_eq!(decoded.instance_id(), Some("inst-1"));
    }

    #[test]
    fn history_event_round_trip() {
        let event = HistoryEvent {
            event_id: 7,
            timestamp_ms: 1_700_000_000_123,
            kind: Some(history_event::Kind::ExecutionStarted(
                ExecutionStartedEvent {
                    name: "OrderFlow".to_string(),
                    version: "1.2.0".to_string(),
                    input: Some("\"order-9\"".to_string()),
                    parent: Some(ParentInstance {
                        instance_id: "parent-1".to_string(),
                        task_id: 2,
                    }),
                },
            )),
        };

        let bytes = event.encode_to_vec();
        assert_eq!(HistoryEvent::decode(&bytes[..]).unwrap(), event);
    }

    #[test]
    fn failure_details_cause_chain_round_trip() {
        let failure = TaskFailureDetails {
            error_type: "IoError".to_string(),
            error_message: "write failed".to_string(),
            stack_trace: None,
            inner_failure: Some(Box::new(TaskFailureDetails {
                error_type: "DiskFull".to_string(),
                error_message: "no space left".to_string(),
                stack_trace: None,
                inner_failure: None,
                is_non_retriable: true,
            })),
            is_non_retriable: false,
        };

        let bytes = failure.encode_to_vec();
        let decoded = TaskFailureDetails::decode(&bytes[..]).unwrap();
        assert_eq!(decoded, failure);
        assert!(decoded.inner_failure.unwrap().is_non_retriable);
    }

    #[test]
    fn rpc_request_oneof_round_trip() {
        let req = RpcRequest {
            request: Some(rpc_request::Request::AbandonOrchestrator(
                AbandonOrchestratorRequest {
                    completion_token: "tok-9".to_string(),
                },
            )),
        };

        let bytes = req.encode_to_vec();
        assert_eq!(RpcRequest::decode(&bytes[..]).unwrap(), req);
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrchestrationStatus::Completed.is_terminal());
        assert!(OrchestrationStatus::Failed.is_terminal());
        assert!(OrchestrationStatus::Terminated.is_terminal());
        assert!(OrchestrationStatus::Canceled.is_terminal());
        assert!(!OrchestrationStatus::Running.is_terminal());
        assert!(!OrchestrationStatus::ContinuedAsNew.is_terminal());
        assert!(!OrchestrationStatus::Suspended.is_terminal());
    }

    #[test]
    fn health_ping_has_no_instance_id() {
        let item = WorkItem {
            completion_token: String::new(),
            kind: Some(work_item::Kind::HealthPing(HealthPing {})),
        };
        assert_eq!(item.instance_id(), None);
    }
}
