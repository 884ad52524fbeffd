// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work-item dispatch loop.
//!
//! The processor owns one long-lived work stream to the backend:
//! connect, probe, handshake, then read pushed work items until the
//! stream ends, idles out, or the worker shuts down. Each work item is
//! dispatched onto its own task behind a supervised boundary: a failure
//! there abandons the item and is logged, it never tears down the loop.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use maestro_protocol::worker_proto::{
    self as wire, ActivityRequest, ActivityResponse, EntityBatchRequest, EntityBatchResponse,
    EntityOperationResult, EntityOperationsRequest, OrchestratorRequest, WorkItem,
    WorkerCapabilities, WorkerHandshake, work_item,
};

use crate::backend::WorkerBackend;
use crate::cache::BoundedCache;
use crate::config::WorkerConfig;
use crate::convert::{self, lock_release_action};
use crate::error::{Result, WorkerError};
use crate::failure::{self, ERROR_TYPE_ACTIVITY_NOT_FOUND, ERROR_TYPE_ENTITY_NOT_FOUND};
use crate::history::{
    self, HistoryEvent, OrchestrationRuntimeState, OrchestrationStatus, OrchestratorAction,
};
use crate::registry::{ActivityContext, TaskRegistry};
use crate::replay::{ReplayExecutor, ReplayOutcome};

/// Cached histories are keyed by instance id.
pub(crate) type HistoryCache = BoundedCache<String, Vec<HistoryEvent>>;

/// Why a served stream ended.
enum StreamExit {
    Shutdown,
    IdleTimeout,
    ServerClosed,
}

/// Connect/dispatch loop over one backend.
pub struct WorkItemProcessor {
    config: WorkerConfig,
    registry: Arc<TaskRegistry>,
    cache: Arc<HistoryCache>,
    backend: Arc<dyn WorkerBackend>,
    executor: ReplayExecutor,
    shutdown: CancellationToken,
}

impl WorkItemProcessor {
    pub fn new(
        config: WorkerConfig,
        registry: Arc<TaskRegistry>,
        cache: Arc<HistoryCache>,
        backend: Arc<dyn WorkerBackend>,
        shutdown: CancellationToken,
    ) -> Self {
        let executor = ReplayExecutor::new(
            Arc::clone(&registry),
            config.version_match_policy,
            config.version_failure_strategy,
            config.worker_version.clone(),
        );
        Self {
            config,
            registry,
            cache,
            backend,
            executor,
            shutdown,
        }
    }

    /// Run until shutdown. Transport failures reconnect after a fixed
    /// delay; idle timeouts reconnect immediately.
    pub async fn run(self: Arc<Self>) {
        info!(addr = %self.config.server_addr, "work item processor starting");

        while !self.shutdown.is_cancelled() {
            match self.serve_stream().await {
                Ok(StreamExit::Shutdown) => break,
                Ok(StreamExit::IdleTimeout) => {
                    warn!(
                        idle_timeout_ms = self.config.stream_idle_timeout.as_millis() as u64,
                        "work stream idle timeout; reconnecting"
                    );
                    self.backend.reset().await;
                }
                Ok(StreamExit::ServerClosed) => {
                    info!("backend closed the work stream; reconnecting");
                    self.backend.reset().await;
                    self.reconnect_delay().await;
                }
                Err(e) => {
                    warn!(error = %e, "work stream failed; reconnecting");
                    self.backend.reset().await;
                    self.reconnect_delay().await;
                }
            }
        }

        self.backend.close().await;
        info!("work item processor stopped");
    }

    async fn reconnect_delay(&self) {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.reconnect_delay) => {}
        }
    }

    /// One connection lifetime: probe, handshake, then the read loop.
    async fn serve_stream(self: &Arc<Self>) -> Result<StreamExit> {
        self.backend.connect().await?;
        self.backend.probe().await?;

        let handshake = WorkerHandshake {
            max_concurrent_orchestration_work_items: self
                .config
                .max_concurrent_orchestration_work_items,
            max_concurrent_activity_work_items: self.config.max_concurrent_activity_work_items,
            max_concurrent_entity_work_items: self.config.max_concurrent_entity_work_items,
            capabilities: Some(WorkerCapabilities {
                history_streaming: true,
                entity_batches: true,
            }),
            worker_version: self.config.worker_version.clone(),
        };
        let mut stream = self.backend.open_work_stream(handshake).await?;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    return Ok(StreamExit::Shutdown);
                }

                // Recreated per iteration, so every received message
                // resets the idle clock.
                _ = tokio::time::sleep(self.config.stream_idle_timeout) => {
                    return Ok(StreamExit::IdleTimeout);
                }

                item = stream.next() => match item? {
                    Some(work_item) => self.dispatch(work_item),
                    None => return Ok(StreamExit::ServerClosed),
                }
            }
        }
    }

    /// Fire-and-forget dispatch with the supervised error boundary.
    fn dispatch(self: &Arc<Self>, work_item: WorkItem) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let completion_token = work_item.completion_token.clone();
            let instance_id = work_item.instance_id().map(str::to_string);
            let abandon_kind = abandon_kind_of(&work_item);

            if let Err(e) = this.process(work_item).await {
                if this.shutdown.is_cancelled() {
                    debug!("work item failed during shutdown; not abandoning");
                    return;
                }
                warn!(
                    instance_id = instance_id.as_deref().unwrap_or("<none>"),
                    error = %e,
                    "work item processing failed; abandoning"
                );
                this.abandon(abandon_kind, &completion_token).await;
            }
        });
    }

    async fn abandon(&self, kind: Option<AbandonKind>, completion_token: &str) {
        let result = match kind {
            Some(AbandonKind::Orchestrator) => {
                self.backend.abandon_orchestrator(completion_token).await
            }
            Some(AbandonKind::Activity) => self.backend.abandon_activity(completion_token).await,
            Some(AbandonKind::Entity) => self.backend.abandon_entity(completion_token).await,
            None => return,
        };
        // Abandon is best-effort: the backend redelivers on lease expiry
        // even if this call never lands.
        if let Err(e) = result {
            warn!(error = %e, "failed to abandon work item");
        }
    }

    async fn process(&self, work_item: WorkItem) -> Result<()> {
        let token = work_item.completion_token;
        match work_item.kind {
            Some(work_item::Kind::Orchestrator(req)) => {
                self.process_orchestrator(&token, req).await
            }
            Some(work_item::Kind::Activity(req)) => self.process_activity(&token, req).await,
            Some(work_item::Kind::EntityBatch(req)) => {
                self.process_entity(&token, EntityBatch::from_batch(req)).await
            }
            Some(work_item::Kind::EntityOperations(req)) => {
                let batch = EntityBatch::from_legacy(req)?;
                self.process_entity(&token, batch).await
            }
            Some(work_item::Kind::HealthPing(_)) => {
                debug!("health ping received");
                Ok(())
            }
            None => {
                // A newer server pushed a kind this worker doesn't know.
                // Dropping it lets the lease expire and another worker
                // pick it up.
                warn!("work item with unknown kind dropped");
                Ok(())
            }
        }
    }

    #[instrument(skip(self, req), fields(instance_id = %req.instance_id))]
    async fn process_orchestrator(&self, token: &str, req: OrchestratorRequest) -> Result<()> {
        let instance_id = req.instance_id.clone();

        let past_events = self.resolve_past_events(&req).await?;
        let new_events = convert::events_from_wire(req.new_events)?;

        let state = OrchestrationRuntimeState::from_events(past_events, new_events).map_err(
            |e| WorkerError::MalformedHistory {
                instance_id: instance_id.clone(),
                reason: e.to_string(),
            },
        )?;

        let outcome = self.executor.execute(&instance_id, &state);
        let (mut actions, custom_status) = match outcome {
            ReplayOutcome::Abandon { reason } => {
                warn!(instance_id = %instance_id, reason = %reason, "abandoning orchestrator work item");
                self.backend.abandon_orchestrator(token).await?;
                return Ok(());
            }
            ReplayOutcome::Completed {
                actions,
                custom_status,
            } => (actions, custom_status),
        };

        let completion_status = completion_status_of(&actions);

        // A held entity lock must not outlive its owner. The synthetic
        // release event is part of the legacy side-channel representation,
        // so it is only emitted when the backend asked for that
        // translation.
        if let Some(params) = &req.entity_parameters
            && params.convert_side_channel_events
            && let Some(lock) = &params.held_lock
            && completion_status.is_some_and(OrchestrationStatus::is_terminal)
        {
            debug!(instance_id = %instance_id, lock = %lock, "releasing entity lock held at completion");
            actions.push(lock_release_action(lock, &instance_id));
        }

        let history_cached = match completion_status {
            Some(status) if status.is_terminal() || status == OrchestrationStatus::ContinuedAsNew => {
                self.cache.remove(&instance_id);
                false
            }
            _ => {
                let mut full_history = state.past_events;
                full_history.extend(state.new_events);
                let size = history::estimated_history_size(&full_history);
                self.cache.put(instance_id.clone(), full_history, size)
            }
        };

        let response = convert::actions_to_response(
            token,
            &instance_id,
            custom_status,
            &actions,
            history_cached,
        )?;

        let ack = self.backend.complete_orchestrator(response).await?;
        if ack.not_found {
            // Another worker owns the instance now; our cached history
            // is stale the moment it progresses elsewhere.
            warn!(instance_id = %instance_id, "completion rejected: instance no longer owned");
            self.cache.remove(&instance_id);
        } else if !ack.success {
            return Err(WorkerError::UnexpectedResponse(
                ack.error
                    .unwrap_or_else(|| "completion rejected without reason".to_string()),
            ));
        }
        Ok(())
    }

    /// Establish the past (already replayed) events for a work item:
    /// inline history wins, then the cache, then a streaming fetch.
    async fn resolve_past_events(&self, req: &OrchestratorRequest) -> Result<Vec<HistoryEvent>> {
        if !req.past_events.is_empty() {
            return Ok(convert::events_from_wire(req.past_events.clone())?);
        }
        if !req.requires_history_streaming && !req.history_exists {
            return Ok(Vec::new());
        }
        if let Some(cached) = self.cache.try_get(&req.instance_id) {
            debug!(instance_id = %req.instance_id, events = cached.len(), "history served from cache");
            return Ok(cached);
        }
        let wire_events = self
            .backend
            .fetch_history(&req.instance_id, &req.execution_id)
            .await?;
        Ok(convert::events_from_wire(wire_events)?)
    }

    #[instrument(skip(self, req), fields(instance_id = %req.instance_id, activity = %req.name))]
    async fn process_activity(&self, token: &str, req: ActivityRequest) -> Result<()> {
        let failure = match self.registry.resolve_activity(&req.name) {
            None => Some(failure::simple(
                ERROR_TYPE_ACTIVITY_NOT_FOUND,
                format!("no activity registered under '{}'", req.name),
                true,
            )),
            Some(handler) => {
                let ctx = ActivityContext {
                    instance_id: req.instance_id.clone(),
                    execution_id: req.execution_id.clone(),
                    task_id: req.task_id,
                };
                let input = req.input.clone();
                // Spawned so a panicking activity surfaces as a JoinError
                // instead of unwinding through the processor.
                let joined =
                    tokio::spawn(async move { handler.run(ctx, input).await }).await;
                match joined {
                    Ok(Ok(result)) => {
                        return self
                            .complete_activity(token, &req, result, None)
                            .await;
                    }
                    Ok(Err(message)) => {
                        Some(failure::simple("ActivityFailure", message, false))
                    }
                    Err(join_err) if join_err.is_panic() => {
                        warn!(activity = %req.name, "activity panicked");
                        Some(failure::from_panic(join_err.into_panic().as_ref()))
                    }
                    Err(join_err) => {
                        return Err(WorkerError::Internal(format!(
                            "activity task failed: {join_err}"
                        )));
                    }
                }
            }
        };

        self.complete_activity(token, &req, None, failure).await
    }

    async fn complete_activity(
        &self,
        token: &str,
        req: &ActivityRequest,
        result: Option<String>,
        failure: Option<wire::TaskFailureDetails>,
    ) -> Result<()> {
        let ack = self
            .backend
            .complete_activity(ActivityResponse {
                completion_token: token.to_string(),
                instance_id: req.instance_id.clone(),
                task_id: req.task_id,
                result,
                failure,
            })
            .await?;
        if ack.not_found {
            debug!(instance_id = %req.instance_id, "activity completion dropped: work item no longer owned");
        }
        Ok(())
    }

    #[instrument(skip(self, batch), fields(instance_id = %batch.instance_id))]
    async fn process_entity(&self, token: &str, batch: EntityBatch) -> Result<()> {
        let entity_name = entity_name_of(&batch.instance_id);
        let handler = self.registry.resolve_entity(entity_name);

        let mut state = batch.entity_state;
        let mut results = Vec::with_capacity(batch.operations.len());

        for op in batch.operations {
            let Some(handler) = handler.as_ref() else {
                results.push(EntityOperationResult {
                    result: None,
                    failure: Some(failure::simple(
                        ERROR_TYPE_ENTITY_NOT_FOUND,
                        format!("no entity registered under '{entity_name}'"),
                        true,
                    )),
                });
                continue;
            };

            let handler = Arc::clone(handler);
            let op_name = op.name.clone();
            let op_input = op.input.clone();
            let op_state = state.clone();
            let joined = tokio::spawn(async move {
                handler.handle(&op_name, op_input, op_state).await
            })
            .await;

            match joined {
                Ok(Ok(outcome)) => {
                    state = outcome.state;
                    results.push(EntityOperationResult {
                        result: outcome.result,
                        failure: None,
                    });
                }
                Ok(Err(message)) => {
                    // Failed operation leaves the state untouched.
                    results.push(EntityOperationResult {
                        result: None,
                        failure: Some(failure::simple("EntityOperationFailure", message, false)),
                    });
                }
                Err(join_err) if join_err.is_panic() => {
                    warn!(operation = %op.name, "entity operation panicked");
                    results.push(EntityOperationResult {
                        result: None,
                        failure: Some(failure::from_panic(join_err.into_panic().as_ref())),
                    });
                }
                Err(join_err) => {
                    return Err(WorkerError::Internal(format!(
                        "entity task failed: {join_err}"
                    )));
                }
            }
        }

        let ack = self
            .backend
            .complete_entity(EntityBatchResponse {
                completion_token: token.to_string(),
                instance_id: batch.instance_id.clone(),
                results,
                entity_state: state,
            })
            .await?;
        if ack.not_found {
            debug!(instance_id = %batch.instance_id, "entity completion dropped: work item no longer owned");
        }
        Ok(())
    }
}

enum AbandonKind {
    Orchestrator,
    Activity,
    Entity,
}

fn abandon_kind_of(work_item: &WorkItem) -> Option<AbandonKind> {
    match &work_item.kind {
        Some(work_item::Kind::Orchestrator(_)) => Some(AbandonKind::Orchestrator),
        Some(work_item::Kind::Activity(_)) => Some(AbandonKind::Activity),
        Some(work_item::Kind::EntityBatch(_)) | Some(work_item::Kind::EntityOperations(_)) => {
            Some(AbandonKind::Entity)
        }
        Some(work_item::Kind::HealthPing(_)) | None => None,
    }
}

/// Status of the CompleteOrchestration action, if the pass produced one.
fn completion_status_of(actions: &[OrchestratorAction]) -> Option<OrchestrationStatus> {
    actions.iter().find_map(|action| match action {
        OrchestratorAction::CompleteOrchestration { status, .. } => Some(*status),
        _ => None,
    })
}

/// Entity name embedded in an `@name@key` entity instance id. Ids not
/// following the convention resolve under their full string.
fn entity_name_of(instance_id: &str) -> &str {
    instance_id
        .strip_prefix('@')
        .and_then(|rest| rest.split('@').next())
        .unwrap_or(instance_id)
}

/// Normalized entity batch: both wire shapes converge here.
struct EntityBatch {
    instance_id: String,
    entity_state: Option<String>,
    operations: Vec<EntityOperation>,
}

struct EntityOperation {
    name: String,
    input: Option<String>,
}

#[derive(Deserialize)]
struct LegacyOperation {
    #[serde(alias = "operation")]
    name: String,
    #[serde(default)]
    input: Option<String>,
}

impl EntityBatch {
    fn from_batch(req: EntityBatchRequest) -> Self {
        Self {
            instance_id: req.instance_id,
            entity_state: req.entity_state,
            operations: req
                .operations
                .into_iter()
                .map(|op| EntityOperation {
                    name: op.name,
                    input: op.input,
                })
                .collect(),
        }
    }

    /// Legacy shape: operations arrive as one JSON array string.
    fn from_legacy(req: EntityOperationsRequest) -> Result<Self> {
        let parsed: Vec<LegacyOperation> = serde_json::from_str(&req.operations_json)?;
        Ok(Self {
            instance_id: req.instance_id,
            entity_state: req.entity_state,
            operations: parsed
                .into_iter()
                .map(|op| EntityOperation {
                    name: op.name,
                    input: op.input,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_name_parsing() {
        assert_eq!(entity_name_of("@counter@user-1"), "counter");
        assert_eq!(entity_name_of("@cart@"), "cart");
        assert_eq!(entity_name_of("plain-id"), "plain-id");
    }

    #[test]
    fn legacy_operations_json_normalizes() {
        let req = EntityOperationsRequest {
            instance_id: "@counter@k".to_string(),
            entity_state: Some("5".to_string()),
            operations_json: r#"[{"operation":"add","input":"2"},{"name":"get"}]"#.to_string(),
        };
        let batch = EntityBatch::from_legacy(req).unwrap();
        assert_eq!(batch.operations.len(), 2);
        assert_eq!(batch.operations[0].name, "add");
        assert_eq!(batch.operations[0].input.as_deref(), Some("2"));
        assert_eq!(batch.operations[1].name, "get");
        assert!(batch.operations[1].input.is_none());
    }

    #[test]
    fn malformed_legacy_operations_error() {
        let req = EntityOperationsRequest {
            instance_id: "@counter@k".to_string(),
            entity_state: None,
            operations_json: "not json".to_string(),
        };
        assert!(EntityBatch::from_legacy(req).is_err());
    }

    #[test]
    fn completion_status_lookup() {
        let actions = vec![
            OrchestratorAction::ScheduleTask {
                id: 1,
                name: "A".to_string(),
                input: None,
            },
            OrchestratorAction::CompleteOrchestration {
                status: OrchestrationStatus::Completed,
                result: None,
                failure: None,
                carryover_events: vec![],
                new_version: None,
            },
        ];
        assert_eq!(
            completion_status_of(&actions),
            Some(OrchestrationStatus::Completed)
        );
        assert_eq!(completion_status_of(&actions[..1]), None);
    }
}
