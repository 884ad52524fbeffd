// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend abstraction for the worker runtime.
//!
//! The processor talks to the backend only through these traits, so
//! integration tests run against an in-memory implementation and the
//! production worker runs over QUIC.

pub mod quic;

use async_trait::async_trait;

use maestro_protocol::worker_proto::{
    ActivityResponse, CompletionAck, EntityBatchResponse, HistoryEvent, OrchestratorResponse,
    WorkItem, WorkerHandshake,
};

use crate::error::Result;

/// Server-pushed feed of work items on one connection.
#[async_trait]
pub trait WorkItemStream: Send {
    /// Next work item; `None` when the server ends the stream
    /// gracefully. Transport failures surface as errors.
    async fn next(&mut self) -> Result<Option<WorkItem>>;
}

/// Communication surface the processor needs from the backend.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    /// Establish (or re-establish) the connection.
    async fn connect(&self) -> Result<()>;

    /// Lightweight liveness probe, sent before opening the work stream.
    async fn probe(&self) -> Result<()>;

    /// Open the work stream, announcing capabilities and concurrency
    /// limits with the handshake.
    async fn open_work_stream(
        &self,
        handshake: WorkerHandshake,
    ) -> Result<Box<dyn WorkItemStream>>;

    /// Fetch an instance's full history via the streaming call.
    async fn fetch_history(
        &self,
        instance_id: &str,
        execution_id: &str,
    ) -> Result<Vec<HistoryEvent>>;

    async fn complete_orchestrator(&self, response: OrchestratorResponse)
    -> Result<CompletionAck>;

    async fn complete_activity(&self, response: ActivityResponse) -> Result<CompletionAck>;

    async fn complete_entity(&self, response: EntityBatchResponse) -> Result<CompletionAck>;

    /// Return an orchestrator work item unprocessed.
    async fn abandon_orchestrator(&self, completion_token: &str) -> Result<()>;

    async fn abandon_activity(&self, completion_token: &str) -> Result<()>;

    async fn abandon_entity(&self, completion_token: &str) -> Result<()>;

    /// Tear down the current connection so the next call dials fresh.
    async fn reset(&self);

    /// Close the connection gracefully.
    async fn close(&self);
}
