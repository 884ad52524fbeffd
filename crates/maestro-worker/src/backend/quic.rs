// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC implementation of the worker backend.

use async_trait::async_trait;
use maestro_protocol::worker_proto::{
    self as proto, AbandonActivityRequest, AbandonEntityRequest, AbandonOrchestratorRequest,
    ActivityResponse, CompletionAck, EntityBatchResponse, HistoryChunk, HistoryStreamRequest,
    OrchestratorResponse, ProbeRequest, RpcRequest, RpcResponse, WorkItem, WorkerHandshake,
    rpc_request, rpc_response,
};
use maestro_protocol::quinn;
use maestro_protocol::{Frame, FramedStream, MaestroClient, MaestroClientConfig};
use tracing::{debug, info, instrument};

use super::{WorkItemStream, WorkerBackend};
use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};

/// Worker backend speaking the QUIC wire protocol.
pub struct QuicBackend {
    client: MaestroClient,
}

impl QuicBackend {
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        let client_config = MaestroClientConfig {
            server_addr: config.server_addr,
            server_name: config.server_name.clone(),
            dangerous_skip_cert_verification: config.skip_cert_verification,
            connect_timeout_ms: config.connect_timeout_ms,
            ..Default::default()
        };
        Ok(Self {
            client: MaestroClient::new(client_config)?,
        })
    }

    /// Issue a unary RPC and expect a completion acknowledgement.
    async fn completion_call(&self, request: rpc_request::Request) -> Result<CompletionAck> {
        let rpc_request = RpcRequest {
            request: Some(request),
        };
        let rpc_response: RpcResponse = self.client.request(&rpc_request).await?;

        match rpc_response.response {
            Some(rpc_response::Response::Completion(ack)) => Ok(ack),
            Some(rpc_response::Response::Error(e)) => Err(WorkerError::Server {
                code: e.code,
                message: e.message,
            }),
            _ => Err(WorkerError::UnexpectedResponse(
                "expected CompletionAck".to_string(),
            )),
        }
    }
}

#[async_trait]
impl WorkerBackend for QuicBackend {
    #[instrument(skip(self))]
    async fn connect(&self) -> Result<()> {
        self.client.connect().await?;
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        let rpc_request = RpcRequest {
            request: Some(rpc_request::Request::Probe(ProbeRequest {})),
        };
        let rpc_response: RpcResponse = self.client.request(&rpc_request).await?;

        match rpc_response.response {
            Some(rpc_response::Response::Probe(_)) => Ok(()),
            Some(rpc_response::Response::Error(e)) => Err(WorkerError::Server {
                code: e.code,
                message: e.message,
            }),
            _ => Err(WorkerError::UnexpectedResponse(
                "expected ProbeResponse".to_string(),
            )),
        }
    }

    #[instrument(skip(self, handshake))]
    async fn open_work_stream(
        &self,
        handshake: WorkerHandshake,
    ) -> Result<Box<dyn WorkItemStream>> {
        let (mut send, recv) = self.client.open_raw_stream().await?;

        let frame = Frame::request(&handshake).map_err(WorkerError::Protocol)?;
        maestro_protocol::frame::write_frame(&mut send, &frame)
            .await
            .map_err(WorkerError::Protocol)?;

        info!("work stream opened");
        Ok(Box::new(QuicWorkItemStream {
            // The send half stays alive for the stream's lifetime;
            // finishing it would signal the server we are done.
            _send: send,
            recv: FramedStream::new(recv),
        }))
    }

    #[instrument(skip(self), fields(instance_id = %instance_id))]
    async fn fetch_history(
        &self,
        instance_id: &str,
        execution_id: &str,
    ) -> Result<Vec<proto::HistoryEvent>> {
        let rpc_request = RpcRequest {
            request: Some(rpc_request::Request::FetchHistory(HistoryStreamRequest {
                instance_id: instance_id.to_string(),
                execution_id: execution_id.to_string(),
                for_work_item_processing: true,
            })),
        };

        let mut stream = self.client.request_streaming(&rpc_request).await?;
        let mut events = Vec::new();
        while let Some(chunk) = stream
            .read_stream_message::<HistoryChunk>()
            .await
            .map_err(WorkerError::Protocol)?
        {
            events.extend(chunk.events);
        }

        debug!(instance_id, event_count = events.len(), "history fetched");
        Ok(events)
    }

    async fn complete_orchestrator(
        &self,
        response: OrchestratorResponse,
    ) -> Result<CompletionAck> {
        self.completion_call(rpc_request::Request::CompleteOrchestrator(response))
            .await
    }

    async fn complete_activity(&self, response: ActivityResponse) -> Result<CompletionAck> {
        self.completion_call(rpc_request::Request::CompleteActivity(response))
            .await
    }

    async fn complete_entity(&self, response: EntityBatchResponse) -> Result<CompletionAck> {
        self.completion_call(rpc_request::Request::CompleteEntity(response))
            .await
    }

    async fn abandon_orchestrator(&self, completion_token: &str) -> Result<()> {
        self.completion_call(rpc_request::Request::AbandonOrchestrator(
            AbandonOrchestratorRequest {
                completion_token: completion_token.to_string(),
            },
        ))
        .await?;
        Ok(())
    }

    async fn abandon_activity(&self, completion_token: &str) -> Result<()> {
        self.completion_call(rpc_request::Request::AbandonActivity(
            AbandonActivityRequest {
                completion_token: completion_token.to_string(),
            },
        ))
        .await?;
        Ok(())
    }

    async fn abandon_entity(&self, completion_token: &str) -> Result<()> {
        self.completion_call(rpc_request::Request::AbandonEntity(AbandonEntityRequest {
            completion_token: completion_token.to_string(),
        }))
        .await?;
        Ok(())
    }

    async fn reset(&self) {
        self.client.reset().await;
    }

    async fn close(&self) {
        self.client.close().await;
    }
}

struct QuicWorkItemStream {
    _send: quinn::SendStream,
    recv: FramedStream<quinn::RecvStream>,
}

#[async_trait]
impl WorkItemStream for QuicWorkItemStream {
    async fn next(&mut self) -> Result<Option<WorkItem>> {
        let item = self
            .recv
            .read_stream_message::<WorkItem>()
            .await
            .map_err(WorkerError::Protocol)?;
        Ok(item)
    }
}
