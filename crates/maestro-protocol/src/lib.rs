// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Maestro Protocol - QUIC + Protobuf communication layer
//!
//! This crate provides the wire protocol between workers and the maestro
//! backend:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    maestro-protocol                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC Layer: Request/Response + Server Streaming             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: Protobuf (prost)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: QUIC (quinn)                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Call shapes
//!
//! - **Work-item feed**: the worker opens a bidirectional stream, sends a
//!   `WorkerHandshake` frame, and the backend pushes `WorkItem` frames
//!   until either side closes.
//! - **History fetch**: `HistoryStreamRequest` answered with a stream of
//!   `HistoryChunk` frames terminated by StreamEnd.
//! - **Completions, abandons, probe**: unary `RpcRequest`/`RpcResponse`
//!   on a fresh stream per call.
//!
//! # Usage
//!
//! ```ignore
//! use maestro_protocol::{MaestroClient, worker_proto};
//!
//! let client = MaestroClient::localhost()?;
//! client.connect().await?;
//!
//! let rpc_request = worker_proto::RpcRequest {
//!     request: Some(worker_proto::rpc_request::Request::Probe(
//!         worker_proto::ProbeRequest {},
//!     )),
//! };
//! let response: worker_proto::RpcResponse = client.request(&rpc_request).await?;
//! ```

pub mod client;
pub mod frame;
pub mod worker_proto;

// Re-exported so downstream crates can name the QUIC stream types that
// appear in this crate's public signatures.
pub use quinn;

pub use client::{ClientError, MaestroClient, MaestroClientConfig};
pub use frame::{Frame, FrameError, FramedStream, MessageType};
