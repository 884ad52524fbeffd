// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Maestro Worker - client-side execution runtime for durable orchestrations.
//!
//! A worker connects to the maestro backend over QUIC, announces its
//! concurrency limits and capabilities, and receives pushed work items:
//! orchestrator replays, activity invocations, entity operation batches,
//! and health pings. Results flow back as completions; failures the
//! worker cannot attribute to user code are abandoned so the backend can
//! redeliver.
//!
//! # Components
//!
//! - [`Worker`]: lifecycle owner; spawns the processor loop and the
//!   cache sweeper, and drains them on shutdown.
//! - [`TaskRegistry`]: named orchestrator, activity, and entity handlers
//!   served by this worker.
//! - [`OrchestrationContext`]: the deterministic API orchestrator code
//!   runs against during replay.
//! - [`cache::BoundedCache`]: byte-bounded LRU for instance histories,
//!   swept for staleness in the background.
//!
//! # Quick Start
//!
//! ```ignore
//! use maestro_worker::{TaskRegistry, Worker, WorkerConfig};
//!
//! #[tokio::main]
//! async fn main() -> maestro_worker::Result<()> {
//!     let registry = TaskRegistry::builder()
//!         .orchestrator_fn("ProcessOrder", |ctx, input| async move {
//!             let charged = ctx
//!                 .schedule_task("ChargeCard", input.clone())
//!                 .await
//!                 .map_err(|f| f.error_message)?;
//!             Ok(charged)
//!         })
//!         .activity_fn("ChargeCard", |_ctx, input| async move { Ok(input) })
//!         .build();
//!
//!     let mut worker = Worker::new(WorkerConfig::from_env()?, registry)?;
//!     worker.start();
//!     tokio::signal::ctrl_c().await.ok();
//!     worker.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Determinism
//!
//! Orchestrator handlers are replayed from history: every `await` on a
//! scheduled task, timer, or external event resolves purely from
//! recorded events, and code past the last recorded event runs exactly
//! once. Handlers must not perform I/O, read clocks, or use randomness
//! directly; activities exist for that.

pub mod backend;
pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod failure;
pub mod history;
pub mod processor;
pub mod registry;
pub mod replay;
pub mod worker;

pub use config::{VersionFailureStrategy, VersionMatchPolicy, WorkerConfig};
pub use error::{Result, WorkerError};
pub use registry::{
    ActivityContext, ActivityHandler, EntityHandler, EntityOperationOutcome, OrchestratorHandler,
    TaskRegistry, TaskRegistryBuilder,
};
pub use replay::OrchestrationContext;
pub use worker::Worker;

// Wire types surfaced through handler signatures and completions.
pub use maestro_protocol::worker_proto::{OrchestrationStatus, TaskFailureDetails};
