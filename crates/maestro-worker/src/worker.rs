// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker lifecycle.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::WorkerBackend;
use crate::backend::quic::QuicBackend;
use crate::cache::BoundedCache;
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::processor::{HistoryCache, WorkItemProcessor};
use crate::registry::TaskRegistry;

/// Owns the processor loop, the history cache, and the background
/// sweeper for one worker process.
///
/// ```ignore
/// let registry = TaskRegistry::builder()
///     .orchestrator_fn("Flow", my_flow)
///     .build();
/// let mut worker = Worker::new(WorkerConfig::from_env()?, registry)?;
/// worker.start();
/// // ... until SIGTERM ...
/// worker.shutdown().await;
/// ```
pub struct Worker {
    config: WorkerConfig,
    registry: Arc<TaskRegistry>,
    cache: Arc<HistoryCache>,
    backend: Arc<dyn WorkerBackend>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Build a worker over the QUIC backend.
    pub fn new(config: WorkerConfig, registry: TaskRegistry) -> Result<Self> {
        config.validate()?;
        let backend = Arc::new(QuicBackend::new(&config)?);
        Ok(Self::with_backend(config, registry, backend))
    }

    /// Build a worker over an explicit backend. Tests inject in-memory
    /// backends through this.
    pub fn with_backend(
        config: WorkerConfig,
        registry: TaskRegistry,
        backend: Arc<dyn WorkerBackend>,
    ) -> Self {
        let cache = Arc::new(BoundedCache::new(config.cache_capacity_bytes));
        Self {
            config,
            registry: Arc::new(registry),
            cache,
            backend,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Spawn the processor loop and the cache sweeper. Returns
    /// immediately; work items are handled in the background.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            warn!("worker already started");
            return;
        }
        info!(
            orchestrators = self.registry.orchestrator_names().count(),
            activities = self.registry.activity_names().count(),
            "starting worker"
        );

        let processor = Arc::new(WorkItemProcessor::new(
            self.config.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.cache),
            Arc::clone(&self.backend),
            self.shutdown.clone(),
        ));
        self.tasks.push(tokio::spawn(processor.run()));

        self.tasks.push(tokio::spawn(Arc::clone(&self.cache).run_sweeper(
            self.config.cache_sweep_period,
            self.config.cache_stale_threshold,
            self.shutdown.clone(),
        )));
    }

    /// Signal shutdown and wait for the background tasks to drain.
    pub async fn shutdown(&mut self) {
        info!("worker shutting down");
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
    }

    /// Cancellation token observed by the background tasks. Cloning it
    /// lets embedding code tie the worker to a wider shutdown signal.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of cached histories, mainly for diagnostics.
    pub fn cached_history_count(&self) -> usize {
        self.cache.len()
    }
}
