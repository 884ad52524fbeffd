// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handler registration.
//!
//! A worker serves a fixed set of orchestrators, activities, and entity
//! handlers resolved by name. The registry is built once at startup and
//! never mutated afterwards; work items naming an unregistered handler
//! complete with a structured not-found failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::replay::OrchestrationContext;

/// Orchestrator entry point, replayed deterministically against history.
#[async_trait]
pub trait OrchestratorHandler: Send + Sync {
    async fn run(
        &self,
        ctx: OrchestrationContext,
        input: Option<String>,
    ) -> Result<Option<String>, String>;
}

/// Per-invocation context for an activity.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    pub instance_id: String,
    pub execution_id: String,
    pub task_id: i32,
}

/// Activity entry point. Runs exactly like ordinary async code; no
/// determinism requirements.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn run(&self, ctx: ActivityContext, input: Option<String>)
    -> Result<Option<String>, String>;
}

/// Result of one entity operation: the operation's return value and the
/// entity state after it.
#[derive(Debug, Clone, Default)]
pub struct EntityOperationOutcome {
    pub result: Option<String>,
    pub state: Option<String>,
}

/// Entity entry point, invoked once per operation in batch order.
#[async_trait]
pub trait EntityHandler: Send + Sync {
    async fn handle(
        &self,
        operation: &str,
        input: Option<String>,
        state: Option<String>,
    ) -> Result<EntityOperationOutcome, String>;
}

/// Closure adapter for [`OrchestratorHandler`].
pub struct FnOrchestrator<F>(pub F);

#[async_trait]
impl<F, Fut> OrchestratorHandler for FnOrchestrator<F>
where
    F: Fn(OrchestrationContext, Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<String>, String>> + Send,
{
    async fn run(
        &self,
        ctx: OrchestrationContext,
        input: Option<String>,
    ) -> Result<Option<String>, String> {
        (self.0)(ctx, input).await
    }
}

/// Closure adapter for [`ActivityHandler`].
pub struct FnActivity<F>(pub F);

#[async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F>
where
    F: Fn(ActivityContext, Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<String>, String>> + Send,
{
    async fn run(
        &self,
        ctx: ActivityContext,
        input: Option<String>,
    ) -> Result<Option<String>, String> {
        (self.0)(ctx, input).await
    }
}

/// Immutable name-to-handler maps for one worker.
#[derive(Default)]
pub struct TaskRegistry {
    orchestrators: HashMap<String, Arc<dyn OrchestratorHandler>>,
    activities: HashMap<String, Arc<dyn ActivityHandler>>,
    entities: HashMap<String, Arc<dyn EntityHandler>>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder {
            registry: TaskRegistry::default(),
        }
    }

    pub fn resolve_orchestrator(&self, name: &str) -> Option<Arc<dyn OrchestratorHandler>> {
        self.orchestrators.get(name).cloned()
    }

    pub fn resolve_activity(&self, name: &str) -> Option<Arc<dyn ActivityHandler>> {
        self.activities.get(name).cloned()
    }

    pub fn resolve_entity(&self, name: &str) -> Option<Arc<dyn EntityHandler>> {
        self.entities.get(name).cloned()
    }

    pub fn orchestrator_names(&self) -> impl Iterator<Item = &str> {
        self.orchestrators.keys().map(String::as_str)
    }

    pub fn activity_names(&self) -> impl Iterator<Item = &str> {
        self.activities.keys().map(String::as_str)
    }
}

/// Builder for [`TaskRegistry`].
///
/// # Panics
///
/// Registration methods panic on duplicate names; two handlers under one
/// name is a startup bug with no sensible runtime resolution.
pub struct TaskRegistryBuilder {
    registry: TaskRegistry,
}

impl TaskRegistryBuilder {
    pub fn orchestrator(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn OrchestratorHandler>,
    ) -> Self {
        let name = name.into();
        let previous = self.registry.orchestrators.insert(name.clone(), handler);
        assert!(
            previous.is_none(),
            "orchestrator '{name}' registered twice"
        );
        self
    }

    pub fn orchestrator_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrchestrationContext, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, String>> + Send + 'static,
    {
        self.orchestrator(name, Arc::new(FnOrchestrator(f)))
    }

    pub fn activity(mut self, name: impl Into<String>, handler: Arc<dyn ActivityHandler>) -> Self {
        let name = name.into();
        let previous = self.registry.activities.insert(name.clone(), handler);
        assert!(previous.is_none(), "activity '{name}' registered twice");
        self
    }

    pub fn activity_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActivityContext, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, String>> + Send + 'static,
    {
        self.activity(name, Arc::new(FnActivity(f)))
    }

    pub fn entity(mut self, name: impl Into<String>, handler: Arc<dyn EntityHandler>) -> Self {
        let name = name.into();
        let previous = self.registry.entities.insert(name.clone(), handler);
        assert!(previous.is_none(), "entity '{name}' registered twice");
        self
    }

    pub fn build(self) -> TaskRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_registers_and_resolves() {
        let registry = TaskRegistry::builder()
            .orchestrator_fn("Flow", |_ctx, input| async move { Ok(input) })
            .activity_fn("Charge", |_ctx, _input| async move {
                Ok(Some("\"done\"".to_string()))
            })
            .build();

        assert!(registry.resolve_orchestrator("Flow").is_some());
        assert!(registry.resolve_orchestrator("Missing").is_none());
        assert!(registry.resolve_activity("Charge").is_some());
        assert!(registry.resolve_entity("Counter").is_none());
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_orchestrator_panics() {
        let _ = TaskRegistry::builder()
            .orchestrator_fn("Flow", |_ctx, input| async move { Ok(input) })
            .orchestrator_fn("Flow", |_ctx, input| async move { Ok(input) });
    }

    #[tokio::test]
    async fn activity_closure_receives_context() {
        let registry = TaskRegistry::builder()
            .activity_fn("Echo", |ctx, input| async move {
                Ok(Some(format!("{}:{}", ctx.task_id, input.unwrap_or_default())))
            })
            .build();

        let handler = registry.resolve_activity("Echo").unwrap();
        let result = handler
            .run(
                ActivityContext {
                    instance_id: "inst".to_string(),
                    execution_id: "exec".to_string(),
                    task_id: 5,
                },
                Some("hi".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some("5:hi"));
    }
}
