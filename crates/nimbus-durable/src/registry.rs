//! Named orchestration programs and activities.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::OrchestrationContext;
use crate::error::{ActivityError, OrchestrationError};
use crate::history::InstanceId;

/// A deterministic orchestration program.
///
/// Programs are re-run from the start on every episode and must only reach
/// the outside world through the [`OrchestrationContext`].
#[async_trait]
pub trait Orchestration: Send + Sync {
    async fn run(&self, ctx: OrchestrationContext, input: Value)
        -> Result<Value, OrchestrationError>;
}

/// Adapts an async closure into an [`Orchestration`].
pub struct FnOrchestration<F>(pub F);

#[async_trait]
impl<F, Fut> Orchestration for FnOrchestration<F>
where
    F: Fn(OrchestrationContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OrchestrationError>> + Send + 'static,
{
    async fn run(
        &self,
        ctx: OrchestrationContext,
        input: Value,
    ) -> Result<Value, OrchestrationError> {
        (self.0)(ctx, input).await
    }
}

/// Where an activity invocation comes from. Used for log correlation.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    pub instance_id: InstanceId,
    pub epoch: u64,
    pub seq: u64,
    pub name: String,
}

/// A unit of effectful work. Runs at least once per scheduled step.
#[async_trait]
pub trait Activity: Send + Sync {
    async fn run(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError>;
}

/// Adapts an async closure into an [`Activity`].
pub struct FnActivity<F>(pub F);

#[async_trait]
impl<F, Fut> Activity for FnActivity<F>
where
    F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
{
    async fn run(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
        (self.0)(ctx, input).await
    }
}

/// Immutable lookup table of programs and activities.
#[derive(Clone, Default)]
pub struct Registry {
    orchestrations: HashMap<String, Arc<dyn Orchestration>>,
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl Registry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    #[must_use]
    pub fn orchestration(&self, name: &str) -> Option<Arc<dyn Orchestration>> {
        self.orchestrations.get(name).cloned()
    }

    #[must_use]
    pub fn activity(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).cloned()
    }

    #[must_use]
    pub fn has_orchestration(&self, name: &str) -> bool {
        self.orchestrations.contains_key(name)
    }

    /// Registered program names, sorted.
    #[must_use]
    pub fn orchestration_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.orchestrations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut activities: Vec<&str> = self.activities.keys().map(String::as_str).collect();
        activities.sort_unstable();
        f.debug_struct("Registry")
            .field("orchestrations", &self.orchestration_names())
            .field("activities", &activities)
            .finish()
    }
}

/// Builder for [`Registry`]. Later registrations replace earlier ones.
#[derive(Default)]
pub struct RegistryBuilder {
    inner: Registry,
}

impl RegistryBuilder {
    #[must_use]
    pub fn orchestration(
        mut self,
        name: impl Into<String>,
        program: impl Orchestration + 'static,
    ) -> Self {
        self.inner
            .orchestrations
            .insert(name.into(), Arc::new(program));
        self
    }

    #[must_use]
    pub fn orchestration_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrchestrationContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, OrchestrationError>> + Send + 'static,
    {
        self.orchestration(name, FnOrchestration(f))
    }

    #[must_use]
    pub fn activity(mut self, name: impl Into<String>, activity: impl Activity + 'static) -> Self {
        self.inner.activities.insert(name.into(), Arc::new(activity));
        self
    }

    #[must_use]
    pub fn activity_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
    {
        self.activity(name, FnActivity(f))
    }

    #[must_use]
    pub fn build(self) -> Registry {
        self.inner
    }
}
