//! Service lifecycle management.
//!
//! Wires the engine, entities and dispatcher together and runs the queue
//! consumer and HTTP API until shutdown.

use std::sync::Arc;

use nimbus_control::{create_provider, DeploymentController, ResourceProvider};
use nimbus_durable::{Counter, EntityHost, OrchestrationEngine};
use nimbus_state::{QueueBackend, StateProvider};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{self, AppState};
use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, QueueConsumer};
use crate::workflows;

/// Everything a running node shares between its queue consumer and API.
pub struct Runtime {
    pub engine: OrchestrationEngine,
    pub dispatcher: Dispatcher,
    pub counters: EntityHost<Counter>,
    pub queue: Arc<dyn QueueBackend>,
}

impl Runtime {
    /// Build the runtime over `state`, deploying through `provider`.
    ///
    /// In-flight deployments are cancelled when `cancel` fires.
    pub fn build(
        config: &ServerConfig,
        state: &StateProvider,
        provider: Arc<dyn ResourceProvider>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let kv = state.kv()?;
        let queue = state.queue()?;

        let controller = Arc::new(
            DeploymentController::new(provider, config.deployment.clone())
                .with_cancellation(cancel),
        );
        let registry = workflows::registry(controller, &config.demo);
        let engine = OrchestrationEngine::new(Arc::clone(&kv), registry, config.engine.clone());
        let counters = EntityHost::new(kv, &config.engine);
        let dispatcher = Dispatcher::new(engine.clone());

        Ok(Self {
            engine,
            dispatcher,
            counters,
            queue,
        })
    }

    /// State handed to the HTTP handlers.
    #[must_use]
    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            engine: self.engine.clone(),
            dispatcher: self.dispatcher.clone(),
            counters: self.counters.clone(),
        })
    }

    /// Consumer of the configured deployment queue.
    #[must_use]
    pub fn consumer(&self, config: &ServerConfig) -> QueueConsumer {
        QueueConsumer::new(
            Arc::clone(&self.queue),
            self.dispatcher.clone(),
            &config.server,
        )
    }
}

/// Manages the lifecycle of the nimbus services.
pub struct Services {
    config: ServerConfig,
    cancel: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Services {
    /// Create a new service manager.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Build the runtime, resume unfinished orchestrations and start serving.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        info!("Starting nimbus services");

        let state = StateProvider::from_config(&self.config.state)?;
        let provider = create_provider(&self.config.platform);
        let runtime = Runtime::build(&self.config, &state, provider, self.cancel.child_token())?;

        let recovered = runtime.engine.recover().await?;
        info!(count = recovered.len(), "Orchestration recovery finished");

        self.start_consumer(&runtime);
        self.start_api(&runtime).await?;

        info!(services = self.handles.len(), "All services started");
        Ok(())
    }

    /// Wait for all services to complete or for shutdown.
    pub async fn wait(&mut self) {
        let cancel = self.cancel.clone();

        // Any service exiting on its own indicates a problem
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Shutdown requested");
            }
            result = self.wait_for_any_exit() => {
                if let Some((name, result)) = result {
                    match result {
                        Ok(()) => info!(service = name, "Service exited"),
                        Err(e) => error!(service = name, error = %e, "Service panicked"),
                    }
                }
            }
        }

        self.cancel.cancel();
        for (name, handle) in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(service = name, error = %e, "Service did not stop cleanly");
            }
        }
    }

    /// Request graceful shutdown of all services.
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown");
        self.cancel.cancel();
    }

    /// Get the cancellation token for external shutdown triggers.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn wait_for_any_exit(
        &mut self,
    ) -> Option<(&'static str, Result<(), tokio::task::JoinError>)> {
        if self.handles.is_empty() {
            std::future::pending::<()>().await;
            return None;
        }

        loop {
            if let Some(i) = self.handles.iter().position(|(_, h)| h.is_finished()) {
                let (name, handle) = self.handles.remove(i);
                return Some((name, handle.await));
            }

            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    }

    fn start_consumer(&mut self, runtime: &Runtime) {
        let consumer = runtime.consumer(&self.config);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            consumer.run(cancel).await;
        });

        self.handles.push(("queue-consumer", handle));
        info!(queue = %self.config.server.queue, "Queue consumer spawned");
    }

    async fn start_api(&mut self, runtime: &Runtime) -> anyhow::Result<()> {
        let listen = self.config.server.listen;
        let listener = tokio::net::TcpListener::bind(listen).await?;
        let app = api::router(runtime.app_state());
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            info!(listen = %listen, "HTTP API listening");
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                error!(error = %e, "HTTP API failed");
            }
            info!("HTTP API stopped");
        });

        self.handles.push(("api", handle));
        Ok(())
    }
}
