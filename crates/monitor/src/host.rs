//! Host orchestrator.
//!
//! [`DockerHost`] wires the pieces for one daemon endpoint together:
//! client, registry, notification bus, sampler set, and the connection
//! manager. `start()` spawns the background tasks; `stop()` cancels
//! them and drains the samplers.
//!
//! ```ignore
//! use dockwatch_monitor::{DockerHost, MonitorConfig};
//!
//! let mut host = DockerHost::connect(MonitorConfig::default())?;
//! host.start().await?;
//! let (handle, mut events) = host.subscribe(Default::default());
//! # Ok::<(), dockwatch_monitor::MonitorError>(())
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dockwatch_core::event::{ChangeEvent, ChangeKind};
use dockwatch_core::types::AttributeClass;

use crate::bus::{NotificationBus, SubscriptionFilter, SubscriptionHandle};
use crate::config::MonitorConfig;
use crate::connection::{ConnState, ConnectionManager};
use crate::control::ControlHandle;
use crate::docker::{BollardDockerClient, DockerClient};
use crate::error::MonitorError;
use crate::registry::Registry;
use crate::sampler::SamplerSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostState {
    Initialized,
    Running,
    Stopped,
}

/// One monitored daemon endpoint.
pub struct DockerHost<C: DockerClient> {
    config: MonitorConfig,
    client: Arc<C>,
    registry: Registry,
    bus: NotificationBus,
    samplers: Arc<SamplerSet<C>>,
    connection: Arc<ConnectionManager<C>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    state: HostState,
}

impl DockerHost<BollardDockerClient> {
    /// Builds a host backed by a real daemon connection.
    pub fn connect(config: MonitorConfig) -> Result<Self, MonitorError> {
        let client = Arc::new(BollardDockerClient::connect(&config)?);
        Self::with_client(config, client)
    }
}

impl<C: DockerClient> DockerHost<C> {
    /// Builds a host around an existing client.
    pub fn with_client(config: MonitorConfig, client: Arc<C>) -> Result<Self, MonitorError> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let bus = NotificationBus::new(config.name.clone(), config.notify_capacity);
        let registry = Registry::with_config(config.clone(), bus.clone());
        let samplers = Arc::new(SamplerSet::new(
            Arc::clone(&client),
            registry.clone(),
            config.clone(),
            cancel.child_token(),
        ));
        let connection = Arc::new(ConnectionManager::new(
            Arc::clone(&client),
            registry.clone(),
            Arc::clone(&samplers),
            config.clone(),
        ));

        Ok(Self {
            config,
            client,
            registry,
            bus,
            samplers,
            connection,
            cancel,
            tasks: Vec::new(),
            state: HostState::Initialized,
        })
    }

    /// The host's name from configuration.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The shared state registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Observer handle for the connection state.
    pub fn conn_state(&self) -> watch::Receiver<ConnState> {
        self.connection.state()
    }

    /// Registers a change event subscriber.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> (SubscriptionHandle, mpsc::Receiver<ChangeEvent>) {
        self.bus.subscribe(filter)
    }

    /// A control handle bound to this host's connection.
    pub fn control(&self) -> ControlHandle<C> {
        ControlHandle::new(
            Arc::clone(&self.client),
            self.registry.clone(),
            self.config.clone(),
            self.connection.state(),
        )
    }

    /// Connects, performs the initial resync, then spawns the
    /// connection lifecycle and the sampler reconciliation listener.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Unavailable` if the host is already
    /// running or was stopped; build a fresh host to restart. Setup
    /// failures (unreachable daemon, rejected credentials) surface
    /// here directly and leave the host unstarted.
    pub async fn start(&mut self) -> Result<(), MonitorError> {
        if self.state != HostState::Initialized {
            return Err(MonitorError::Unavailable(format!(
                "host '{}' already started",
                self.config.name
            )));
        }

        tracing::info!(host = %self.config.name, "starting host monitor");

        self.connection.establish().await?;

        // sampler tasks follow lifecycle events: new or started
        // containers get a sampler, removed ones lose theirs
        let (lifecycle_handle, mut lifecycle_rx) =
            self.bus.subscribe(SubscriptionFilter::classes(vec![
                AttributeClass::Lifecycle,
                AttributeClass::Status,
            ]));
        let samplers = Arc::clone(&self.samplers);
        let cancel = self.cancel.child_token();
        let listener = tokio::spawn(async move {
            let _handle = lifecycle_handle;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    event = lifecycle_rx.recv() => {
                        let Some(event) = event else { return };
                        match event.kind {
                            ChangeKind::Added | ChangeKind::StateChanged { .. } => {
                                samplers.ensure(&event.container).await;
                            }
                            ChangeKind::Removed => {
                                samplers.remove(&event.container).await;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });
        self.tasks.push(listener);

        let connection = Arc::clone(&self.connection);
        let cancel = self.cancel.child_token();
        let name = self.config.name.clone();
        let runner = tokio::spawn(async move {
            if let Err(e) = connection.run(cancel).await {
                tracing::error!(host = %name, error = %e, "connection lifecycle ended with error");
            }
        });
        self.tasks.push(runner);

        self.state = HostState::Running;
        Ok(())
    }

    /// Stops every background task and drains the samplers.
    pub async fn stop(&mut self) -> Result<(), MonitorError> {
        if self.state != HostState::Running {
            return Err(MonitorError::Unavailable(format!(
                "host '{}' is not running",
                self.config.name
            )));
        }

        tracing::info!(host = %self.config.name, "stopping host monitor");

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.samplers.shutdown().await;

        self.state = HostState::Stopped;
        tracing::info!(host = %self.config.name, "host monitor stopped");
        Ok(())
    }

    /// Reports liveness: running and able to reach the daemon.
    pub async fn health_check(&self) -> Result<(), MonitorError> {
        if self.state != HostState::Running {
            return Err(MonitorError::Unavailable(format!(
                "host '{}' is not running",
                self.config.name
            )));
        }
        self.client.ping().await
    }
}
