//! Connection state machine and retry policy.
//!
//! [`ConnectionManager`] owns the host's connection lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Syncing -> Streaming
//!                     ^                        |
//!                     |          stream lost   |
//!                     +--- Degraded(reason) <--+
//! ```
//!
//! Setup runs inline through [`ConnectionManager::establish`], so a
//! host that cannot reach its daemon fails fast; the spawned
//! [`run`](ConnectionManager::run) loop only consumes the stream and
//! reconnects. Each (re)connect performs exactly one full resync before
//! the event stream takes over, so the registry never serves stale
//! state after a gap. Connect attempts back off exponentially up to the
//! configured retry count; auth-class failures abort immediately since
//! retrying cannot fix a rejected certificate.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use dockwatch_core::metrics::{LABEL_HOST, RECONNECTS_TOTAL, RESYNCS_TOTAL};
use dockwatch_core::types::ContainerInfo;

use crate::config::MonitorConfig;
use crate::docker::DockerClient;
use crate::error::MonitorError;
use crate::registry::{Registry, ResyncOutcome};
use crate::sampler::SamplerSet;
use crate::stream;

/// Connection lifecycle state for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    /// No connection; nothing attempted yet or shut down.
    Disconnected,
    /// Attempting to reach the daemon.
    Connecting,
    /// Connected; reconciling the registry against a full listing.
    Syncing,
    /// Live; the event stream drives the registry.
    Streaming,
    /// Connection lost; retrying in the background.
    Degraded(String),
}

impl ConnState {
    /// Whether control actions may be attempted in this state.
    pub fn accepts_control(&self) -> bool {
        matches!(self, Self::Streaming | Self::Syncing)
    }
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Syncing => write!(f, "syncing"),
            Self::Streaming => write!(f, "streaming"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
        }
    }
}

/// Delay between reconnect cycles once the per-cycle retry budget is
/// exhausted.
const DEGRADED_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Drives the connection lifecycle for one host.
pub struct ConnectionManager<C: DockerClient> {
    client: Arc<C>,
    registry: Registry,
    samplers: Arc<SamplerSet<C>>,
    config: MonitorConfig,
    state_tx: watch::Sender<ConnState>,
}

impl<C: DockerClient> ConnectionManager<C> {
    pub fn new(
        client: Arc<C>,
        registry: Registry,
        samplers: Arc<SamplerSet<C>>,
        config: MonitorConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnState::Disconnected);
        Self {
            client,
            registry,
            samplers,
            config,
            state_tx,
        }
    }

    /// Observer handle for the connection state.
    pub fn state(&self) -> watch::Receiver<ConnState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnState) {
        tracing::debug!(host = %self.config.name, state = %state, "connection state");
        let _ = self.state_tx.send(state);
    }

    /// Pings the daemon with exponential backoff, up to the configured
    /// retry count.
    ///
    /// # Errors
    ///
    /// - `MonitorError::Auth`: rejected credentials, returned on the
    ///   first occurrence without further retries
    /// - `MonitorError::Connection`: every attempt failed
    pub async fn connect_with_retry(&self) -> Result<(), MonitorError> {
        let mut delay = Duration::from_millis(self.config.reconnect_backoff_base_ms);
        let mut last_error = None;

        for attempt in 1..=self.config.retry_count {
            match self.client.ping().await {
                Ok(()) => return Ok(()),
                Err(e @ MonitorError::Auth(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        host = %self.config.name,
                        attempt,
                        max = self.config.retry_count,
                        error = %e,
                        "connect attempt failed"
                    );
                    last_error = Some(e);
                }
            }
            if attempt < self.config.retry_count {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(last_error.unwrap_or_else(|| {
            MonitorError::Connection("no connect attempts were made".to_owned())
        }))
    }

    /// Lists all containers and reconciles the registry, filtering by
    /// the monitoring rules.
    pub async fn resync(&self) -> Result<ResyncOutcome, MonitorError> {
        self.set_state(ConnState::Syncing);

        let listing: Vec<ContainerInfo> = self
            .client
            .list_containers()
            .await?
            .into_iter()
            .filter(|c| self.config.is_monitored(&c.name))
            .collect();

        let outcome = self.registry.resync(listing).await;
        counter!(RESYNCS_TOTAL, LABEL_HOST => self.config.name.clone()).increment(1);
        let tracked = self.registry.len().await;
        tracing::info!(
            host = %self.config.name,
            tracked,
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            "registry resynced"
        );
        Ok(outcome)
    }

    /// Performs the initial setup: ping with retry, one full resync,
    /// and sampler reconciliation. Runs inline so a host that cannot
    /// reach its daemon fails startup instead of limping along.
    ///
    /// # Errors
    ///
    /// Any failure is fatal; the state is left `Degraded` with the
    /// failure reason.
    pub async fn establish(&self) -> Result<(), MonitorError> {
        self.set_state(ConnState::Connecting);
        if let Err(e) = self.connect_with_retry().await {
            self.set_state(ConnState::Degraded(e.to_string()));
            return Err(e);
        }
        if let Err(e) = self.resync().await {
            self.set_state(ConnState::Degraded(e.to_string()));
            return Err(e);
        }
        self.samplers.reconcile().await;
        self.set_state(ConnState::Streaming);
        Ok(())
    }

    /// Runs the connection lifecycle until cancelled, starting from an
    /// [`establish`](Self::establish)ed connection.
    ///
    /// The event consumer drives the registry while the stream lives; a
    /// lost stream triggers a reconnect cycle with a fresh resync. An
    /// auth failure during reconnect is fatal.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), MonitorError> {
        loop {
            if cancel.is_cancelled() {
                self.set_state(ConnState::Disconnected);
                return Ok(());
            }

            let consumer = stream::run_event_consumer(
                Arc::clone(&self.client),
                self.registry.clone(),
                self.config.clone(),
                cancel.clone(),
            );
            eprintln!("DBG: consumer starting");
            match consumer.await {
                Ok(()) => {
                    // cancelled
                    self.set_state(ConnState::Disconnected);
                    return Ok(());
                }
                Err(e) => {
                    eprintln!("DBG: consumer error: {e}");
                    tracing::warn!(host = %self.config.name, error = %e, "event stream lost, reconnecting");
                    self.set_state(ConnState::Degraded(e.to_string()));
                }
            }

            self.reconnect(&cancel).await?;
        }
    }

    /// One reconnect cycle: keeps trying until the daemon answers and a
    /// resync lands, sleeping between rounds while degraded.
    async fn reconnect(&self, cancel: &CancellationToken) -> Result<(), MonitorError> {
        loop {
            if cancel.is_cancelled() {
                self.set_state(ConnState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnState::Connecting);
            eprintln!("DBG: reconnect attempting");
            let failure = match self.connect_with_retry().await {
                Ok(()) => match self.resync().await {
                    Ok(_) => {
                        counter!(RECONNECTS_TOTAL, LABEL_HOST => self.config.name.clone())
                            .increment(1);
                        self.samplers.reconcile().await;
                        self.set_state(ConnState::Streaming);
                        return Ok(());
                    }
                    // connection dropped between ping and listing
                    Err(e) => e,
                },
                Err(e @ MonitorError::Auth(_)) => {
                    self.set_state(ConnState::Degraded(e.to_string()));
                    return Err(e);
                }
                Err(e) => e,
            };

            self.set_state(ConnState::Degraded(failure.to_string()));
            tokio::select! {
                () = cancel.cancelled() => {
                    self.set_state(ConnState::Disconnected);
                    return Ok(());
                }
                () = tokio::time::sleep(DEGRADED_RETRY_DELAY) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::NotificationBus;
    use crate::docker::MockDockerClient;
    use chrono::Utc;
    use dockwatch_core::types::{ContainerId, ContainerState, HealthState};

    fn info(id: &str, name: &str, state: ContainerState) -> ContainerInfo {
        ContainerInfo {
            id: ContainerId::new(id),
            name: name.to_owned(),
            image: "nginx:latest".to_owned(),
            state,
            health: HealthState::None,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    fn manager(
        client: Arc<MockDockerClient>,
        config: MonitorConfig,
    ) -> (ConnectionManager<MockDockerClient>, Registry) {
        let bus = NotificationBus::new("test", 64);
        let registry = Registry::new("test", bus);
        let samplers = Arc::new(SamplerSet::new(
            Arc::clone(&client),
            registry.clone(),
            config.clone(),
            CancellationToken::new(),
        ));
        (
            ConnectionManager::new(client, registry.clone(), samplers, config),
            registry,
        )
    }

    #[test]
    fn conn_state_display() {
        assert_eq!(ConnState::Streaming.to_string(), "streaming");
        assert_eq!(
            ConnState::Degraded("lost".to_owned()).to_string(),
            "degraded: lost"
        );
    }

    #[test]
    fn control_acceptance_per_state() {
        assert!(ConnState::Streaming.accepts_control());
        assert!(ConnState::Syncing.accepts_control());
        assert!(!ConnState::Connecting.accepts_control());
        assert!(!ConnState::Degraded("x".to_owned()).accepts_control());
        assert!(!ConnState::Disconnected.accepts_control());
    }

    #[tokio::test]
    async fn connect_succeeds_on_first_ping() {
        let client = Arc::new(MockDockerClient::new());
        let (manager, _) = manager(client, MonitorConfig::default());
        manager.connect_with_retry().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connect_exhausts_retry_budget() {
        let client = Arc::new(MockDockerClient::new());
        client
            .fail_ping
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let config = MonitorConfig {
            retry_count: 3,
            reconnect_backoff_base_ms: 10,
            ..Default::default()
        };
        let (manager, _) = manager(client, config);

        let result = manager.connect_with_retry().await;
        assert!(matches!(result, Err(MonitorError::Connection(_))));
    }

    #[tokio::test]
    async fn resync_populates_registry_and_filters() {
        let client = Arc::new(MockDockerClient::new().with_containers(vec![
            info("aaa111", "web", ContainerState::Running),
            info("bbb222", "noisy", ContainerState::Running),
        ]));
        let config = MonitorConfig {
            containers_exclude: vec!["noisy".to_owned()],
            ..Default::default()
        };
        let (manager, registry) = manager(client, config);

        let outcome = manager.resync().await.unwrap();
        assert_eq!(outcome.added, vec![ContainerId::new("aaa111")]);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn resync_drops_vanished_containers() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_containers(vec![info("aaa111", "web", ContainerState::Running)]),
        );
        let (manager, registry) = manager(Arc::clone(&client), MonitorConfig::default());

        manager.resync().await.unwrap();
        assert_eq!(registry.len().await, 1);

        client.containers.lock().unwrap().clear();
        let outcome = manager.resync().await.unwrap();
        assert_eq!(outcome.removed, vec![ContainerId::new("aaa111")]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn establish_reaches_streaming_and_populates_registry() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_containers(vec![info("aaa111", "web", ContainerState::Running)]),
        );
        let (manager, registry) = manager(Arc::clone(&client), MonitorConfig::default());

        manager.establish().await.unwrap();
        assert_eq!(*manager.state().borrow(), ConnState::Streaming);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn establish_fails_when_daemon_unreachable() {
        let client = Arc::new(MockDockerClient::new());
        client
            .fail_ping
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let config = MonitorConfig {
            retry_count: 1,
            reconnect_backoff_base_ms: 1,
            ..Default::default()
        };
        let (manager, _) = manager(client, config);

        let result = manager.establish().await;
        assert!(matches!(result, Err(MonitorError::Connection(_))));
        assert!(matches!(*manager.state().borrow(), ConnState::Degraded(_)));
    }

    #[tokio::test]
    async fn establish_fails_immediately_on_auth_rejection() {
        let client = Arc::new(MockDockerClient::new().with_auth_failure());
        let config = MonitorConfig {
            retry_count: 5, // auth failures must not burn the budget
            reconnect_backoff_base_ms: 1,
            ..Default::default()
        };
        let (manager, _) = manager(client, config);

        let result = manager.establish().await;
        assert!(matches!(result, Err(MonitorError::Auth(_))));
    }

    #[tokio::test]
    async fn run_streams_after_establish_and_stops_on_cancel() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_containers(vec![info("aaa111", "web", ContainerState::Running)]),
        );
        let (manager, registry) = manager(Arc::clone(&client), MonitorConfig::default());
        manager.establish().await.unwrap();
        assert_eq!(registry.len().await, 1);

        let mut state = manager.state();
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let run = tokio::spawn(async move {
            let result = manager.run(run_cancel).await;
            (result, manager.state().borrow().clone())
        });

        state
            .wait_for(|s| *s == ConnState::Streaming)
            .await
            .unwrap();
        cancel.cancel();

        let (result, final_state) = run.await.unwrap();
        result.unwrap();
        assert_eq!(final_state, ConnState::Disconnected);
    }
}
