//! Daemon API abstraction for testability.
//!
//! The [`DockerClient`] trait abstracts the bollard Docker API, allowing
//! production code to use [`BollardDockerClient`] while tests use
//! `MockDockerClient`.
//!
//! # Container ID Validation
//!
//! All methods that accept container IDs validate them first:
//! - Must be 1-64 characters
//! - Must contain only ASCII hex digits
//!
//! # Examples
//!
//! ```ignore
//! use std::sync::Arc;
//! use dockwatch_monitor::{BollardDockerClient, MonitorConfig};
//!
//! let client = BollardDockerClient::connect(&MonitorConfig::default())?;
//! let client = Arc::new(client);
//!
//! let containers = client.list_containers().await?;
//! # Ok::<(), dockwatch_monitor::MonitorError>(())
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use futures::stream::StreamExt;

use dockwatch_core::types::{ContainerId, ContainerInfo, ContainerState, HealthState, RawSample};

use crate::config::MonitorConfig;
use crate::error::MonitorError;

/// One raw lifecycle event from the daemon, before translation into a
/// registry change.
#[derive(Debug, Clone)]
pub struct DaemonEvent {
    /// Subject container ID.
    pub container_id: String,
    /// Raw action string (`start`, `die`, `health_status: healthy`, ...).
    pub action: String,
    /// Actor attributes (name, image, exit code, ...).
    pub attributes: HashMap<String, String>,
    /// Daemon-reported event time.
    pub timestamp: DateTime<Utc>,
}

/// Boxed lifecycle event stream returned by [`DockerClient::events`].
pub type EventStream = Pin<Box<dyn Stream<Item = Result<DaemonEvent, MonitorError>> + Send>>;

/// Validates a container ID before it reaches the daemon API.
///
/// Container IDs are 64-character hex strings (or shorter prefixes).
fn validate_container_id(id: &str) -> Result<(), MonitorError> {
    if id.is_empty() || id.len() > 64 {
        return Err(MonitorError::DaemonApi(format!(
            "invalid container ID: length {} (must be 1-64)",
            id.len()
        )));
    }
    if !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(MonitorError::DaemonApi(
            "invalid container ID: contains non-hex characters".to_owned(),
        ));
    }
    Ok(())
}

/// Trait abstracting daemon API operations.
///
/// All daemon calls go through this trait, enabling testability via
/// mocking. The trait is `Send + Sync + 'static`, allowing safe sharing
/// across async tasks.
///
/// # Implementations
///
/// - [`BollardDockerClient`]: production implementation using `bollard`
/// - `MockDockerClient`: test implementation with configurable responses
///
/// # Error Handling
///
/// - **404**: converted to `MonitorError::ContainerNotFound`
/// - **Connection errors**: wrapped as `MonitorError::Connection`
/// - **Control failures**: wrapped as `MonitorError::Control`
pub trait DockerClient: Send + Sync + 'static {
    /// Lists all containers, including stopped ones.
    fn list_containers(
        &self,
    ) -> impl Future<Output = Result<Vec<ContainerInfo>, MonitorError>> + Send;

    /// Inspects one container, returning its full identity and state.
    ///
    /// # Errors
    ///
    /// - `MonitorError::ContainerNotFound`: container does not exist (404)
    /// - `MonitorError::DaemonApi`: invalid ID or other API errors
    fn inspect_container(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<ContainerInfo, MonitorError>> + Send;

    /// Fetches one resource stats snapshot for a container.
    fn fetch_stats(&self, id: &str)
    -> impl Future<Output = Result<RawSample, MonitorError>> + Send;

    /// Opens the container lifecycle event stream.
    ///
    /// The stream yields until the connection drops, at which point it
    /// terminates with `MonitorError::StreamTerminated` or ends.
    fn events(&self) -> impl Future<Output = Result<EventStream, MonitorError>> + Send;

    /// Starts a stopped container.
    fn start_container(&self, id: &str) -> impl Future<Output = Result<(), MonitorError>> + Send;

    /// Stops a container with the configured grace period.
    fn stop_container(&self, id: &str) -> impl Future<Output = Result<(), MonitorError>> + Send;

    /// Restarts a container with the configured grace period.
    fn restart_container(&self, id: &str)
    -> impl Future<Output = Result<(), MonitorError>> + Send;

    /// Pauses a running container.
    fn pause_container(&self, id: &str) -> impl Future<Output = Result<(), MonitorError>> + Send;

    /// Resumes a paused container.
    fn unpause_container(&self, id: &str)
    -> impl Future<Output = Result<(), MonitorError>> + Send;

    /// Checks daemon connectivity.
    fn ping(&self) -> impl Future<Output = Result<(), MonitorError>> + Send;
}

/// Production client implementation using `bollard`.
///
/// Connects over a Unix socket, plain TCP, or TLS depending on the
/// configured URL and certificate path. Internally wraps
/// `Arc<bollard::Docker>` for cheap sharing across tasks.
pub struct BollardDockerClient {
    docker: Arc<bollard::Docker>,
    stop_grace_secs: i64,
}

/// Connection timeout passed to bollard, seconds.
const CONNECT_TIMEOUT_SECS: u64 = 120;

impl BollardDockerClient {
    /// Connects according to the monitor configuration.
    ///
    /// URL handling:
    /// - `None`: platform-default local socket
    /// - `unix://<path>`: explicit socket path
    /// - `tcp://` / `http://`: plain TCP, unless `certpath` is set
    /// - `https://` or any URL with `certpath`: TLS with `key.pem`,
    ///   `cert.pem`, `ca.pem` from the certificate directory
    ///
    /// # Errors
    ///
    /// - `MonitorError::Auth`: TLS setup rejected
    /// - `MonitorError::Connection`: any other connection failure
    pub fn connect(config: &MonitorConfig) -> Result<Self, MonitorError> {
        let docker = match &config.url {
            None => bollard::Docker::connect_with_local_defaults()
                .map_err(|e| classify_connect_error(&e, "local socket"))?,
            Some(url) if url.starts_with("unix://") => {
                let path = url.trim_start_matches("unix://");
                bollard::Docker::connect_with_socket(
                    path,
                    CONNECT_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
                .map_err(|e| classify_connect_error(&e, url))?
            }
            Some(url) if url.starts_with("https://") || !config.certpath.is_empty() => {
                let certs = Path::new(&config.certpath);
                bollard::Docker::connect_with_ssl(
                    url,
                    &certs.join("key.pem"),
                    &certs.join("cert.pem"),
                    &certs.join("ca.pem"),
                    CONNECT_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
                .map_err(|e| classify_connect_error(&e, url))?
            }
            Some(url) => bollard::Docker::connect_with_http(
                url,
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )
            .map_err(|e| classify_connect_error(&e, url))?,
        };

        Ok(Self {
            docker: Arc::new(docker),
            stop_grace_secs: i64::try_from(config.stop_grace_secs).unwrap_or(10),
        })
    }
}

/// Splits connection failures into auth-class (retrying will not help)
/// and transient.
fn classify_connect_error(err: &bollard::errors::Error, target: &str) -> MonitorError {
    let msg = err.to_string();
    let lowered = msg.to_lowercase();
    if lowered.contains("certificate")
        || lowered.contains("tls")
        || lowered.contains("ssl")
        || lowered.contains("401")
        || lowered.contains("403")
    {
        MonitorError::Auth(format!("connection to {target} rejected: {msg}"))
    } else {
        MonitorError::Connection(format!("failed to connect to {target}: {msg}"))
    }
}

/// Docker reports unset timestamps as year-1 RFC 3339 strings.
fn parse_daemon_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value?).ok()?;
    if parsed.timestamp() <= 0 {
        return None;
    }
    Some(parsed.with_timezone(&Utc))
}

impl DockerClient for BollardDockerClient {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, MonitorError> {
        use bollard::container::ListContainersOptions;

        let options = ListContainersOptions::<String> {
            all: true, // stopped containers stay visible in the registry
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| MonitorError::DaemonApi(format!("list containers failed: {e}")))?;

        let mut result = Vec::with_capacity(containers.len());
        for container in containers {
            let id = container.id.unwrap_or_default();
            let names = container.names.unwrap_or_default();
            let name = names
                .first()
                .map(|n| n.trim_start_matches('/').to_owned())
                .unwrap_or_default();

            result.push(ContainerInfo {
                id: ContainerId::new(id),
                name,
                image: container.image.unwrap_or_default(),
                state: ContainerState::parse(container.state.as_deref().unwrap_or_default()),
                health: HealthState::None,
                started_at: None,
                finished_at: None,
            });
        }

        Ok(result)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, MonitorError> {
        validate_container_id(id)?;

        let details = self.docker.inspect_container(id, None).await.map_err(|e| {
            if e.to_string().contains("404") {
                MonitorError::ContainerNotFound(id.to_owned())
            } else {
                MonitorError::DaemonApi(format!("inspect container failed: {e}"))
            }
        })?;

        let container_id = details.id.unwrap_or_default();
        let name = details
            .name
            .map(|n| n.trim_start_matches('/').to_owned())
            .unwrap_or_default();
        let image = details.config.and_then(|c| c.image).unwrap_or_default();

        let (state, health, started_at, finished_at) = match details.state {
            Some(s) => {
                let state = s
                    .status
                    .map(|st| ContainerState::parse(&st.to_string()))
                    .unwrap_or(ContainerState::Exited);
                let health = s
                    .health
                    .and_then(|h| h.status)
                    .map(|hs| HealthState::parse(&hs.to_string()))
                    .unwrap_or(HealthState::None);
                let started_at = parse_daemon_time(s.started_at.as_deref());
                let finished_at = parse_daemon_time(s.finished_at.as_deref());
                (state, health, started_at, finished_at)
            }
            None => (ContainerState::Exited, HealthState::None, None, None),
        };

        Ok(ContainerInfo {
            id: ContainerId::new(container_id),
            name,
            image,
            state,
            health,
            started_at,
            finished_at,
        })
    }

    async fn fetch_stats(&self, id: &str) -> Result<RawSample, MonitorError> {
        validate_container_id(id)?;

        use bollard::container::StatsOptions;

        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stream = self.docker.stats(id, Some(options));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| MonitorError::StatsFetch {
                container_id: id.to_owned(),
                reason: "stats stream yielded nothing".to_owned(),
            })?
            .map_err(|e| MonitorError::StatsFetch {
                container_id: id.to_owned(),
                reason: e.to_string(),
            })?;

        let (network_rx, network_tx) = stats
            .networks
            .as_ref()
            .map(|networks| {
                networks
                    .values()
                    .fold((0u64, 0u64), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes))
            })
            .unwrap_or((0, 0));

        let (blkio_read, blkio_write) = stats
            .blkio_stats
            .io_service_bytes_recursive
            .as_ref()
            .map(|entries| {
                entries.iter().fold((0u64, 0u64), |(read, write), entry| {
                    match entry.op.to_lowercase().as_str() {
                        "read" => (read + entry.value, write),
                        "write" => (read, write + entry.value),
                        _ => (read, write),
                    }
                })
            })
            .unwrap_or((0, 0));

        Ok(RawSample {
            read_at: Utc::now(),
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            system_total: stats.cpu_stats.system_cpu_usage,
            online_cpus: stats
                .cpu_stats
                .online_cpus
                .and_then(|n| u32::try_from(n).ok()),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
            network_rx,
            network_tx,
            blkio_read,
            blkio_write,
        })
    }

    async fn events(&self) -> Result<EventStream, MonitorError> {
        use bollard::system::EventsOptions;

        let mut filters = HashMap::new();
        filters.insert("type".to_owned(), vec!["container".to_owned()]);

        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let stream = self.docker.events(Some(options)).map(|item| match item {
            Ok(message) => {
                let actor = message.actor.unwrap_or_default();
                let timestamp = message
                    .time
                    .and_then(|t| DateTime::from_timestamp(t, 0))
                    .unwrap_or_else(Utc::now);
                Ok(DaemonEvent {
                    container_id: actor.id.unwrap_or_default(),
                    action: message.action.unwrap_or_default(),
                    attributes: actor.attributes.unwrap_or_default(),
                    timestamp,
                })
            }
            Err(e) => Err(MonitorError::StreamTerminated(e.to_string())),
        });

        Ok(Box::pin(stream))
    }

    async fn start_container(&self, id: &str) -> Result<(), MonitorError> {
        validate_container_id(id)?;

        use bollard::container::StartContainerOptions;

        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| MonitorError::Control {
                container_id: id.to_owned(),
                action: "start".to_owned(),
                reason: e.to_string(),
            })
    }

    async fn stop_container(&self, id: &str) -> Result<(), MonitorError> {
        validate_container_id(id)?;

        use bollard::container::StopContainerOptions;

        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: self.stop_grace_secs,
                }),
            )
            .await
            .map_err(|e| MonitorError::Control {
                container_id: id.to_owned(),
                action: "stop".to_owned(),
                reason: e.to_string(),
            })
    }

    async fn restart_container(&self, id: &str) -> Result<(), MonitorError> {
        validate_container_id(id)?;

        use bollard::container::RestartContainerOptions;

        self.docker
            .restart_container(
                id,
                Some(RestartContainerOptions {
                    t: isize::try_from(self.stop_grace_secs).unwrap_or(10),
                }),
            )
            .await
            .map_err(|e| MonitorError::Control {
                container_id: id.to_owned(),
                action: "restart".to_owned(),
                reason: e.to_string(),
            })
    }

    async fn pause_container(&self, id: &str) -> Result<(), MonitorError> {
        validate_container_id(id)?;

        self.docker
            .pause_container(id)
            .await
            .map_err(|e| MonitorError::Control {
                container_id: id.to_owned(),
                action: "pause".to_owned(),
                reason: e.to_string(),
            })
    }

    async fn unpause_container(&self, id: &str) -> Result<(), MonitorError> {
        validate_container_id(id)?;

        self.docker
            .unpause_container(id)
            .await
            .map_err(|e| MonitorError::Control {
                container_id: id.to_owned(),
                action: "unpause".to_owned(),
                reason: e.to_string(),
            })
    }

    async fn ping(&self) -> Result<(), MonitorError> {
        self.docker
            .ping()
            .await
            .map_err(|e| MonitorError::Connection(format!("ping failed: {e}")))?;
        Ok(())
    }
}

/// Configurable mock client for unit tests.
#[cfg(test)]
pub struct MockDockerClient {
    /// Containers returned by list/inspect.
    pub containers: std::sync::Mutex<Vec<ContainerInfo>>,
    /// Stats returned per container ID.
    pub stats: std::sync::Mutex<HashMap<String, RawSample>>,
    /// Scripted lifecycle events delivered by `events()`.
    event_rx: std::sync::Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<Result<DaemonEvent, MonitorError>>>>,
    /// Sender half for pushing scripted events.
    pub event_tx: tokio::sync::mpsc::UnboundedSender<Result<DaemonEvent, MonitorError>>,
    /// Makes all control actions fail.
    pub fail_actions: std::sync::atomic::AtomicBool,
    /// Makes all stats fetches fail.
    pub fail_stats: std::sync::atomic::AtomicBool,
    /// Makes pings fail with a connection error.
    pub fail_ping: std::sync::atomic::AtomicBool,
    /// Makes pings fail with an auth error.
    pub fail_auth: std::sync::atomic::AtomicBool,
    /// Control actions recorded as `(action, container_id)`.
    pub actions: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl Default for MockDockerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl MockDockerClient {
    pub fn new() -> Self {
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            containers: std::sync::Mutex::new(Vec::new()),
            stats: std::sync::Mutex::new(HashMap::new()),
            event_rx: std::sync::Mutex::new(Some(event_rx)),
            event_tx,
            fail_actions: std::sync::atomic::AtomicBool::new(false),
            fail_stats: std::sync::atomic::AtomicBool::new(false),
            fail_ping: std::sync::atomic::AtomicBool::new(false),
            fail_auth: std::sync::atomic::AtomicBool::new(false),
            actions: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_containers(self, containers: Vec<ContainerInfo>) -> Self {
        *self.containers.lock().unwrap() = containers;
        self
    }

    pub fn with_stats(self, id: &str, sample: RawSample) -> Self {
        self.stats.lock().unwrap().insert(id.to_owned(), sample);
        self
    }

    pub fn with_failing_actions(self) -> Self {
        self.fail_actions
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self
    }

    pub fn with_auth_failure(self) -> Self {
        self.fail_auth
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self
    }

    pub fn push_event(&self, event: DaemonEvent) {
        let _ = self.event_tx.send(Ok(event));
    }

    fn record(&self, action: &str, id: &str) {
        self.actions
            .lock()
            .unwrap()
            .push((action.to_owned(), id.to_owned()));
    }

    fn check_action(&self, action: &str, id: &str) -> Result<(), MonitorError> {
        if self.fail_actions.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MonitorError::Control {
                container_id: id.to_owned(),
                action: action.to_owned(),
                reason: "mock failure".to_owned(),
            });
        }
        let exists = self
            .containers
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.id.as_str() == id);
        if !exists {
            return Err(MonitorError::ContainerNotFound(id.to_owned()));
        }
        self.record(action, id);
        Ok(())
    }
}

#[cfg(test)]
impl DockerClient for MockDockerClient {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, MonitorError> {
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, MonitorError> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id.as_str() == id)
            .cloned()
            .ok_or_else(|| MonitorError::ContainerNotFound(id.to_owned()))
    }

    async fn fetch_stats(&self, id: &str) -> Result<RawSample, MonitorError> {
        if self.fail_stats.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MonitorError::StatsFetch {
                container_id: id.to_owned(),
                reason: "mock failure".to_owned(),
            });
        }
        self.stats
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| MonitorError::StatsFetch {
                container_id: id.to_owned(),
                reason: "no scripted sample".to_owned(),
            })
    }

    async fn events(&self) -> Result<EventStream, MonitorError> {
        let mut rx = self
            .event_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| MonitorError::StreamTerminated("events already taken".to_owned()))?;
        let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
        Ok(Box::pin(stream))
    }

    async fn start_container(&self, id: &str) -> Result<(), MonitorError> {
        self.check_action("start", id)
    }

    async fn stop_container(&self, id: &str) -> Result<(), MonitorError> {
        self.check_action("stop", id)
    }

    async fn restart_container(&self, id: &str) -> Result<(), MonitorError> {
        self.check_action("restart", id)
    }

    async fn pause_container(&self, id: &str) -> Result<(), MonitorError> {
        self.check_action("pause", id)
    }

    async fn unpause_container(&self, id: &str) -> Result<(), MonitorError> {
        self.check_action("unpause", id)
    }

    async fn ping(&self) -> Result<(), MonitorError> {
        if self.fail_auth.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MonitorError::Auth("mock certificate rejected".to_owned()));
        }
        if self.fail_ping.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MonitorError::Connection("mock ping failure".to_owned()));
        }
        Ok(())
    }
}
