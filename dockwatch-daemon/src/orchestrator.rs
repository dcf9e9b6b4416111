//! Host orchestration -- assembly, startup ordering, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `dockwatch-daemon`.
//! It loads configuration, builds one [`DockerHost`] per `[[hosts]]`
//! entry, manages startup/shutdown ordering, and runs the main signal
//! loop.
//!
//! Hosts are independent: a failure on one host after startup degrades
//! that host only. Startup itself is all-or-nothing -- if any host fails
//! to start, already-started hosts are rolled back and the daemon exits.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::broadcast;

use dockwatch_core::config::DockwatchConfig;
use dockwatch_monitor::{BollardDockerClient, DockerHost, MonitorConfig};

use crate::health::{DaemonHealth, HostHealth, aggregate_status, host_status};
use crate::metrics_server;

/// The main daemon orchestrator.
///
/// Manages the complete lifecycle of all monitored hosts:
/// configuration loading, host construction, ordered startup,
/// health reporting, and graceful shutdown.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: DockwatchConfig,
    /// One monitor per `[[hosts]]` entry, in configuration order.
    hosts: Vec<DockerHost<BollardDockerClient>>,
    /// Shutdown broadcast sender (signals background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or parsed
    /// - Configuration validation fails
    /// - Any host's Docker client cannot be constructed
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = DockwatchConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    ///
    /// Useful for testing or when config has already been loaded.
    pub fn build_from_config(config: DockwatchConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before any host emits a metric
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let mut hosts = Vec::with_capacity(config.hosts.len());
        for host_config in &config.hosts {
            tracing::info!(host = %host_config.name, "initializing docker host monitor");
            let monitor_config = MonitorConfig::from_core(host_config);
            let host = DockerHost::connect(monitor_config)
                .map_err(|e| anyhow::anyhow!("failed to build host '{}': {}", host_config.name, e))?;
            hosts.push(host);
        }

        let (shutdown_tx, _) = broadcast::channel(16);

        tracing::info!(total_hosts = hosts.len(), "orchestrator initialized");

        if config.metrics.enabled {
            record_daemon_metrics();
        }

        Ok(Self {
            config,
            hosts,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start all hosts and block until a shutdown signal arrives.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&mut self) -> Result<()> {
        // Write PID file if configured
        if !self.config.general.pid_file.is_empty() {
            let path = Path::new(&self.config.general.pid_file);
            write_pid_file(path)?;
        }

        tracing::info!("starting all hosts");
        if let Err(e) = self.start_all().await {
            // Rollback: stop any hosts that were successfully started
            tracing::warn!("startup failed, rolling back already-started hosts");
            if let Err(stop_err) = self.stop_all().await {
                tracing::error!(
                    startup_error = %e,
                    rollback_error = %stop_err,
                    "rollback also failed during startup failure cleanup"
                );
            }
            if !self.config.general.pid_file.is_empty() {
                let path = Path::new(&self.config.general.pid_file);
                remove_pid_file(path);
            }
            return Err(e);
        }

        // Spawn uptime updater task
        let mut uptime_updater_task = if self.config.metrics.enabled {
            let shutdown_rx = self.shutdown_tx.subscribe();
            Some(spawn_uptime_updater(self.start_time, shutdown_rx))
        } else {
            None
        };

        tracing::info!("entering main event loop");
        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal = signal, "shutdown signal received");

        tracing::info!("broadcasting shutdown signal to all tasks");
        let _ = self.shutdown_tx.send(());

        if let Some(task) = uptime_updater_task.take() {
            let _ = task.await;
        }

        self.stop_all().await?;

        if !self.config.general.pid_file.is_empty() {
            let path = Path::new(&self.config.general.pid_file);
            remove_pid_file(path);
        }

        Ok(())
    }

    /// Start hosts in configuration order, failing on the first error.
    async fn start_all(&mut self) -> Result<()> {
        for host in &mut self.hosts {
            let name = host.name().to_owned();
            host.start()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start host '{}': {}", name, e))?;
            tracing::info!(host = %name, "host started");
        }
        Ok(())
    }

    /// Stop every running host, collecting the first error.
    ///
    /// All hosts are stopped even if an earlier stop fails, so a
    /// misbehaving host cannot block shutdown of the others.
    async fn stop_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for host in &mut self.hosts {
            let name = host.name().to_owned();
            if let Err(e) = host.stop().await {
                tracing::error!(host = %name, error = %e, "failed to stop host");
                if first_err.is_none() {
                    first_err = Some(anyhow::anyhow!("failed to stop host '{}': {}", name, e));
                }
            } else {
                tracing::info!(host = %name, "host stopped");
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let mut hosts = Vec::with_capacity(self.hosts.len());
        for host in &self.hosts {
            let state = host.conn_state().borrow().clone();
            hosts.push(HostHealth {
                name: host.name().to_owned(),
                containers: host.registry().len().await,
                status: host_status(&state),
            });
        }

        let uptime_secs = self.start_time.elapsed().as_secs();

        if self.config.metrics.enabled {
            use dockwatch_core::metrics as m;
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth {
            status: aggregate_status(&hosts),
            uptime_secs,
            hosts,
        }
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &DockwatchConfig {
        &self.config
    }

    /// Number of configured hosts.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}

// DockerHost carries task handles and is not Debug; summarize instead.
impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("hosts", &self.hosts.len())
            .field("metrics_enabled", &self.config.metrics.enabled)
            .finish_non_exhaustive()
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// Used to prevent duplicate daemon instances.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create the file (no TOCTOU race)
/// - Verifies the created file is a regular file (no symlink target)
/// - Creates parent directory with restrictive permissions (0o700)
///
/// # Errors
///
/// Returns an error if the PID file cannot be written.
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file (possible symlink attack)",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        file.set_permissions(permissions)?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        );
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Record daemon-level metrics once during initialization.
fn record_daemon_metrics() {
    use dockwatch_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}

/// Spawn a background task that periodically updates the uptime metric.
///
/// Updates every 10 seconds to keep the metric fresh for Prometheus scrapes.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use dockwatch_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let uptime_secs = start_time.elapsed().as_secs();
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
