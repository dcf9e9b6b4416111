//! Error taxonomy shared across the workspace.
//!
//! The monitor crate defines its own richer error type and converts it
//! into [`HostError`] at the crate boundary, so callers can match on a
//! stable set of variants.

/// Top-level dockwatch error.
#[derive(Debug, thiserror::Error)]
pub enum DockwatchError {
    /// Configuration loading or validation failure.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Failure reported by a monitored host.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// I/O failure outside host communication (config files, PID file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors surfaced by one monitored host.
///
/// Transient connection failures are retried with backoff inside the
/// monitor; authentication failures are not, so callers can distinguish
/// "unreachable" from "misconfigured credentials".
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Transient connection failure (retriable).
    #[error("connection failed: {0}")]
    Connect(String),

    /// Certificate or authentication failure (non-retriable).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The event stream ended or timed out; a reconnect follows.
    #[error("event stream terminated: {0}")]
    StreamTerminated(String),

    /// Stats fetch failed for one container; other containers are
    /// unaffected.
    #[error("stats fetch failed for container '{container_id}': {reason}")]
    StatsFetch {
        container_id: String,
        reason: String,
    },

    /// A control action (start/stop/restart/pause) failed.
    #[error("control action '{action}' failed for container '{container_id}': {reason}")]
    Control {
        container_id: String,
        action: String,
        reason: String,
    },

    /// Container is not known to the runtime.
    #[error("container not found: {0}")]
    NotFound(String),

    /// The host is reconnecting or shutting down; the caller should not
    /// queue the request.
    #[error("host unavailable: {0}")]
    Unavailable(String),
}
