//! Monitor error types.
//!
//! [`MonitorError`] covers everything that can go wrong inside a
//! monitored host. `From<MonitorError> for DockwatchError` allows
//! upper layers to propagate with `?`.

use dockwatch_core::error::{DockwatchError, HostError};

/// Monitor domain error.
///
/// Covers daemon API calls, the event stream, stats sampling, control
/// actions, and configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Daemon API call failed.
    #[error("daemon api error: {0}")]
    DaemonApi(String),

    /// Connection to the daemon failed.
    #[error("daemon connection error: {0}")]
    Connection(String),

    /// Authentication or TLS rejection; retrying will not help.
    #[error("daemon auth error: {0}")]
    Auth(String),

    /// The lifecycle event stream ended or errored.
    #[error("event stream terminated: {0}")]
    StreamTerminated(String),

    /// A stats fetch for one container failed.
    #[error("stats fetch failed for container '{container_id}': {reason}")]
    StatsFetch {
        /// Target container ID.
        container_id: String,
        /// Failure reason.
        reason: String,
    },

    /// A control action on one container failed.
    #[error("control action '{action}' failed for container '{container_id}': {reason}")]
    Control {
        /// Target container ID.
        container_id: String,
        /// Requested action.
        action: String,
        /// Failure reason.
        reason: String,
    },

    /// Container not present in the registry.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Host is reconnecting or shutting down; the call was not attempted.
    #[error("host unavailable: {0}")]
    Unavailable(String),

    /// Configuration error.
    #[error("config error: {field}: {reason}")]
    Config {
        /// Configuration field.
        field: String,
        /// Failure reason.
        reason: String,
    },

    /// Channel communication error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl From<MonitorError> for DockwatchError {
    fn from(err: MonitorError) -> Self {
        match &err {
            MonitorError::DaemonApi(msg) | MonitorError::Connection(msg) => {
                DockwatchError::Host(HostError::Connect(msg.clone()))
            }
            MonitorError::Auth(msg) => DockwatchError::Host(HostError::Auth(msg.clone())),
            MonitorError::StreamTerminated(msg) => {
                DockwatchError::Host(HostError::StreamTerminated(msg.clone()))
            }
            MonitorError::StatsFetch {
                container_id,
                reason,
            } => DockwatchError::Host(HostError::StatsFetch {
                container_id: container_id.clone(),
                reason: reason.clone(),
            }),
            MonitorError::Control {
                container_id,
                action,
                reason,
            } => DockwatchError::Host(HostError::Control {
                container_id: container_id.clone(),
                action: action.clone(),
                reason: reason.clone(),
            }),
            MonitorError::ContainerNotFound(id) => {
                DockwatchError::Host(HostError::NotFound(id.clone()))
            }
            MonitorError::Unavailable(msg) => {
                DockwatchError::Host(HostError::Unavailable(msg.clone()))
            }
            MonitorError::Config { .. } | MonitorError::Channel(_) => {
                DockwatchError::Host(HostError::Connect(err.to_string()))
            }
        }
    }
}
