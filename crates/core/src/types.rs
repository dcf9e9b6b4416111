//! Domain types shared across the workspace.
//!
//! These are the units the monitor crate and the daemon exchange:
//! container identity and lifecycle state, health, raw cumulative stats
//! readings, and the derived [`ResourceSample`] built from two
//! consecutive readings.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of one container, as reported by the runtime.
///
/// Docker IDs are 64-character hex strings; short prefixes are accepted
/// anywhere a lookup happens, but records are always keyed by the full ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form used in log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

impl From<String> for ContainerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ContainerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Container lifecycle status as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Removing,
}

impl ContainerState {
    /// Maps the daemon's state string. Unknown strings fall back to
    /// `Exited` rather than failing, matching how the list endpoint
    /// reports containers that are mid-removal.
    pub fn parse(state: &str) -> Self {
        match state {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "dead" => Self::Dead,
            "removing" => Self::Removing,
            _ => Self::Exited,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// States in which a stats endpoint will return usable counters.
    pub fn has_stats(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Restarting)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Removing => "removing",
        };
        f.write_str(s)
    }
}

/// Health-check verdict for a container, `None` when the image defines
/// no health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Starting,
    #[default]
    None,
}

impl HealthState {
    pub fn parse(health: &str) -> Self {
        match health {
            "healthy" => Self::Healthy,
            "unhealthy" => Self::Unhealthy,
            "starting" => Self::Starting,
            _ => Self::None,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Starting => "starting",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// One container as described by the runtime (list + inspect merged).
///
/// This is the shape the Docker client hands to the registry; the
/// registry owns the richer record built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: ContainerId,
    /// Name with the leading slash stripped.
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub health: HealthState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One raw stats reading: cumulative counters straight from the runtime.
///
/// Rates and percentages are never computed from a single reading; see
/// [`ResourceSample::derive`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub read_at: DateTime<Utc>,
    /// Cumulative container CPU time, in runtime ticks.
    pub cpu_total: u64,
    /// Cumulative host CPU time, same unit. Absent on some platforms.
    pub system_total: Option<u64>,
    pub online_cpus: Option<u32>,
    pub memory_usage: u64,
    pub memory_limit: u64,
    /// Cumulative bytes over all network interfaces.
    pub network_rx: u64,
    pub network_tx: u64,
    /// Cumulative block I/O bytes.
    pub blkio_read: u64,
    pub blkio_write: u64,
}

/// Point-in-time resource measurement with derived values.
///
/// Derived fields are `None` ("pending") until two consecutive readings
/// exist; the first sample after a (re)connect therefore reports no
/// rates. Immutable once produced — a new sample replaces the previous
/// one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub read_at: DateTime<Utc>,
    pub cpu_total: u64,
    pub system_total: Option<u64>,
    pub online_cpus: Option<u32>,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub network_rx: u64,
    pub network_tx: u64,
    pub blkio_read: u64,
    pub blkio_write: u64,

    /// `(cpu_delta / system_delta) * online_cpus * 100`; never negative.
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    /// Bytes per second since the previous reading.
    pub network_rx_rate: Option<f64>,
    pub network_tx_rate: Option<f64>,
    pub blkio_read_rate: Option<f64>,
    pub blkio_write_rate: Option<f64>,
}

impl ResourceSample {
    /// Builds a sample from a raw reading and the previous sample.
    ///
    /// With no previous sample, or when `system_delta <= 0`, CPU% is
    /// reported unavailable rather than zero. A cumulative counter that
    /// moved backwards (container restart) also yields unavailable for
    /// the affected rate.
    pub fn derive(prev: Option<&ResourceSample>, raw: &RawSample) -> Self {
        let cpu_percent = prev.and_then(|p| cpu_percent(p, raw));

        let memory_percent = if raw.memory_limit > 0 {
            Some((raw.memory_usage as f64 / raw.memory_limit as f64) * 100.0)
        } else {
            None
        };

        let elapsed = prev.and_then(|p| {
            let secs = (raw.read_at - p.read_at).num_milliseconds() as f64 / 1000.0;
            (secs > 0.0).then_some(secs)
        });

        let rate = |cur: u64, prev_val: u64| {
            elapsed.and_then(|secs| (cur >= prev_val).then(|| (cur - prev_val) as f64 / secs))
        };

        Self {
            read_at: raw.read_at,
            cpu_total: raw.cpu_total,
            system_total: raw.system_total,
            online_cpus: raw.online_cpus,
            memory_usage: raw.memory_usage,
            memory_limit: raw.memory_limit,
            network_rx: raw.network_rx,
            network_tx: raw.network_tx,
            blkio_read: raw.blkio_read,
            blkio_write: raw.blkio_write,
            cpu_percent,
            memory_percent,
            network_rx_rate: prev.and_then(|p| rate(raw.network_rx, p.network_rx)),
            network_tx_rate: prev.and_then(|p| rate(raw.network_tx, p.network_tx)),
            blkio_read_rate: prev.and_then(|p| rate(raw.blkio_read, p.blkio_read)),
            blkio_write_rate: prev.and_then(|p| rate(raw.blkio_write, p.blkio_write)),
        }
    }

    /// First sample after (re)connect: all derived fields pending.
    pub fn pending(raw: &RawSample) -> Self {
        Self::derive(None, raw)
    }
}

fn cpu_percent(prev: &ResourceSample, raw: &RawSample) -> Option<f64> {
    let system_now = raw.system_total?;
    let system_prev = prev.system_total?;
    if system_now <= system_prev || raw.cpu_total < prev.cpu_total {
        return None;
    }
    let cpu_delta = (raw.cpu_total - prev.cpu_total) as f64;
    let system_delta = (system_now - system_prev) as f64;
    let cpus = f64::from(raw.online_cpus.unwrap_or(1).max(1));
    Some((cpu_delta / system_delta) * cpus * 100.0)
}

// --- Monitored conditions ---

/// Recognized monitored-condition names, as they appear in configuration.
pub const MONITORED_CONDITIONS: &[&str] = &[
    "status",
    "health",
    "uptime",
    "image",
    "cpu_percentage",
    "memory_usage",
    "memory_percentage",
    "network_speed_up",
    "network_speed_down",
    "network_total_up",
    "network_total_down",
];

/// Shorthand that expands to the full condition list.
pub const CONDITION_ALLINONE: &str = "allinone";

/// Coarse attribute grouping used as the subscription filter unit.
///
/// Each configured monitored condition maps onto one class; a
/// [`ChangeKind`](crate::event::ChangeKind) matches one or more classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeClass {
    /// Lifecycle status transitions.
    Status,
    /// Health-check verdict changes.
    Health,
    /// CPU usage.
    Cpu,
    /// Memory usage and percentage.
    Memory,
    /// Network rates and totals.
    Network,
    /// Started-at derived uptime.
    Uptime,
    /// Container add/remove/rename.
    Lifecycle,
}

impl AttributeClass {
    /// Maps a configured condition name to its class. Unrecognized
    /// names return `None`; config validation rejects them up front.
    pub fn from_condition(condition: &str) -> Option<Self> {
        match condition {
            "status" | "image" => Some(Self::Status),
            "health" => Some(Self::Health),
            "uptime" => Some(Self::Uptime),
            "cpu_percentage" => Some(Self::Cpu),
            "memory_usage" | "memory_percentage" => Some(Self::Memory),
            "network_speed_up" | "network_speed_down" | "network_total_up"
            | "network_total_down" => Some(Self::Network),
            _ => None,
        }
    }
}
