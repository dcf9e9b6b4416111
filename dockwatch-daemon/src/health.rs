//! Aggregated health reporting across monitored hosts.
//!
//! Maps each host's connection state onto a coarse health status and
//! folds those into a single [`DaemonHealth`] report. The overall
//! daemon status is the worst status among all hosts.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use serde::Serialize;

use dockwatch_monitor::ConnState;

/// Coarse health status for a host or the daemon as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall daemon health status (worst of all hosts).
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Per-host health reports.
    pub hosts: Vec<HostHealth>,
}

/// Health status for a single monitored host.
#[derive(Debug, Clone, Serialize)]
pub struct HostHealth {
    /// Host name from `[[hosts]]`.
    pub name: String,
    /// Number of containers currently tracked for this host.
    pub containers: usize,
    /// Health derived from the host's connection state.
    pub status: HealthStatus,
}

/// Map a connection state onto a health status.
///
/// `Syncing` and `Connecting` are transient and reported as degraded
/// rather than unhealthy; a host stuck in `Disconnected` has given up.
pub fn host_status(state: &ConnState) -> HealthStatus {
    match state {
        ConnState::Streaming => HealthStatus::Healthy,
        ConnState::Connecting => HealthStatus::Degraded("connecting".to_owned()),
        ConnState::Syncing => HealthStatus::Degraded("synchronizing inventory".to_owned()),
        ConnState::Degraded(reason) => HealthStatus::Degraded(reason.clone()),
        ConnState::Disconnected => HealthStatus::Unhealthy("disconnected".to_owned()),
    }
}

/// Aggregate per-host statuses into a single status.
///
/// Returns the worst status found: Unhealthy > Degraded > Healthy.
pub fn aggregate_status(hosts: &[HostHealth]) -> HealthStatus {
    let mut degraded = Vec::new();
    let mut unhealthy = Vec::new();

    for host in hosts {
        match &host.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                degraded.push(format!("{}: {}", host.name, reason));
            }
            HealthStatus::Unhealthy(reason) => {
                unhealthy.push(format!("{}: {}", host.name, reason));
            }
        }
    }

    if !unhealthy.is_empty() {
        HealthStatus::Unhealthy(unhealthy.join("; "))
    } else if !degraded.is_empty() {
        HealthStatus::Degraded(degraded.join("; "))
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, status: HealthStatus) -> HostHealth {
        HostHealth {
            name: name.to_owned(),
            containers: 0,
            status,
        }
    }

    #[test]
    fn all_healthy_aggregates_to_healthy() {
        let hosts = vec![
            host("docker", HealthStatus::Healthy),
            host("remote", HealthStatus::Healthy),
        ];
        assert_eq!(aggregate_status(&hosts), HealthStatus::Healthy);
    }

    #[test]
    fn degraded_host_degrades_daemon() {
        let hosts = vec![
            host("docker", HealthStatus::Healthy),
            host("remote", HealthStatus::Degraded("stream lost".to_owned())),
        ];
        assert_eq!(
            aggregate_status(&hosts),
            HealthStatus::Degraded("remote: stream lost".to_owned())
        );
    }

    #[test]
    fn unhealthy_wins_over_degraded() {
        let hosts = vec![
            host("a", HealthStatus::Degraded("connecting".to_owned())),
            host("b", HealthStatus::Unhealthy("disconnected".to_owned())),
        ];
        assert_eq!(
            aggregate_status(&hosts),
            HealthStatus::Unhealthy("b: disconnected".to_owned())
        );
    }

    #[test]
    fn degraded_reasons_dropped_regardless_of_host_order() {
        let expected = HealthStatus::Unhealthy("b: disconnected".to_owned());
        let hosts = vec![
            host("a", HealthStatus::Degraded("connecting".to_owned())),
            host("b", HealthStatus::Unhealthy("disconnected".to_owned())),
        ];
        assert_eq!(aggregate_status(&hosts), expected);

        let hosts = vec![
            host("b", HealthStatus::Unhealthy("disconnected".to_owned())),
            host("a", HealthStatus::Degraded("connecting".to_owned())),
        ];
        assert_eq!(aggregate_status(&hosts), expected);
    }

    #[test]
    fn empty_host_list_is_healthy() {
        assert_eq!(aggregate_status(&[]), HealthStatus::Healthy);
    }

    #[test]
    fn streaming_maps_to_healthy() {
        assert_eq!(host_status(&ConnState::Streaming), HealthStatus::Healthy);
        assert_eq!(
            host_status(&ConnState::Disconnected),
            HealthStatus::Unhealthy("disconnected".to_owned())
        );
        assert!(matches!(
            host_status(&ConnState::Degraded("daemon unreachable".to_owned())),
            HealthStatus::Degraded(r) if r == "daemon unreachable"
        ));
    }
}
