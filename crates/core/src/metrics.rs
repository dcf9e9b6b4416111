//! Metric name constants and description registration.
//!
//! Every Prometheus metric name is defined centrally here; modules call
//! `metrics::counter!()` / `metrics::gauge!()` with these constants.
//!
//! # Naming convention
//!
//! - prefix: `dockwatch_`
//! - suffix: `_total` (counter), `_seconds` (gauge/duration), none (gauge)
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(dockwatch_core::metrics::EVENTS_TOTAL).increment(1);
//! ```

// --- Label keys ---

/// Host label key (host name from configuration).
pub const LABEL_HOST: &str = "host";

/// Result label key (success, failure).
pub const LABEL_RESULT: &str = "result";

/// Control action label key (start, stop, restart, pause, unpause).
pub const LABEL_ACTION: &str = "action";

// --- Monitor metrics ---

/// Change events published on the notification bus (counter, label: host).
pub const EVENTS_TOTAL: &str = "dockwatch_events_total";

/// Stats samples fetched (counter, labels: host, result).
pub const SAMPLES_TOTAL: &str = "dockwatch_samples_total";

/// Full registry resyncs (counter, label: host).
pub const RESYNCS_TOTAL: &str = "dockwatch_resyncs_total";

/// Reconnects after a lost connection (counter, label: host).
pub const RECONNECTS_TOTAL: &str = "dockwatch_reconnects_total";

/// Containers currently tracked in the registry (gauge, label: host).
pub const CONTAINERS_TRACKED: &str = "dockwatch_containers_tracked";

/// Control actions executed (counter, labels: host, action, result).
pub const CONTROL_ACTIONS_TOTAL: &str = "dockwatch_control_actions_total";

// --- Daemon metrics ---

/// Daemon uptime (gauge, seconds).
pub const DAEMON_UPTIME_SECONDS: &str = "dockwatch_daemon_uptime_seconds";

/// Build information (gauge, always 1, labels: version, rust_version).
pub const DAEMON_BUILD_INFO: &str = "dockwatch_daemon_build_info";

/// Registers descriptions for every metric.
///
/// Sets the Prometheus HELP text via `describe_counter!()` /
/// `describe_gauge!()`. Call once after installing the global recorder,
/// normally at daemon startup.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        EVENTS_TOTAL,
        "Total change events published on the notification bus"
    );
    describe_counter!(SAMPLES_TOTAL, "Total resource stat samples fetched");
    describe_counter!(RESYNCS_TOTAL, "Total full registry resyncs performed");
    describe_counter!(
        RECONNECTS_TOTAL,
        "Total reconnects after a lost daemon connection"
    );
    describe_gauge!(
        CONTAINERS_TRACKED,
        "Number of containers currently tracked in the registry"
    );
    describe_counter!(
        CONTROL_ACTIONS_TOTAL,
        "Total container control actions executed"
    );

    describe_gauge!(DAEMON_UPTIME_SECONDS, "Dockwatch daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version labels)"
    );
}
