//! Monitor configuration.
//!
//! [`MonitorConfig`] derives from a core
//! [`HostConfig`](dockwatch_core::config::HostConfig) entry and adds
//! the internal knobs the monitor needs: channel capacities, timeouts,
//! and backoff settings.
//!
//! ```ignore
//! use dockwatch_core::config::HostConfig;
//! use dockwatch_monitor::config::MonitorConfig;
//!
//! let config = MonitorConfig::from_core(&HostConfig::default());
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use dockwatch_core::config::{EnableSetting, HostConfig, PrecisionConfig};

use crate::error::MonitorError;

/// Per-host monitor configuration.
///
/// Carries the user-facing host options plus extended internals not
/// exposed in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Host name, used in logs and metric labels.
    pub name: String,
    /// Extra prefix for display names; empty for none.
    pub prefix: String,
    /// Connection URL; `None` selects the platform-default socket.
    pub url: Option<String>,
    /// TLS certificate directory; empty disables TLS.
    pub certpath: String,
    /// Stats sampling interval per container, seconds.
    pub scan_interval_secs: u64,
    /// Connection attempts before setup fails.
    pub retry_count: u32,
    /// Containers to monitor by name; empty selects all.
    pub containers: Vec<String>,
    /// Containers excluded from monitoring.
    pub containers_exclude: Vec<String>,
    /// Display rename map (runtime name -> display name).
    pub rename: HashMap<String, String>,
    /// Minimum relative memory delta, in percent, before a new reading
    /// replaces the reported memory values.
    pub memory_change_percent: u64,
    /// Switch entity enablement, checked before control actions.
    pub switch_enabled: EnableSetting,
    /// Button entity enablement, checked before restart actions.
    pub button_enabled: EnableSetting,
    /// Display precision for derived values.
    pub precision: PrecisionConfig,

    // --- Extended settings (not in the config file) ---
    /// Notification channel capacity per subscriber.
    pub notify_capacity: usize,
    /// Timeout for a single stats fetch, seconds.
    pub stats_timeout_secs: u64,
    /// Timeout for a control action, seconds.
    pub control_timeout_secs: u64,
    /// Grace period passed to the daemon on stop/restart, seconds.
    pub stop_grace_secs: u64,
    /// Base reconnect backoff, milliseconds; doubles per attempt.
    pub reconnect_backoff_base_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            name: "docker".to_owned(),
            prefix: String::new(),
            url: None,
            certpath: String::new(),
            scan_interval_secs: 10,
            retry_count: 3,
            containers: Vec::new(),
            containers_exclude: Vec::new(),
            rename: HashMap::new(),
            memory_change_percent: 100,
            switch_enabled: EnableSetting::All(true),
            button_enabled: EnableSetting::All(false),
            precision: PrecisionConfig::default(),
            notify_capacity: 256,
            stats_timeout_secs: 10,
            control_timeout_secs: 30,
            stop_grace_secs: 10,
            reconnect_backoff_base_ms: 500,
        }
    }
}

/// Bounds on extended settings.
const MAX_SCAN_INTERVAL_SECS: u64 = 3600;
const MAX_RETRY_COUNT: u32 = 20;
const MAX_CAPACITY: usize = 65_536;
const MAX_TIMEOUT_SECS: u64 = 300;
const MAX_BACKOFF_BASE_MS: u64 = 30_000;

impl MonitorConfig {
    /// Builds a monitor config from a core host entry.
    ///
    /// Extended fields keep their defaults.
    pub fn from_core(core: &HostConfig) -> Self {
        Self {
            name: core.name.clone(),
            prefix: core.prefix.clone(),
            url: core.url.clone(),
            certpath: core.certpath.clone(),
            scan_interval_secs: core.scan_interval_secs,
            retry_count: core.retry_count,
            containers: core.containers.clone(),
            containers_exclude: core.containers_exclude.clone(),
            rename: core.rename.clone(),
            memory_change_percent: core.memory_change_percent,
            switch_enabled: core.switch_enabled.clone(),
            button_enabled: core.button_enabled.clone(),
            precision: core.precision.clone(),
            ..Self::default()
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.name.is_empty() {
            return Err(MonitorError::Config {
                field: "name".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if self.scan_interval_secs == 0 || self.scan_interval_secs > MAX_SCAN_INTERVAL_SECS {
            return Err(MonitorError::Config {
                field: "scan_interval_secs".to_owned(),
                reason: format!("must be 1-{MAX_SCAN_INTERVAL_SECS}"),
            });
        }

        if self.retry_count == 0 || self.retry_count > MAX_RETRY_COUNT {
            return Err(MonitorError::Config {
                field: "retry_count".to_owned(),
                reason: format!("must be 1-{MAX_RETRY_COUNT}"),
            });
        }

        if self.notify_capacity == 0 || self.notify_capacity > MAX_CAPACITY {
            return Err(MonitorError::Config {
                field: "notify_capacity".to_owned(),
                reason: format!("must be 1-{MAX_CAPACITY}"),
            });
        }

        for (field, value) in [
            ("stats_timeout_secs", self.stats_timeout_secs),
            ("control_timeout_secs", self.control_timeout_secs),
        ] {
            if value == 0 || value > MAX_TIMEOUT_SECS {
                return Err(MonitorError::Config {
                    field: field.to_owned(),
                    reason: format!("must be 1-{MAX_TIMEOUT_SECS}"),
                });
            }
        }

        if self.reconnect_backoff_base_ms == 0
            || self.reconnect_backoff_base_ms > MAX_BACKOFF_BASE_MS
        {
            return Err(MonitorError::Config {
                field: "reconnect_backoff_base_ms".to_owned(),
                reason: format!("must be 1-{MAX_BACKOFF_BASE_MS}"),
            });
        }

        Ok(())
    }

    /// Whether a container (by runtime name) matches the
    /// include/exclude rules.
    pub fn is_monitored(&self, name: &str) -> bool {
        if self.containers_exclude.iter().any(|n| n == name) {
            return false;
        }
        self.containers.is_empty() || self.containers.iter().any(|n| n == name)
    }

    /// Display name with the rename map and prefix applied.
    pub fn display_name(&self, name: &str) -> String {
        let renamed = self.rename.get(name).map(String::as_str).unwrap_or(name);
        if self.prefix.is_empty() {
            renamed.to_owned()
        } else {
            format!("{}{}", self.prefix, renamed)
        }
    }
}

/// Monitor configuration builder.
#[derive(Default)]
pub struct MonitorConfigBuilder {
    config: MonitorConfig,
}

impl MonitorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = Some(url.into());
        self
    }

    pub fn certpath(mut self, path: impl Into<String>) -> Self {
        self.config.certpath = path.into();
        self
    }

    pub fn scan_interval_secs(mut self, secs: u64) -> Self {
        self.config.scan_interval_secs = secs;
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.config.retry_count = count;
        self
    }

    pub fn containers(mut self, names: Vec<String>) -> Self {
        self.config.containers = names;
        self
    }

    pub fn containers_exclude(mut self, names: Vec<String>) -> Self {
        self.config.containers_exclude = names;
        self
    }

    pub fn switch_enabled(mut self, setting: EnableSetting) -> Self {
        self.config.switch_enabled = setting;
        self
    }

    pub fn button_enabled(mut self, setting: EnableSetting) -> Self {
        self.config.button_enabled = setting;
        self
    }

    pub fn notify_capacity(mut self, capacity: usize) -> Self {
        self.config.notify_capacity = capacity;
        self
    }

    pub fn stats_timeout_secs(mut self, secs: u64) -> Self {
        self.config.stats_timeout_secs = secs;
        self
    }

    pub fn control_timeout_secs(mut self, secs: u64) -> Self {
        self.config.control_timeout_secs = secs;
        self
    }

    pub fn stop_grace_secs(mut self, secs: u64) -> Self {
        self.config.stop_grace_secs = secs;
        self
    }

    pub fn reconnect_backoff_base_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_backoff_base_ms = ms;
        self
    }

    /// Validates and produces the config.
    pub fn build(self) -> Result<MonitorConfig, MonitorError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
