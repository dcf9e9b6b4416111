//! Configuration — `dockwatch.toml` parsing and validation.
//!
//! [`DockwatchConfig`] is the top-level structure; each monitored host
//! gets one `[[hosts]]` entry. Loading order:
//! 1. CLI arguments (highest precedence, applied by the daemon)
//! 2. Environment variables (`DOCKWATCH_GENERAL_LOG_LEVEL` form)
//! 3. Config file (`dockwatch.toml`)
//! 4. `Default` implementations
//!
//! ```no_run
//! # async fn example() -> Result<(), dockwatch_core::error::DockwatchError> {
//! use dockwatch_core::config::DockwatchConfig;
//!
//! let config = DockwatchConfig::load("dockwatch.toml").await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DockwatchError};
use crate::types::{AttributeClass, CONDITION_ALLINONE, MONITORED_CONDITIONS};

/// Top-level configuration, one section per concern plus the host list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockwatchConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Monitored daemon endpoints; at least one entry is required.
    #[serde(default = "default_hosts")]
    pub hosts: Vec<HostConfig>,
}

impl Default for DockwatchConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            metrics: MetricsConfig::default(),
            hosts: default_hosts(),
        }
    }
}

fn default_hosts() -> Vec<HostConfig> {
    vec![HostConfig::default()]
}

impl DockwatchConfig {
    /// Loads from a TOML file, applies environment overrides, validates.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DockwatchError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads from a TOML file without environment overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, DockwatchError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DockwatchError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                DockwatchError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, DockwatchError> {
        toml::from_str(toml_str).map_err(|e| {
            DockwatchError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Applies environment-variable overrides.
    ///
    /// Naming: `DOCKWATCH_{SECTION}_{FIELD}`. Host overrides apply to
    /// the first `[[hosts]]` entry (the common single-host deployment).
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.general.log_level, "DOCKWATCH_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "DOCKWATCH_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "DOCKWATCH_GENERAL_PID_FILE");

        override_bool(&mut self.metrics.enabled, "DOCKWATCH_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "DOCKWATCH_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "DOCKWATCH_METRICS_PORT");
        override_string(&mut self.metrics.endpoint, "DOCKWATCH_METRICS_ENDPOINT");

        if let Some(host) = self.hosts.first_mut() {
            override_opt_string(&mut host.url, "DOCKWATCH_HOST_URL");
            override_string(&mut host.certpath, "DOCKWATCH_HOST_CERTPATH");
            override_u64(
                &mut host.scan_interval_secs,
                "DOCKWATCH_HOST_SCAN_INTERVAL_SECS",
            );
            override_u32(&mut host.retry_count, "DOCKWATCH_HOST_RETRY_COUNT");
        }
    }

    /// Validates every section and host entry.
    pub fn validate(&self) -> Result<(), DockwatchError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.hosts.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "hosts".to_owned(),
                reason: "at least one [[hosts]] entry is required".to_owned(),
            }
            .into());
        }

        if self.metrics.enabled {
            if self.metrics.listen_addr.parse::<std::net::IpAddr>().is_err() {
                return Err(ConfigError::InvalidValue {
                    field: "metrics.listen_addr".to_owned(),
                    reason: format!("'{}' is not a valid IP address", self.metrics.listen_addr),
                }
                .into());
            }
            if !self.metrics.endpoint.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: "metrics.endpoint".to_owned(),
                    reason: "must start with '/'".to_owned(),
                }
                .into());
            }
        }

        let mut seen = std::collections::HashSet::new();
        for host in &self.hosts {
            host.validate()?;
            if !seen.insert(host.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "hosts.name".to_owned(),
                    reason: format!("duplicate host name '{}'", host.name),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// General daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log level (trace/debug/info/warn/error).
    pub log_level: String,
    /// Log format: "json" or "pretty".
    pub log_format: String,
    /// PID file path; empty disables PID file handling.
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// Prometheus metrics endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// Switch/button entity enablement: a global flag or an explicit list
/// of container names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnableSetting {
    All(bool),
    Names(Vec<String>),
}

impl EnableSetting {
    pub fn is_enabled_for(&self, name: &str) -> bool {
        match self {
            Self::All(enabled) => *enabled,
            Self::Names(names) => names.iter().any(|n| n == name),
        }
    }
}

/// Display precision (decimal places) for derived values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecisionConfig {
    pub cpu: u32,
    pub memory_mb: u32,
    pub memory_percent: u32,
    pub network_kb: u32,
    pub network_mb: u32,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            cpu: 2,
            memory_mb: 2,
            memory_percent: 2,
            network_kb: 2,
            network_mb: 2,
        }
    }
}

/// One monitored daemon endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Host name, used as the identity prefix downstream.
    pub name: String,
    /// Extra prefix for downstream entity names; empty for none.
    pub prefix: String,
    /// Connection URL (`unix://…`, `tcp://…`, `http://…`, `https://…`).
    /// `None` selects the platform-default local socket.
    pub url: Option<String>,
    /// Directory holding `key.pem`, `cert.pem`, `ca.pem`; empty
    /// disables TLS.
    pub certpath: String,
    /// Stats sampling interval per container, seconds.
    pub scan_interval_secs: u64,
    /// Connection attempts before setup fails.
    pub retry_count: u32,
    /// Monitored conditions; empty selects the full recognized list.
    pub monitored_conditions: Vec<String>,
    /// Containers to monitor by name; empty selects all.
    pub containers: Vec<String>,
    /// Containers excluded from monitoring.
    pub containers_exclude: Vec<String>,
    /// Display rename map (runtime name -> display name).
    pub rename: HashMap<String, String>,
    /// Switch entity enablement.
    pub switch_enabled: EnableSetting,
    /// Button entity enablement.
    pub button_enabled: EnableSetting,
    /// Minimum memory delta (percent of limit) before a sample-only
    /// memory change is considered notable.
    pub memory_change_percent: u64,
    pub precision: PrecisionConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: "docker".to_owned(),
            prefix: String::new(),
            url: None,
            certpath: String::new(),
            scan_interval_secs: 10,
            retry_count: 3,
            monitored_conditions: Vec::new(),
            containers: Vec::new(),
            containers_exclude: Vec::new(),
            rename: HashMap::new(),
            switch_enabled: EnableSetting::All(true),
            button_enabled: EnableSetting::All(false),
            memory_change_percent: 100,
            precision: PrecisionConfig::default(),
        }
    }
}

/// Bounds on numeric host settings.
const MAX_SCAN_INTERVAL_SECS: u64 = 3600;
const MAX_RETRY_COUNT: u32 = 20;
const MAX_PRECISION: u32 = 6;

impl HostConfig {
    /// Validates this host entry.
    pub fn validate(&self) -> Result<(), DockwatchError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "hosts.name".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        if self.scan_interval_secs == 0 || self.scan_interval_secs > MAX_SCAN_INTERVAL_SECS {
            return Err(ConfigError::InvalidValue {
                field: "hosts.scan_interval_secs".to_owned(),
                reason: format!("must be 1-{MAX_SCAN_INTERVAL_SECS}"),
            }
            .into());
        }

        if self.retry_count == 0 || self.retry_count > MAX_RETRY_COUNT {
            return Err(ConfigError::InvalidValue {
                field: "hosts.retry_count".to_owned(),
                reason: format!("must be 1-{MAX_RETRY_COUNT}"),
            }
            .into());
        }

        for condition in &self.monitored_conditions {
            if condition != CONDITION_ALLINONE && !MONITORED_CONDITIONS.contains(&condition.as_str())
            {
                return Err(ConfigError::InvalidValue {
                    field: "hosts.monitored_conditions".to_owned(),
                    reason: format!("unrecognized condition '{condition}'"),
                }
                .into());
            }
        }

        for (field, value) in [
            ("precision.cpu", self.precision.cpu),
            ("precision.memory_mb", self.precision.memory_mb),
            ("precision.memory_percent", self.precision.memory_percent),
            ("precision.network_kb", self.precision.network_kb),
            ("precision.network_mb", self.precision.network_mb),
        ] {
            if value > MAX_PRECISION {
                return Err(ConfigError::InvalidValue {
                    field: format!("hosts.{field}"),
                    reason: format!("must be 0-{MAX_PRECISION}"),
                }
                .into());
            }
        }

        if let Some(url) = &self.url {
            let known_scheme = ["unix://", "tcp://", "http://", "https://"]
                .iter()
                .any(|scheme| url.starts_with(scheme));
            if !known_scheme {
                return Err(ConfigError::InvalidValue {
                    field: "hosts.url".to_owned(),
                    reason: format!("unsupported URL scheme in '{url}'"),
                }
                .into());
            }
        }

        Ok(())
    }

    /// The effective condition list: empty and `allinone` both expand
    /// to every recognized condition.
    pub fn effective_conditions(&self) -> Vec<&'static str> {
        let expand_all = self.monitored_conditions.is_empty()
            || self
                .monitored_conditions
                .iter()
                .all(|c| c == CONDITION_ALLINONE);
        if expand_all {
            MONITORED_CONDITIONS.to_vec()
        } else {
            MONITORED_CONDITIONS
                .iter()
                .copied()
                .filter(|c| self.monitored_conditions.iter().any(|m| m == c))
                .collect()
        }
    }

    /// Attribute classes covered by the effective condition list.
    pub fn attribute_classes(&self) -> Vec<AttributeClass> {
        let mut classes: Vec<AttributeClass> = self
            .effective_conditions()
            .iter()
            .filter_map(|c| AttributeClass::from_condition(c))
            .collect();
        classes.sort();
        classes.dedup();
        classes
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

// --- Environment override helpers ---

fn override_string(target: &mut String, var: &str) {
    if let Ok(value) = std::env::var(var) {
        *target = value;
    }
}

fn override_opt_string(target: &mut Option<String>, var: &str) {
    if let Ok(value) = std::env::var(var) {
        *target = Some(value);
    }
}

fn override_bool(target: &mut bool, var: &str) {
    if let Ok(value) = std::env::var(var) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var = var, value = %value, "ignoring non-boolean override"),
        }
    }
}

fn override_u16(target: &mut u16, var: &str) {
    if let Ok(value) = std::env::var(var) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var = var, value = %value, "ignoring non-numeric override"),
        }
    }
}

fn override_u32(target: &mut u32, var: &str) {
    if let Ok(value) = std::env::var(var) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var = var, value = %value, "ignoring non-numeric override"),
        }
    }
}

fn override_u64(target: &mut u64, var: &str) {
    if let Ok(value) = std::env::var(var) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var = var, value = %value, "ignoring non-numeric override"),
        }
    }
}
