//! Shared foundation for the dockwatch workspace: domain types, change
//! events, the error taxonomy, configuration loading, and metric names.

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod types;

// --- Common re-exports ---
// The core types each crate needs, reachable from the crate root.

// Errors
pub use error::{ConfigError, DockwatchError, HostError};

// Configuration
pub use config::{DockwatchConfig, EnableSetting, HostConfig, PrecisionConfig};

// Events
pub use event::{ChangeEvent, ChangeKind};

// Domain types
pub use types::{
    AttributeClass, ContainerId, ContainerInfo, ContainerState, HealthState, RawSample,
    ResourceSample,
};
