//! Per-host container monitoring.
//!
//! A [`DockerHost`] owns everything for one daemon endpoint: the
//! connection state machine, the lifecycle event stream, per-container
//! stats samplers, the shared state registry, and the notification bus
//! consumers subscribe to.
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`MonitorError`)
//! - [`config`]: Monitor configuration (`MonitorConfig`, builder)
//! - [`docker`]: Daemon API abstraction (`DockerClient` trait, `BollardDockerClient`)
//! - [`connection`]: Connection state machine and retry policy
//! - [`stream`]: Lifecycle event translation
//! - [`sampler`]: Periodic stats sampling tasks
//! - [`registry`]: Shared container state registry
//! - [`bus`]: Subscription and notification fan-out
//! - [`control`]: Container control facade (`ControlHandle`)
//! - [`host`]: Main orchestrator (`DockerHost`)
//!
//! # Architecture
//!
//! ```text
//! daemon events --stream--> Registry.apply() --+
//! stats samplers --mpsc---> Registry.apply() --+--> NotificationBus --mpsc--> subscribers
//!                                              |
//! ControlHandle --direct API call--> daemon ---+ (state change arrives via events)
//! ```

pub mod bus;
pub mod config;
pub mod connection;
pub mod control;
pub mod docker;
pub mod error;
pub mod host;
pub mod registry;
pub mod sampler;
pub mod stream;

// --- Public API Re-exports ---

// Host (main orchestrator)
pub use host::DockerHost;

// Configuration
pub use config::{MonitorConfig, MonitorConfigBuilder};

// Error
pub use error::MonitorError;

// Daemon API
pub use docker::{BollardDockerClient, DockerClient};

// Connection
pub use connection::ConnState;

// Registry
pub use registry::{ContainerRecord, Registry, RegistrySnapshot};

// Bus
pub use bus::{NotificationBus, SubscriptionFilter, SubscriptionHandle};

// Control
pub use control::{ContainerAction, ControlHandle};
