//! Change events — the unit of notification between the registry and
//! its subscribers.
//!
//! A [`ChangeEvent`] describes one observed delta on one container. It
//! is produced only by the container registry (after diffing a command
//! against prior state) and fanned out by the notification bus; it is
//! never persisted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AttributeClass, ContainerId, ContainerState, HealthState};

/// What changed on a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Container became known to the registry.
    Added,
    /// Container left the registry (destroyed or dropped by resync).
    Removed,
    /// Lifecycle status transition.
    StateChanged {
        old: ContainerState,
        new: ContainerState,
    },
    /// Health-check verdict changed.
    HealthChanged { old: HealthState, new: HealthState },
    /// A new resource sample replaced the previous one.
    SampleUpdated,
    /// Container was renamed on the daemon side.
    Renamed { old: String, new: String },
}

impl ChangeKind {
    /// Attribute classes a subscriber filter is matched against.
    ///
    /// A sample update touches every metric class; consumers interested
    /// in any one of them see the event and re-read the record.
    pub fn classes(&self) -> &'static [AttributeClass] {
        match self {
            Self::Added | Self::Removed | Self::Renamed { .. } => &[AttributeClass::Lifecycle],
            Self::StateChanged { .. } => &[AttributeClass::Status, AttributeClass::Uptime],
            Self::HealthChanged { .. } => &[AttributeClass::Health],
            Self::SampleUpdated => &[
                AttributeClass::Cpu,
                AttributeClass::Memory,
                AttributeClass::Network,
            ],
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::StateChanged { old, new } => write!(f, "state({old} -> {new})"),
            Self::HealthChanged { old, new } => write!(f, "health({old} -> {new})"),
            Self::SampleUpdated => write!(f, "sample"),
            Self::Renamed { old, new } => write!(f, "renamed({old} -> {new})"),
        }
    }
}

/// One state delta for one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Event ID (UUID v4), for log correlation.
    pub id: String,
    pub container: ContainerId,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(container: ContainerId, kind: ChangeKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            container,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event matches a subscriber's attribute filter.
    pub fn matches_classes(&self, classes: &[AttributeClass]) -> bool {
        self.kind.classes().iter().any(|c| classes.contains(c))
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChangeEvent[{}] container={} kind={}",
            &self.id[..8.min(self.id.len())],
            self.container,
            self.kind,
        )
    }
}
