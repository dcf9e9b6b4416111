//! Shared container state registry.
//!
//! The [`Registry`] is the single authoritative in-memory view of one
//! host's containers. Writers (the event stream consumer, the stats
//! samplers, resync) mutate records here; every externally visible
//! change is published on the [`NotificationBus`] only after the
//! mutation has landed, so a reader woken by an event always observes
//! state at least as new as the event describes.
//!
//! Records are individually locked: mutations to different containers
//! proceed concurrently, mutations to the same container serialize.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use metrics::gauge;
use tokio::sync::{Mutex, RwLock};

use dockwatch_core::event::{ChangeEvent, ChangeKind};
use dockwatch_core::metrics::{CONTAINERS_TRACKED, LABEL_HOST};
use dockwatch_core::types::{ContainerId, ContainerInfo, HealthState, RawSample, ResourceSample};

use crate::bus::NotificationBus;
use crate::config::MonitorConfig;
use crate::error::MonitorError;

/// One container's tracked state: identity plus the latest sample.
#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub info: ContainerInfo,
    /// Name for presentation, with the rename map and prefix applied.
    pub display_name: String,
    /// Most recent resource sample; `None` until the first fetch.
    pub sample: Option<ResourceSample>,
}

/// Point-in-time copy of the whole registry.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub containers: Vec<ContainerRecord>,
}

/// Outcome of a full resync, used to reconcile sampler tasks.
#[derive(Debug, Default)]
pub struct ResyncOutcome {
    pub added: Vec<ContainerId>,
    pub removed: Vec<ContainerId>,
}

struct RegistryInner {
    config: MonitorConfig,
    bus: NotificationBus,
    records: RwLock<HashMap<ContainerId, Arc<Mutex<ContainerRecord>>>>,
}

/// Authoritative container state for one host.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Registry with default naming and thresholds; used where only the
    /// host name matters.
    pub fn new(host: impl Into<String>, bus: NotificationBus) -> Self {
        let config = MonitorConfig {
            name: host.into(),
            ..Default::default()
        };
        Self::with_config(config, bus)
    }

    /// Registry configured from the host's monitor settings: rename map,
    /// prefix, and the memory change threshold.
    pub fn with_config(config: MonitorConfig, bus: NotificationBus) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                bus,
                records: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// The bus this registry publishes on.
    pub fn bus(&self) -> &NotificationBus {
        &self.inner.bus
    }

    fn update_gauge(&self, count: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!(CONTAINERS_TRACKED, LABEL_HOST => self.inner.config.name.clone()).set(count as f64);
    }

    /// Inserts or updates a container's identity and state.
    ///
    /// A new container publishes `Added`; an existing one publishes one
    /// event per changed attribute (`Renamed`, `StateChanged`,
    /// `HealthChanged`), in that order.
    pub async fn upsert_info(&self, info: ContainerInfo) {
        let id = info.id.clone();
        let display_name = self.inner.config.display_name(&info.name);

        // existence check and insert share one critical section, so
        // racing first upserts publish exactly one Added
        let (existing, count) = {
            let mut records = self.inner.records.write().await;
            let existing = match records.entry(id.clone()) {
                Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(Mutex::new(ContainerRecord {
                        info: info.clone(),
                        display_name: display_name.clone(),
                        sample: None,
                    })));
                    None
                }
            };
            (existing, records.len())
        };

        match existing {
            None => {
                self.update_gauge(count);
                self.inner
                    .bus
                    .publish(&ChangeEvent::new(id, ChangeKind::Added));
            }
            Some(record) => {
                let old = {
                    let mut record = record.lock().await;
                    let old = record.info.clone();
                    record.info = info.clone();
                    record.display_name = display_name;
                    old
                };

                if old.name != info.name {
                    self.inner.bus.publish(&ChangeEvent::new(
                        id.clone(),
                        ChangeKind::Renamed {
                            old: old.name,
                            new: info.name,
                        },
                    ));
                }
                if old.state != info.state {
                    self.inner.bus.publish(&ChangeEvent::new(
                        id.clone(),
                        ChangeKind::StateChanged {
                            old: old.state,
                            new: info.state,
                        },
                    ));
                }
                if old.health != info.health {
                    self.inner.bus.publish(&ChangeEvent::new(
                        id,
                        ChangeKind::HealthChanged {
                            old: old.health,
                            new: info.health,
                        },
                    ));
                }
            }
        }
    }

    /// Applies a raw stats sample, deriving rates against the previous
    /// sample, and publishes `SampleUpdated`.
    ///
    /// Memory readings are damped: a relative change below the
    /// configured `memory_change_percent` keeps the previously reported
    /// memory values, so small allocator jitter does not surface
    /// downstream.
    pub async fn apply_sample(&self, id: &ContainerId, raw: RawSample) -> Result<(), MonitorError> {
        let record = {
            let records = self.inner.records.read().await;
            records
                .get(id)
                .cloned()
                .ok_or_else(|| MonitorError::ContainerNotFound(id.as_str().to_owned()))?
        };

        {
            let mut record = record.lock().await;
            let mut derived = ResourceSample::derive(record.sample.as_ref(), &raw);
            if let Some(prev) = record.sample.as_ref() {
                dampen_memory(prev, &mut derived, self.inner.config.memory_change_percent);
            }
            record.sample = Some(derived);
        }

        self.inner
            .bus
            .publish(&ChangeEvent::new(id.clone(), ChangeKind::SampleUpdated));
        Ok(())
    }

    /// Updates only the health state, from a `health_status` event.
    pub async fn set_health(&self, id: &ContainerId, health: HealthState) -> Result<(), MonitorError> {
        let record = {
            let records = self.inner.records.read().await;
            records
                .get(id)
                .cloned()
                .ok_or_else(|| MonitorError::ContainerNotFound(id.as_str().to_owned()))?
        };

        let old = {
            let mut record = record.lock().await;
            let old = record.info.health;
            record.info.health = health;
            old
        };

        if old != health {
            self.inner.bus.publish(&ChangeEvent::new(
                id.clone(),
                ChangeKind::HealthChanged { old, new: health },
            ));
        }
        Ok(())
    }

    /// Removes a container and publishes `Removed`. Returns whether the
    /// container was present.
    pub async fn remove(&self, id: &ContainerId) -> bool {
        let (removed, count) = {
            let mut records = self.inner.records.write().await;
            let removed = records.remove(id).is_some();
            (removed, records.len())
        };
        if removed {
            self.update_gauge(count);
            self.inner
                .bus
                .publish(&ChangeEvent::new(id.clone(), ChangeKind::Removed));
        }
        removed
    }

    /// Reconciles the registry against a full listing from the daemon.
    ///
    /// Containers absent from the listing are removed, new ones added,
    /// existing ones updated, each publishing its usual events. The
    /// list endpoint carries no health or timestamp data, so surviving
    /// records keep those fields until the next inspect refreshes them.
    ///
    /// Resync runs per (re)connect; retained samples are discarded so
    /// the first post-resync reading derives no rates across the gap.
    pub async fn resync(&self, listing: Vec<ContainerInfo>) -> ResyncOutcome {
        let mut outcome = ResyncOutcome::default();

        let known: Vec<ContainerId> = {
            let records = self.inner.records.read().await;
            records.keys().cloned().collect()
        };

        for id in known {
            if !listing.iter().any(|c| c.id == id) {
                self.remove(&id).await;
                outcome.removed.push(id);
            }
        }

        for info in listing {
            let id = info.id.clone();
            let existing = {
                let records = self.inner.records.read().await;
                records.get(&id).cloned()
            };
            match existing {
                None => {
                    self.upsert_info(info).await;
                    outcome.added.push(id);
                }
                Some(record) => {
                    let merged = {
                        let mut record = record.lock().await;
                        record.sample = None;
                        merge_listing(&record.info, info)
                    };
                    self.upsert_info(merged).await;
                }
            }
        }

        outcome
    }

    /// Copies one container's record.
    pub async fn get(&self, id: &ContainerId) -> Option<ContainerRecord> {
        let record = {
            let records = self.inner.records.read().await;
            records.get(id).cloned()
        }?;
        let record = record.lock().await;
        Some(record.clone())
    }

    /// Copies the whole registry.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let records: Vec<Arc<Mutex<ContainerRecord>>> = {
            let records = self.inner.records.read().await;
            records.values().cloned().collect()
        };
        let mut containers = Vec::with_capacity(records.len());
        for record in records {
            containers.push(record.lock().await.clone());
        }
        RegistrySnapshot { containers }
    }

    /// All tracked container IDs.
    pub async fn ids(&self) -> Vec<ContainerId> {
        self.inner.records.read().await.keys().cloned().collect()
    }

    /// Resolves a container ID from a runtime name.
    pub async fn id_by_name(&self, name: &str) -> Option<ContainerId> {
        let records: Vec<Arc<Mutex<ContainerRecord>>> = {
            let records = self.inner.records.read().await;
            records.values().cloned().collect()
        };
        for record in records {
            let record = record.lock().await;
            if record.info.name == name {
                return Some(record.info.id.clone());
            }
        }
        None
    }

    pub async fn len(&self) -> usize {
        self.inner.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.records.read().await.is_empty()
    }
}

/// Fills the fields a list entry cannot report from the record's
/// current info, so a resync never regresses inspect-derived state.
fn merge_listing(existing: &ContainerInfo, mut incoming: ContainerInfo) -> ContainerInfo {
    if incoming.health == HealthState::None {
        incoming.health = existing.health;
    }
    if incoming.started_at.is_none() {
        incoming.started_at = existing.started_at;
    }
    if incoming.finished_at.is_none() {
        incoming.finished_at = existing.finished_at;
    }
    incoming
}

/// Holds the previously reported memory values when the relative change
/// stays under `threshold` percent.
fn dampen_memory(prev: &ResourceSample, next: &mut ResourceSample, threshold: u64) {
    if threshold == 0 || prev.memory_usage == 0 {
        return;
    }
    let change =
        prev.memory_usage.abs_diff(next.memory_usage) as f64 / prev.memory_usage as f64 * 100.0;
    if change < threshold as f64 {
        next.memory_usage = prev.memory_usage;
        next.memory_percent = prev.memory_percent;
    }
}
