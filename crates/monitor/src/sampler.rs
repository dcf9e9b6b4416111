//! Periodic stats sampling.
//!
//! [`SamplerSet`] keeps one tokio task per tracked container that is in
//! a stats-bearing state. Each task fetches a snapshot every scan
//! interval and applies it to the registry, which derives rates and
//! publishes `SampleUpdated`.
//!
//! A task that fails a fetch exits; it is respawned on the next
//! [`reconcile`](SamplerSet::reconcile) pass or lifecycle event, so a
//! container that briefly loses stats (restarting, daemon hiccup)
//! resumes sampling without poisoning the set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dockwatch_core::metrics::{LABEL_HOST, LABEL_RESULT, SAMPLES_TOTAL};
use dockwatch_core::types::ContainerId;

use crate::config::MonitorConfig;
use crate::docker::DockerClient;
use crate::registry::Registry;

struct SamplerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Manages the per-container sampler tasks for one host.
pub struct SamplerSet<C: DockerClient> {
    client: Arc<C>,
    registry: Registry,
    config: MonitorConfig,
    cancel: CancellationToken,
    tasks: Mutex<HashMap<ContainerId, SamplerTask>>,
}

impl<C: DockerClient> SamplerSet<C> {
    /// Creates an empty set. `cancel` is the parent token; cancelling
    /// it stops every sampler.
    pub fn new(
        client: Arc<C>,
        registry: Registry,
        config: MonitorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            registry,
            config,
            cancel,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Ensures a sampler task exists for the container, if it is
    /// monitored and currently in a stats-bearing state.
    pub async fn ensure(&self, id: &ContainerId) {
        let Some(record) = self.registry.get(id).await else {
            return;
        };
        if !self.config.is_monitored(&record.info.name) || !record.info.state.has_stats() {
            return;
        }

        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get(id) {
            if !task.handle.is_finished() {
                return;
            }
            // dead task from an earlier fetch failure
            tasks.remove(id);
        }

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(sample_loop(
            Arc::clone(&self.client),
            self.registry.clone(),
            self.config.clone(),
            id.clone(),
            cancel.clone(),
        ));
        tasks.insert(id.clone(), SamplerTask { cancel, handle });
    }

    /// Stops the sampler for one container.
    pub async fn remove(&self, id: &ContainerId) {
        let task = self.tasks.lock().await.remove(id);
        if let Some(task) = task {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }

    /// Aligns the task set with the registry: spawns missing samplers
    /// and reaps tasks for containers no longer tracked.
    pub async fn reconcile(&self) {
        let tracked = self.registry.ids().await;

        let stale: Vec<ContainerId> = {
            let tasks = self.tasks.lock().await;
            tasks
                .keys()
                .filter(|id| !tracked.contains(id))
                .cloned()
                .collect()
        };
        for id in stale {
            self.remove(&id).await;
        }

        for id in tracked {
            self.ensure(&id).await;
        }
    }

    /// Stops every sampler and waits for the tasks to finish.
    pub async fn shutdown(&self) {
        let tasks: Vec<SamplerTask> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().map(|(_, task)| task).collect()
        };
        for task in &tasks {
            task.cancel.cancel();
        }
        for task in tasks {
            let _ = task.handle.await;
        }
    }

    /// Number of live sampler tasks.
    pub async fn active_count(&self) -> usize {
        let tasks = self.tasks.lock().await;
        tasks.values().filter(|t| !t.handle.is_finished()).count()
    }
}

/// One container's sampling loop. Exits on cancellation, on fetch
/// failure, or when the container leaves the registry.
async fn sample_loop<C: DockerClient>(
    client: Arc<C>,
    registry: Registry,
    config: MonitorConfig,
    id: ContainerId,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.scan_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let timeout = Duration::from_secs(config.stats_timeout_secs);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let fetch = tokio::time::timeout(timeout, client.fetch_stats(id.as_str())).await;
        let raw = match fetch {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                counter!(SAMPLES_TOTAL, LABEL_HOST => config.name.clone(), LABEL_RESULT => "failure")
                    .increment(1);
                tracing::warn!(host = %config.name, container = %id, error = %e, "stats fetch failed, sampler exiting");
                return;
            }
            Err(_) => {
                counter!(SAMPLES_TOTAL, LABEL_HOST => config.name.clone(), LABEL_RESULT => "failure")
                    .increment(1);
                tracing::warn!(host = %config.name, container = %id, "stats fetch timed out, sampler exiting");
                return;
            }
        };

        match registry.apply_sample(&id, raw).await {
            Ok(()) => {
                counter!(SAMPLES_TOTAL, LABEL_HOST => config.name.clone(), LABEL_RESULT => "success")
                    .increment(1);
            }
            Err(_) => {
                // container disappeared under us
                tracing::debug!(host = %config.name, container = %id, "container gone, sampler exiting");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::NotificationBus;
    use crate::docker::MockDockerClient;
    use chrono::Utc;
    use dockwatch_core::types::{ContainerInfo, ContainerState, HealthState, RawSample};

    fn info(id: &str, name: &str, state: ContainerState) -> ContainerInfo {
        ContainerInfo {
            id: ContainerId::new(id),
            name: name.to_owned(),
            image: "nginx:latest".to_owned(),
            state,
            health: HealthState::None,
            started_at: None,
            finished_at: None,
        }
    }

    fn raw(cpu: u64) -> RawSample {
        RawSample {
            read_at: Utc::now(),
            cpu_total: cpu,
            system_total: Some(cpu * 10),
            online_cpus: Some(2),
            memory_usage: 512,
            memory_limit: 1024,
            network_rx: 0,
            network_tx: 0,
            blkio_read: 0,
            blkio_write: 0,
        }
    }

    async fn setup(
        state: ContainerState,
    ) -> (Arc<MockDockerClient>, Registry, SamplerSet<MockDockerClient>) {
        let client = Arc::new(
            MockDockerClient::new()
                .with_containers(vec![info("abc123", "web", state)])
                .with_stats("abc123", raw(100)),
        );
        let bus = NotificationBus::new("test", 64);
        let registry = Registry::new("test", bus);
        registry.upsert_info(info("abc123", "web", state)).await;
        let config = MonitorConfig {
            scan_interval_secs: 1,
            ..Default::default()
        };
        let set = SamplerSet::new(
            Arc::clone(&client),
            registry.clone(),
            config,
            CancellationToken::new(),
        );
        (client, registry, set)
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_applies_samples_periodically() {
        let (_client, registry, set) = setup(ContainerState::Running).await;
        let id = ContainerId::new("abc123");

        set.ensure(&id).await;
        assert_eq!(set.active_count().await, 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(registry.get(&id).await.unwrap().sample.is_some());

        set.shutdown().await;
        assert_eq!(set.active_count().await, 0);
    }

    #[tokio::test]
    async fn ensure_skips_exited_containers() {
        let (_client, _registry, set) = setup(ContainerState::Exited).await;
        set.ensure(&ContainerId::new("abc123")).await;
        assert_eq!(set.active_count().await, 0);
    }

    #[tokio::test]
    async fn ensure_skips_unmonitored_containers() {
        let client = Arc::new(MockDockerClient::new());
        let bus = NotificationBus::new("test", 64);
        let registry = Registry::new("test", bus);
        registry
            .upsert_info(info("abc123", "noisy", ContainerState::Running))
            .await;
        let config = MonitorConfig {
            containers_exclude: vec!["noisy".to_owned()],
            ..Default::default()
        };
        let set = SamplerSet::new(client, registry, config, CancellationToken::new());

        set.ensure(&ContainerId::new("abc123")).await;
        assert_eq!(set.active_count().await, 0);
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let (_client, _registry, set) = setup(ContainerState::Running).await;
        let id = ContainerId::new("abc123");

        set.ensure(&id).await;
        set.ensure(&id).await;
        assert_eq!(set.active_count().await, 1);

        set.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_ends_task_and_reconcile_respawns() {
        let (client, _registry, set) = setup(ContainerState::Running).await;
        let id = ContainerId::new("abc123");

        client
            .fail_stats
            .store(true, std::sync::atomic::Ordering::SeqCst);
        set.ensure(&id).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(set.active_count().await, 0); // task died on failure

        client
            .fail_stats
            .store(false, std::sync::atomic::Ordering::SeqCst);
        set.reconcile().await;
        assert_eq!(set.active_count().await, 1);

        set.shutdown().await;
    }

    #[tokio::test]
    async fn remove_stops_task() {
        let (_client, _registry, set) = setup(ContainerState::Running).await;
        let id = ContainerId::new("abc123");

        set.ensure(&id).await;
        set.remove(&id).await;
        assert_eq!(set.active_count().await, 0);
    }

    #[tokio::test]
    async fn reconcile_reaps_untracked_tasks() {
        let (_client, registry, set) = setup(ContainerState::Running).await;
        let id = ContainerId::new("abc123");

        set.ensure(&id).await;
        registry.remove(&id).await;
        set.reconcile().await;
        assert_eq!(set.active_count().await, 0);
    }

    #[tokio::test]
    async fn parent_cancel_stops_samplers() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_containers(vec![info("abc123", "web", ContainerState::Running)])
                .with_stats("abc123", raw(100)),
        );
        let bus = NotificationBus::new("test", 64);
        let registry = Registry::new("test", bus);
        registry
            .upsert_info(info("abc123", "web", ContainerState::Running))
            .await;
        let cancel = CancellationToken::new();
        let set = SamplerSet::new(
            client,
            registry,
            MonitorConfig::default(),
            cancel.clone(),
        );

        set.ensure(&ContainerId::new("abc123")).await;
        cancel.cancel();
        set.shutdown().await;
        assert_eq!(set.active_count().await, 0);
    }
}
