//! Integration tests -- full host monitoring flow.
//!
//! Exercises connect -> resync -> stream -> sample -> notify against a
//! scripted daemon client, using real channels and tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use dockwatch_core::event::ChangeKind;
use dockwatch_core::types::{
    ContainerId, ContainerInfo, ContainerState, HealthState, RawSample,
};
use dockwatch_monitor::bus::SubscriptionFilter;
use dockwatch_monitor::config::MonitorConfig;
use dockwatch_monitor::connection::ConnState;
use dockwatch_monitor::docker::DaemonEvent;
use dockwatch_monitor::host::DockerHost;

// Scripted daemon client for integration tests
mod mock {
    use super::*;
    use dockwatch_monitor::MonitorError;
    use dockwatch_monitor::docker::{DockerClient, EventStream};
    use std::sync::Mutex;

    pub struct TestDockerClient {
        pub containers: Arc<Mutex<Vec<ContainerInfo>>>,
        pub stats: Arc<Mutex<HashMap<String, RawSample>>>,
        pub list_calls: Arc<AtomicUsize>,
        pub fail_ping: Arc<AtomicBool>,
        event_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<DaemonEvent, MonitorError>>>>,
        event_tx: Mutex<mpsc::UnboundedSender<Result<DaemonEvent, MonitorError>>>,
        pub actions: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl TestDockerClient {
        pub fn new() -> Self {
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            Self {
                containers: Arc::new(Mutex::new(Vec::new())),
                stats: Arc::new(Mutex::new(HashMap::new())),
                list_calls: Arc::new(AtomicUsize::new(0)),
                fail_ping: Arc::new(AtomicBool::new(false)),
                event_rx: Mutex::new(Some(event_rx)),
                event_tx: Mutex::new(event_tx),
                actions: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn add_container(&self, container: ContainerInfo) {
            self.containers.lock().unwrap().push(container);
        }

        pub fn set_stats(&self, id: &str, sample: RawSample) {
            self.stats.lock().unwrap().insert(id.to_owned(), sample);
        }

        pub fn push_event(&self, event: DaemonEvent) {
            let _ = self.event_tx.lock().unwrap().send(Ok(event));
        }

        /// Drops the current stream source, simulating a lost
        /// connection, and arms a fresh stream for the reconnect.
        pub fn break_stream(&self) {
            eprintln!("DBG: break_stream called");
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            *self.event_tx.lock().unwrap() = event_tx;
            *self.event_rx.lock().unwrap() = Some(event_rx);
        }
    }

    impl DockerClient for TestDockerClient {
        async fn list_containers(&self) -> Result<Vec<ContainerInfo>, MonitorError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.containers.lock().unwrap().clone())
        }

        async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, MonitorError> {
            self.containers
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.id.as_str() == id)
                .cloned()
                .ok_or_else(|| MonitorError::ContainerNotFound(id.to_owned()))
        }

        async fn fetch_stats(&self, id: &str) -> Result<RawSample, MonitorError> {
            self.stats
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| MonitorError::StatsFetch {
                    container_id: id.to_owned(),
                    reason: "no scripted sample".to_owned(),
                })
        }

        async fn events(&self) -> Result<EventStream, MonitorError> {
            let mut rx = self
                .event_rx
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| MonitorError::StreamTerminated("stream taken".to_owned()))?;
            Ok(Box::pin(futures::stream::poll_fn(move |cx| {
                rx.poll_recv(cx)
            })))
        }

        async fn start_container(&self, id: &str) -> Result<(), MonitorError> {
            self.actions
                .lock()
                .unwrap()
                .push(("start".to_owned(), id.to_owned()));
            Ok(())
        }

        async fn stop_container(&self, id: &str) -> Result<(), MonitorError> {
            self.actions
                .lock()
                .unwrap()
                .push(("stop".to_owned(), id.to_owned()));
            Ok(())
        }

        async fn restart_container(&self, id: &str) -> Result<(), MonitorError> {
            self.actions
                .lock()
                .unwrap()
                .push(("restart".to_owned(), id.to_owned()));
            Ok(())
        }

        async fn pause_container(&self, id: &str) -> Result<(), MonitorError> {
            self.actions
                .lock()
                .unwrap()
                .push(("pause".to_owned(), id.to_owned()));
            Ok(())
        }

        async fn unpause_container(&self, id: &str) -> Result<(), MonitorError> {
            self.actions
                .lock()
                .unwrap()
                .push(("unpause".to_owned(), id.to_owned()));
            Ok(())
        }

        async fn ping(&self) -> Result<(), MonitorError> {
            if self.fail_ping.load(Ordering::SeqCst) {
                return Err(MonitorError::Connection("scripted failure".to_owned()));
            }
            Ok(())
        }
    }
}

use mock::TestDockerClient;

fn info(id: &str, name: &str, state: ContainerState) -> ContainerInfo {
    ContainerInfo {
        id: ContainerId::new(id),
        name: name.to_owned(),
        image: "nginx:latest".to_owned(),
        state,
        health: HealthState::None,
        started_at: Some(Utc::now()),
        finished_at: None,
    }
}

fn raw(cpu: u64, system: u64) -> RawSample {
    RawSample {
        read_at: Utc::now(),
        cpu_total: cpu,
        system_total: Some(system),
        online_cpus: Some(2),
        memory_usage: 512 * 1024 * 1024,
        memory_limit: 1024 * 1024 * 1024,
        network_rx: 1000,
        network_tx: 500,
        blkio_read: 0,
        blkio_write: 0,
    }
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        scan_interval_secs: 1,
        retry_count: 3,
        reconnect_backoff_base_ms: 10,
        ..Default::default()
    }
}

fn daemon_event(id: &str, name: &str, action: &str) -> DaemonEvent {
    let mut attributes = HashMap::new();
    attributes.insert("name".to_owned(), name.to_owned());
    DaemonEvent {
        container_id: id.to_owned(),
        action: action.to_owned(),
        attributes,
        timestamp: Utc::now(),
    }
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5 seconds"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn startup_resync_populates_registry_and_notifies() {
    let client = Arc::new(TestDockerClient::new());
    client.add_container(info("aaa111", "web", ContainerState::Running));
    client.add_container(info("bbb222", "db", ContainerState::Exited));

    let mut host = DockerHost::with_client(fast_config(), Arc::clone(&client)).unwrap();
    let (_handle, mut rx) = host.subscribe(SubscriptionFilter::all());
    host.start().await.unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert!(matches!(first.kind, ChangeKind::Added));
    assert!(matches!(second.kind, ChangeKind::Added));
    assert_eq!(host.registry().len().await, 2);

    host.stop().await.unwrap();
}

#[tokio::test]
async fn sampling_derives_cpu_percent_from_consecutive_reads() {
    let client = Arc::new(TestDockerClient::new());
    client.add_container(info("aaa111", "web", ContainerState::Running));
    client.set_stats("aaa111", raw(100, 1000));

    let mut host = DockerHost::with_client(fast_config(), Arc::clone(&client)).unwrap();
    host.start().await.unwrap();

    let id = ContainerId::new("aaa111");
    let registry = host.registry().clone();
    {
        let registry = registry.clone();
        let id = id.clone();
        wait_until(move || {
            let registry = registry.clone();
            let id = id.clone();
            async move {
                registry
                    .get(&id)
                    .await
                    .is_some_and(|r| r.sample.is_some())
            }
        })
        .await;
    }

    // first sample has no predecessor, so no percentage yet
    let first = registry.get(&id).await.unwrap().sample.unwrap();
    assert!(first.cpu_percent.is_none());

    // next read: +50 cpu against +200 system over 2 cpus = 50%
    client.set_stats("aaa111", raw(150, 1200));
    {
        let registry = registry.clone();
        let id = id.clone();
        wait_until(move || {
            let registry = registry.clone();
            let id = id.clone();
            async move {
                registry
                    .get(&id)
                    .await
                    .and_then(|r| r.sample)
                    .is_some_and(|s| s.cpu_percent.is_some())
            }
        })
        .await;
    }
    let second = registry.get(&id).await.unwrap().sample.unwrap();
    assert_eq!(second.cpu_percent, Some(50.0));

    host.stop().await.unwrap();
}

#[tokio::test]
async fn stream_loss_triggers_exactly_one_resync_per_reconnect() {
    let client = Arc::new(TestDockerClient::new());
    client.add_container(info("aaa111", "web", ContainerState::Running));

    let mut host = DockerHost::with_client(fast_config(), Arc::clone(&client)).unwrap();
    let mut state = host.conn_state();
    host.start().await.unwrap();
    state
        .wait_for(|s| *s == ConnState::Streaming)
        .await
        .unwrap();
    assert_eq!(client.list_calls.load(Ordering::SeqCst), 1);

    // while disconnected, the world changes
    client.add_container(info("bbb222", "fresh", ContainerState::Running));
    client.break_stream();

    // reconnect performs exactly one fresh listing
    {
        let client = Arc::clone(&client);
        wait_until(move || {
            let client = Arc::clone(&client);
            async move { client.list_calls.load(Ordering::SeqCst) == 2 }
        })
        .await;
    }
    state
        .wait_for(|s| *s == ConnState::Streaming)
        .await
        .unwrap();
    assert_eq!(client.list_calls.load(Ordering::SeqCst), 2);
    assert_eq!(host.registry().len().await, 2);

    host.stop().await.unwrap();
}

#[tokio::test]
async fn samplers_resume_after_reconnect() {
    let client = Arc::new(TestDockerClient::new());
    client.add_container(info("aaa111", "web", ContainerState::Running));
    client.set_stats("aaa111", raw(100, 1000));

    let mut host = DockerHost::with_client(fast_config(), Arc::clone(&client)).unwrap();
    let mut state = host.conn_state();
    host.start().await.unwrap();
    state
        .wait_for(|s| *s == ConnState::Streaming)
        .await
        .unwrap();

    client.break_stream();
    {
        let client = Arc::clone(&client);
        wait_until(move || {
            let client = Arc::clone(&client);
            async move { client.list_calls.load(Ordering::SeqCst) == 2 }
        })
        .await;
    }
    state
        .wait_for(|s| *s == ConnState::Streaming)
        .await
        .unwrap();

    // resync dropped the pre-outage sample, so the first read after
    // reconnect starts a fresh baseline
    client.set_stats("aaa111", raw(150, 1200));
    let registry = host.registry().clone();
    let id = ContainerId::new("aaa111");
    {
        let registry = registry.clone();
        let id = id.clone();
        wait_until(move || {
            let registry = registry.clone();
            let id = id.clone();
            async move {
                registry
                    .get(&id)
                    .await
                    .is_some_and(|r| r.sample.is_some())
            }
        })
        .await;
    }
    assert!(
        registry
            .get(&id)
            .await
            .and_then(|r| r.sample)
            .is_some_and(|s| s.cpu_percent.is_none())
    );

    // the read after that derives against the fresh baseline
    client.set_stats("aaa111", raw(200, 1400));
    wait_until(move || {
        let registry = registry.clone();
        let id = id.clone();
        async move {
            registry
                .get(&id)
                .await
                .and_then(|r| r.sample)
                .is_some_and(|s| s.cpu_percent.is_some())
        }
    })
    .await;

    host.stop().await.unwrap();
}

#[tokio::test]
async fn control_stop_state_change_arrives_via_event_stream() {
    let client = Arc::new(TestDockerClient::new());
    client.add_container(info("aaa111", "web", ContainerState::Running));

    let mut host = DockerHost::with_client(fast_config(), Arc::clone(&client)).unwrap();
    let mut state = host.conn_state();
    host.start().await.unwrap();
    state
        .wait_for(|s| *s == ConnState::Streaming)
        .await
        .unwrap();

    let (_handle, mut rx) = host.subscribe(SubscriptionFilter::all());
    let control = host.control();
    let id = ContainerId::new("aaa111");

    control.stop(&id).await.unwrap();
    assert_eq!(
        client.actions.lock().unwrap().clone(),
        vec![("stop".to_owned(), "aaa111".to_owned())]
    );
    // the registry does not change until the daemon reports it
    assert_eq!(
        host.registry().get(&id).await.unwrap().info.state,
        ContainerState::Running
    );
    assert!(rx.try_recv().is_err());

    // the daemon's die event carries the transition
    client.push_event(daemon_event("aaa111", "web", "die"));
    let event = rx.recv().await.unwrap();
    assert!(matches!(
        event.kind,
        ChangeKind::StateChanged {
            old: ContainerState::Running,
            new: ContainerState::Exited,
        }
    ));
    assert_eq!(
        host.registry().get(&id).await.unwrap().info.state,
        ContainerState::Exited
    );

    host.stop().await.unwrap();
}

#[tokio::test]
async fn destroyed_container_is_dropped_and_subscribers_told() {
    let client = Arc::new(TestDockerClient::new());
    client.add_container(info("aaa111", "web", ContainerState::Running));

    let mut host = DockerHost::with_client(fast_config(), Arc::clone(&client)).unwrap();
    let mut state = host.conn_state();
    host.start().await.unwrap();
    state
        .wait_for(|s| *s == ConnState::Streaming)
        .await
        .unwrap();

    let (_handle, mut rx) = host.subscribe(SubscriptionFilter::all());
    client.push_event(daemon_event("aaa111", "web", "destroy"));

    let event = rx.recv().await.unwrap();
    assert!(matches!(event.kind, ChangeKind::Removed));
    assert!(host.registry().is_empty().await);

    host.stop().await.unwrap();
}

#[tokio::test]
async fn health_status_events_reach_filtered_subscribers() {
    let client = Arc::new(TestDockerClient::new());
    client.add_container(info("aaa111", "web", ContainerState::Running));

    let mut host = DockerHost::with_client(fast_config(), Arc::clone(&client)).unwrap();
    let mut state = host.conn_state();
    host.start().await.unwrap();
    state
        .wait_for(|s| *s == ConnState::Streaming)
        .await
        .unwrap();

    let (_handle, mut rx) = host.subscribe(SubscriptionFilter::classes(vec![
        dockwatch_core::types::AttributeClass::Health,
    ]));
    client.push_event(daemon_event("aaa111", "web", "health_status: unhealthy"));

    let event = rx.recv().await.unwrap();
    assert!(matches!(
        event.kind,
        ChangeKind::HealthChanged {
            old: HealthState::None,
            new: HealthState::Unhealthy,
        }
    ));

    host.stop().await.unwrap();
}

#[tokio::test]
async fn excluded_containers_never_enter_the_registry() {
    let client = Arc::new(TestDockerClient::new());
    client.add_container(info("aaa111", "web", ContainerState::Running));
    client.add_container(info("bbb222", "noisy", ContainerState::Running));

    let config = MonitorConfig {
        containers_exclude: vec!["noisy".to_owned()],
        ..fast_config()
    };
    let mut host = DockerHost::with_client(config, Arc::clone(&client)).unwrap();
    let mut state = host.conn_state();
    host.start().await.unwrap();
    state
        .wait_for(|s| *s == ConnState::Streaming)
        .await
        .unwrap();

    assert_eq!(host.registry().len().await, 1);
    // runtime events for the excluded container are skipped too
    client.push_event(daemon_event("bbb222", "noisy", "start"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(host.registry().len().await, 1);

    host.stop().await.unwrap();
}
