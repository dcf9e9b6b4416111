//! Container control facade.
//!
//! [`ControlHandle`] exposes the imperative surface: start, stop,
//! restart, pause, unpause. Actions are forwarded straight to the
//! daemon and never touch the registry; the resulting state change
//! arrives through the event stream like any other, so consumers see
//! one consistent ordering.
//!
//! While the host is reconnecting or shut down, actions fail fast with
//! [`MonitorError::Unavailable`] instead of queueing.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;

use dockwatch_core::config::EnableSetting;
use dockwatch_core::metrics::{CONTROL_ACTIONS_TOTAL, LABEL_ACTION, LABEL_HOST, LABEL_RESULT};
use dockwatch_core::types::ContainerId;

use crate::config::MonitorConfig;
use crate::connection::ConnState;
use crate::docker::DockerClient;
use crate::error::MonitorError;
use crate::registry::Registry;

/// A control action on one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
}

impl ContainerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
        }
    }

    /// Which enablement setting gates this action: restart is a button
    /// action, everything else a switch action.
    fn is_button(&self) -> bool {
        matches!(self, Self::Restart)
    }
}

impl std::fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Imperative control surface for one host.
///
/// Cloning is cheap; all clones target the same connection.
pub struct ControlHandle<C: DockerClient> {
    client: Arc<C>,
    registry: Registry,
    config: MonitorConfig,
    state: watch::Receiver<ConnState>,
}

impl<C: DockerClient> Clone for ControlHandle<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            registry: self.registry.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }
}

impl<C: DockerClient> ControlHandle<C> {
    pub fn new(
        client: Arc<C>,
        registry: Registry,
        config: MonitorConfig,
        state: watch::Receiver<ConnState>,
    ) -> Self {
        Self {
            client,
            registry,
            config,
            state,
        }
    }

    pub async fn start(&self, id: &ContainerId) -> Result<(), MonitorError> {
        self.execute(id, ContainerAction::Start).await
    }

    pub async fn stop(&self, id: &ContainerId) -> Result<(), MonitorError> {
        self.execute(id, ContainerAction::Stop).await
    }

    pub async fn restart(&self, id: &ContainerId) -> Result<(), MonitorError> {
        self.execute(id, ContainerAction::Restart).await
    }

    pub async fn pause(&self, id: &ContainerId) -> Result<(), MonitorError> {
        self.execute(id, ContainerAction::Pause).await
    }

    pub async fn unpause(&self, id: &ContainerId) -> Result<(), MonitorError> {
        self.execute(id, ContainerAction::Unpause).await
    }

    /// Executes one action against the daemon.
    ///
    /// # Errors
    ///
    /// - `MonitorError::Unavailable`: host is not connected
    /// - `MonitorError::ContainerNotFound`: container is not tracked
    /// - `MonitorError::Control`: action disabled by configuration,
    ///   rejected by the daemon, or timed out
    pub async fn execute(
        &self,
        id: &ContainerId,
        action: ContainerAction,
    ) -> Result<(), MonitorError> {
        let state = self.state.borrow().clone();
        if !state.accepts_control() {
            return Err(MonitorError::Unavailable(format!(
                "host '{}' is {state}",
                self.config.name
            )));
        }

        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| MonitorError::ContainerNotFound(id.as_str().to_owned()))?;

        let setting: &EnableSetting = if action.is_button() {
            &self.config.button_enabled
        } else {
            &self.config.switch_enabled
        };
        if !setting.is_enabled_for(&record.info.name) {
            return Err(MonitorError::Control {
                container_id: id.as_str().to_owned(),
                action: action.as_str().to_owned(),
                reason: "disabled by configuration".to_owned(),
            });
        }

        let timeout = Duration::from_secs(self.config.control_timeout_secs);
        let call = async {
            match action {
                ContainerAction::Start => self.client.start_container(id.as_str()).await,
                ContainerAction::Stop => self.client.stop_container(id.as_str()).await,
                ContainerAction::Restart => self.client.restart_container(id.as_str()).await,
                ContainerAction::Pause => self.client.pause_container(id.as_str()).await,
                ContainerAction::Unpause => self.client.unpause_container(id.as_str()).await,
            }
        };

        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::Control {
                container_id: id.as_str().to_owned(),
                action: action.as_str().to_owned(),
                reason: format!("timed out after {}s", self.config.control_timeout_secs),
            }),
        };

        let outcome = if result.is_ok() { "success" } else { "failure" };
        counter!(
            CONTROL_ACTIONS_TOTAL,
            LABEL_HOST => self.config.name.clone(),
            LABEL_ACTION => action.as_str(),
            LABEL_RESULT => outcome
        )
        .increment(1);

        if let Err(e) = &result {
            tracing::warn!(
                host = %self.config.name,
                container = %id,
                action = %action,
                error = %e,
                "control action failed"
            );
        } else {
            tracing::info!(
                host = %self.config.name,
                container = %id,
                action = %action,
                "control action executed"
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::NotificationBus;
    use crate::docker::MockDockerClient;
    use dockwatch_core::types::{ContainerInfo, ContainerState, HealthState};

    fn info(id: &str, name: &str) -> ContainerInfo {
        ContainerInfo {
            id: ContainerId::new(id),
            name: name.to_owned(),
            image: "nginx:latest".to_owned(),
            state: ContainerState::Running,
            health: HealthState::None,
            started_at: None,
            finished_at: None,
        }
    }

    async fn handle_with_state(
        config: MonitorConfig,
        state: ConnState,
    ) -> (Arc<MockDockerClient>, ControlHandle<MockDockerClient>) {
        let client =
            Arc::new(MockDockerClient::new().with_containers(vec![info("abc123", "web")]));
        let bus = NotificationBus::new("test", 64);
        let registry = Registry::new("test", bus);
        registry.upsert_info(info("abc123", "web")).await;
        // the receiver keeps serving the last value after the sender drops
        let (_tx, rx) = watch::channel(state);
        (
            Arc::clone(&client),
            ControlHandle::new(client, registry, config, rx),
        )
    }

    #[tokio::test]
    async fn stop_forwards_to_daemon() {
        let (client, handle) =
            handle_with_state(MonitorConfig::default(), ConnState::Streaming).await;
        handle.stop(&ContainerId::new("abc123")).await.unwrap();
        assert_eq!(
            client.actions.lock().unwrap().clone(),
            vec![("stop".to_owned(), "abc123".to_owned())]
        );
    }

    #[tokio::test]
    async fn control_does_not_mutate_registry() {
        let (_client, handle) =
            handle_with_state(MonitorConfig::default(), ConnState::Streaming).await;
        let id = ContainerId::new("abc123");
        handle.stop(&id).await.unwrap();
        // state only changes when the daemon's event arrives
        let record = handle.registry.get(&id).await.unwrap();
        assert_eq!(record.info.state, ContainerState::Running);
    }

    #[tokio::test]
    async fn fails_fast_while_degraded() {
        let (client, handle) = handle_with_state(
            MonitorConfig::default(),
            ConnState::Degraded("stream lost".to_owned()),
        )
        .await;
        let result = handle.stop(&ContainerId::new("abc123")).await;
        assert!(matches!(result, Err(MonitorError::Unavailable(_))));
        assert!(client.actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_container_is_rejected() {
        let (_client, handle) =
            handle_with_state(MonitorConfig::default(), ConnState::Streaming).await;
        let result = handle.start(&ContainerId::new("def456")).await;
        assert!(matches!(result, Err(MonitorError::ContainerNotFound(_))));
    }

    #[tokio::test]
    async fn switch_disabled_blocks_stop() {
        let config = MonitorConfig {
            switch_enabled: EnableSetting::All(false),
            ..Default::default()
        };
        let (client, handle) = handle_with_state(config, ConnState::Streaming).await;
        let result = handle.stop(&ContainerId::new("abc123")).await;
        assert!(matches!(result, Err(MonitorError::Control { .. })));
        assert!(client.actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn switch_name_list_enables_specific_container() {
        let config = MonitorConfig {
            switch_enabled: EnableSetting::Names(vec!["web".to_owned()]),
            ..Default::default()
        };
        let (_client, handle) = handle_with_state(config, ConnState::Streaming).await;
        handle.stop(&ContainerId::new("abc123")).await.unwrap();
    }

    #[tokio::test]
    async fn restart_is_gated_by_button_setting() {
        // buttons default off
        let (client, handle) =
            handle_with_state(MonitorConfig::default(), ConnState::Streaming).await;
        let id = ContainerId::new("abc123");

        let result = handle.restart(&id).await;
        assert!(matches!(result, Err(MonitorError::Control { .. })));

        let config = MonitorConfig {
            button_enabled: EnableSetting::All(true),
            ..Default::default()
        };
        let (client2, handle2) = handle_with_state(config, ConnState::Streaming).await;
        handle2.restart(&id).await.unwrap();
        assert!(client.actions.lock().unwrap().is_empty());
        assert_eq!(
            client2.actions.lock().unwrap().clone(),
            vec![("restart".to_owned(), "abc123".to_owned())]
        );
    }

    #[tokio::test]
    async fn daemon_rejection_surfaces_as_control_error() {
        let (client, handle) =
            handle_with_state(MonitorConfig::default(), ConnState::Streaming).await;
        client
            .fail_actions
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let result = handle.pause(&ContainerId::new("abc123")).await;
        assert!(matches!(result, Err(MonitorError::Control { .. })));
    }
}
