//! Lifecycle event translation.
//!
//! Consumes the daemon's container event stream and turns each raw
//! action into a registry mutation. Lifecycle actions that change
//! identity (`create`, `start`, `rename`, ...) trigger a fresh inspect
//! so the registry picks up the full new state; terminal actions map
//! directly to a state without a round trip.
//!
//! The consumer runs until the stream ends or errors, then returns so
//! the connection manager can reconnect and resync.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use dockwatch_core::types::{ContainerId, ContainerState, HealthState};

use crate::config::MonitorConfig;
use crate::docker::{DaemonEvent, DockerClient};
use crate::error::MonitorError;
use crate::registry::Registry;

/// Registry mutation derived from one raw daemon action.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamAction {
    /// Re-inspect the container and upsert the fresh info.
    Inspect,
    /// Set the container state directly.
    SetState(ContainerState),
    /// Set the health state directly.
    SetHealth(HealthState),
    /// Drop the container from the registry.
    Remove,
    /// Not relevant to tracked state.
    Ignore,
}

/// Maps a raw daemon action string to a registry mutation.
///
/// `kill` is ignored: the daemon follows it with `die`, which carries
/// the terminal transition.
pub fn classify(action: &str) -> StreamAction {
    if let Some(status) = action.strip_prefix("health_status:") {
        return StreamAction::SetHealth(HealthState::parse(status.trim()));
    }
    match action {
        "create" | "start" | "restart" | "rename" | "update" => StreamAction::Inspect,
        "pause" => StreamAction::SetState(ContainerState::Paused),
        "unpause" => StreamAction::SetState(ContainerState::Running),
        "die" | "stop" | "oom" => StreamAction::SetState(ContainerState::Exited),
        "destroy" => StreamAction::Remove,
        _ => StreamAction::Ignore,
    }
}

/// Consumes one event stream until it terminates or `cancel` fires.
///
/// Returns `Ok(())` on cancellation; a terminated stream returns
/// `MonitorError::StreamTerminated` so the caller can reconnect.
pub async fn run_event_consumer<C: DockerClient>(
    client: Arc<C>,
    registry: Registry,
    config: MonitorConfig,
    cancel: CancellationToken,
) -> Result<(), MonitorError> {
    let mut stream = client.events().await?;
    eprintln!("DBG: stream acquired");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(host = %config.name, "event consumer cancelled");
                return Ok(());
            }
            item = stream.next() => {
                eprintln!("DBG: stream item: {:?}", item.is_some());
                match item {
                    Some(Ok(event)) => {
                        if let Err(e) = apply_event(&client, &registry, &config, &event).await {
                            tracing::warn!(
                                host = %config.name,
                                container = %event.container_id,
                                action = %event.action,
                                error = %e,
                                "failed to apply lifecycle event"
                            );
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(MonitorError::StreamTerminated(
                            "event stream ended".to_owned(),
                        ));
                    }
                }
            }
        }
    }
}

/// Applies one lifecycle event to the registry.
async fn apply_event<C: DockerClient>(
    client: &Arc<C>,
    registry: &Registry,
    config: &MonitorConfig,
    event: &DaemonEvent,
) -> Result<(), MonitorError> {
    if event.container_id.is_empty() {
        return Ok(());
    }

    // The actor name attribute decides monitoring scope; events for
    // containers outside it are skipped entirely.
    if let Some(name) = event.attributes.get("name")
        && !config.is_monitored(name)
    {
        return Ok(());
    }

    let id = ContainerId::new(event.container_id.clone());

    match classify(&event.action) {
        StreamAction::Inspect => {
            let info = client.inspect_container(id.as_str()).await?;
            registry.upsert_info(info).await;
        }
        StreamAction::SetState(state) => {
            match registry.get(&id).await {
                Some(record) => {
                    let mut info = record.info;
                    info.state = state;
                    registry.upsert_info(info).await;
                }
                // terminal event for a container we never tracked
                None => tracing::debug!(
                    container = %id,
                    action = %event.action,
                    "state event for untracked container"
                ),
            }
        }
        StreamAction::SetHealth(health) => {
            if registry.set_health(&id, health).await.is_err() {
                tracing::debug!(container = %id, "health event for untracked container");
            }
        }
        StreamAction::Remove => {
            registry.remove(&id).await;
        }
        StreamAction::Ignore => {}
    }

    Ok(())
}
