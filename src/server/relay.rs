use super::protocol::ServerMessage;
use crate::tasks::{TaskId, TaskRegistry};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// A terminal record was sent and the entry reclaimed.
    Finished,
    /// The task was not (or no longer) registered.
    Missing,
    /// The client went away; the entry is left for the sweeper.
    Disconnected,
}

/// Polls the registry every `every` and forwards changes for `task_id` to `outbound`.
///
/// Intermediate records may be coalesced when the worker outpaces the poll,
/// but a terminal record is always sent before the relay stops.
pub async fn relay(
    registry: &TaskRegistry,
    task_id: TaskId,
    outbound: &mpsc::Sender<ServerMessage>,
    every: Duration,
) -> RelayOutcome {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_sent = None;

    loop {
        ticker.tick().await;

        let Some(status) = registry.get(task_id) else {
            debug!("Task {} is not registered, relay stopping", task_id);
            return RelayOutcome::Missing;
        };

        if last_sent.as_ref() == Some(&status) {
            continue;
        }

        let terminal = status.is_terminal();
        if outbound
            .send(ServerMessage::Progress(status.clone()))
            .await
            .is_err()
        {
            debug!("Client for task {} disconnected", task_id);
            return RelayOutcome::Disconnected;
        }

        if terminal {
            registry.remove(task_id);
            return RelayOutcome::Finished;
        }
        last_sent = Some(status);
    }
}
