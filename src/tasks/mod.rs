use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Starting,
    Processing,
    Converting,
    Completed,
    Error,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Error)
    }
}

/// The record relayed to the client for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Set when the merged download failed and a direct one succeeded.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl TaskStatus {
    pub fn new(state: TaskState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            filename: None,
            file_path: None,
            degraded: false,
        }
    }

    pub fn starting() -> Self {
        Self::new(TaskState::Starting, "Initializing...")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(TaskState::Error, message)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[derive(Debug)]
struct Entry {
    status: TaskStatus,
    updated_at: Instant,
}

/// In-memory task status store shared by download workers and relays.
///
/// A terminal record is final: neither [`update`](Self::update) nor
/// [`finish`](Self::finish) will change it again.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    entries: Mutex<HashMap<TaskId, Entry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: TaskId, status: TaskStatus) {
        self.entries.lock().insert(
            id,
            Entry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    /// Applies `f` to a live, non-terminal entry. Returns whether it ran.
    pub fn update<F>(&self, id: TaskId, f: F) -> bool
    where
        F: FnOnce(&mut TaskStatus),
    {
        let mut entries = self.entries.lock();
        match entries.get_mut(&id) {
            Some(entry) if !entry.status.is_terminal() => {
                f(&mut entry.status);
                entry.updated_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Replaces a non-terminal entry with `status`. Returns whether it was written.
    pub fn finish(&self, id: TaskId, status: TaskStatus) -> bool {
        self.update(id, |current| *current = status)
    }

    pub fn get(&self, id: TaskId) -> Option<TaskStatus> {
        self.entries.lock().get(&id).map(|e| e.status.clone())
    }

    /// Removes the entry if present; removing a missing id is a no-op.
    pub fn remove(&self, id: TaskId) -> Option<TaskStatus> {
        self.entries.lock().remove(&id).map(|e| e.status)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops terminal entries nobody collected within `ttl`.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|id, entry| {
            let orphaned = entry.status.is_terminal() && entry.updated_at.elapsed() >= ttl;
            if orphaned {
                debug!("Reclaiming orphaned task {}", id);
            }
            !orphaned
        });
        before - entries.len()
    }
}

/// Periodically reclaims terminal entries whose relay went away.
pub fn spawn_sweeper(
    registry: Arc<TaskRegistry>,
    every: Duration,
    ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = registry.sweep(ttl);
            if removed > 0 {
                info!(
                    "Reclaimed {} orphaned task(s), {} still tracked",
                    removed,
                    registry.len()
                );
            }
        }
    })
}
