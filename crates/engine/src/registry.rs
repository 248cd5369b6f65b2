use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// `(account id, signal id)`.
pub type TaskKey = (Uuid, Uuid);

/// Proof of registration held by a running monitor.
///
/// The generation distinguishes a monitor from a later one started under the
/// same key after the first was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTicket {
    pub key: TaskKey,
    generation: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    live: HashMap<TaskKey, u64>,
    next_generation: u64,
}

/// The table of live Signal Monitors. At most one entry per key.
///
/// Removing an entry is how a monitor is cancelled; the monitor notices before
/// its next evaluation. The lock is never held across an await point.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `key`, or returns `None` when a monitor is already live for it.
    pub fn try_register(&self, key: TaskKey) -> Option<TaskTicket> {
        let mut state = self.state();
        if state.live.contains_key(&key) {
            return None;
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        state.live.insert(key, generation);
        Some(TaskTicket { key, generation })
    }

    pub fn is_live(&self, ticket: &TaskTicket) -> bool {
        self.state().live.get(&ticket.key) == Some(&ticket.generation)
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.state().live.contains_key(key)
    }

    /// Returns whether a monitor was registered under `key`.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        self.state().live.remove(key).is_some()
    }

    /// Releases the key, unless it has since been taken by a newer monitor.
    pub fn finish(&self, ticket: &TaskTicket) {
        let mut state = self.state();
        if state.live.get(&ticket.key) == Some(&ticket.generation) {
            state.live.remove(&ticket.key);
        }
    }

    /// Signal ids with a live monitor for `account_id`.
    pub fn signals_for_account(&self, account_id: Uuid) -> Vec<Uuid> {
        self.state()
            .live
            .keys()
            .filter(|(account, _)| *account == account_id)
            .map(|(_, signal)| *signal)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
