//! Coordinator-side lock table.

use crate::comm::Rank;
use crate::message::Outbox;
use crate::message::catalog::LockGranted;
use crate::task_error::TaskError;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
struct LockState {
    holder: Option<Rank>,
    waiting: VecDeque<Rank>,
}

/// Holder and FIFO wait queue of every named lock.
#[derive(Debug, Default)]
pub struct LockServer {
    locks: HashMap<String, LockState>,
}

impl LockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `rank` asks for `name`: granted at once if free, queued otherwise.
    pub fn acquire(&mut self, rank: Rank, name: &str, out: &mut Outbox) -> Result<(), TaskError> {
        let state = self.locks.entry(name.to_string()).or_default();
        if state.holder == Some(rank) || state.waiting.contains(&rank) {
            return Err(TaskError::LockAlreadyHeld {
                name: name.to_string(),
                rank,
            });
        }
        match state.holder {
            None => {
                state.holder = Some(rank);
                log::debug!("lock `{name}` granted to rank {rank}");
                out.post(
                    rank,
                    &LockGranted {
                        name: name.to_string(),
                    },
                )
            }
            Some(holder) => {
                state.waiting.push_back(rank);
                log::debug!(
                    "rank {rank} waits for lock `{name}` held by rank {holder} ({} queued)",
                    state.waiting.len()
                );
                Ok(())
            }
        }
    }

    /// `rank` gives `name` up; the next waiter, if any, is granted it.
    pub fn release(&mut self, rank: Rank, name: &str, out: &mut Outbox) -> Result<(), TaskError> {
        let not_held = || TaskError::LockNotHeld {
            name: name.to_string(),
            rank,
        };
        let state = self.locks.get_mut(name).ok_or_else(not_held)?;
        if state.holder != Some(rank) {
            return Err(not_held());
        }
        match state.waiting.pop_front() {
            Some(next) => {
                state.holder = Some(next);
                log::debug!("lock `{name}` passed from rank {rank} to rank {next}");
                out.post(
                    next,
                    &LockGranted {
                        name: name.to_string(),
                    },
                )
            }
            None => {
                self.locks.remove(name);
                log::debug!("lock `{name}` released by rank {rank}");
                Ok(())
            }
        }
    }

    /// Forget `rank` entirely: it leaves every wait queue and each lock it
    /// holds passes on. Returns the names it held, sorted.
    pub fn release_all(&mut self, rank: Rank, out: &mut Outbox) -> Result<Vec<String>, TaskError> {
        for state in self.locks.values_mut() {
            state.waiting.retain(|&r| r != rank);
        }
        let mut held: Vec<String> = self
            .locks
            .iter()
            .filter(|(_, s)| s.holder == Some(rank))
            .map(|(n, _)| n.clone())
            .collect();
        held.sort();
        for name in &held {
            self.release(rank, name, out)?;
        }
        Ok(held)
    }

    pub fn holder(&self, name: &str) -> Option<Rank> {
        self.locks.get(name).and_then(|s| s.holder)
    }

    /// Ranks queued for `name`, in grant order.
    pub fn waiting(&self, name: &str) -> Vec<Rank> {
        self.locks
            .get(name)
            .map(|s| s.waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Names of locks currently held, sorted.
    pub fn held(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .locks
            .iter()
            .filter(|(_, s)| s.holder.is_some())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }
}
