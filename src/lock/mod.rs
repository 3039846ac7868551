//! Named distributed locks.
//!
//! The coordinator owns every lock (see [`server::LockServer`]). A worker asks
//! for a lock with `LockAcquire` and blocks until `LockGranted` arrives;
//! waiters are granted in arrival order. Locks are re-entrant per worker: a
//! nested acquire of a name the worker already holds only bumps a local
//! depth counter, and only the outermost release is sent to the coordinator.

pub mod server;

pub use server::LockServer;

use crate::comm::COORDINATOR;
use crate::message::catalog::{LockAcquire, LockGranted, LockRelease};
use crate::task_error::TaskError;
use crate::worker::Worker;

/// Holds a named lock until dropped or explicitly released.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'w> {
    worker: &'w Worker,
    name: String,
    held: bool,
}

impl Worker {
    /// Block until this worker holds lock `name`.
    pub fn lock(&self, name: &str) -> Result<LockGuard<'_>, TaskError> {
        let nested = {
            let mut held = self.held_locks.borrow_mut();
            match held.get_mut(name) {
                Some(depth) => {
                    *depth += 1;
                    true
                }
                None => false,
            }
        };
        if !nested {
            self.send(
                &LockAcquire {
                    name: name.to_string(),
                },
                COORDINATOR,
            )?;
            let granted = self.receive::<LockGranted>(Some(COORDINATOR))?;
            if granted.body.name != name {
                return Err(TaskError::UnexpectedReply(format!(
                    "asked for lock `{name}`, was granted `{}`",
                    granted.body.name
                )));
            }
            log::debug!("[rank {}] acquired lock `{name}`", self.rank());
            self.held_locks.borrow_mut().insert(name.to_string(), 1);
        }
        Ok(LockGuard {
            worker: self,
            name: name.to_string(),
            held: true,
        })
    }

    /// Whether this worker currently holds `name`.
    pub fn holds_lock(&self, name: &str) -> bool {
        self.held_locks.borrow().contains_key(name)
    }

    fn unlock(&self, name: &str) -> Result<(), TaskError> {
        let outermost = {
            let mut held = self.held_locks.borrow_mut();
            let Some(depth) = held.get_mut(name) else {
                return Err(TaskError::LockNotHeld {
                    name: name.to_string(),
                    rank: self.rank(),
                });
            };
            *depth -= 1;
            if *depth == 0 {
                held.remove(name);
                true
            } else {
                false
            }
        };
        if outermost {
            log::debug!("[rank {}] releasing lock `{name}`", self.rank());
            self.send(
                &LockRelease {
                    name: name.to_string(),
                },
                COORDINATOR,
            )?;
        }
        Ok(())
    }
}

impl LockGuard<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release now, reporting a failure to reach the coordinator.
    pub fn release(mut self) -> Result<(), TaskError> {
        self.held = false;
        self.worker.unlock(&self.name)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.worker.unlock(&self.name) {
                log::error!("[rank {}] failed to release lock `{}`: {e}", self.worker.rank(), self.name);
            }
        }
    }
}
