//! A worker rank's view of the group.
//!
//! The [`Worker`] bundles the rank's communicator, the shared tag table, the
//! deployment's job-distribution policy and the derived-field table. Locks,
//! job iteration and remote datasets are all driven through it; see
//! [`crate::lock`], [`crate::jobs`] and [`crate::dataset::client`].

use crate::comm::{COORDINATOR, Communicator, Rank};
use crate::config::Distribution;
use crate::dataset::Derivations;
use crate::message::catalog::Finished;
use crate::message::{Incoming, Message, MessageRegistry, Received};
use crate::task_error::TaskError;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub struct Worker {
    comm: Box<dyn Communicator>,
    registry: Arc<MessageRegistry>,
    distribution: Distribution,
    derivations: Arc<Derivations>,
    /// Number of on-demand job loops started so far.
    pub(crate) iteration: Cell<u64>,
    /// Lock name -> re-entrancy depth.
    pub(crate) held_locks: RefCell<HashMap<String, usize>>,
}

impl Worker {
    pub fn new(
        comm: Box<dyn Communicator>,
        registry: Arc<MessageRegistry>,
        distribution: Distribution,
        derivations: Arc<Derivations>,
    ) -> Result<Self, TaskError> {
        if comm.size() < 2 {
            return Err(TaskError::Config(format!(
                "a group needs a coordinator and at least one worker, got {} rank(s)",
                comm.size()
            )));
        }
        if comm.is_coordinator() {
            return Err(TaskError::Config(
                "rank 0 is the coordinator and cannot act as a worker".into(),
            ));
        }
        Ok(Self {
            comm,
            registry,
            distribution,
            derivations,
            iteration: Cell::new(0),
            held_locks: RefCell::new(HashMap::new()),
        })
    }

    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Number of worker ranks (everyone but the coordinator).
    pub fn n_workers(&self) -> usize {
        self.size() - 1
    }

    /// Position of this rank among the workers, from 0.
    pub fn worker_index(&self) -> usize {
        self.rank() - 1
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    pub fn derivations(&self) -> &Arc<Derivations> {
        &self.derivations
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    pub fn send<M: Message>(&self, msg: &M, dest: Rank) -> Result<(), TaskError> {
        self.registry.send(self.comm.as_ref(), msg, dest)
    }

    pub fn receive<M: Message>(&self, source: Option<Rank>) -> Result<Received<M>, TaskError> {
        self.registry.receive(self.comm.as_ref(), source)
    }

    pub fn receive_any(&self, source: Option<Rank>) -> Result<Incoming, TaskError> {
        self.registry.receive_any(self.comm.as_ref(), source)
    }

    /// Tell the coordinator this worker is done.
    pub fn finish(&self) -> Result<(), TaskError> {
        let held: Vec<String> = self.held_locks.borrow().keys().cloned().collect();
        if !held.is_empty() {
            log::warn!("[rank {}] finishing while holding locks {held:?}", self.rank());
        }
        self.send(&Finished, COORDINATOR)
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .field("distribution", &self.distribution)
            .finish_non_exhaustive()
    }
}
