//! Replies queued by handlers, flushed by the service loop.
//!
//! Handlers stay free of any transport: they post typed replies here and the
//! loop that owns the communicator sends them after the handler returns.

use super::{Message, MessageRegistry};
use crate::comm::{CommTag, Communicator, Rank};
use crate::task_error::TaskError;
use std::sync::Arc;

pub struct Outbox {
    registry: Arc<MessageRegistry>,
    pending: Vec<(Rank, CommTag, &'static str, Vec<u8>)>,
}

impl Outbox {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self {
            registry,
            pending: Vec::new(),
        }
    }

    /// Queue `msg` for `dest`. `M` must be registered.
    pub fn post<M: Message>(&mut self, dest: Rank, msg: &M) -> Result<(), TaskError> {
        if !self.registry.is_registered::<M>() {
            return Err(TaskError::UnknownTag(M::tag()));
        }
        self.pending.push((dest, M::tag(), M::NAME, msg.encode()?));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Names and destinations of the queued replies, oldest first.
    pub fn peek(&self) -> Vec<(Rank, &'static str)> {
        self.pending.iter().map(|(r, _, n, _)| (*r, *n)).collect()
    }

    /// Decode the oldest queued reply as `M` and drop it.
    pub fn pop_front<M: Message>(&mut self) -> Result<Option<(Rank, M)>, TaskError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let (dest, tag, _, bytes) = self.pending.remove(0);
        if tag != M::tag() {
            return Err(TaskError::TagMismatch {
                expected: M::NAME,
                actual: tag,
            });
        }
        Ok(Some((dest, M::decode(&bytes)?)))
    }

    /// Send everything queued, in order.
    pub fn flush<C: Communicator + ?Sized>(&mut self, comm: &C) -> Result<(), TaskError> {
        for (dest, tag, name, bytes) in self.pending.drain(..) {
            log::trace!("[rank {}] -> rank {dest}: `{name}`", comm.rank());
            comm.send(dest, tag, &bytes)?;
        }
        Ok(())
    }
}
