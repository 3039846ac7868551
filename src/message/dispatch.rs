//! Per-type handler dispatch.
//!
//! A [`Dispatcher`] maps message tags to at most one handler each. Handlers
//! receive the dispatcher's state `S` mutably together with the decoded,
//! source-stamped message. The mapping lives in the dispatcher, not in the
//! message types, so two dispatchers never share handlers.

use super::{Message, MessageRegistry, Received};
use crate::comm::{CommTag, Envelope};
use crate::task_error::TaskError;
use hashbrown::HashMap;
use std::sync::Arc;

/// Identity of a registered handler, needed to unregister it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type BoxedHandler<S> = Box<dyn FnMut(&mut S, super::Incoming) -> Result<(), TaskError>>;

struct Slot<S> {
    id: HandlerId,
    name: &'static str,
    call: BoxedHandler<S>,
}

pub struct Dispatcher<S> {
    registry: Arc<MessageRegistry>,
    slots: HashMap<CommTag, Slot<S>>,
    next_id: u64,
}

impl<S> Dispatcher<S> {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self {
            registry,
            slots: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    /// Install the handler for `M`. Fails if one is already installed or if
    /// `M` is not in the registry.
    pub fn register_handler<M, F>(&mut self, mut handler: F) -> Result<HandlerId, TaskError>
    where
        M: Message,
        F: FnMut(&mut S, Received<M>) -> Result<(), TaskError> + 'static,
    {
        if !self.registry.is_registered::<M>() {
            return Err(TaskError::UnknownTag(M::tag()));
        }
        if self.slots.contains_key(&M::tag()) {
            return Err(TaskError::HandlerAlreadyRegistered(M::NAME));
        }
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.slots.insert(
            M::tag(),
            Slot {
                id,
                name: M::NAME,
                call: Box::new(move |state, incoming| handler(state, incoming.expect::<M>()?)),
            },
        );
        Ok(id)
    }

    /// Remove the handler for `M`; `id` must be the one currently installed.
    pub fn unregister_handler<M: Message>(&mut self, id: HandlerId) -> Result<(), TaskError> {
        match self.slots.get(&M::tag()) {
            Some(slot) if slot.id == id => {
                self.slots.remove(&M::tag());
                Ok(())
            }
            _ => Err(TaskError::HandlerMismatch(M::NAME)),
        }
    }

    pub fn has_handler<M: Message>(&self) -> bool {
        self.slots.contains_key(&M::tag())
    }

    /// Decode `env` and run the handler registered for its type.
    pub fn dispatch(&mut self, state: &mut S, env: Envelope) -> Result<(), TaskError> {
        let incoming = self.registry.interpret(env)?;
        let slot = self
            .slots
            .get_mut(&incoming.tag)
            .ok_or(TaskError::NoHandler(incoming.name))?;
        log::trace!("dispatching `{}` from rank {}", slot.name, incoming.source);
        (slot.call)(state, incoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Add(i64);
    #[derive(Debug, Serialize, Deserialize)]
    struct Reset;
    crate::impl_message!(Add, Reset);

    fn registry() -> Arc<MessageRegistry> {
        let mut reg = MessageRegistry::new();
        reg.register::<Add>().unwrap();
        reg.register::<Reset>().unwrap();
        Arc::new(reg)
    }

    fn envelope<M: Message>(msg: &M, source: usize) -> Envelope {
        Envelope {
            tag: M::tag(),
            source,
            payload: Bytes::from(msg.encode().unwrap()),
        }
    }

    #[test]
    fn dispatch_runs_registered_handler_with_source() {
        let mut d = Dispatcher::<Vec<(usize, i64)>>::new(registry());
        d.register_handler::<Add, _>(|log, msg| {
            log.push((msg.source, msg.body.0));
            Ok(())
        })
        .unwrap();
        let mut log = Vec::new();
        d.dispatch(&mut log, envelope(&Add(5), 2)).unwrap();
        d.dispatch(&mut log, envelope(&Add(-1), 1)).unwrap();
        assert_eq!(log, vec![(2, 5), (1, -1)]);
    }

    #[test]
    fn missing_handler_fails_loudly() {
        let mut d = Dispatcher::<()>::new(registry());
        assert_eq!(
            d.dispatch(&mut (), envelope(&Reset, 1)),
            Err(TaskError::NoHandler("Reset"))
        );
    }

    #[test]
    fn second_handler_and_wrong_unregister_are_errors() {
        let mut d = Dispatcher::<()>::new(registry());
        let first = d.register_handler::<Reset, _>(|_, _| Ok(())).unwrap();
        assert_eq!(
            d.register_handler::<Reset, _>(|_, _| Ok(())),
            Err(TaskError::HandlerAlreadyRegistered("Reset"))
        );
        let other = d.register_handler::<Add, _>(|_, _| Ok(())).unwrap();
        assert_eq!(
            d.unregister_handler::<Reset>(other),
            Err(TaskError::HandlerMismatch("Reset"))
        );
        d.unregister_handler::<Reset>(first).unwrap();
        assert!(!d.has_handler::<Reset>());
        // a fresh handler may now take the slot
        d.register_handler::<Reset, _>(|_, _| Ok(())).unwrap();
    }
}
