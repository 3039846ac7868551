//! Tag table: which message type owns which wire tag.

use super::{Message, Received};
use crate::comm::{CommTag, Communicator, Envelope, Rank};
use crate::task_error::TaskError;
use hashbrown::HashMap;
use std::any::{Any, TypeId};
use std::fmt;

type DecodeFn = fn(&[u8]) -> Result<Box<dyn Any + Send>, TaskError>;

fn decode_boxed<M: Message>(bytes: &[u8]) -> Result<Box<dyn Any + Send>, TaskError> {
    Ok(Box::new(M::decode(bytes)?))
}

struct Entry {
    name: &'static str,
    type_id: TypeId,
    decode: DecodeFn,
}

/// Explicit registry of message types, populated once at startup.
///
/// Registration order does not affect tags, but every rank must register the
/// same set of types so that every inbound tag resolves everywhere.
#[derive(Default)]
pub struct MessageRegistry {
    entries: HashMap<CommTag, Entry>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the full protocol catalog.
    pub fn with_catalog() -> Result<Self, TaskError> {
        let mut reg = Self::new();
        super::catalog::register_all(&mut reg)?;
        Ok(reg)
    }

    /// Add `M` to the table and return its tag.
    ///
    /// Fails if `M` is already registered or if another type hashes to the
    /// same tag.
    pub fn register<M: Message>(&mut self) -> Result<CommTag, TaskError> {
        let tag = M::tag();
        if let Some(existing) = self.entries.get(&tag) {
            return Err(TaskError::DuplicateMessageType {
                name: M::NAME,
                existing: existing.name,
                tag,
            });
        }
        self.entries.insert(
            tag,
            Entry {
                name: M::NAME,
                type_id: TypeId::of::<M>(),
                decode: decode_boxed::<M>,
            },
        );
        log::debug!("registered message `{}` as tag {tag}", M::NAME);
        Ok(tag)
    }

    pub fn is_registered<M: Message>(&self) -> bool {
        self.entries
            .get(&M::tag())
            .is_some_and(|e| e.type_id == TypeId::of::<M>())
    }

    /// Name of the type registered under `tag`.
    pub fn name_of(&self, tag: CommTag) -> Result<&'static str, TaskError> {
        self.entries
            .get(&tag)
            .map(|e| e.name)
            .ok_or(TaskError::UnknownTag(tag))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered `(tag, name)` pairs in tag order.
    pub fn tags(&self) -> Vec<(CommTag, &'static str)> {
        use itertools::Itertools;
        self.entries
            .iter()
            .map(|(t, e)| (*t, e.name))
            .sorted()
            .collect()
    }

    fn require<M: Message>(&self) -> Result<CommTag, TaskError> {
        let tag = M::tag();
        match self.entries.get(&tag) {
            Some(e) if e.type_id == TypeId::of::<M>() => Ok(tag),
            _ => Err(TaskError::UnknownTag(tag)),
        }
    }

    /// Decode an envelope into whatever type its tag names, stamping the source.
    pub fn interpret(&self, env: Envelope) -> Result<Incoming, TaskError> {
        let entry = self
            .entries
            .get(&env.tag)
            .ok_or(TaskError::UnknownTag(env.tag))?;
        let body = (entry.decode)(&env.payload)?;
        Ok(Incoming {
            tag: env.tag,
            source: env.source,
            name: entry.name,
            body,
        })
    }

    /// Encode `msg` and send it to `dest` under its tag.
    pub fn send<M, C>(&self, comm: &C, msg: &M, dest: Rank) -> Result<(), TaskError>
    where
        M: Message,
        C: Communicator + ?Sized,
    {
        let tag = self.require::<M>()?;
        comm.send(dest, tag, &msg.encode()?)
    }

    /// Wait for the next `M`, from `source` if given, otherwise from anyone.
    pub fn receive<M, C>(&self, comm: &C, source: Option<Rank>) -> Result<Received<M>, TaskError>
    where
        M: Message,
        C: Communicator + ?Sized,
    {
        let tag = self.require::<M>()?;
        match source {
            Some(src) => {
                let bytes = comm.recv(src, tag)?;
                Ok(Received {
                    source: src,
                    body: M::decode(&bytes)?,
                })
            }
            None => {
                let env = comm.recv_tag(tag)?;
                Ok(Received {
                    source: env.source,
                    body: M::decode(&env.payload)?,
                })
            }
        }
    }

    /// Wait for the next message of any registered type.
    pub fn receive_any<C>(&self, comm: &C, source: Option<Rank>) -> Result<Incoming, TaskError>
    where
        C: Communicator + ?Sized,
    {
        self.interpret(comm.recv_any(source)?)
    }
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.tags()).finish()
    }
}

/// A message whose concrete type was identified from its tag.
pub struct Incoming {
    pub tag: CommTag,
    pub source: Rank,
    pub name: &'static str,
    body: Box<dyn Any + Send>,
}

impl Incoming {
    pub fn is<M: Message>(&self) -> bool {
        self.body.is::<M>()
    }

    /// Take the body as `M`, or hand `self` back untouched.
    pub fn downcast<M: Message>(self) -> Result<Received<M>, Incoming> {
        let Incoming {
            tag,
            source,
            name,
            body,
        } = self;
        match body.downcast::<M>() {
            Ok(body) => Ok(Received {
                source,
                body: *body,
            }),
            Err(body) => Err(Incoming {
                tag,
                source,
                name,
                body,
            }),
        }
    }

    /// Like [`Incoming::downcast`] but reports a protocol error on mismatch.
    pub fn expect<M: Message>(self) -> Result<Received<M>, TaskError> {
        self.downcast::<M>().map_err(|other| TaskError::TagMismatch {
            expected: M::NAME,
            actual: other.tag,
        })
    }
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("tag", &self.tag)
            .field("source", &self.source)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ThreadComm;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pong(Vec<f64>);
    crate::impl_message!(Ping, Pong);

    // a distinct type that claims Ping's name, and therefore its tag
    #[derive(Debug, Serialize, Deserialize)]
    struct Impostor;
    impl Message for Impostor {
        const NAME: &'static str = "Ping";
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = MessageRegistry::new();
        reg.register::<Ping>().unwrap();
        assert!(matches!(
            reg.register::<Ping>(),
            Err(TaskError::DuplicateMessageType { name: "Ping", .. })
        ));
        assert!(matches!(
            reg.register::<Impostor>(),
            Err(TaskError::DuplicateMessageType { existing: "Ping", .. })
        ));
        assert!(!reg.is_registered::<Impostor>());
    }

    #[test]
    fn unknown_tag_is_fatal() {
        let reg = MessageRegistry::new();
        let env = Envelope {
            tag: Ping::tag(),
            source: 1,
            payload: bytes::Bytes::new(),
        };
        assert_eq!(reg.interpret(env).unwrap_err(), TaskError::UnknownTag(Ping::tag()));
    }

    #[test]
    fn sending_unregistered_type_is_rejected() {
        let reg = MessageRegistry::new();
        let group = ThreadComm::group(2);
        assert!(matches!(
            reg.send(&group[0], &Ping { n: 1 }, 1),
            Err(TaskError::UnknownTag(_))
        ));
    }

    #[test]
    fn generic_receive_identifies_type() {
        let mut reg = MessageRegistry::new();
        reg.register::<Ping>().unwrap();
        reg.register::<Pong>().unwrap();
        let group = ThreadComm::group(2);

        reg.send(&group[1], &Pong(vec![1.5, -2.0]), 0).unwrap();
        reg.send(&group[1], &Ping { n: 3 }, 0).unwrap();

        let first = reg.receive_any(&group[0], None).unwrap();
        assert_eq!(first.name, "Pong");
        assert!(!first.is::<Ping>());
        let first = first.downcast::<Ping>().unwrap_err();
        let pong = first.expect::<Pong>().unwrap();
        assert_eq!(pong, Received { source: 1, body: Pong(vec![1.5, -2.0]) });

        let ping = reg.receive::<Ping, _>(&group[0], Some(1)).unwrap();
        assert_eq!(ping.body, Ping { n: 3 });
        assert_eq!(ping.source, 1);
    }

    #[test]
    fn typed_receive_from_any_source_stamps_sender() {
        let mut reg = MessageRegistry::new();
        reg.register::<Ping>().unwrap();
        let group = ThreadComm::group(3);
        reg.send(&group[2], &Ping { n: 9 }, 0).unwrap();
        let got = reg.receive::<Ping, _>(&group[0], None).unwrap();
        assert_eq!(got.source, 2);
        assert_eq!(got.body.n, 9);
    }
}
