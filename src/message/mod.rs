//! Typed messages on top of the transport.
//!
//! A message type is any serde-serialisable struct with a stable `NAME`; its
//! wire tag is derived from that name. Bodies are encoded with bincode.
//! Types must be registered in a [`MessageRegistry`] before they can be sent,
//! received or dispatched, and every rank registers the same catalog so all
//! ranks share one tag table.

pub mod catalog;
pub mod dispatch;
pub mod outbox;
pub mod registry;

pub use dispatch::{Dispatcher, HandlerId};
pub use outbox::Outbox;
pub use registry::{Incoming, MessageRegistry};

use crate::comm::{CommTag, Rank};
use crate::task_error::TaskError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A message type that can cross the transport.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Stable type name; the wire tag is derived from it.
    const NAME: &'static str;

    #[inline]
    fn tag() -> CommTag {
        CommTag::of_name(Self::NAME)
    }

    fn encode(&self) -> Result<Vec<u8>, TaskError> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, TaskError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A decoded message stamped with the rank that sent it.
#[derive(Clone, Debug, PartialEq)]
pub struct Received<M> {
    pub source: Rank,
    pub body: M,
}

/// Implement [`Message`] for a type under its own identifier as `NAME`.
#[macro_export]
macro_rules! impl_message {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl $crate::message::Message for $ty {
                const NAME: &'static str = stringify!($ty);
            }
        )+
    };
}
