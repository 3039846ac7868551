//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* tagged with a [`CommTag`]. All calls
//! block: `send` returns once the bytes are handed to the backend, `recv`
//! and `recv_any` return once a matching message has arrived. Messages
//! between one `(source, destination, tag)` triple are delivered in send
//! order; nothing is promised across tags or sources.

use crate::task_error::TaskError;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identity of a process within the group. Rank 0 is the coordinator.
pub type Rank = usize;

/// The coordinator rank, by convention.
pub const COORDINATOR: Rank = 0;

/// Tags are masked to 28 bits so they fit every backend's tag range.
pub const TAG_MASK: u32 = 0x0FFF_FFFF;

/// Stable numeric identifier of a message type on the wire.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct CommTag(u32);

impl CommTag {
    /// Wrap a raw tag, masking it to the valid range.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw & TAG_MASK)
    }

    /// Derive the tag of a message type from its name.
    ///
    /// Uses blake3 so every process (and every machine) computes the same
    /// value, which a per-process salted hasher would not.
    pub fn of_name(name: &str) -> Self {
        let digest = blake3::hash(name.as_bytes());
        let mut word = [0u8; 4];
        word.copy_from_slice(&digest.as_bytes()[..4]);
        Self::new(u32::from_le_bytes(word))
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Tag offset by `by`, wrapping inside the 28-bit range.
    #[inline]
    pub const fn offset(self, by: u32) -> Self {
        Self::new(self.0.wrapping_add(by))
    }
}

impl fmt::Debug for CommTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommTag({:#09x})", self.0)
    }
}

impl fmt::Display for CommTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#09x}", self.0)
    }
}

/// A `(tag, source, payload)` triple: the only thing that crosses the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub tag: CommTag,
    pub source: Rank,
    pub payload: Bytes,
}

/// Blocking point-to-point interface between ranks of a fixed-size group.
pub trait Communicator {
    /// This process's rank.
    fn rank(&self) -> Rank;
    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Deliver `buf` to `dest` under `tag`.
    fn send(&self, dest: Rank, tag: CommTag, buf: &[u8]) -> Result<(), TaskError>;
    /// Wait for the next message from `source` carrying `tag`.
    fn recv(&self, source: Rank, tag: CommTag) -> Result<Bytes, TaskError>;
    /// Wait for the next message carrying `tag`, from any source.
    fn recv_tag(&self, tag: CommTag) -> Result<Envelope, TaskError>;
    /// Wait for the next message of any tag, optionally restricted to `source`.
    fn recv_any(&self, source: Option<Rank>) -> Result<Envelope, TaskError>;

    /// Fail with [`TaskError::RankOutOfRange`] unless `rank` is in the group.
    fn check_rank(&self, rank: Rank) -> Result<(), TaskError> {
        if rank < self.size() {
            Ok(())
        } else {
            Err(TaskError::RankOutOfRange {
                rank,
                size: self.size(),
            })
        }
    }

    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }
}

impl<C: Communicator + ?Sized> Communicator for Box<C> {
    fn rank(&self) -> Rank {
        (**self).rank()
    }
    fn size(&self) -> usize {
        (**self).size()
    }
    fn send(&self, dest: Rank, tag: CommTag, buf: &[u8]) -> Result<(), TaskError> {
        (**self).send(dest, tag, buf)
    }
    fn recv(&self, source: Rank, tag: CommTag) -> Result<Bytes, TaskError> {
        (**self).recv(source, tag)
    }
    fn recv_tag(&self, tag: CommTag) -> Result<Envelope, TaskError> {
        (**self).recv_tag(tag)
    }
    fn recv_any(&self, source: Option<Rank>) -> Result<Envelope, TaskError> {
        (**self).recv_any(source)
    }
}

// --- ThreadComm: in-process workers ---

#[derive(Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
}

struct Hub {
    boxes: Vec<Mailbox>,
    alive: Vec<AtomicBool>,
}

impl Hub {
    fn is_alive(&self, rank: Rank) -> bool {
        self.alive[rank].load(Ordering::Acquire)
    }

    fn any_peer_alive(&self, me: Rank) -> bool {
        (0..self.alive.len()).any(|r| r != me && self.is_alive(r))
    }
}

/// One rank's handle onto an in-process group.
///
/// Each rank owns exactly one handle; dropping it marks the rank as gone so
/// peers blocked on it fail with [`TaskError::Disconnected`] instead of hanging.
pub struct ThreadComm {
    rank: Rank,
    hub: Arc<Hub>,
}

impl ThreadComm {
    /// Build a group of `size` connected handles, indexed by rank.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        let hub = Arc::new(Hub {
            boxes: (0..size).map(|_| Mailbox::default()).collect(),
            alive: (0..size).map(|_| AtomicBool::new(true)).collect(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                hub: Arc::clone(&hub),
            })
            .collect()
    }

    fn take_matching<F>(&self, matches: F, gone: impl Fn(&Hub) -> Option<Rank>) -> Result<Envelope, TaskError>
    where
        F: Fn(&Envelope) -> bool,
    {
        let mailbox = &self.hub.boxes[self.rank];
        let mut queue = mailbox.queue.lock();
        loop {
            if let Some(pos) = queue.iter().position(&matches) {
                if let Some(env) = queue.remove(pos) {
                    return Ok(env);
                }
            }
            if let Some(peer) = gone(&self.hub) {
                return Err(TaskError::Disconnected(peer));
            }
            mailbox.arrived.wait(&mut queue);
        }
    }
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.hub.boxes.len())
            .finish()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.hub.boxes.len()
    }

    fn send(&self, dest: Rank, tag: CommTag, buf: &[u8]) -> Result<(), TaskError> {
        self.check_rank(dest)?;
        let mailbox = &self.hub.boxes[dest];
        mailbox.queue.lock().push_back(Envelope {
            tag,
            source: self.rank,
            payload: Bytes::copy_from_slice(buf),
        });
        mailbox.arrived.notify_all();
        Ok(())
    }

    fn recv(&self, source: Rank, tag: CommTag) -> Result<Bytes, TaskError> {
        self.check_rank(source)?;
        let me = self.rank;
        self.take_matching(
            |e| e.source == source && e.tag == tag,
            |hub| (source != me && !hub.is_alive(source)).then_some(source),
        )
        .map(|env| env.payload)
    }

    fn recv_tag(&self, tag: CommTag) -> Result<Envelope, TaskError> {
        let me = self.rank;
        self.take_matching(
            |e| e.tag == tag,
            |hub| (!hub.any_peer_alive(me) && hub.boxes.len() > 1).then_some(me),
        )
    }

    fn recv_any(&self, source: Option<Rank>) -> Result<Envelope, TaskError> {
        let me = self.rank;
        match source {
            Some(src) => {
                self.check_rank(src)?;
                self.take_matching(
                    |e| e.source == src,
                    |hub| (src != me && !hub.is_alive(src)).then_some(src),
                )
            }
            None => self.take_matching(
                |_| true,
                |hub| (!hub.any_peer_alive(me) && hub.boxes.len() > 1).then_some(me),
            ),
        }
    }
}

impl Drop for ThreadComm {
    fn drop(&mut self) {
        self.hub.alive[self.rank].store(false, Ordering::Release);
        for mailbox in &self.hub.boxes {
            // take the lock so a waiter between its check and its wait sees the flag
            let _guard = mailbox.queue.lock();
            mailbox.arrived.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threads_roundtrip_two_ranks() {
        let mut group = ThreadComm::group(2);
        let comm1 = group.pop().unwrap();
        let comm0 = group.pop().unwrap();
        let tag = CommTag::new(7);

        let h = std::thread::spawn(move || comm1.recv(0, tag).unwrap());
        comm0.send(1, tag, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&h.join().unwrap()[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn recv_skips_other_tags_but_keeps_them() {
        let group = ThreadComm::group(2);
        let (a, b) = (CommTag::new(1), CommTag::new(2));
        group[0].send(1, a, b"first").unwrap();
        group[0].send(1, b, b"second").unwrap();
        assert_eq!(&group[1].recv(0, b).unwrap()[..], b"second");
        let env = group[1].recv_any(None).unwrap();
        assert_eq!((env.tag, env.source, &env.payload[..]), (a, 0, &b"first"[..]));
    }

    #[test]
    fn per_tag_order_is_preserved() {
        let group = ThreadComm::group(2);
        let tag = CommTag::new(3);
        for i in 0u8..10 {
            group[1].send(0, tag, &[i]).unwrap();
        }
        for i in 0u8..10 {
            assert_eq!(group[0].recv(1, tag).unwrap()[0], i);
        }
    }

    #[test]
    fn out_of_range_rank_is_an_error() {
        let group = ThreadComm::group(2);
        assert_eq!(
            group[0].send(5, CommTag::new(1), b"x"),
            Err(TaskError::RankOutOfRange { rank: 5, size: 2 })
        );
    }

    #[test]
    fn dropped_peer_unblocks_receiver() {
        let mut group = ThreadComm::group(2);
        let comm1 = group.pop().unwrap();
        let comm0 = group.pop().unwrap();
        let h = std::thread::spawn(move || comm0.recv(1, CommTag::new(9)));
        drop(comm1);
        assert_eq!(h.join().unwrap(), Err(TaskError::Disconnected(1)));
    }

    #[test]
    fn tag_is_stable_and_masked() {
        let t = CommTag::of_name("RequestLoad");
        assert_eq!(t, CommTag::of_name("RequestLoad"));
        assert_eq!(t.as_u32() & !TAG_MASK, 0);
        assert_ne!(t, CommTag::of_name("ConfirmLoad"));
        assert_eq!(CommTag::new(TAG_MASK).offset(1).as_u32(), 0);
    }
}
