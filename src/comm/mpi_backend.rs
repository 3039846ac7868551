//! MPI backend (feature = "mpi-support"): one OS process per rank.
//!
//! Tags are passed straight through as MPI tags; they are at most 28 bits
//! wide, which every MPI implementation we run on accepts.

use super::communicator::{CommTag, Communicator, Envelope, Rank};
use crate::task_error::TaskError;
use bytes::Bytes;
use mpi::environment::Universe;
use mpi::point_to_point::Status;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

pub struct MpiComm {
    // keeps MPI initialised for the lifetime of the communicator
    _universe: Universe,
    world: SimpleCommunicator,
    rank: Rank,
    size: usize,
}

impl MpiComm {
    /// Initialise MPI and wrap `MPI_COMM_WORLD`.
    pub fn new() -> Result<Self, TaskError> {
        let universe =
            mpi::initialize().ok_or_else(|| TaskError::Comm("MPI already initialised".into()))?;
        let world = universe.world();
        let rank = world.rank() as Rank;
        let size = world.size() as usize;
        Ok(Self {
            _universe: universe,
            world,
            rank,
            size,
        })
    }

    fn envelope(buf: Vec<u8>, status: Status) -> Envelope {
        Envelope {
            tag: CommTag::new(status.tag() as u32),
            source: status.source_rank() as Rank,
            payload: Bytes::from(buf),
        }
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: Rank, tag: CommTag, buf: &[u8]) -> Result<(), TaskError> {
        self.check_rank(dest)?;
        self.world
            .process_at_rank(dest as i32)
            .send_with_tag(buf, tag.as_u32() as i32);
        Ok(())
    }

    fn recv(&self, source: Rank, tag: CommTag) -> Result<Bytes, TaskError> {
        self.check_rank(source)?;
        let (buf, _status) = self
            .world
            .process_at_rank(source as i32)
            .receive_vec_with_tag::<u8>(tag.as_u32() as i32);
        Ok(Bytes::from(buf))
    }

    fn recv_tag(&self, tag: CommTag) -> Result<Envelope, TaskError> {
        let (buf, status) = self
            .world
            .any_process()
            .receive_vec_with_tag::<u8>(tag.as_u32() as i32);
        Ok(Self::envelope(buf, status))
    }

    fn recv_any(&self, source: Option<Rank>) -> Result<Envelope, TaskError> {
        let (buf, status) = match source {
            Some(src) => {
                self.check_rank(src)?;
                self.world.process_at_rank(src as i32).receive_vec::<u8>()
            }
            None => self.world.any_process().receive_vec::<u8>(),
        };
        Ok(Self::envelope(buf, status))
    }
}
