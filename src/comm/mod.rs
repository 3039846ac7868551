//! Transport: how bytes move between ranks.

pub mod communicator;
#[cfg(feature = "mpi-support")]
pub mod mpi_backend;

pub use communicator::{COORDINATOR, CommTag, Communicator, Envelope, Rank, TAG_MASK, ThreadComm};
#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
