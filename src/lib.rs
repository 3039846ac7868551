#![cfg_attr(docsrs, feature(doc_cfg))]
//! # simsnap-tasks
//!
//! simsnap-tasks is the coordination layer for analysing simulation snapshots
//! on a fixed group of ranks. Rank 0 is a dedicated coordinator; every other
//! rank is a worker running the same analysis function.
//!
//! ## Features
//! - Blocking point-to-point transport with interchangeable backends
//!   (in-process threads, MPI behind `mpi-support`)
//! - Typed messages with stable 28-bit tags, an explicit registry and
//!   per-type handler dispatch
//! - Job distribution: static contiguous or striped splits, or on-demand
//!   doling by the coordinator
//! - Named, re-entrant distributed locks with FIFO grants
//! - A remote dataset server: shared, reference-counted dataset sessions,
//!   lazily derived fields computed over the requested subset only, and
//!   client views that re-derive locally after local modification
//!
//! ## Usage
//!
//! ```no_run
//! use simsnap_tasks::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), TaskError> {
//! let loader = Arc::new(MemoryLoader::new());
//! let config = GroupConfig::from_env()?;
//! let snapshots = vec!["snap_001", "snap_002", "snap_003"];
//! launch(&config, loader, |worker| {
//!     worker.for_each_job(&snapshots, |_, snap| {
//!         let _guard = worker.lock("output")?;
//!         println!("rank {} handles {snap}", worker.rank());
//!         Ok(())
//!     })?;
//!     Ok(())
//! })
//! # }
//! ```
//!
//! ## Determinism
//!
//! Tags are derived from message names with blake3, so every rank and every
//! build agrees on them. Static job splits are pure functions of the job
//! count and group size, so a restarted worker sees the same share.

pub mod comm;
pub mod config;
pub mod coordinator;
pub mod dataset;
pub mod group;
pub mod jobs;
pub mod lock;
pub mod message;
pub mod task_error;
pub mod wire;
pub mod worker;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::comm::{COORDINATOR, CommTag, Communicator, Rank, ThreadComm};
    pub use crate::config::{Backend, Distribution, GroupConfig, StaticSplit};
    pub use crate::dataset::{
        Array, Dataset, DatasetLoader, Derivations, Filter, MemoryDataset, MemoryLoader, RemoteDataset,
        RemoteView, Selector,
    };
    pub use crate::group::{launch, launch_with};
    pub use crate::jobs::{JobSummary, StaticJobs, split_jobs};
    pub use crate::lock::LockGuard;
    pub use crate::message::{Message, MessageRegistry, Received};
    pub use crate::task_error::TaskError;
    pub use crate::worker::Worker;
}
