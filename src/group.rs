//! Starting a process group.
//!
//! [`launch`] runs the coordinator on rank 0 and the caller's worker function
//! on every other rank, then waits for all of them. With the thread backend
//! each rank is a scoped thread of this process; with the MPI backend this
//! process is one rank and the others are its MPI peers.

use crate::comm::{Communicator, ThreadComm};
use crate::config::{Backend, Distribution, GroupConfig};
use crate::coordinator::Coordinator;
use crate::dataset::{DatasetLoader, Derivations};
use crate::message::MessageRegistry;
use crate::task_error::TaskError;
use crate::worker::Worker;
use std::any::Any;
use std::sync::Arc;
use std::thread;

/// Run `worker_fn` on every worker rank of a group built from `config`,
/// with rank 0 serving locks, jobs and the datasets `loader` provides.
///
/// Returns the first error any rank reported; workers' errors come first,
/// in rank order, then the coordinator's.
pub fn launch<F>(config: &GroupConfig, loader: Arc<dyn DatasetLoader>, worker_fn: F) -> Result<(), TaskError>
where
    F: Fn(&Worker) -> Result<(), TaskError> + Sync,
{
    launch_with(config, loader, Arc::new(Derivations::builtin().clone()), worker_fn)
}

/// [`launch`] with a custom derived-field table, shared by the dataset server
/// and every worker.
pub fn launch_with<F>(
    config: &GroupConfig,
    loader: Arc<dyn DatasetLoader>,
    derivations: Arc<Derivations>,
    worker_fn: F,
) -> Result<(), TaskError>
where
    F: Fn(&Worker) -> Result<(), TaskError> + Sync,
{
    config.validate()?;
    let registry = Arc::new(MessageRegistry::with_catalog()?);
    match config.backend {
        Backend::Threads => launch_threads(config, registry, loader, derivations, &worker_fn),
        Backend::Mpi => launch_mpi(config, registry, loader, derivations, &worker_fn),
    }
}

fn launch_threads<F>(
    config: &GroupConfig,
    registry: Arc<MessageRegistry>,
    loader: Arc<dyn DatasetLoader>,
    derivations: Arc<Derivations>,
    worker_fn: &F,
) -> Result<(), TaskError>
where
    F: Fn(&Worker) -> Result<(), TaskError> + Sync,
{
    let mut comms = ThreadComm::group(config.ranks).into_iter();
    let coordinator_comm = comms
        .next()
        .ok_or_else(|| TaskError::Config("empty process group".into()))?;
    log::info!("launching {} ranks on threads", config.ranks);

    thread::scope(|scope| {
        let coordinator = {
            let registry = Arc::clone(&registry);
            let loader = Arc::clone(&loader);
            let derivations = Arc::clone(&derivations);
            scope.spawn(move || {
                Coordinator::new(Box::new(coordinator_comm), registry, loader, derivations)?
                    .serve()
                    .map(|_| ())
            })
        };
        let workers: Vec<_> = comms
            .map(|comm| {
                let rank = comm.rank();
                let registry = Arc::clone(&registry);
                let derivations = Arc::clone(&derivations);
                let distribution = config.distribution;
                let handle = scope.spawn(move || {
                    run_worker(Box::new(comm), registry, distribution, derivations, worker_fn)
                });
                (rank, handle)
            })
            .collect();

        let mut first_error = None;
        for (rank, handle) in workers {
            let result = handle.join().unwrap_or_else(|p| Err(panicked(rank, p)));
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        let result = coordinator.join().unwrap_or_else(|p| Err(panicked(0, p)));
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    })
}

#[cfg(feature = "mpi-support")]
fn launch_mpi<F>(
    config: &GroupConfig,
    registry: Arc<MessageRegistry>,
    loader: Arc<dyn DatasetLoader>,
    derivations: Arc<Derivations>,
    worker_fn: &F,
) -> Result<(), TaskError>
where
    F: Fn(&Worker) -> Result<(), TaskError> + Sync,
{
    let comm = crate::comm::MpiComm::new()?;
    if comm.size() < 2 {
        return Err(TaskError::Config(format!(
            "need at least 2 MPI ranks, got {}",
            comm.size()
        )));
    }
    if comm.is_coordinator() {
        Coordinator::new(Box::new(comm), registry, loader, derivations)?
            .serve()
            .map(|_| ())
    } else {
        run_worker(Box::new(comm), registry, config.distribution, derivations, worker_fn)
    }
}

#[cfg(not(feature = "mpi-support"))]
fn launch_mpi<F>(
    _config: &GroupConfig,
    _registry: Arc<MessageRegistry>,
    _loader: Arc<dyn DatasetLoader>,
    _derivations: Arc<Derivations>,
    _worker_fn: &F,
) -> Result<(), TaskError>
where
    F: Fn(&Worker) -> Result<(), TaskError> + Sync,
{
    Err(TaskError::Config(
        "the mpi backend needs the `mpi-support` feature".into(),
    ))
}

/// Run one worker rank. `Finished` is sent whatever `worker_fn` returns so
/// the coordinator can shut down.
fn run_worker<F>(
    comm: Box<dyn Communicator>,
    registry: Arc<MessageRegistry>,
    distribution: Distribution,
    derivations: Arc<Derivations>,
    worker_fn: &F,
) -> Result<(), TaskError>
where
    F: Fn(&Worker) -> Result<(), TaskError> + Sync,
{
    let worker = Worker::new(comm, registry, distribution, derivations)?;
    let result = worker_fn(&worker);
    if let Err(e) = &result {
        log::error!("[rank {}] worker failed: {e}", worker.rank());
    }
    let finished = worker.finish();
    result.and(finished)
}

fn panicked(rank: usize, payload: Box<dyn Any + Send>) -> TaskError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".into());
    TaskError::RankPanicked { rank, message }
}
