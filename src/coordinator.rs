//! Rank 0's service loop.
//!
//! The coordinator owns the lock table, the job cursors and the dataset
//! server. It receives requests from any worker, dispatches each to its
//! handler, sends whatever replies the handler queued, and stops once every
//! worker has sent `Finished`.

use crate::comm::{Communicator, Rank};
use crate::dataset::{DatasetLoader, DatasetServer, Derivations};
use crate::jobs::JobServer;
use crate::lock::LockServer;
use crate::message::catalog::{
    Finished, JobRequest, LockAcquire, LockRelease, Release, RequestArray, RequestLoad, RequestView,
};
use crate::message::{Dispatcher, MessageRegistry, Outbox};
use crate::task_error::TaskError;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Everything the coordinator's handlers act on.
pub struct CoordinatorState {
    pub locks: LockServer,
    pub jobs: JobServer,
    pub datasets: DatasetServer,
    pub outbox: Outbox,
    finished: BTreeSet<Rank>,
}

impl CoordinatorState {
    pub fn new(
        workers: usize,
        registry: Arc<MessageRegistry>,
        loader: Arc<dyn DatasetLoader>,
        derivations: Arc<Derivations>,
    ) -> Self {
        Self {
            locks: LockServer::new(),
            jobs: JobServer::new(workers),
            datasets: DatasetServer::new(loader, derivations),
            outbox: Outbox::new(registry),
            finished: BTreeSet::new(),
        }
    }

    /// Workers that have sent `Finished`.
    pub fn finished(&self) -> &BTreeSet<Rank> {
        &self.finished
    }

    /// `rank` is done: let go of whatever it still holds.
    fn retire(&mut self, rank: Rank) -> Result<(), TaskError> {
        if !self.finished.insert(rank) {
            log::warn!("rank {rank} reported finished twice");
            return Ok(());
        }
        let held = self.locks.release_all(rank, &mut self.outbox)?;
        if !held.is_empty() {
            log::warn!("rank {rank} finished while holding locks {held:?}");
        }
        let abandoned = self.jobs.retire(rank);
        if !abandoned.is_empty() {
            log::warn!("rank {rank} finished before the end of job loops {abandoned:?}");
        }
        if self.datasets.is_active(rank) {
            log::warn!("rank {rank} finished without releasing its dataset session");
            self.datasets.release(rank)?;
        }
        log::debug!("rank {rank} finished ({} so far)", self.finished.len());
        Ok(())
    }
}

/// Install a handler for every request the coordinator answers.
pub fn install_handlers(d: &mut Dispatcher<CoordinatorState>) -> Result<(), TaskError> {
    d.register_handler::<RequestLoad, _>(|s, m| {
        s.datasets.handle_load(m.source, &m.body.path, &mut s.outbox)
    })?;
    d.register_handler::<RequestView, _>(|s, m| {
        s.datasets.handle_view(m.source, &m.body.selector, &mut s.outbox)
    })?;
    d.register_handler::<RequestArray, _>(|s, m| {
        s.datasets
            .handle_array(m.source, &m.body.selector, &m.body.field, &mut s.outbox)
    })?;
    d.register_handler::<Release, _>(|s, m| s.datasets.handle_release(m.source, &mut s.outbox))?;
    d.register_handler::<LockAcquire, _>(|s, m| s.locks.acquire(m.source, &m.body.name, &mut s.outbox))?;
    d.register_handler::<LockRelease, _>(|s, m| s.locks.release(m.source, &m.body.name, &mut s.outbox))?;
    d.register_handler::<JobRequest, _>(|s, m| {
        s.jobs
            .request(m.source, m.body.iteration, m.body.n_jobs, &mut s.outbox)
    })?;
    d.register_handler::<Finished, _>(|s, m| s.retire(m.source))?;
    Ok(())
}

pub struct Coordinator {
    comm: Box<dyn Communicator>,
    dispatcher: Dispatcher<CoordinatorState>,
    state: CoordinatorState,
}

impl Coordinator {
    pub fn new(
        comm: Box<dyn Communicator>,
        registry: Arc<MessageRegistry>,
        loader: Arc<dyn DatasetLoader>,
        derivations: Arc<Derivations>,
    ) -> Result<Self, TaskError> {
        if !comm.is_coordinator() {
            return Err(TaskError::Config(format!(
                "rank {} cannot run the coordinator",
                comm.rank()
            )));
        }
        let workers = comm.size().saturating_sub(1);
        let mut dispatcher = Dispatcher::new(Arc::clone(&registry));
        install_handlers(&mut dispatcher)?;
        Ok(Self {
            comm,
            dispatcher,
            state: CoordinatorState::new(workers, registry, loader, derivations),
        })
    }

    /// Serve requests until every worker has finished. Protocol errors and
    /// transport failures end the loop; replies queued before the failure
    /// are still sent.
    pub fn serve(mut self) -> Result<CoordinatorState, TaskError> {
        let workers = self.comm.size() - 1;
        log::info!("coordinator serving {workers} worker(s)");
        while self.state.finished.len() < workers {
            let env = self.comm.recv_any(None)?;
            let handled = self.dispatcher.dispatch(&mut self.state, env);
            self.state.outbox.flush(self.comm.as_ref())?;
            if let Err(e) = handled {
                log::error!("coordinator stopping: {e}");
                return Err(e);
            }
        }
        let open = self.state.jobs.open_loops();
        if !open.is_empty() {
            log::warn!("job loops {open:?} were not run to completion by every worker");
        }
        log::info!("all workers finished; coordinator exiting");
        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ThreadComm;
    use crate::dataset::MemoryLoader;
    use crate::message::catalog::{JobGrant, LockGranted};

    fn coordinator(comm: ThreadComm) -> Coordinator {
        let registry = Arc::new(MessageRegistry::with_catalog().unwrap());
        Coordinator::new(
            Box::new(comm),
            registry,
            Arc::new(MemoryLoader::new()),
            Arc::new(Derivations::builtin().clone()),
        )
        .unwrap()
    }

    #[test]
    fn serves_until_all_workers_finish() {
        let mut group = ThreadComm::group(3);
        let w2 = group.pop().unwrap();
        let w1 = group.pop().unwrap();
        let coord = coordinator(group.pop().unwrap());
        let reg = MessageRegistry::with_catalog().unwrap();

        reg.send(&w1, &LockAcquire { name: "out".into() }, 0).unwrap();
        reg.send(&w2, &LockAcquire { name: "out".into() }, 0).unwrap();
        reg.send(&w1, &JobRequest { iteration: 0, n_jobs: 1 }, 0).unwrap();
        // w1 leaves holding the lock; w2 must be granted it
        reg.send(&w1, &Finished, 0).unwrap();
        reg.send(&w2, &LockRelease { name: "out".into() }, 0).unwrap();
        reg.send(&w2, &Finished, 0).unwrap();

        let state = coord.serve().unwrap();
        assert_eq!(state.finished().iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert!(state.locks.held().is_empty());

        assert_eq!(reg.receive::<LockGranted, _>(&w1, Some(0)).unwrap().body.name, "out");
        assert_eq!(reg.receive::<JobGrant, _>(&w1, Some(0)).unwrap().body.job, Some(0));
        assert_eq!(reg.receive::<LockGranted, _>(&w2, Some(0)).unwrap().body.name, "out");
    }

    #[test]
    fn finished_worker_is_done_with_its_job_loops() {
        let mut group = ThreadComm::group(3);
        let w2 = group.pop().unwrap();
        let w1 = group.pop().unwrap();
        let coord = coordinator(group.pop().unwrap());
        let reg = MessageRegistry::with_catalog().unwrap();

        // w1 takes one job of two and leaves; w2 drains the loop
        reg.send(&w1, &JobRequest { iteration: 0, n_jobs: 2 }, 0).unwrap();
        reg.send(&w1, &Finished, 0).unwrap();
        reg.send(&w2, &JobRequest { iteration: 0, n_jobs: 2 }, 0).unwrap();
        reg.send(&w2, &JobRequest { iteration: 0, n_jobs: 2 }, 0).unwrap();
        reg.send(&w2, &Finished, 0).unwrap();

        let state = coord.serve().unwrap();
        assert!(state.jobs.open_loops().is_empty());
        assert_eq!(reg.receive::<JobGrant, _>(&w2, Some(0)).unwrap().body.job, Some(1));
        assert_eq!(reg.receive::<JobGrant, _>(&w2, Some(0)).unwrap().body.job, None);
    }

    #[test]
    fn protocol_error_stops_the_loop() {
        let mut group = ThreadComm::group(2);
        let w1 = group.pop().unwrap();
        let coord = coordinator(group.pop().unwrap());
        let reg = MessageRegistry::with_catalog().unwrap();
        reg.send(&w1, &LockRelease { name: "never".into() }, 0).unwrap();
        assert!(matches!(coord.serve(), Err(TaskError::LockNotHeld { rank: 1, .. })));
    }

    #[test]
    fn only_rank_zero_coordinates() {
        let mut group = ThreadComm::group(2);
        let w1 = group.pop().unwrap();
        let registry = Arc::new(MessageRegistry::with_catalog().unwrap());
        assert!(
            Coordinator::new(
                Box::new(w1),
                registry,
                Arc::new(MemoryLoader::new()),
                Arc::new(Derivations::builtin().clone()),
            )
            .is_err()
        );
    }
}
