//! On-demand job doling.
//!
//! Each worker numbers its job loops 0, 1, 2, ... The coordinator keeps one
//! cursor per loop number; every `JobRequest` takes the next index from it,
//! and once the list is exhausted the requester gets `None` and is marked
//! done. A loop is forgotten when every worker is done with it; a worker that
//! finishes the group counts as done with every loop, including ones other
//! workers start later.

use crate::comm::{COORDINATOR, Rank};
use crate::message::Outbox;
use crate::message::catalog::{JobGrant, JobRequest};
use crate::task_error::TaskError;
use crate::worker::Worker;
use std::collections::{HashMap, HashSet};

/// Worker side: asks the coordinator for one job index at a time.
///
/// One-shot: once it has returned `None` (or an error) it stays exhausted.
pub struct DoledJobs<'w> {
    worker: &'w Worker,
    iteration: u64,
    n_jobs: usize,
    done: bool,
}

impl<'w> DoledJobs<'w> {
    pub fn new(worker: &'w Worker, iteration: u64, n_jobs: usize) -> Self {
        Self {
            worker,
            iteration,
            n_jobs,
            done: false,
        }
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    fn request(&self) -> Result<Option<usize>, TaskError> {
        self.worker.send(
            &JobRequest {
                iteration: self.iteration,
                n_jobs: self.n_jobs,
            },
            COORDINATOR,
        )?;
        let grant = self.worker.receive::<JobGrant>(Some(COORDINATOR))?.body;
        if grant.iteration != self.iteration {
            return Err(TaskError::UnexpectedReply(format!(
                "job grant for loop {} while in loop {}",
                grant.iteration, self.iteration
            )));
        }
        Ok(grant.job)
    }
}

impl Iterator for DoledJobs<'_> {
    type Item = Result<usize, TaskError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.request() {
            Ok(Some(job)) => {
                log::trace!("[rank {}] got job {job} (loop {})", self.worker.rank(), self.iteration);
                Some(Ok(job))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[derive(Debug)]
struct JobLoop {
    n_jobs: usize,
    next: usize,
    ended: HashSet<Rank>,
}

/// Coordinator side: per-loop cursors.
#[derive(Debug)]
pub struct JobServer {
    workers: usize,
    loops: HashMap<u64, JobLoop>,
    retired: HashSet<Rank>,
}

impl JobServer {
    /// Server for a group with `workers` worker ranks.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            loops: HashMap::new(),
            retired: HashSet::new(),
        }
    }

    /// Answer `rank`'s request for the next job of loop `iteration`.
    pub fn request(
        &mut self,
        rank: Rank,
        iteration: u64,
        n_jobs: usize,
        out: &mut Outbox,
    ) -> Result<(), TaskError> {
        let retired = &self.retired;
        let job_loop = self.loops.entry(iteration).or_insert_with(|| {
            log::debug!("job loop {iteration} started with {n_jobs} jobs");
            JobLoop {
                n_jobs,
                next: 0,
                ended: retired.clone(),
            }
        });
        if job_loop.n_jobs != n_jobs {
            return Err(TaskError::JobCountMismatch {
                iteration,
                rank,
                expected: job_loop.n_jobs,
                actual: n_jobs,
            });
        }
        if job_loop.ended.contains(&rank) {
            return Err(TaskError::JobLoopEnded { iteration, rank });
        }
        let job = if job_loop.next < job_loop.n_jobs {
            job_loop.next += 1;
            Some(job_loop.next - 1)
        } else {
            job_loop.ended.insert(rank);
            None
        };
        let finished = job_loop.ended.len() >= self.workers;
        out.post(rank, &JobGrant { iteration, job })?;
        if finished {
            self.loops.remove(&iteration);
            log::debug!("job loop {iteration} complete");
        }
        Ok(())
    }

    /// `rank` has left the group: count it as done with every loop and drop
    /// the loops that leaves complete. Returns the loops it had not finished.
    pub fn retire(&mut self, rank: Rank) -> Vec<u64> {
        self.retired.insert(rank);
        let mut abandoned = Vec::new();
        for (&iteration, job_loop) in self.loops.iter_mut() {
            if job_loop.ended.insert(rank) {
                abandoned.push(iteration);
            }
        }
        let workers = self.workers;
        self.loops.retain(|iteration, job_loop| {
            let open = job_loop.ended.len() < workers;
            if !open {
                log::debug!("job loop {iteration} complete");
            }
            open
        });
        abandoned.sort_unstable();
        abandoned
    }

    /// Loops some worker has not finished yet.
    pub fn open_loops(&self) -> Vec<u64> {
        let mut open: Vec<u64> = self.loops.keys().copied().collect();
        open.sort_unstable();
        open
    }
}
