//! Work distribution: which worker runs which job.
//!
//! Jobs are opaque; only the length and order of the job list matter. Two
//! policies are supported (see [`Distribution`]):
//! - a static split, computed locally by every worker with [`split_jobs`];
//! - on-demand doling, where the coordinator hands out one job index per
//!   request (see [`doled`]).
//!
//! Either way every job is run by exactly one worker, and each worker sees
//! its jobs in list order.

pub mod doled;

pub use doled::{DoledJobs, JobServer};

pub use crate::config::{Distribution, StaticSplit};
use crate::task_error::TaskError;
use crate::worker::Worker;

/// Indices of the jobs owned by `part` out of `parts`, in list order.
///
/// A contiguous split hands out runs whose lengths differ by at most one,
/// with the longer runs first.
pub fn split_jobs(
    n_jobs: usize,
    parts: usize,
    part: usize,
    split: StaticSplit,
) -> Result<Vec<usize>, TaskError> {
    if part >= parts {
        return Err(TaskError::Config(format!(
            "part {part} out of range for a {parts}-way split"
        )));
    }
    Ok(match split {
        StaticSplit::Contiguous => {
            let base = n_jobs / parts;
            let extra = n_jobs % parts;
            let start = part * base + part.min(extra);
            let len = base + usize::from(part < extra);
            (start..start + len).collect()
        }
        StaticSplit::Striped => (part..n_jobs).step_by(parts).collect(),
    })
}

/// A worker's statically assigned jobs. Iterating it again yields the same
/// indices in the same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticJobs {
    indices: Vec<usize>,
}

impl StaticJobs {
    pub fn new(n_jobs: usize, parts: usize, part: usize, split: StaticSplit) -> Result<Self, TaskError> {
        Ok(Self {
            indices: split_jobs(n_jobs, parts, part, split)?,
        })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'_, usize>> {
        self.indices.iter().copied()
    }
}

impl<'a> IntoIterator for &'a StaticJobs {
    type Item = usize;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, usize>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The jobs this worker runs from one job list, under the group's policy.
///
/// Yields `(index, &job)`; an `Err` means the coordinator could not be
/// reached and the loop should stop.
pub enum Distributed<'a, T> {
    Static {
        jobs: &'a [T],
        indices: std::vec::IntoIter<usize>,
    },
    Doled {
        jobs: &'a [T],
        doled: DoledJobs<'a>,
    },
}

impl<'a, T> Iterator for Distributed<'a, T> {
    type Item = Result<(usize, &'a T), TaskError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Distributed::Static { jobs, indices } => {
                let jobs: &'a [T] = *jobs;
                indices.next().map(|i| Ok((i, &jobs[i])))
            }
            Distributed::Doled { jobs, doled } => {
                let jobs: &'a [T] = *jobs;
                doled.next().map(|r| {
                    r.and_then(|i| {
                        jobs.get(i).map(|job| (i, job)).ok_or_else(|| {
                            TaskError::UnexpectedReply(format!(
                                "granted job {i} of a {}-job list",
                                jobs.len()
                            ))
                        })
                    })
                })
            }
        }
    }
}

/// Outcome of [`Worker::for_each_job`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub completed: usize,
    pub failed: usize,
}

impl Worker {
    /// This worker's static share of `n_jobs` jobs.
    pub fn static_jobs(&self, n_jobs: usize, split: StaticSplit) -> Result<StaticJobs, TaskError> {
        StaticJobs::new(n_jobs, self.n_workers(), self.worker_index(), split)
    }

    /// Iterate this worker's jobs from `jobs` under the group's policy.
    ///
    /// Under on-demand doling every worker must start the same job loops, in
    /// the same order, over lists of the same length.
    pub fn distributed<'a, T>(&'a self, jobs: &'a [T]) -> Result<Distributed<'a, T>, TaskError> {
        match self.distribution() {
            Distribution::Static(split) => {
                let share = self.static_jobs(jobs.len(), split)?;
                log::debug!(
                    "[rank {}] statically assigned {} of {} jobs",
                    self.rank(),
                    share.len(),
                    jobs.len()
                );
                Ok(Distributed::Static {
                    jobs,
                    indices: share.indices.into_iter(),
                })
            }
            Distribution::OnDemand => {
                let iteration = self.iteration.get();
                self.iteration.set(iteration + 1);
                Ok(Distributed::Doled {
                    jobs,
                    doled: DoledJobs::new(self, iteration, jobs.len()),
                })
            }
        }
    }

    /// Run `f` on each of this worker's jobs. A job that fails is logged and
    /// counted and the loop carries on; a failure to obtain the next job ends
    /// the loop with that error.
    pub fn for_each_job<T, F>(&self, jobs: &[T], mut f: F) -> Result<JobSummary, TaskError>
    where
        F: FnMut(usize, &T) -> Result<(), TaskError>,
    {
        let mut summary = JobSummary::default();
        for item in self.distributed(jobs)? {
            let (index, job) = item?;
            match f(index, job) {
                Ok(()) => summary.completed += 1,
                Err(e) => {
                    log::error!("[rank {}] job {index} failed: {e}", self.rank());
                    summary.failed += 1;
                }
            }
        }
        log::info!(
            "[rank {}] job loop done: {} completed, {} failed",
            self.rank(),
            summary.completed,
            summary.failed
        );
        Ok(summary)
    }
}
