mod util;

use parking_lot::Mutex;
use simsnap_tasks::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use util::assert_permutation;

type Seen = Mutex<BTreeMap<Rank, Vec<usize>>>;

fn record(seen: &Seen, rank: Rank, job: usize) {
    seen.lock().entry(rank).or_default().push(job);
}

fn run(ranks: usize, distribution: Distribution, n_jobs: usize) -> BTreeMap<Rank, Vec<usize>> {
    let jobs: Vec<usize> = (0..n_jobs).map(|i| i * 10).collect();
    let seen = Seen::default();
    launch(
        &GroupConfig::threads(ranks, distribution),
        Arc::new(MemoryLoader::new()),
        |worker| {
            let summary = worker.for_each_job(&jobs, |index, job| {
                assert_eq!(*job, index * 10);
                record(&seen, worker.rank(), index);
                Ok(())
            })?;
            assert_eq!(summary.failed, 0);
            Ok(())
        },
    )
    .unwrap();
    seen.into_inner()
}

fn check_partition(seen: &BTreeMap<Rank, Vec<usize>>, n_jobs: usize) {
    let all: Vec<usize> = seen.values().flatten().copied().collect();
    assert_permutation(&all, &(0..n_jobs).collect::<Vec<_>>());
    for jobs in seen.values() {
        assert!(jobs.windows(2).all(|w| w[0] < w[1]), "out of order: {jobs:?}");
    }
    assert!(!seen.contains_key(&COORDINATOR));
}

#[test]
fn doled_jobs_are_each_run_once() {
    let seen = run(4, Distribution::OnDemand, 25);
    check_partition(&seen, 25);
}

#[test]
fn static_contiguous_jobs_follow_the_split() {
    let seen = run(4, Distribution::Static(StaticSplit::Contiguous), 10);
    check_partition(&seen, 10);
    assert_eq!(seen[&1], vec![0, 1, 2, 3]);
    assert_eq!(seen[&2], vec![4, 5, 6]);
    assert_eq!(seen[&3], vec![7, 8, 9]);
}

#[test]
fn static_striped_jobs_follow_the_split() {
    let seen = run(3, Distribution::Static(StaticSplit::Striped), 7);
    check_partition(&seen, 7);
    assert_eq!(seen[&1], vec![0, 2, 4, 6]);
    assert_eq!(seen[&2], vec![1, 3, 5]);
}

#[test]
fn empty_job_list_finishes() {
    for distribution in [Distribution::OnDemand, Distribution::Static(StaticSplit::Contiguous)] {
        assert!(run(3, distribution, 0).is_empty());
    }
}

#[test]
fn consecutive_doled_loops_are_independent() {
    let first = Seen::default();
    let second = Seen::default();
    launch(
        &GroupConfig::threads(3, Distribution::OnDemand),
        Arc::new(MemoryLoader::new()),
        |worker| {
            for item in worker.distributed(&[(); 6])? {
                record(&first, worker.rank(), item?.0);
            }
            for item in worker.distributed(&["a", "b", "c"])? {
                record(&second, worker.rank(), item?.0);
            }
            Ok(())
        },
    )
    .unwrap();
    check_partition(&first.into_inner(), 6);
    check_partition(&second.into_inner(), 3);
}

#[test]
fn failing_jobs_do_not_stop_the_loop() {
    let totals = Mutex::new((0, 0));
    launch(
        &GroupConfig::threads(3, Distribution::OnDemand),
        Arc::new(MemoryLoader::new()),
        |worker| {
            let summary = worker.for_each_job(&(0..9).collect::<Vec<usize>>(), |index, _| {
                if index % 3 == 0 {
                    Err(TaskError::Job {
                        index,
                        reason: "no halo catalogue".into(),
                    })
                } else {
                    Ok(())
                }
            })?;
            let mut t = totals.lock();
            t.0 += summary.completed;
            t.1 += summary.failed;
            Ok(())
        },
    )
    .unwrap();
    assert_eq!(totals.into_inner(), (6, 3));
}

#[test]
fn static_share_is_restartable() {
    launch(
        &GroupConfig::threads(3, Distribution::Static(StaticSplit::Contiguous)),
        Arc::new(MemoryLoader::new()),
        |worker| {
            let share = worker.static_jobs(9, StaticSplit::Contiguous)?;
            let once: Vec<usize> = share.iter().collect();
            let twice: Vec<usize> = (&share).into_iter().collect();
            assert_eq!(once, twice);
            assert_eq!(once.len(), if worker.rank() == 1 { 5 } else { 4 });
            Ok(())
        },
    )
    .unwrap();
}
