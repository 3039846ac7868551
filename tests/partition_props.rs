use proptest::prelude::*;
use simsnap_tasks::prelude::*;

fn split_strategy() -> impl Strategy<Value = StaticSplit> {
    prop_oneof![Just(StaticSplit::Contiguous), Just(StaticSplit::Striped)]
}

proptest! {
    #[test]
    fn shares_cover_every_job_exactly_once(
        n_jobs in 0usize..200,
        parts in 1usize..17,
        split in split_strategy(),
    ) {
        let mut counts = vec![0usize; n_jobs];
        for part in 0..parts {
            let share = split_jobs(n_jobs, parts, part, split).unwrap();
            prop_assert!(share.windows(2).all(|w| w[0] < w[1]));
            for job in share {
                counts[job] += 1;
            }
        }
        prop_assert!(counts.iter().all(|&c| c == 1));
    }

    #[test]
    fn shares_are_balanced(
        n_jobs in 0usize..200,
        parts in 1usize..17,
        split in split_strategy(),
    ) {
        let sizes: Vec<usize> = (0..parts)
            .map(|p| split_jobs(n_jobs, parts, p, split).unwrap().len())
            .collect();
        let max = sizes.iter().max().copied().unwrap_or(0);
        let min = sizes.iter().min().copied().unwrap_or(0);
        prop_assert!(max - min <= 1);
    }

    #[test]
    fn shares_are_deterministic(
        n_jobs in 0usize..100,
        parts in 1usize..9,
        split in split_strategy(),
    ) {
        for part in 0..parts {
            let a = StaticJobs::new(n_jobs, parts, part, split).unwrap();
            let b = StaticJobs::new(n_jobs, parts, part, split).unwrap();
            prop_assert_eq!(a.indices(), b.indices());
            prop_assert_eq!(a.iter().collect::<Vec<_>>(), a.iter().collect::<Vec<_>>());
        }
    }
}
