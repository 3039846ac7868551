#![allow(dead_code)]
use simsnap_tasks::prelude::*;
use std::sync::Arc;

pub const SNAP: &str = "snapshots/tiny.000640";
pub const OTHER_SNAP: &str = "snapshots/tiny.000832";
pub const N: usize = 40;

/// Deterministic 40-particle snapshot with positions, velocities, masses,
/// particle ids and temperatures, dm/gas/star families, two catalogued
/// objects and a box size.
pub fn snapshot() -> MemoryDataset {
    let pos: Vec<[f64; 3]> = (0..N)
        .map(|i| {
            [
                i as f64 * 0.5 - 10.0,
                (i % 7) as f64 - 3.0,
                ((i * 3) % 5) as f64 - 2.0,
            ]
        })
        .collect();
    let vel: Vec<[f64; 3]> = (0..N)
        .map(|i| [(i % 3) as f64, -((i % 4) as f64), 0.25 * i as f64])
        .collect();
    let mass: Vec<f64> = (0..N).map(|i| 1.0 + 0.1 * i as f64).collect();
    let iord: Vec<i64> = (0..N as i64).map(|i| 1000 + i).collect();
    let temp: Vec<f64> = (0..N).map(|i| 1.0e4 + 37.5 * i as f64).collect();
    MemoryDataset::new(N)
        .with_field("pos", Array::vectors(&pos))
        .unwrap()
        .with_field("vel", Array::vectors(&vel))
        .unwrap()
        .with_field("mass", Array::scalars(mass))
        .unwrap()
        .with_field("iord", Array::integers(iord))
        .unwrap()
        .with_field("temp", Array::scalars(temp))
        .unwrap()
        .with_family("dm", family(|i| i % 4 < 2))
        .unwrap()
        .with_family("gas", family(|i| i % 4 == 2))
        .unwrap()
        .with_family("star", family(|i| i % 4 == 3))
        .unwrap()
        .with_object(1, (0..10).collect())
        .unwrap()
        .with_object(2, (10..25).collect())
        .unwrap()
        .with_property("boxsize", 50.0)
}

fn family(keep: impl Fn(usize) -> bool) -> Vec<usize> {
    (0..N).filter(|&i| keep(i)).collect()
}

pub fn loader() -> Arc<MemoryLoader> {
    Arc::new(
        MemoryLoader::new()
            .with(SNAP, snapshot())
            .with(OTHER_SNAP, snapshot().with_property("boxsize", 60.0)),
    )
}

pub fn sphere() -> Selector {
    Selector::Filter(Filter::sphere(6.0))
}

pub fn bits(values: &[f64]) -> Vec<u64> {
    values.iter().map(|v| v.to_bits()).collect()
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
