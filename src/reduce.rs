//! Deterministic keyed reductions.
//!
//! Deduplication must give the same answer however rows are split across
//! workers, so "which duplicate survives" is an explicit [`ReduceFn`] with a
//! total order over [`Sequenced`] rows instead of whatever an unordered map
//! overwrite happens to keep:
//!
//! - [`KeepFirst`] keeps the row with the lowest input sequence.
//! - [`KeepLatest`] keeps the row with the greatest ordering key (e.g. `ts`),
//!   ties going to the higher input sequence.
//!
//! [`reduce_by_key`] runs a fold per rayon worker and merges the partial maps
//! with the same rule. Because `prefer` is a strict total order, the merge is
//! associative and commutative.

use crate::model::Sequenced;
use rayon::prelude::*;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;

/// Picks the surviving row among rows sharing a key.
pub trait ReduceFn<T>: Send + Sync {
    /// Whether `candidate` should replace `incumbent`.
    fn prefer(&self, candidate: &Sequenced<T>, incumbent: &Sequenced<T>) -> bool;
}

/// First-seen wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeepFirst;

impl<T> ReduceFn<T> for KeepFirst {
    fn prefer(&self, candidate: &Sequenced<T>, incumbent: &Sequenced<T>) -> bool {
        candidate.seq < incumbent.seq
    }
}

/// Greatest `order(row)` wins; ties go to the later input row.
#[derive(Clone, Copy, Debug)]
pub struct KeepLatest<F>(pub F);

impl<T, O, F> ReduceFn<T> for KeepLatest<F>
where
    O: Ord,
    F: Fn(&T) -> O + Send + Sync,
{
    fn prefer(&self, candidate: &Sequenced<T>, incumbent: &Sequenced<T>) -> bool {
        let c = ((self.0)(&candidate.record), candidate.seq);
        let i = ((self.0)(&incumbent.record), incumbent.seq);
        c > i
    }
}

fn offer<K: Eq + Hash, T, R: ReduceFn<T>>(
    acc: &mut HashMap<K, Sequenced<T>>,
    key: K,
    row: Sequenced<T>,
    reducer: &R,
) {
    match acc.entry(key) {
        Entry::Occupied(mut e) => {
            if reducer.prefer(&row, e.get()) {
                e.insert(row);
            }
        }
        Entry::Vacant(e) => {
            e.insert(row);
        }
    }
}

/// Reduce `rows` to one survivor per key, returned sorted by key.
pub fn reduce_by_key<T, K, KF, R>(rows: Vec<Sequenced<T>>, key_fn: KF, reducer: &R) -> Vec<(K, Sequenced<T>)>
where
    T: Send,
    K: Eq + Hash + Ord + Send,
    KF: Fn(&T) -> K + Sync,
    R: ReduceFn<T>,
{
    let merged = rows
        .into_par_iter()
        .fold(HashMap::new, |mut acc, row| {
            let key = key_fn(&row.record);
            offer(&mut acc, key, row, reducer);
            acc
        })
        .reduce(HashMap::new, |mut left, right| {
            for (key, row) in right {
                offer(&mut left, key, row, reducer);
            }
            left
        });

    let mut out: Vec<(K, Sequenced<T>)> = merged.into_iter().collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}
