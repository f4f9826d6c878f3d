use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use common::ids::{DocId, Identifier};

/// An id with its accumulated score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored<I> {
    pub id: I,
    pub score: f64,
}

pub type SearchResult = Scored<DocId>;

#[derive(Debug)]
struct Entry<I> {
    id: I,
    score: f64,
}

impl<I: Identifier> PartialEq for Entry<I> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<I: Identifier> Eq for Entry<I> {}

impl<I: Identifier> Ord for Entry<I> {
    // "greater" means a better result: higher score, ties broken by the
    // smaller id
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.raw().cmp(&self.id.raw()))
    }
}

impl<I: Identifier> PartialOrd for Entry<I> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Selects the `k` best-scoring entries with a bounded min-heap, returned
/// in descending score order (ties by ascending id).
pub fn top_k<I: Identifier>(
    scores: impl IntoIterator<Item = (I, f64)>,
    k: usize,
) -> Vec<Scored<I>> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<Reverse<Entry<I>>> = BinaryHeap::with_capacity(k + 1);
    for (id, score) in scores {
        heap.push(Reverse(Entry { id, score }));
        if heap.len() > k {
            heap.pop();
        }
    }
    let mut results: Vec<Scored<I>> = heap
        .into_iter()
        .map(|Reverse(entry)| Scored {
            id: entry.id,
            score: entry.score,
        })
        .collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.id.raw().cmp(&b.id.raw()))
    });
    results
}
