use common::ids::Identifier;

/// One record of an index: a primary key plus its ordered list of
/// (secondary key, count) pairs. For the inverted index the primary key is
/// a term and the secondaries are documents; the forward index is the
/// transpose of that.
///
/// Invariants: secondary keys are strictly increasing and every count is
/// positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingsData<P, S> {
    primary: P,
    counts: Vec<(S, u64)>,
}

impl<P: Identifier, S: Identifier> PostingsData<P, S> {
    pub fn new(primary: P) -> Self {
        Self {
            primary,
            counts: Vec::new(),
        }
    }

    /// Builds a record from already-sorted pairs. Callers are expected to
    /// have validated the ordering (the codec does).
    pub fn from_sorted(primary: P, counts: Vec<(S, u64)>) -> Self {
        debug_assert!(counts.windows(2).all(|w| w[0].0 < w[1].0));
        Self { primary, counts }
    }

    pub fn primary(&self) -> P {
        self.primary
    }

    /// Adds `amount` occurrences of `secondary`. The common case during
    /// indexing appends at the tail since documents arrive in id order.
    pub fn increment(&mut self, secondary: S, amount: u64) {
        if let Some(last) = self.counts.last_mut() {
            if last.0 == secondary {
                last.1 += amount;
                return;
            }
            if last.0 < secondary {
                self.counts.push((secondary, amount));
                return;
            }
        } else {
            self.counts.push((secondary, amount));
            return;
        }
        match self.counts.binary_search_by_key(&secondary, |&(s, _)| s) {
            Ok(pos) => self.counts[pos].1 += amount,
            Err(pos) => self.counts.insert(pos, (secondary, amount)),
        }
    }

    /// Combines two records for the same primary key: counts for shared
    /// secondary keys are summed, ordering is preserved.
    pub fn merge_with(&mut self, other: PostingsData<P, S>) {
        for (secondary, count) in other.counts {
            self.increment(secondary, count);
        }
    }

    pub fn counts(&self) -> &[(S, u64)] {
        &self.counts
    }

    /// Number of secondary keys with a non-zero count (document frequency
    /// for the inverted index).
    pub fn doc_count(&self) -> u64 {
        self.counts.len() as u64
    }

    /// Sum of all counts (collection frequency for the inverted index).
    pub fn total_count(&self) -> u64 {
        self.counts.iter().map(|&(_, c)| c).sum()
    }

    pub fn count(&self, secondary: S) -> u64 {
        self.counts
            .binary_search_by_key(&secondary, |&(s, _)| s)
            .map(|pos| self.counts[pos].1)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ids::{DocId, TermId};

    #[test]
    fn increment_keeps_secondary_order() {
        let mut pd = PostingsData::<TermId, DocId>::new(TermId(7));
        pd.increment(DocId(2), 1);
        pd.increment(DocId(0), 3);
        pd.increment(DocId(2), 1);

        assert_eq!(pd.counts(), &[(DocId(0), 3), (DocId(2), 2)]);
        assert_eq!(pd.doc_count(), 2);
        assert_eq!(pd.total_count(), 5);
        assert_eq!(pd.count(DocId(2)), 2);
        assert_eq!(pd.count(DocId(9)), 0);
    }

    #[test]
    fn merge_sums_shared_secondaries() {
        let mut a = PostingsData::<TermId, DocId>::new(TermId(1));
        a.increment(DocId(1), 1);
        let mut b = PostingsData::<TermId, DocId>::new(TermId(1));
        b.increment(DocId(1), 2);
        b.increment(DocId(3), 1);

        a.merge_with(b);
        assert_eq!(a.counts(), &[(DocId(1), 3), (DocId(3), 1)]);
    }
}
