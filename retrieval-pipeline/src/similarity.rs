use common::error::AppError;
use common::ids::{DocId, TermId};
use index_pipeline::{ForwardIndex, InvertedIndex};
use rayon::prelude::*;
use tracing::info;

use crate::ranker::{score_query, Query, Ranker};
use crate::top_k::SearchResult;

/// All-pairs document similarity: every document's forward-index term
/// vector is issued as a query against the inverted view and its top `k`
/// neighbors (self-matches excluded) are kept. Documents are scored in
/// parallel; the index is shared immutably, with the postings cache
/// serialized behind its mutex.
pub fn all_pairs(
    ranker: &dyn Ranker,
    inverted: &InvertedIndex,
    forward: &ForwardIndex,
    k: usize,
) -> Result<Vec<(DocId, Vec<SearchResult>)>, AppError> {
    let docs: Vec<DocId> = inverted.inner().docs().collect();
    info!(documents = docs.len(), k, "Scoring all document pairs");

    docs.par_iter()
        .map(|&doc| {
            let vector = forward.postings(doc)?;
            let weights: Vec<(TermId, f64)> = vector
                .counts()
                .iter()
                .map(|&(term, count)| (term, count as f64))
                .collect();
            let query = Query::new(weights);

            let mut neighbors = score_query(ranker, inverted, &query, k + 1)?;
            neighbors.retain(|result| result.id != doc);
            neighbors.truncate(k);
            Ok((doc, neighbors))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bm25::OkapiBm25;
    use crate::ranker::tests::build_mini_index;

    #[test]
    fn nearest_neighbor_shares_the_most_terms() {
        let (_dir, inverted, forward) = build_mini_index();
        let ranker = OkapiBm25::default();

        let pairs = all_pairs(&ranker, &inverted, &forward, 5).expect("all pairs");
        assert_eq!(pairs.len(), 2);

        for (doc, neighbors) in &pairs {
            assert!(
                neighbors.iter().all(|n| n.id != *doc),
                "self matches are excluded"
            );
            // the two documents share "the", so each is the other's neighbor
            assert_eq!(neighbors.len(), 1);
        }
    }
}
