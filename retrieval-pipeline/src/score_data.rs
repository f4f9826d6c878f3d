/// Per-(term, document) statistics handed to a ranker. One value is built
/// for every posting touched by a query; the document-level fields are also
/// used on their own for per-document initial scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreData {
    /// Number of documents containing the term (df).
    pub doc_count: u64,
    /// Total occurrences of the term in the corpus (cf).
    pub corpus_term_count: u64,
    /// Number of documents in the corpus (N).
    pub num_docs: u64,
    /// Length of the current document in tokens (dl).
    pub doc_size: u64,
    /// Average document length across the corpus.
    pub avg_dl: f64,
    /// Occurrences of the term in the current document (tf).
    pub doc_term_count: u64,
    /// Weight of the term in the query (qtf).
    pub query_term_weight: f64,
    /// Total weight of the query.
    pub query_length: f64,
    /// Total number of term occurrences in the corpus.
    pub total_terms: u64,
}

impl ScoreData {
    /// Background model probability of the term, `cf / total_terms`.
    pub fn corpus_prob(&self) -> f64 {
        if self.total_terms == 0 {
            0.0
        } else {
            self.corpus_term_count as f64 / self.total_terms as f64
        }
    }
}
