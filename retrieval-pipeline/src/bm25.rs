use common::error::AppError;

use crate::ranker::Ranker;
use crate::score_data::ScoreData;

pub const DEFAULT_K1: f64 = 1.2;
pub const DEFAULT_B: f64 = 0.75;
pub const DEFAULT_K3: f64 = 500.0;

/// Okapi BM25 probabilistic ranking function.
#[derive(Debug, Clone, Copy)]
pub struct OkapiBm25 {
    pub k1: f64,
    pub b: f64,
    pub k3: f64,
}

impl Default for OkapiBm25 {
    fn default() -> Self {
        Self {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            k3: DEFAULT_K3,
        }
    }
}

impl OkapiBm25 {
    pub fn new(k1: f64, b: f64, k3: f64) -> Result<Self, AppError> {
        if k1 < 0.0 {
            return Err(AppError::InvalidParameter(format!(
                "bm25 k1 must be >= 0 (got {k1})"
            )));
        }
        if k3 < 0.0 {
            return Err(AppError::InvalidParameter(format!(
                "bm25 k3 must be >= 0 (got {k3})"
            )));
        }
        if !(0.0..=1.0).contains(&b) {
            return Err(AppError::InvalidParameter(format!(
                "bm25 b must be on [0,1] (got {b})"
            )));
        }
        Ok(Self { k1, b, k3 })
    }
}

impl Ranker for OkapiBm25 {
    fn score_one(&self, sd: &ScoreData) -> f64 {
        let doc_len = sd.doc_size as f64;
        let df = sd.doc_count as f64;
        let tf = sd.doc_term_count as f64;

        // the 1.0 inside the log keeps the IDF positive
        let idf = (1.0 + (sd.num_docs as f64 - df + 0.5) / (df + 0.5)).ln();

        let tf_part = ((self.k1 + 1.0) * tf)
            / (self.k1 * ((1.0 - self.b) + self.b * doc_len / sd.avg_dl) + tf);

        let qtf_part =
            ((self.k3 + 1.0) * sd.query_term_weight) / (self.k3 + sd.query_term_weight);

        idf * tf_part * qtf_part
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score_data(tf: u64) -> ScoreData {
        ScoreData {
            doc_count: 10,
            corpus_term_count: 50,
            num_docs: 100,
            doc_size: 20,
            avg_dl: 25.0,
            doc_term_count: tf,
            query_term_weight: 1.0,
            query_length: 1.0,
            total_terms: 2500,
        }
    }

    #[test]
    fn contribution_is_monotone_in_tf() {
        let ranker = OkapiBm25::default();
        let mut previous = ranker.score_one(&score_data(0));
        for tf in 1..40 {
            let score = ranker.score_one(&score_data(tf));
            assert!(
                score >= previous,
                "bm25 must be non-decreasing in tf (tf={tf}: {score} < {previous})"
            );
            previous = score;
        }
    }

    #[test]
    fn idf_stays_positive_for_common_terms() {
        let ranker = OkapiBm25::default();
        let sd = ScoreData {
            doc_count: 99,
            num_docs: 100,
            doc_size: 20,
            avg_dl: 20.0,
            doc_term_count: 5,
            query_term_weight: 1.0,
            ..ScoreData::default()
        };
        assert!(ranker.score_one(&sd) > 0.0);
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        assert!(matches!(
            OkapiBm25::new(-0.1, 0.75, 500.0),
            Err(AppError::InvalidParameter(_))
        ));
        assert!(matches!(
            OkapiBm25::new(1.2, 1.5, 500.0),
            Err(AppError::InvalidParameter(_))
        ));
        assert!(matches!(
            OkapiBm25::new(1.2, 0.75, -1.0),
            Err(AppError::InvalidParameter(_))
        ));
    }
}
