use common::error::AppError;

use crate::ranker::Ranker;
use crate::score_data::ScoreData;

pub const DEFAULT_S: f64 = 0.2;

/// Pivoted document length normalization.
#[derive(Debug, Clone, Copy)]
pub struct PivotedLength {
    pub s: f64,
}

impl Default for PivotedLength {
    fn default() -> Self {
        Self { s: DEFAULT_S }
    }
}

impl PivotedLength {
    pub fn new(s: f64) -> Result<Self, AppError> {
        if !(0.0..=1.0).contains(&s) {
            return Err(AppError::InvalidParameter(format!(
                "pivoted-length s must be on [0,1] (got {s})"
            )));
        }
        Ok(Self { s })
    }
}

impl Ranker for PivotedLength {
    fn score_one(&self, sd: &ScoreData) -> f64 {
        let doc_len = sd.doc_size as f64;
        let tf = sd.doc_term_count as f64;

        let tf_norm = 1.0 + (1.0 + tf.ln()).ln();
        let norm = (1.0 - self.s) + self.s * (doc_len / sd.avg_dl);
        let idf = ((sd.num_docs as f64 + 1.0) / (sd.doc_count as f64 + 0.5)).ln();

        tf_norm / norm * sd.query_term_weight * idf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longer_documents_are_normalized_down() {
        let ranker = PivotedLength::default();
        let short = ScoreData {
            doc_count: 5,
            num_docs: 100,
            doc_size: 10,
            avg_dl: 20.0,
            doc_term_count: 2,
            query_term_weight: 1.0,
            ..ScoreData::default()
        };
        let long = ScoreData {
            doc_size: 80,
            ..short
        };
        assert!(ranker.score_one(&short) > ranker.score_one(&long));
    }

    #[test]
    fn rejects_out_of_range_s() {
        assert!(matches!(
            PivotedLength::new(1.2),
            Err(AppError::InvalidParameter(_))
        ));
    }
}
