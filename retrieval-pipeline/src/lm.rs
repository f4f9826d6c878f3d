use common::error::AppError;

use crate::ranker::Ranker;
use crate::score_data::ScoreData;

pub const DEFAULT_MU: f64 = 2000.0;
pub const DEFAULT_LAMBDA: f64 = 0.7;

/// A query-likelihood ranker is defined by its smoothed document model and
/// its per-document smoothing constant; the generic score is
/// `qtf * ln(p_s / (alpha_d * p_c))` with an initial per-document score of
/// `|q| * ln(alpha_d)`.
pub trait LanguageModelRanker {
    fn smoothed_prob(&self, sd: &ScoreData) -> f64;
    fn doc_constant(&self, sd: &ScoreData) -> f64;
}

pub(crate) fn lm_score_one(model: &impl LanguageModelRanker, sd: &ScoreData) -> f64 {
    let ps = model.smoothed_prob(sd);
    let pc = sd.corpus_prob();
    sd.query_term_weight * (ps / (model.doc_constant(sd) * pc)).ln()
}

pub(crate) fn lm_initial_score(model: &impl LanguageModelRanker, sd: &ScoreData) -> f64 {
    sd.query_length * model.doc_constant(sd).ln()
}

/// Dirichlet-prior smoothed query likelihood.
#[derive(Debug, Clone, Copy)]
pub struct DirichletPrior {
    pub mu: f64,
}

impl Default for DirichletPrior {
    fn default() -> Self {
        Self { mu: DEFAULT_MU }
    }
}

impl DirichletPrior {
    pub fn new(mu: f64) -> Result<Self, AppError> {
        if mu <= 0.0 {
            return Err(AppError::InvalidParameter(format!(
                "dirichlet-prior mu must be > 0 (got {mu})"
            )));
        }
        Ok(Self { mu })
    }
}

impl LanguageModelRanker for DirichletPrior {
    fn smoothed_prob(&self, sd: &ScoreData) -> f64 {
        let dl = sd.doc_size as f64;
        (sd.doc_term_count as f64 + self.mu * sd.corpus_prob()) / (dl + self.mu)
    }

    fn doc_constant(&self, sd: &ScoreData) -> f64 {
        let dl = sd.doc_size as f64;
        self.mu / (dl + self.mu)
    }
}

impl Ranker for DirichletPrior {
    fn score_one(&self, sd: &ScoreData) -> f64 {
        lm_score_one(self, sd)
    }

    fn initial_score(&self, sd: &ScoreData) -> f64 {
        lm_initial_score(self, sd)
    }
}

/// Jelinek-Mercer interpolation smoothing.
#[derive(Debug, Clone, Copy)]
pub struct JelinekMercer {
    pub lambda: f64,
}

impl Default for JelinekMercer {
    fn default() -> Self {
        Self {
            lambda: DEFAULT_LAMBDA,
        }
    }
}

impl JelinekMercer {
    pub fn new(lambda: f64) -> Result<Self, AppError> {
        if !(0.0 < lambda && lambda < 1.0) {
            return Err(AppError::InvalidParameter(format!(
                "jelinek-mercer lambda must be on (0,1) (got {lambda})"
            )));
        }
        Ok(Self { lambda })
    }
}

impl LanguageModelRanker for JelinekMercer {
    fn smoothed_prob(&self, sd: &ScoreData) -> f64 {
        let dl = sd.doc_size as f64;
        let ml = if dl > 0.0 {
            sd.doc_term_count as f64 / dl
        } else {
            0.0
        };
        (1.0 - self.lambda) * ml + self.lambda * sd.corpus_prob()
    }

    fn doc_constant(&self, _sd: &ScoreData) -> f64 {
        self.lambda
    }
}

impl Ranker for JelinekMercer {
    fn score_one(&self, sd: &ScoreData) -> f64 {
        lm_score_one(self, sd)
    }

    fn initial_score(&self, sd: &ScoreData) -> f64 {
        lm_initial_score(self, sd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score_data(tf: u64, dl: u64) -> ScoreData {
        ScoreData {
            doc_count: 10,
            corpus_term_count: 100,
            num_docs: 50,
            doc_size: dl,
            avg_dl: 25.0,
            doc_term_count: tf,
            query_term_weight: 1.0,
            query_length: 1.0,
            total_terms: 10_000,
        }
    }

    #[test]
    fn absent_term_contributes_nothing_under_dirichlet() {
        // with tf = 0 the smoothed probability collapses to alpha_d * p_c,
        // so the per-term contribution is exactly zero
        let ranker = DirichletPrior::default();
        let score = ranker.score_one(&score_data(0, 30));
        assert!(score.abs() < 1e-12);
    }

    #[test]
    fn matching_term_scores_positive() {
        let dirichlet = DirichletPrior::default();
        let jm = JelinekMercer::default();
        let sd = score_data(5, 30);
        assert!(dirichlet.score_one(&sd) > 0.0);
        assert!(jm.score_one(&sd) > 0.0);
    }

    #[test]
    fn initial_score_scales_with_query_length() {
        let ranker = DirichletPrior::default();
        let mut sd = score_data(0, 30);
        sd.query_length = 3.0;
        let triple = ranker.initial_score(&sd);
        sd.query_length = 1.0;
        let single = ranker.initial_score(&sd);
        assert!((triple - 3.0 * single).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_smoothing_parameters() {
        assert!(matches!(
            DirichletPrior::new(0.0),
            Err(AppError::InvalidParameter(_))
        ));
        assert!(matches!(
            JelinekMercer::new(1.0),
            Err(AppError::InvalidParameter(_))
        ));
    }
}
