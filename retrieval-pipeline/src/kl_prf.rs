use std::collections::HashMap;

use common::error::AppError;
use common::ids::TermId;
use index_pipeline::{ForwardIndex, InvertedIndex};
use tracing::{debug, warn};

use crate::ranker::{score_query, Query, Ranker};
use crate::top_k::{top_k, SearchResult};

pub const DEFAULT_ALPHA: f64 = 0.5;
pub const DEFAULT_PRF_LAMBDA: f64 = 0.5;
pub const DEFAULT_FEEDBACK_DOCS: u64 = 10;
pub const DEFAULT_MAX_TERMS: u64 = 50;

const EM_MAX_ITERS: u64 = 50;
const EM_DELTA: f64 = 1e-5;

/// Two-stage pseudo-relevance-feedback ranker: an initial language-model
/// ranking selects feedback documents, a two-component unigram mixture is
/// fit to them by EM, and the query is re-run after interpolating the top
/// feedback terms into it.
pub struct KlDivergencePrf {
    pub alpha: f64,
    pub lambda: f64,
    pub feedback_docs: u64,
    pub max_terms: u64,
    pub initial: Box<dyn Ranker>,
}

impl KlDivergencePrf {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(AppError::InvalidParameter(format!(
                "kl-divergence-prf alpha must be on [0,1] (got {})",
                self.alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(AppError::InvalidParameter(format!(
                "kl-divergence-prf lambda must be on [0,1] (got {})",
                self.lambda
            )));
        }
        Ok(())
    }

    pub fn rank(
        &self,
        inverted: &InvertedIndex,
        forward: &ForwardIndex,
        query: &Query,
        num_results: usize,
    ) -> Result<Vec<SearchResult>, AppError> {
        let stage_one = score_query(
            self.initial.as_ref(),
            inverted,
            query,
            self.feedback_docs as usize,
        )?;
        if stage_one.is_empty() {
            return Ok(stage_one);
        }

        // feedback term counts, read from the forward view of the same corpus
        let mut counts: HashMap<TermId, f64> = HashMap::new();
        for result in &stage_one {
            let postings = forward.postings(result.id)?;
            for &(term, count) in postings.counts() {
                *counts.entry(term).or_insert(0.0) += count as f64;
            }
        }
        if counts.is_empty() {
            return score_query(self.initial.as_ref(), inverted, query, num_results);
        }

        // fixed background model over the feedback vocabulary
        let total_terms = inverted.inner().total_terms();
        let mut background: HashMap<TermId, f64> = HashMap::new();
        for &term in counts.keys() {
            let cf = inverted.postings(term)?.total_count();
            let pc = if total_terms == 0 {
                0.0
            } else {
                cf as f64 / total_terms as f64
            };
            background.insert(term, pc);
        }

        let feedback_model = unigram_mixture(&counts, &background, self.lambda);

        // keep only the top max_terms feedback terms
        let top_terms = top_k(
            feedback_model.iter().map(|(&term, &p)| (term, p)),
            self.max_terms as usize,
        );

        // interpolate the feedback model into the original query
        let mut new_weights: HashMap<TermId, f64> = HashMap::new();
        for scored in &top_terms {
            if scored.score > 0.0 {
                *new_weights.entry(scored.id).or_insert(0.0) += self.alpha * scored.score;
            }
        }
        for &(term, qtf) in &query.weights {
            *new_weights.entry(term).or_insert(0.0) += (1.0 - self.alpha) * qtf / query.length;
        }
        let mut weights: Vec<_> = new_weights.into_iter().collect();
        weights.sort_unstable_by_key(|&(term, _)| term);
        let new_query = Query::new(weights);
        debug!(
            feedback_docs = stage_one.len(),
            feedback_terms = top_terms.len(),
            query_terms = new_query.weights.len(),
            "Re-ranking with interpolated feedback query"
        );

        score_query(self.initial.as_ref(), inverted, &new_query, num_results)
    }
}

/// Fits the learnable component of a two-component unigram mixture by EM.
/// The background component has fixed probabilities and fixed weight
/// `lambda`; the returned map is the feedback component `p_f`.
fn unigram_mixture(
    counts: &HashMap<TermId, f64>,
    background: &HashMap<TermId, f64>,
    lambda: f64,
) -> HashMap<TermId, f64> {
    let total: f64 = counts.values().sum();

    // maximum likelihood initialization
    let mut feedback: HashMap<TermId, f64> = counts
        .iter()
        .map(|(&term, &count)| (term, count / total))
        .collect();

    let mut old_ll = f64::MIN;
    for iteration in 1..=EM_MAX_ITERS {
        let mut new_mass: HashMap<TermId, f64> = HashMap::new();
        let mut mass_total = 0.0;
        let mut ll = 0.0;

        for (&term, &count) in counts {
            let pc = background.get(&term).copied().unwrap_or(0.0);
            let pf = feedback.get(&term).copied().unwrap_or(0.0);

            let numerator = lambda * pc;
            let denominator = numerator + (1.0 - lambda) * pf;
            if denominator <= 0.0 {
                continue;
            }

            let p_zw = numerator / denominator;
            let gain = (1.0 - p_zw) * count;
            *new_mass.entry(term).or_insert(0.0) += gain;
            mass_total += gain;
            ll += count * denominator.ln();
        }

        feedback = if mass_total > 0.0 {
            new_mass
                .into_iter()
                .map(|(term, mass)| (term, mass / mass_total))
                .collect()
        } else {
            // all responsibility went to the background component
            counts.keys().map(|&term| (term, 0.0)).collect()
        };

        // strict improvement is not guaranteed for all lambda, so a
        // non-improving step ends the loop instead of aborting
        if ll <= old_ll && iteration > 1 {
            if ll < old_ll {
                warn!(iteration, ll, old_ll, "Feedback EM log-likelihood decreased");
            }
            break;
        }
        let relative_change = if iteration == 1 {
            f64::MAX
        } else {
            (old_ll - ll) / old_ll
        };
        old_ll = ll;
        if relative_change < EM_DELTA {
            break;
        }
    }

    feedback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::DirichletPrior;
    use crate::ranker::tests::build_mini_index;

    fn term_counts(pairs: &[(u64, f64)]) -> HashMap<TermId, f64> {
        pairs.iter().map(|&(t, c)| (TermId(t), c)).collect()
    }

    #[test]
    fn em_log_likelihood_is_non_decreasing() {
        let counts = term_counts(&[(0, 10.0), (1, 3.0), (2, 1.0)]);
        let background = term_counts(&[(0, 0.5), (1, 0.1), (2, 0.01)]);
        let lambda = 0.5;

        let ll = |feedback: &HashMap<TermId, f64>| -> f64 {
            counts
                .iter()
                .map(|(term, &count)| {
                    let pc = background[term];
                    let pf = feedback.get(term).copied().unwrap_or(0.0);
                    count * (lambda * pc + (1.0 - lambda) * pf).ln()
                })
                .sum()
        };

        // one manual EM step from the ML initialization must not decrease
        // the likelihood, and the fitted model must beat the start
        let total: f64 = counts.values().sum();
        let initial: HashMap<TermId, f64> = counts
            .iter()
            .map(|(&term, &count)| (term, count / total))
            .collect();
        let fitted = unigram_mixture(&counts, &background, lambda);

        assert!(ll(&fitted) >= ll(&initial) - 1e-9);
        let sum: f64 = fitted.values().sum();
        assert!((sum - 1.0).abs() < 1e-9, "feedback model must normalize");
    }

    #[test]
    fn pure_background_lambda_leaves_ranking_unchanged() {
        let (_dir, inverted, forward) = build_mini_index();
        let query = Query::from_tokens(&inverted, &["the", "dog"]);

        let initial = score_query(&DirichletPrior::default(), &inverted, &query, 10)
            .expect("initial ranking");

        let prf = KlDivergencePrf {
            alpha: 0.5,
            lambda: 1.0,
            feedback_docs: 2,
            max_terms: 10,
            initial: Box::new(DirichletPrior::default()),
        };
        let reranked = prf
            .rank(&inverted, &forward, &query, 10)
            .expect("prf ranking");

        let initial_ids: Vec<_> = initial.iter().map(|r| r.id).collect();
        let reranked_ids: Vec<_> = reranked.iter().map(|r| r.id).collect();
        assert_eq!(
            initial_ids, reranked_ids,
            "with lambda = 1 the feedback model is untouched"
        );
    }

    #[test]
    fn feedback_reranking_still_finds_relevant_documents() {
        let (_dir, inverted, forward) = build_mini_index();
        let query = Query::from_tokens(&inverted, &["cat"]);

        let prf = KlDivergencePrf {
            alpha: 0.5,
            lambda: 0.5,
            feedback_docs: 1,
            max_terms: 5,
            initial: Box::new(DirichletPrior::default()),
        };
        let results = prf
            .rank(&inverted, &forward, &query, 10)
            .expect("prf ranking");

        assert!(!results.is_empty());
        assert_eq!(
            results[0].id,
            common::ids::DocId(0),
            "the cat document must stay on top"
        );
    }

    #[test]
    fn empty_stage_one_returns_unchanged() {
        let (_dir, inverted, forward) = build_mini_index();
        let query = Query::new(Vec::new());

        let prf = KlDivergencePrf {
            alpha: 0.5,
            lambda: 0.5,
            feedback_docs: 2,
            max_terms: 5,
            initial: Box::new(DirichletPrior::default()),
        };
        let results = prf
            .rank(&inverted, &forward, &query, 10)
            .expect("prf ranking");
        assert!(results.is_empty());
    }
}
