use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use common::error::AppError;
use common::ids::{DocId, TermId};
use index_pipeline::{ForwardIndex, InvertedIndex};
use serde::{Deserialize, Serialize};

use crate::bm25::{OkapiBm25, DEFAULT_B, DEFAULT_K1, DEFAULT_K3};
use crate::kl_prf;
use crate::lm::{DirichletPrior, JelinekMercer, DEFAULT_LAMBDA, DEFAULT_MU};
use crate::pivoted::{PivotedLength, DEFAULT_S};
use crate::score_data::ScoreData;
use crate::top_k::{top_k, SearchResult};

/// Scores one (term, document) pair. The framework sums contributions
/// across query terms per candidate document, seeding each document with
/// `initial_score`. Rankers are plain parameter bundles, so they are
/// shared freely across scoring threads.
pub trait Ranker: Send + Sync {
    fn score_one(&self, sd: &ScoreData) -> f64;

    fn initial_score(&self, _sd: &ScoreData) -> f64 {
        0.0
    }
}

/// A query as a weighted multiset of terms.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub weights: Vec<(TermId, f64)>,
    pub length: f64,
}

impl Query {
    pub fn new(weights: Vec<(TermId, f64)>) -> Self {
        let length = weights.iter().map(|&(_, w)| w).sum();
        Self { weights, length }
    }

    /// Builds a query from raw tokens; tokens never seen by the index are
    /// dropped (they cannot contribute to any document's score).
    pub fn from_tokens<S: AsRef<str>>(index: &InvertedIndex, tokens: &[S]) -> Self {
        let mut counts: HashMap<TermId, f64> = HashMap::new();
        for token in tokens {
            if let Some(term) = index.term_id(token.as_ref()) {
                *counts.entry(term).or_insert(0.0) += 1.0;
            }
        }
        let mut weights: Vec<_> = counts.into_iter().collect();
        weights.sort_unstable_by_key(|&(term, _)| term);
        Self::new(weights)
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Tagged ranker configuration: the `[ranker]` config section deserializes
/// straight into this, and saved rankers round-trip through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum RankerSpec {
    Bm25 {
        #[serde(default = "default_k1")]
        k1: f64,
        #[serde(default = "default_b")]
        b: f64,
        #[serde(default = "default_k3")]
        k3: f64,
    },
    PivotedLength {
        #[serde(default = "default_s")]
        s: f64,
    },
    DirichletPrior {
        #[serde(default = "default_mu")]
        mu: f64,
    },
    JelinekMercer {
        #[serde(default = "default_lambda")]
        lambda: f64,
    },
    KlDivergencePrf {
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default = "default_prf_lambda")]
        lambda: f64,
        #[serde(default = "default_feedback_docs")]
        k: u64,
        #[serde(default = "default_max_terms")]
        max_terms: u64,
        #[serde(default)]
        feedback: FeedbackSpec,
    },
}

fn default_k1() -> f64 {
    DEFAULT_K1
}

fn default_b() -> f64 {
    DEFAULT_B
}

fn default_k3() -> f64 {
    DEFAULT_K3
}

fn default_s() -> f64 {
    DEFAULT_S
}

fn default_mu() -> f64 {
    DEFAULT_MU
}

fn default_lambda() -> f64 {
    DEFAULT_LAMBDA
}

fn default_alpha() -> f64 {
    kl_prf::DEFAULT_ALPHA
}

fn default_prf_lambda() -> f64 {
    kl_prf::DEFAULT_PRF_LAMBDA
}

fn default_feedback_docs() -> u64 {
    kl_prf::DEFAULT_FEEDBACK_DOCS
}

fn default_max_terms() -> u64 {
    kl_prf::DEFAULT_MAX_TERMS
}

/// The language-model ranker used for both stages of pseudo-relevance
/// feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum FeedbackSpec {
    DirichletPrior {
        #[serde(default = "default_mu")]
        mu: f64,
    },
    JelinekMercer {
        #[serde(default = "default_lambda")]
        lambda: f64,
    },
}

impl Default for FeedbackSpec {
    fn default() -> Self {
        Self::DirichletPrior { mu: DEFAULT_MU }
    }
}

impl Default for RankerSpec {
    fn default() -> Self {
        Self::Bm25 {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            k3: DEFAULT_K3,
        }
    }
}

impl FeedbackSpec {
    pub fn build(&self) -> Result<Box<dyn Ranker>, AppError> {
        match *self {
            Self::DirichletPrior { mu } => Ok(Box::new(DirichletPrior::new(mu)?)),
            Self::JelinekMercer { lambda } => Ok(Box::new(JelinekMercer::new(lambda)?)),
        }
    }
}

impl RankerSpec {
    /// Constructs the ranker, validating its parameters. The feedback
    /// variant is driven through [`rank`] instead since it needs both
    /// index views.
    pub fn build(&self) -> Result<Box<dyn Ranker>, AppError> {
        match *self {
            Self::Bm25 { k1, b, k3 } => Ok(Box::new(OkapiBm25::new(k1, b, k3)?)),
            Self::PivotedLength { s } => Ok(Box::new(PivotedLength::new(s)?)),
            Self::DirichletPrior { mu } => Ok(Box::new(DirichletPrior::new(mu)?)),
            Self::JelinekMercer { lambda } => Ok(Box::new(JelinekMercer::new(lambda)?)),
            Self::KlDivergencePrf { .. } => Err(AppError::InvalidParameter(
                "kl-divergence-prf is two-stage; rank it through rank()".to_string(),
            )),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self).map_err(|e| AppError::CorruptModel {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let reader = BufReader::new(File::open(path)?);
        serde_json::from_reader(reader).map_err(|e| AppError::CorruptModel {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

/// Ranks the corpus against `query`, returning the top `k` results in
/// descending score order. The forward index is only consulted by the
/// feedback ranker.
pub fn rank(
    spec: &RankerSpec,
    inverted: &InvertedIndex,
    forward: Option<&ForwardIndex>,
    query: &Query,
    k: usize,
) -> Result<Vec<SearchResult>, AppError> {
    match spec {
        RankerSpec::KlDivergencePrf {
            alpha,
            lambda,
            k: feedback_docs,
            max_terms,
            feedback,
        } => {
            let forward = forward.ok_or_else(|| {
                AppError::InvalidParameter(
                    "kl-divergence-prf requires a forward index".to_string(),
                )
            })?;
            let prf = kl_prf::KlDivergencePrf {
                alpha: *alpha,
                lambda: *lambda,
                feedback_docs: *feedback_docs,
                max_terms: *max_terms,
                initial: feedback.build()?,
            };
            prf.validate()?;
            prf.rank(inverted, forward, query, k)
        }
        _ => {
            let ranker = spec.build()?;
            score_query(ranker.as_ref(), inverted, query, k)
        }
    }
}

/// Document-at-a-time accumulation over the union of the query terms'
/// postings lists.
pub fn score_query(
    ranker: &dyn Ranker,
    index: &InvertedIndex,
    query: &Query,
    k: usize,
) -> Result<Vec<SearchResult>, AppError> {
    let inner = index.inner();
    let num_docs = inner.num_docs();
    let avg_dl = inner.avg_doc_length();
    let total_terms = inner.total_terms();

    let mut scores: HashMap<u64, f64> = HashMap::new();
    for &(term, qtf) in &query.weights {
        let postings = index.postings(term)?;
        if postings.is_empty() {
            continue;
        }
        let doc_count = postings.doc_count();
        let corpus_term_count = postings.total_count();
        for &(doc, tf) in postings.counts() {
            let doc_size = inner.doc_size(doc).unwrap_or(0);
            let sd = ScoreData {
                doc_count,
                corpus_term_count,
                num_docs,
                doc_size,
                avg_dl,
                doc_term_count: tf,
                query_term_weight: qtf,
                query_length: query.length,
                total_terms,
            };
            let entry = scores.entry(doc.0).or_insert_with(|| {
                let doc_sd = ScoreData {
                    num_docs,
                    doc_size,
                    avg_dl,
                    query_length: query.length,
                    total_terms,
                    ..ScoreData::default()
                };
                ranker.initial_score(&doc_sd)
            });
            *entry += ranker.score_one(&sd);
        }
    }

    Ok(top_k(scores.into_iter().map(|(d, s)| (DocId(d), s)), k))
}
