use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

#[derive(Clone, Deserialize, Debug, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub rank: RankConfig,
    #[serde(default)]
    pub crf: CrfConfig,
    #[serde(default)]
    pub sequence: SequenceConfig,
}

#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CacheKind {
    #[default]
    Splay,
    NoEvict,
}

#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CorpusKind {
    /// One `.txt` file per document.
    #[default]
    Directory,
    /// One document per line of a single file.
    Line,
}

#[derive(Clone, Deserialize, Debug)]
pub struct IndexConfig {
    #[serde(default = "default_corpus")]
    pub corpus: String,
    #[serde(default)]
    pub corpus_kind: CorpusKind,
    #[serde(default = "default_inverted_path")]
    pub inverted_path: String,
    #[serde(default = "default_forward_path")]
    pub forward_path: String,
    #[serde(default = "default_chunk_budget_bytes")]
    pub chunk_budget_bytes: u64,
    #[serde(default)]
    pub cache: CacheKind,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_corpus() -> String {
    "./corpus".to_string()
}

fn default_inverted_path() -> String {
    "./index/inverted".to_string()
}

fn default_forward_path() -> String {
    "./index/forward".to_string()
}

fn default_chunk_budget_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_cache_capacity() -> usize {
    10_000
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            corpus: default_corpus(),
            corpus_kind: CorpusKind::default(),
            inverted_path: default_inverted_path(),
            forward_path: default_forward_path(),
            chunk_budget_bytes: default_chunk_budget_bytes(),
            cache: CacheKind::default(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct RankConfig {
    #[serde(default = "default_queries")]
    pub queries: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub report: Option<String>,
    /// Optional relevance judgments (`query_number<TAB>doc_name` lines)
    /// for precision@k reporting.
    #[serde(default)]
    pub qrels: Option<String>,
}

fn default_queries() -> String {
    "./queries.txt".to_string()
}

fn default_k() -> usize {
    10
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            queries: default_queries(),
            k: default_k(),
            report: None,
            qrels: None,
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CrfConfig {
    #[serde(default = "default_crf_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub train: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default = "default_c2")]
    pub c2: f64,
    #[serde(default = "default_max_iters")]
    pub max_iters: u64,
    #[serde(default = "default_period")]
    pub period: u64,
    #[serde(default = "default_delta")]
    pub delta: f64,
    #[serde(default = "default_calibration_samples")]
    pub calibration_samples: usize,
    #[serde(default = "default_calibration_trials")]
    pub calibration_trials: usize,
    #[serde(default = "default_calibration_eta")]
    pub calibration_eta: f64,
    #[serde(default = "default_calibration_rate")]
    pub calibration_rate: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_crf_prefix() -> String {
    "./crf-model".to_string()
}

fn default_c2() -> f64 {
    1.0
}

fn default_max_iters() -> u64 {
    1000
}

fn default_period() -> u64 {
    10
}

fn default_delta() -> f64 {
    1e-5
}

fn default_calibration_samples() -> usize {
    1000
}

fn default_calibration_trials() -> usize {
    10
}

fn default_calibration_eta() -> f64 {
    0.1
}

fn default_calibration_rate() -> f64 {
    2.0
}

fn default_seed() -> u64 {
    42
}

impl Default for CrfConfig {
    fn default() -> Self {
        Self {
            prefix: default_crf_prefix(),
            train: None,
            test: None,
            c2: default_c2(),
            max_iters: default_max_iters(),
            period: default_period(),
            delta: default_delta(),
            calibration_samples: default_calibration_samples(),
            calibration_trials: default_calibration_trials(),
            calibration_eta: default_calibration_eta(),
            calibration_rate: default_calibration_rate(),
            seed: default_seed(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct SequenceConfig {
    #[serde(default = "default_sequence_method")]
    pub method: String,
}

fn default_sequence_method() -> String {
    "default-pos".to_string()
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            method: default_sequence_method(),
        }
    }
}

/// Reads one optional section of the raw config into a type owned by
/// another crate (the `[ranker]` table); a missing section is `None`, a
/// malformed one is an error.
pub fn get_section<T: serde::de::DeserializeOwned>(
    raw: &Config,
    key: &str,
) -> Result<Option<T>, AppError> {
    match raw.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Builds the raw layered configuration for a run. Callers that need
/// sections owned by other crates (the `[ranker]` table) deserialize them
/// from this value directly.
pub fn load_raw(path: &str) -> Result<Config, AppError> {
    let config = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::default())
        .build()?;
    Ok(config)
}

pub fn get_config(path: &str) -> Result<AppConfig, AppError> {
    Ok(load_raw(path)?.try_deserialize()?)
}
