pub mod scorer;
pub mod tagger;
pub mod trellis;
pub mod viterbi;

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::path::Path;

use common::error::AppError;
use common::ids::{FeatureId, Identifier, LabelId};
use common::io::disk_vector::{read_vector, write_vector};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::sequence::Sequence;
use self::scorer::Scorer;

const OBSERVATION_RANGES_FILE: &str = "observation_ranges.vector";
const OBSERVATIONS_FILE: &str = "observations.vector";
const OBSERVATION_WEIGHTS_FILE: &str = "observation_weights.vector";
const TRANSITION_RANGES_FILE: &str = "transition_ranges.vector";
const TRANSITIONS_FILE: &str = "transitions.vector";
const TRANSITION_WEIGHTS_FILE: &str = "transition_weights.vector";

/// Training parameters for the regularized SGD fit. `lambda` and `t0` are
/// derived during training (`lambda = 2 c2 / n`, `t0` from calibration).
#[derive(Debug, Clone)]
pub struct CrfParameters {
    pub c2: f64,
    pub lambda: f64,
    pub max_iters: u64,
    pub period: u64,
    pub delta: f64,
    pub calibration_samples: usize,
    pub calibration_trials: usize,
    pub calibration_eta: f64,
    pub calibration_rate: f64,
    pub t0: f64,
}

impl Default for CrfParameters {
    fn default() -> Self {
        Self {
            c2: 1.0,
            lambda: 0.0,
            max_iters: 1000,
            period: 10,
            delta: 1e-5,
            calibration_samples: 1000,
            calibration_trials: 10,
            calibration_eta: 0.1,
            calibration_rate: 2.0,
            t0: 0.0,
        }
    }
}

/// Linear-chain conditional random field with node-observation features
/// only, fit by L2-regularized stochastic gradient descent.
///
/// The parameter store is an inverted file over features: for a feature id
/// `f`, `obs_range(f)` is the contiguous run of internal ids whose source
/// is `f`; `observations[i]` gives each internal id's target label and
/// `observation_weights[i]` its weight. Transitions are laid out the same
/// way, keyed by the previous label.
///
/// Weights carry an implicit global `scale` factor so the L2 shrink does
/// not have to touch every weight per update; user-visible reads must
/// multiply by `scale()`, and `rescale()` folds the factor back in.
#[derive(Debug, Default)]
pub struct Crf {
    observation_ranges: Vec<u64>,
    observations: Vec<LabelId>,
    observation_weights: Vec<f64>,
    transition_ranges: Vec<u64>,
    transitions: Vec<LabelId>,
    transition_weights: Vec<f64>,
    num_labels: usize,
    scale: f64,
}

impl Crf {
    pub fn new() -> Self {
        Self {
            scale: 1.0,
            ..Self::default()
        }
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Internal ids whose source observation feature is `fid`. Unknown
    /// feature ids (the analyzer's sentinel included) yield an empty range.
    pub fn obs_range(&self, fid: FeatureId) -> Range<usize> {
        let i = fid.index();
        if i + 1 >= self.observation_ranges.len() {
            return 0..0;
        }
        self.observation_ranges[i] as usize..self.observation_ranges[i + 1] as usize
    }

    pub fn trans_range(&self, label: LabelId) -> Range<usize> {
        let i = label.index();
        if i + 1 >= self.transition_ranges.len() {
            return 0..0;
        }
        self.transition_ranges[i] as usize..self.transition_ranges[i + 1] as usize
    }

    pub fn observation(&self, idx: usize) -> LabelId {
        self.observations[idx]
    }

    pub fn transition(&self, idx: usize) -> LabelId {
        self.transitions[idx]
    }

    pub fn obs_weight(&self, idx: usize) -> f64 {
        self.observation_weights[idx]
    }

    pub fn trans_weight(&self, idx: usize) -> f64 {
        self.transition_weights[idx]
    }

    /// Sizes and zero-fills the parameter store from one scan of the
    /// training data.
    pub fn initialize(&mut self, examples: &[Sequence]) {
        let mut obs_feats: BTreeMap<u64, BTreeSet<u32>> = BTreeMap::new();
        let mut trans_feats: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        let mut num_labels = 0usize;

        for seq in examples {
            let mut prev: Option<u32> = None;
            for obs in seq {
                let Some(label) = obs.label() else { continue };
                num_labels = num_labels.max(label.index() + 1);
                for &(fid, _) in obs.features() {
                    obs_feats.entry(fid.raw()).or_default().insert(label.0);
                }
                if let Some(prev) = prev {
                    trans_feats.entry(prev).or_default().insert(label.0);
                }
                prev = Some(label.0);
            }
        }

        let num_features = obs_feats
            .keys()
            .next_back()
            .map_or(0, |&fid| fid as usize + 1);

        self.observation_ranges = Vec::with_capacity(num_features + 1);
        self.observations = Vec::new();
        let mut total = 0u64;
        for fid in 0..num_features as u64 {
            self.observation_ranges.push(total);
            if let Some(labels) = obs_feats.get(&fid) {
                total += labels.len() as u64;
                self.observations.extend(labels.iter().map(|&l| LabelId(l)));
            }
        }
        self.observation_ranges.push(total);
        self.observation_weights = vec![0.0; total as usize];

        self.transition_ranges = Vec::with_capacity(num_labels + 1);
        self.transitions = Vec::new();
        let mut total = 0u64;
        for label in 0..num_labels as u32 {
            self.transition_ranges.push(total);
            if let Some(labels) = trans_feats.get(&label) {
                total += labels.len() as u64;
                self.transitions.extend(labels.iter().map(|&l| LabelId(l)));
            }
        }
        self.transition_ranges.push(total);
        self.transition_weights = vec![0.0; total as usize];

        self.num_labels = num_labels;
        self.scale = 1.0;
        info!(
            features = self.observation_weights.len() + self.transition_weights.len(),
            labels = num_labels,
            "Sized parameter store"
        );
    }

    pub fn reset(&mut self) {
        self.observation_weights.fill(0.0);
        self.transition_weights.fill(0.0);
        self.scale = 1.0;
    }

    /// Trains on the analyzed examples and returns the final regularized
    /// loss. The caller provides the randomness used for shuffling and
    /// calibration sampling.
    pub fn train<R: Rng>(
        &mut self,
        mut params: CrfParameters,
        examples: &[Sequence],
        rng: &mut R,
    ) -> Result<f64, AppError> {
        if examples.is_empty() {
            return Err(AppError::InvalidParameter(
                "cannot train a crf on an empty example set".to_string(),
            ));
        }
        if params.c2 <= 0.0 {
            return Err(AppError::InvalidParameter(format!(
                "crf c2 must be > 0 (got {})",
                params.c2
            )));
        }
        if params.period == 0 {
            return Err(AppError::InvalidParameter(
                "crf period must be at least 1".to_string(),
            ));
        }
        if params.calibration_eta <= 0.0 || params.calibration_rate <= 1.0 {
            return Err(AppError::InvalidParameter(format!(
                "crf calibration requires eta > 0 and rate > 1 (got eta={}, rate={})",
                params.calibration_eta, params.calibration_rate
            )));
        }
        self.initialize(examples);
        params.lambda = 2.0 * params.c2 / examples.len() as f64;

        let mut indices: Vec<usize> = (0..examples.len()).collect();
        indices.shuffle(rng);

        let mut scorer = Scorer::new();
        params.t0 = self.calibrate(&params, &indices, examples, &mut scorer);

        let mut old_loss = vec![0.0; params.period as usize];
        let mut loss = 0.0;
        for iter in 1..=params.max_iters {
            indices.shuffle(rng);
            loss = self.epoch(&params, iter - 1, &indices, examples, &mut scorer);
            if self.scale < 1e-9 {
                self.rescale();
            }
            let l2 = self.l2norm();
            loss += 0.5 * l2 * params.lambda * examples.len() as f64;
            if !loss.is_finite() {
                return Err(AppError::NonFiniteLoss(loss));
            }

            let slot = ((iter - 1) % params.period) as usize;
            if iter > params.period {
                let improvement = (old_loss[slot] - loss) / loss;
                debug!(epoch = iter, loss, l2norm = l2.sqrt(), improvement, "Epoch complete");
                if iter % params.period == 0 && improvement < params.delta {
                    info!(epoch = iter, loss, "Converged");
                    self.rescale();
                    return Ok(loss);
                }
            } else {
                debug!(epoch = iter, loss, l2norm = l2.sqrt(), "Epoch complete");
            }
            old_loss[slot] = loss;
        }
        self.rescale();
        Ok(loss)
    }

    /// Searches for a learning rate by trialing candidates on a small
    /// sample, keeping the loss-minimizing eta; returns the corresponding
    /// learning-rate offset `t0 = 1 / (lambda * eta)`.
    fn calibrate(
        &mut self,
        params: &CrfParameters,
        indices: &[usize],
        examples: &[Sequence],
        scorer: &mut Scorer,
    ) -> f64 {
        let num_samples = params.calibration_samples.min(indices.len());
        let samples = &indices[..num_samples];

        let mut initial_loss = 0.0;
        for &idx in samples {
            let seq = &examples[idx];
            scorer.score(self, seq);
            scorer.forward();
            initial_loss += scorer.loss(seq);
        }
        debug!(initial_loss, samples = num_samples, "Calibration baseline");

        let mut eta = params.calibration_eta;
        let mut best_eta = eta;
        let mut best_loss = initial_loss;
        let mut trial = 0;
        let mut attempts = 0;
        let mut increase = true;
        while trial < params.calibration_trials && attempts < params.calibration_trials * 10 {
            attempts += 1;
            self.reset();
            let mut candidate = params.clone();
            candidate.t0 = 1.0 / (candidate.lambda * eta);

            let mut loss = self.epoch(&candidate, 0, samples, examples, scorer);
            loss += 0.5 * self.l2norm() * candidate.lambda * examples.len() as f64;

            if loss.is_finite() && loss < initial_loss {
                debug!(trial, eta, loss, "Calibration trial improved on baseline");
                trial += 1;
                if loss < best_loss {
                    best_eta = eta;
                    best_loss = loss;
                }
                if increase {
                    eta *= params.calibration_rate;
                } else {
                    eta /= params.calibration_rate;
                }
            } else {
                debug!(trial, eta, loss, "Calibration trial worse than baseline");
                increase = false;
                eta /= params.calibration_rate;
            }
        }

        info!(eta = best_eta, "Picked learning rate");
        self.reset();
        1.0 / (params.lambda * best_eta)
    }

    fn epoch(
        &mut self,
        params: &CrfParameters,
        iter: u64,
        indices: &[usize],
        examples: &[Sequence],
        scorer: &mut Scorer,
    ) -> f64 {
        let mut sum_loss = 0.0;
        for (i, &idx) in indices.iter().enumerate() {
            let step = iter * indices.len() as u64 + i as u64;
            sum_loss += self.iteration(params, step, &examples[idx], scorer);
        }
        sum_loss
    }

    fn iteration(
        &mut self,
        params: &CrfParameters,
        step: u64,
        seq: &Sequence,
        scorer: &mut Scorer,
    ) -> f64 {
        let lr = 1.0 / (params.lambda * (params.t0 + step as f64));
        self.scale *= 1.0 - params.lambda * lr;
        let gain = lr / self.scale;

        scorer.score(self, seq);
        scorer.marginals();

        self.gradient_observation_expectation(seq, gain);
        self.gradient_model_expectation(seq, -gain, scorer);

        scorer.loss(seq)
    }

    /// Adds `gain` to every weight fired by the gold labeling.
    fn gradient_observation_expectation(&mut self, seq: &Sequence, gain: f64) {
        let mut prev: Option<LabelId> = None;
        for obs in seq {
            let Some(label) = obs.label() else { continue };
            for &(fid, value) in obs.features() {
                for idx in self.obs_range(fid) {
                    if self.observations[idx] == label {
                        self.observation_weights[idx] += gain * value;
                        break;
                    }
                }
            }
            if let Some(prev) = prev {
                for idx in self.trans_range(prev) {
                    if self.transitions[idx] == label {
                        self.transition_weights[idx] += gain;
                        break;
                    }
                }
            }
            prev = Some(label);
        }
    }

    /// Adds `gain * marginal` to every weight fired under the model
    /// distribution.
    fn gradient_model_expectation(&mut self, seq: &Sequence, gain: f64, scorer: &Scorer) {
        for t in 0..seq.len() {
            for &(fid, value) in seq[t].features() {
                for idx in self.obs_range(fid) {
                    let label = self.observations[idx];
                    self.observation_weights[idx] +=
                        gain * value * scorer.state_marginal(t, label.index());
                }
            }
        }

        for from in 0..self.num_labels {
            for idx in self.trans_range(LabelId(from as u32)) {
                let to = self.transitions[idx];
                self.transition_weights[idx] += gain * scorer.trans_marginal(from, to.index());
            }
        }
    }

    /// Squared L2 norm of the true (scaled) weights.
    pub fn l2norm(&self) -> f64 {
        let norm: f64 = self
            .observation_weights
            .iter()
            .chain(self.transition_weights.iter())
            .map(|w| w * w)
            .sum();
        norm * self.scale * self.scale
    }

    /// Folds the implicit scale factor into the stored weights.
    pub fn rescale(&mut self) {
        for weight in &mut self.observation_weights {
            *weight *= self.scale;
        }
        for weight in &mut self.transition_weights {
            *weight *= self.scale;
        }
        self.scale = 1.0;
    }

    pub fn save(&self, prefix: &Path) -> Result<(), AppError> {
        std::fs::create_dir_all(prefix)?;
        write_vector(&prefix.join(OBSERVATION_RANGES_FILE), &self.observation_ranges)?;
        let observations: Vec<u32> = self.observations.iter().map(|l| l.0).collect();
        write_vector(&prefix.join(OBSERVATIONS_FILE), &observations)?;
        write_vector(
            &prefix.join(OBSERVATION_WEIGHTS_FILE),
            &self.observation_weights,
        )?;
        write_vector(&prefix.join(TRANSITION_RANGES_FILE), &self.transition_ranges)?;
        let transitions: Vec<u32> = self.transitions.iter().map(|l| l.0).collect();
        write_vector(&prefix.join(TRANSITIONS_FILE), &transitions)?;
        write_vector(
            &prefix.join(TRANSITION_WEIGHTS_FILE),
            &self.transition_weights,
        )?;
        Ok(())
    }

    pub fn load(prefix: &Path) -> Result<Self, AppError> {
        let observation_ranges = read_vector::<u64>(&prefix.join(OBSERVATION_RANGES_FILE))?;
        let observations = read_vector::<u32>(&prefix.join(OBSERVATIONS_FILE))?
            .into_iter()
            .map(LabelId)
            .collect::<Vec<_>>();
        let observation_weights = read_vector::<f64>(&prefix.join(OBSERVATION_WEIGHTS_FILE))?;
        let transition_ranges = read_vector::<u64>(&prefix.join(TRANSITION_RANGES_FILE))?;
        let transitions = read_vector::<u32>(&prefix.join(TRANSITIONS_FILE))?
            .into_iter()
            .map(LabelId)
            .collect::<Vec<_>>();
        let transition_weights = read_vector::<f64>(&prefix.join(TRANSITION_WEIGHTS_FILE))?;

        if observations.len() != observation_weights.len()
            || transitions.len() != transition_weights.len()
        {
            return Err(AppError::CorruptModel {
                path: prefix.to_path_buf(),
                detail: "weight arrays and label arrays disagree in length".to_string(),
            });
        }

        let num_labels = transition_ranges.len().saturating_sub(1);
        Ok(Self {
            observation_ranges,
            observations,
            observation_weights,
            transition_ranges,
            transitions,
            transition_weights,
            num_labels,
            scale: 1.0,
        })
    }
}
