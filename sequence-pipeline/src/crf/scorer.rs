use common::ids::{Identifier, LabelId};

use super::trellis::{ForwardTrellis, Matrix, Trellis};
use super::Crf;
use crate::sequence::Sequence;

/// Score matrices and trellises for one fixed sequence. The exponentiated
/// matrices feed the (normalized) forward-backward recursions; the raw
/// log-domain matrices are used for the loss and for Viterbi decoding.
#[derive(Debug, Default)]
pub struct Scorer {
    state: Matrix,
    state_exp: Matrix,
    trans: Matrix,
    trans_exp: Matrix,
    forward: Option<ForwardTrellis>,
    backward: Option<Trellis>,
    state_marginals: Option<Matrix>,
    transition_marginals: Option<Matrix>,
}

impl Scorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes both score matrices for `seq` and invalidates any
    /// previously computed trellises and marginals.
    pub fn score(&mut self, model: &Crf, seq: &Sequence) {
        self.transition_scores(model);
        self.state_scores(model, seq);
        self.forward = None;
        self.backward = None;
        self.state_marginals = None;
        self.transition_marginals = None;
    }

    pub fn transition_scores(&mut self, model: &Crf) {
        let labels = model.num_labels();
        self.trans = Matrix::new(labels, labels);
        self.trans_exp = Matrix::new(labels, labels);
        for from in 0..labels {
            for idx in model.trans_range(LabelId(from as u32)) {
                let to = model.transition(idx).index();
                self.trans
                    .set(from, to, model.trans_weight(idx) * model.scale());
            }
            for to in 0..labels {
                self.trans_exp.set(from, to, self.trans.get(from, to).exp());
            }
        }
    }

    pub fn state_scores(&mut self, model: &Crf, seq: &Sequence) {
        let labels = model.num_labels();
        self.state = Matrix::new(seq.len(), labels);
        self.state_exp = Matrix::new(seq.len(), labels);
        for t in 0..seq.len() {
            for &(fid, value) in seq[t].features() {
                let scaled = model.scale() * value;
                for idx in model.obs_range(fid) {
                    let label = model.observation(idx).index();
                    self.state.add(t, label, model.obs_weight(idx) * scaled);
                }
            }
            for label in 0..labels {
                self.state_exp.set(t, label, self.state.get(t, label).exp());
            }
        }
    }

    pub fn forward(&mut self) {
        let time_steps = self.state_exp.rows();
        let labels = self.state_exp.cols();
        let mut fwd = ForwardTrellis::new(time_steps, labels);
        if time_steps == 0 {
            self.forward = Some(fwd);
            return;
        }

        for label in 0..labels {
            fwd.set_probability(0, label, self.state_exp.get(0, label));
        }
        fwd.normalize(0);

        for t in 1..time_steps {
            for label in 0..labels {
                let score = self.state_exp.get(t, label);
                let mut sum = 0.0;
                for prev in 0..labels {
                    sum += fwd.probability(t - 1, prev) * self.trans_exp.get(prev, label);
                }
                fwd.set_probability(t, label, score * sum);
            }
            fwd.normalize(t);
        }
        self.forward = Some(fwd);
    }

    pub fn backward(&mut self) {
        if self.forward.is_none() {
            self.forward();
        }
        let Some(fwd) = &self.forward else { return };

        let time_steps = self.state_exp.rows();
        let labels = self.state_exp.cols();
        let mut bwd = Trellis::new(time_steps, labels);
        if time_steps == 0 {
            self.backward = Some(bwd);
            return;
        }

        let last = time_steps - 1;
        for label in 0..labels {
            bwd.set_probability(last, label, fwd.normalizer(last));
        }

        for t in (1..time_steps).rev() {
            for from in 0..labels {
                let mut sum = 0.0;
                for to in 0..labels {
                    sum += bwd.probability(t, to)
                        * self.state_exp.get(t, to)
                        * self.trans_exp.get(from, to);
                }
                bwd.set_probability(t - 1, from, fwd.normalizer(t - 1) * sum);
            }
        }
        self.backward = Some(bwd);
    }

    pub fn marginals(&mut self) {
        if self.forward.is_none() {
            self.forward();
        }
        if self.backward.is_none() {
            self.backward();
        }
        self.transition_marginals();
        self.state_marginals();
    }

    fn transition_marginals(&mut self) {
        let labels = self.trans_exp.rows();
        let mut marginals = Matrix::new(labels, labels);
        let (Some(fwd), Some(bwd)) = (&self.forward, &self.backward) else {
            self.transition_marginals = Some(marginals);
            return;
        };

        let time_steps = self.state_exp.rows();
        for t in 0..time_steps.saturating_sub(1) {
            for from in 0..labels {
                for to in 0..labels {
                    marginals.add(
                        from,
                        to,
                        fwd.probability(t, from)
                            * self.trans_exp.get(from, to)
                            * self.state_exp.get(t + 1, to)
                            * bwd.probability(t + 1, to),
                    );
                }
            }
        }
        self.transition_marginals = Some(marginals);
    }

    fn state_marginals(&mut self) {
        let time_steps = self.state_exp.rows();
        let labels = self.state_exp.cols();
        let mut marginals = Matrix::new(time_steps, labels);
        let (Some(fwd), Some(bwd)) = (&self.forward, &self.backward) else {
            self.state_marginals = Some(marginals);
            return;
        };

        for t in 0..time_steps {
            for label in 0..labels {
                marginals.set(
                    t,
                    label,
                    fwd.probability(t, label) * bwd.probability(t, label)
                        / fwd.normalizer(t),
                );
            }
        }
        self.state_marginals = Some(marginals);
    }

    /// `-score(x, y) + log Z(x)`; the log partition function is recovered
    /// from the forward normalizers.
    pub fn loss(&self, seq: &Sequence) -> f64 {
        let Some(fwd) = &self.forward else { return 0.0 };
        let mut prev: Option<usize> = None;
        let mut score = 0.0;
        let mut normalizer = 0.0;
        for t in 0..seq.len() {
            let Some(label) = seq[t].label() else { continue };
            let current = label.index();
            score += self.state.get(t, current);
            if let Some(prev) = prev {
                score += self.trans.get(prev, current);
            }
            normalizer += fwd.normalizer(t).ln();
            prev = Some(current);
        }
        -score - normalizer
    }

    pub fn state(&self, t: usize, label: usize) -> f64 {
        self.state.get(t, label)
    }

    pub fn state_exp(&self, t: usize, label: usize) -> f64 {
        self.state_exp.get(t, label)
    }

    pub fn trans(&self, from: usize, to: usize) -> f64 {
        self.trans.get(from, to)
    }

    pub fn trans_exp(&self, from: usize, to: usize) -> f64 {
        self.trans_exp.get(from, to)
    }

    pub fn state_marginal(&self, t: usize, label: usize) -> f64 {
        self.state_marginals
            .as_ref()
            .map_or(0.0, |m| m.get(t, label))
    }

    pub fn trans_marginal(&self, from: usize, to: usize) -> f64 {
        self.transition_marginals
            .as_ref()
            .map_or(0.0, |m| m.get(from, to))
    }

    pub fn normalizer(&self, t: usize) -> f64 {
        self.forward.as_ref().map_or(1.0, |fwd| fwd.normalizer(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crf::tests::{toy_analyzer, toy_sequence};
    use crate::crf::CrfParameters;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn trained_toy() -> (Crf, Sequence) {
        let mut analyzer = toy_analyzer();
        let seq = toy_sequence(&mut analyzer);
        let examples = vec![seq.clone()];
        let mut crf = Crf::new();
        let params = CrfParameters {
            max_iters: 5,
            calibration_samples: 1,
            calibration_trials: 2,
            ..CrfParameters::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        crf.train(params, &examples, &mut rng).expect("train");
        (crf, seq)
    }

    #[test]
    fn state_marginals_sum_to_one_at_every_step() {
        let (crf, seq) = trained_toy();
        let mut scorer = Scorer::new();
        scorer.score(&crf, &seq);
        scorer.marginals();

        for t in 0..seq.len() {
            let total: f64 = (0..crf.num_labels())
                .map(|label| scorer.state_marginal(t, label))
                .sum();
            assert!(
                (total - 1.0).abs() < 1e-9,
                "marginals at t={t} sum to {total}"
            );
            let alpha_beta: f64 = (0..crf.num_labels())
                .map(|label| {
                    scorer.forward.as_ref().expect("fwd").probability(t, label)
                        * scorer.backward.as_ref().expect("bwd").probability(t, label)
                        / scorer.normalizer(t)
                })
                .sum();
            assert!((alpha_beta - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn transition_marginals_sum_to_sequence_length_minus_one() {
        let (crf, seq) = trained_toy();
        let mut scorer = Scorer::new();
        scorer.score(&crf, &seq);
        scorer.marginals();

        let total: f64 = (0..crf.num_labels())
            .flat_map(|from| (0..crf.num_labels()).map(move |to| (from, to)))
            .map(|(from, to)| scorer.trans_marginal(from, to))
            .sum();
        assert!((total - (seq.len() as f64 - 1.0)).abs() < 1e-9);
    }

    #[test]
    fn marginals_match_brute_force_enumeration() {
        let (crf, seq) = trained_toy();
        let mut scorer = Scorer::new();
        scorer.score(&crf, &seq);
        scorer.marginals();

        let labels = crf.num_labels();
        let mut z = 0.0;
        let mut state_mass = vec![vec![0.0; labels]; seq.len()];
        let mut trans_mass = vec![vec![0.0; labels]; labels];
        for code in 0..(labels as u32).pow(seq.len() as u32) {
            let mut remaining = code;
            let mut path = Vec::with_capacity(seq.len());
            for _ in 0..seq.len() {
                path.push((remaining % labels as u32) as usize);
                remaining /= labels as u32;
            }
            let mut path_score = 0.0;
            for (t, &label) in path.iter().enumerate() {
                path_score += scorer.state(t, label);
                if t > 0 {
                    path_score += scorer.trans(path[t - 1], label);
                }
            }
            let weight = path_score.exp();
            z += weight;
            for (t, &label) in path.iter().enumerate() {
                state_mass[t][label] += weight;
                if t > 0 {
                    trans_mass[path[t - 1]][label] += weight;
                }
            }
        }

        for t in 0..seq.len() {
            for label in 0..labels {
                let expected = state_mass[t][label] / z;
                let actual = scorer.state_marginal(t, label);
                assert!(
                    (actual - expected).abs() < 1e-9,
                    "state marginal ({t},{label}): {actual} vs {expected}"
                );
            }
        }
        for from in 0..labels {
            for to in 0..labels {
                let expected = trans_mass[from][to] / z;
                let actual = scorer.trans_marginal(from, to);
                assert!(
                    (actual - expected).abs() < 1e-9,
                    "transition marginal ({from},{to}): {actual} vs {expected}"
                );
            }
        }
    }

    #[test]
    fn loss_matches_brute_force_partition_function() {
        let (crf, seq) = trained_toy();
        let mut scorer = Scorer::new();
        scorer.score(&crf, &seq);
        scorer.forward();

        // enumerate all label sequences to compute Z(x) and score(x, y)
        let labels = crf.num_labels();
        let mut z = 0.0;
        let assignments = (labels as u32).pow(seq.len() as u32);
        for code in 0..assignments {
            let mut remaining = code;
            let mut path = Vec::with_capacity(seq.len());
            for _ in 0..seq.len() {
                path.push((remaining % labels as u32) as usize);
                remaining /= labels as u32;
            }
            let mut path_score = 0.0;
            for (t, &label) in path.iter().enumerate() {
                path_score += scorer.state(t, label);
                if t > 0 {
                    path_score += scorer.trans(path[t - 1], label);
                }
            }
            z += path_score.exp();
        }

        let mut gold_score = 0.0;
        let mut prev: Option<usize> = None;
        for t in 0..seq.len() {
            let label = seq[t].label().expect("gold label").index();
            gold_score += scorer.state(t, label);
            if let Some(prev) = prev {
                gold_score += scorer.trans(prev, label);
            }
            prev = Some(label);
        }

        let expected = -gold_score + z.ln();
        let loss = scorer.loss(&seq);
        assert!(
            (loss - expected).abs() < 1e-9,
            "loss {loss} vs brute force {expected}"
        );
        assert!(loss >= -1e-12, "loss is non-negative");
    }
}
