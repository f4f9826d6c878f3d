use common::ids::{Identifier, LabelId};
use rayon::prelude::*;

use super::viterbi::ViterbiScorer;
use super::Crf;
use crate::sequence::Sequence;

/// Assigns the maximum-scoring labeling to sequences by walking the
/// Viterbi back-pointers from the best final label.
pub struct Tagger<'a> {
    scorer: ViterbiScorer<'a>,
    num_labels: usize,
}

impl<'a> Tagger<'a> {
    pub fn new(model: &'a Crf) -> Self {
        Self {
            scorer: ViterbiScorer::new(model),
            num_labels: model.num_labels(),
        }
    }

    pub fn tag(&mut self, seq: &mut Sequence) {
        if seq.is_empty() || self.num_labels == 0 {
            return;
        }
        let trellis = self.scorer.viterbi(seq);

        let last = seq.len() - 1;
        let mut best_label = 0;
        let mut best_score = f64::NEG_INFINITY;
        for label in 0..self.num_labels {
            let score = trellis.probability(last, label);
            if score > best_score {
                best_score = score;
                best_label = label;
            }
        }
        if let Some(obs) = seq.get_mut(last) {
            obs.set_label(LabelId(best_label as u32));
        }

        for t in (1..seq.len()).rev() {
            let current = seq[t].label().map_or(0, Identifier::index);
            let previous = trellis.previous_tag(t, current);
            if let Some(obs) = seq.get_mut(t - 1) {
                obs.set_label(LabelId(previous as u32));
            }
        }
    }
}

/// Counts from decoding a labeled corpus with a trained model.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggingEval {
    pub total_tokens: u64,
    pub correct_tokens: u64,
    pub total_sequences: u64,
    pub correct_sequences: u64,
}

impl TaggingEval {
    pub fn token_accuracy(&self) -> f64 {
        if self.total_tokens == 0 {
            0.0
        } else {
            self.correct_tokens as f64 / self.total_tokens as f64
        }
    }

    pub fn sequence_accuracy(&self) -> f64 {
        if self.total_sequences == 0 {
            0.0
        } else {
            self.correct_sequences as f64 / self.total_sequences as f64
        }
    }

    fn combine(self, other: Self) -> Self {
        Self {
            total_tokens: self.total_tokens + other.total_tokens,
            correct_tokens: self.correct_tokens + other.correct_tokens,
            total_sequences: self.total_sequences + other.total_sequences,
            correct_sequences: self.correct_sequences + other.correct_sequences,
        }
    }
}

/// Decodes every sequence and tallies token- and sequence-level accuracy
/// against the gold labels. Sequences are scored in parallel; each worker
/// decodes with its own tagger against the shared immutable model.
pub fn evaluate(model: &Crf, sequences: &[Sequence]) -> TaggingEval {
    sequences
        .par_iter()
        .map_init(
            || Tagger::new(model),
            |tagger, seq| {
                let mut decoded = seq.clone();
                tagger.tag(&mut decoded);
                let mut eval = TaggingEval::default();
                let mut all_correct = true;
                for (gold, predicted) in seq.iter().zip(decoded.iter()) {
                    if let Some(gold_label) = gold.label() {
                        eval.total_tokens += 1;
                        if predicted.label() == Some(gold_label) {
                            eval.correct_tokens += 1;
                        } else {
                            all_correct = false;
                        }
                    }
                }
                if eval.total_tokens > 0 {
                    eval.total_sequences = 1;
                    if all_correct {
                        eval.correct_sequences = 1;
                    }
                }
                eval
            },
        )
        .reduce(TaggingEval::default, TaggingEval::combine)
}

pub fn token_accuracy(model: &Crf, sequences: &[Sequence]) -> f64 {
    evaluate(model, sequences).token_accuracy()
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
            max_iters: 50,
            calibration_samples: 1,
            calibration_trials: 2,
            ..CrfParameters::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        crf.train(params, &examples, &mut rng).expect("train");
        (crf, seq)
    }

    #[test]
    fn viterbi_matches_brute_force_argmax() {
        let (crf, seq) = trained_toy();

        let mut scorer = crate::crf::scorer::Scorer::new();
        scorer.score(&crf, &seq);

        // brute-force the best labeling
        let labels = crf.num_labels();
        let mut best_path = Vec::new();
        let mut best_score = f64::NEG_INFINITY;
        let assignments = (labels as u32).pow(seq.len() as u32);
        for code in 0..assignments {
            let mut remaining = code;
            let mut path = Vec::with_capacity(seq.len());
            for _ in 0..seq.len() {
                path.push((remaining % labels as u32) as usize);
                remaining /= labels as u32;
            }
            let mut score = 0.0;
            for (t, &label) in path.iter().enumerate() {
                score += scorer.state(t, label);
                if t > 0 {
                    score += scorer.trans(path[t - 1], label);
                }
            }
            if score > best_score {
                best_score = score;
                best_path = path;
            }
        }

        let mut decoded = seq.clone();
        let mut tagger = Tagger::new(&crf);
        tagger.tag(&mut decoded);
        let viterbi_path: Vec<usize> = decoded
            .iter()
            .map(|o| o.label().expect("tagged").index())
            .collect();

        assert_eq!(viterbi_path, best_path, "viterbi must find the argmax labeling");
    }

    #[test]
    fn accuracy_is_perfect_on_the_training_sequence() {
        let (crf, seq) = trained_toy();
        let accuracy = token_accuracy(&crf, &[seq]);
        assert!(
            (accuracy - 1.0).abs() < f64::EPSILON,
            "memorized sequence decodes exactly (got {accuracy})"
        );
    }

    #[test]
    fn evaluation_tallies_tokens_and_sequences() {
        let (crf, seq) = trained_toy();
        let eval = evaluate(&crf, &[seq.clone(), seq]);
        assert_eq!(eval.total_sequences, 2);
        assert_eq!(eval.correct_sequences, 2);
        assert_eq!(eval.total_tokens, 6);
        assert_eq!(eval.correct_tokens, 6);
        assert!((eval.sequence_accuracy() - 1.0).abs() < f64::EPSILON);
    }
}
