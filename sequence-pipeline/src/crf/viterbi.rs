use super::scorer::Scorer;
use super::trellis::ViterbiTrellis;
use super::Crf;
use crate::sequence::Sequence;

/// Viterbi decoding over the log-domain score matrices. Transition scores
/// depend only on the (fixed) model, so they are computed once per scorer
/// rather than once per sequence.
pub struct ViterbiScorer<'a> {
    model: &'a Crf,
    scorer: Scorer,
}

impl<'a> ViterbiScorer<'a> {
    pub fn new(model: &'a Crf) -> Self {
        let mut scorer = Scorer::new();
        scorer.transition_scores(model);
        Self { model, scorer }
    }

    /// Fills the max-score trellis for `seq`, storing a back-pointer at
    /// every cell.
    pub fn viterbi(&mut self, seq: &Sequence) -> ViterbiTrellis {
        self.scorer.state_scores(self.model, seq);

        let labels = self.model.num_labels();
        let mut table = ViterbiTrellis::new(seq.len(), labels);
        if seq.is_empty() || labels == 0 {
            return table;
        }

        for label in 0..labels {
            table.set_probability(0, label, self.scorer.state(0, label));
        }

        for t in 1..seq.len() {
            for label in 0..labels {
                let mut max_score = f64::NEG_INFINITY;
                for prev in 0..labels {
                    let score = table.probability(t - 1, prev) + self.scorer.trans(prev, label);
                    if score > max_score {
                        max_score = score;
                        table.set_previous_tag(t, label, prev);
                    }
                }
                table.set_probability(t, label, max_score + self.scorer.state(t, label));
            }
        }
        table
    }
}
