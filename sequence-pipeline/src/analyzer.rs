use std::path::Path;

use common::error::AppError;
use common::ids::{FeatureId, LabelId};
use common::mapping::VocabMap;

use crate::sequence::Sequence;

const FEATURE_MAPPING_FILE: &str = "feature.mapping";
const LABEL_MAPPING_FILE: &str = "label.mapping";

/// Observation functions inspect the sequence around position `t` and
/// register features through the collector. They may look at symbols only,
/// never at tags.
pub type ObservationFn = Box<dyn Fn(&Sequence, usize, &mut Collector<'_>) + Send + Sync>;

/// Gathers the features one observation fires. On `finish` the features
/// are sorted by id and duplicates are summed; in read-only mode features
/// that resolved to the unseen sentinel are dropped.
pub struct Collector<'a> {
    mode: CollectorMode<'a>,
    features: Vec<(FeatureId, f64)>,
}

enum CollectorMode<'a> {
    Assigning(&'a mut VocabMap<FeatureId>),
    ReadOnly(&'a VocabMap<FeatureId>),
}

impl Collector<'_> {
    pub fn add(&mut self, feature: &str, weight: f64) {
        let id = match &mut self.mode {
            CollectorMode::Assigning(map) => map.get_or_insert(feature),
            CollectorMode::ReadOnly(map) => map.id(feature).unwrap_or_else(|| map.sentinel()),
        };
        self.features.push((id, weight));
    }

    fn finish(mut self) -> Vec<(FeatureId, f64)> {
        if let CollectorMode::ReadOnly(map) = &self.mode {
            let sentinel = map.sentinel();
            self.features.retain(|&(id, _)| id != sentinel);
        }
        self.features.sort_unstable_by_key(|&(id, _)| id);
        self.features.dedup_by(|curr, prev| {
            if curr.0 == prev.0 {
                prev.1 += curr.1;
                true
            } else {
                false
            }
        });
        self.features
    }
}

/// Turns raw sequences into featurized, label-mapped ones by running a set
/// of observation functions over every position. Owns the feature and
/// label bijections.
pub struct SequenceAnalyzer {
    features: VocabMap<FeatureId>,
    labels: VocabMap<LabelId>,
    observation_fns: Vec<ObservationFn>,
}

impl Default for SequenceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceAnalyzer {
    pub fn new() -> Self {
        Self {
            features: VocabMap::new(),
            labels: VocabMap::new(),
            observation_fns: Vec::new(),
        }
    }

    pub fn add_observation_fn(
        &mut self,
        function: impl Fn(&Sequence, usize, &mut Collector<'_>) + Send + Sync + 'static,
    ) {
        self.observation_fns.push(Box::new(function));
    }

    /// Training mode: assigns fresh ids to unseen features and tags.
    pub fn analyze(&mut self, sequence: &mut Sequence) {
        for t in 0..sequence.len() {
            if let Some(tag) = sequence[t].tag().map(str::to_owned) {
                let label = self.labels.get_or_insert(&tag);
                if let Some(obs) = sequence.get_mut(t) {
                    obs.set_label(label);
                }
            }
            let mut collector = Collector {
                mode: CollectorMode::Assigning(&mut self.features),
                features: Vec::new(),
            };
            for function in &self.observation_fns {
                function(sequence, t, &mut collector);
            }
            let features = collector.finish();
            if let Some(obs) = sequence.get_mut(t) {
                obs.set_features(features);
            }
        }
    }

    /// Inference mode: existing ids are reused and unseen features are
    /// silently discarded, so trained models never see unknown ids.
    pub fn analyze_const(&self, sequence: &mut Sequence) {
        for t in 0..sequence.len() {
            let label = sequence[t].tag().and_then(|tag| self.labels.id(tag));
            if let Some(label) = label {
                if let Some(obs) = sequence.get_mut(t) {
                    obs.set_label(label);
                }
            }
            let mut collector = Collector {
                mode: CollectorMode::ReadOnly(&self.features),
                features: Vec::new(),
            };
            for function in &self.observation_fns {
                function(sequence, t, &mut collector);
            }
            let features = collector.finish();
            if let Some(obs) = sequence.get_mut(t) {
                obs.set_features(features);
            }
        }
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    pub fn label(&self, tag: &str) -> Option<LabelId> {
        self.labels.id(tag)
    }

    pub fn tag(&self, label: LabelId) -> Option<&str> {
        self.labels.key(label)
    }

    pub fn save(&self, prefix: &Path) -> Result<(), AppError> {
        std::fs::create_dir_all(prefix)?;
        self.features.save(&prefix.join(FEATURE_MAPPING_FILE))?;
        self.labels.save(&prefix.join(LABEL_MAPPING_FILE))?;
        Ok(())
    }

    /// Loads the persisted mappings; observation functions are re-attached
    /// by the caller since they are code, not data.
    pub fn load(prefix: &Path) -> Result<Self, AppError> {
        Ok(Self {
            features: VocabMap::load(&prefix.join(FEATURE_MAPPING_FILE))?,
            labels: VocabMap::load(&prefix.join(LABEL_MAPPING_FILE))?,
            observation_fns: Vec::new(),
        })
    }
}

/// The standard part-of-speech feature set: word identity in a one-word
/// window, affixes up to length three, and shape features.
pub fn default_pos_analyzer() -> SequenceAnalyzer {
    let mut analyzer = SequenceAnalyzer::new();
    add_default_pos_functions(&mut analyzer);
    analyzer
}

/// Attaches the standard feature set to an analyzer, typically one whose
/// mappings were just loaded from disk (functions are code, not data).
pub fn add_default_pos_functions(analyzer: &mut SequenceAnalyzer) {
    analyzer.add_observation_fn(|seq: &Sequence, t: usize, coll: &mut Collector<'_>| {
        coll.add("bias", 1.0);
        coll.add(&format!("w[t]={}", seq[t].symbol().to_lowercase()), 1.0);
    });

    analyzer.add_observation_fn(|seq: &Sequence, t: usize, coll: &mut Collector<'_>| {
        let prev = if t == 0 {
            "<s>".to_string()
        } else {
            seq[t - 1].symbol().to_lowercase()
        };
        coll.add(&format!("w[t-1]={prev}"), 1.0);

        let next = if t + 1 == seq.len() {
            "</s>".to_string()
        } else {
            seq[t + 1].symbol().to_lowercase()
        };
        coll.add(&format!("w[t+1]={next}"), 1.0);
    });

    analyzer.add_observation_fn(|seq: &Sequence, t: usize, coll: &mut Collector<'_>| {
        let word = seq[t].symbol().to_lowercase();
        let chars: Vec<char> = word.chars().collect();
        for len in 1..=3.min(chars.len()) {
            let prefix: String = chars[..len].iter().collect();
            coll.add(&format!("prefix={prefix}"), 1.0);
            let suffix: String = chars[chars.len() - len..].iter().collect();
            coll.add(&format!("suffix={suffix}"), 1.0);
        }
    });

    analyzer.add_observation_fn(|seq: &Sequence, t: usize, coll: &mut Collector<'_>| {
        let word = seq[t].symbol();
        if word.chars().any(|c| c.is_ascii_digit()) {
            coll.add("has-digit", 1.0);
        }
        let mut chars = word.chars();
        let initial_upper = chars.next().is_some_and(char::is_uppercase);
        if initial_upper {
            coll.add("init-caps", 1.0);
            if word.chars().all(|c| !c.is_lowercase()) {
                coll.add("all-caps", 1.0);
            }
        }
    });
}
