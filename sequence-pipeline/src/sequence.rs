use common::ids::{FeatureId, LabelId};

/// One position of a sequence: a surface symbol, an optional gold tag, the
/// label id assigned to that tag by the analyzer, and the sparse feature
/// vector the observation functions produced.
#[derive(Debug, Clone)]
pub struct Observation {
    symbol: String,
    tag: Option<String>,
    label: Option<LabelId>,
    features: Vec<(FeatureId, f64)>,
}

impl Observation {
    pub fn new(symbol: impl Into<String>, tag: Option<String>) -> Self {
        Self {
            symbol: symbol.into(),
            tag,
            label: None,
            features: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn label(&self) -> Option<LabelId> {
        self.label
    }

    pub fn set_label(&mut self, label: LabelId) {
        self.label = Some(label);
    }

    /// Sorted by feature id, no duplicates.
    pub fn features(&self) -> &[(FeatureId, f64)] {
        &self.features
    }

    pub fn set_features(&mut self, features: Vec<(FeatureId, f64)>) {
        debug_assert!(features.windows(2).all(|w| w[0].0 < w[1].0));
        self.features = features;
    }
}

/// An ordered list of observations.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    observations: Vec<Observation>,
}

impl Sequence {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    /// Untagged sequence from plain symbols, for inference input.
    pub fn from_symbols<S: Into<String>>(symbols: impl IntoIterator<Item = S>) -> Self {
        Self {
            observations: symbols
                .into_iter()
                .map(|symbol| Observation::new(symbol, None))
                .collect(),
        }
    }

    pub fn push(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn get(&self, t: usize) -> Option<&Observation> {
        self.observations.get(t)
    }

    pub fn get_mut(&mut self, t: usize) -> Option<&mut Observation> {
        self.observations.get_mut(t)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Observation> {
        self.observations.iter_mut()
    }
}

impl std::ops::Index<usize> for Sequence {
    type Output = Observation;

    fn index(&self, t: usize) -> &Observation {
        &self.observations[t]
    }
}

impl<'a> IntoIterator for &'a Sequence {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}
