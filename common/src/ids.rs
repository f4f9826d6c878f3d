use std::fmt;

use serde::{Deserialize, Serialize};

/// Dense identifier assigned in first-seen order. Implementations are thin
/// newtypes so the different id spaces cannot be mixed up at call sites.
pub trait Identifier: Copy + Ord + fmt::Display + Send + Sync + 'static {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
    fn from_raw(raw: u64) -> Self;
    fn raw(self) -> u64;
}

macro_rules! numeric_identifier {
    ($name:ident, $repr:ty) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $repr);

        impl Identifier for $name {
            fn from_index(index: usize) -> Self {
                Self(index as $repr)
            }

            fn index(self) -> usize {
                self.0 as usize
            }

            fn from_raw(raw: u64) -> Self {
                Self(raw as $repr)
            }

            fn raw(self) -> u64 {
                u64::from(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_identifier!(TermId, u64);
numeric_identifier!(DocId, u64);
numeric_identifier!(FeatureId, u64);
numeric_identifier!(LabelId, u32);
numeric_identifier!(CrfFeatureId, u64);
