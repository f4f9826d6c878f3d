pub mod analyzer;
pub mod crf;
pub mod io;
pub mod sequence;

pub use analyzer::SequenceAnalyzer;
pub use crf::Crf;
pub use sequence::{Observation, Sequence};
