pub mod cache;
pub mod chunk;
pub mod codec;
pub mod corpus;
pub mod disk_index;
pub mod indexer;
pub mod merger;
pub mod postings;

pub use disk_index::{DiskIndex, ForwardIndex, InvertedIndex};
pub use postings::PostingsData;
