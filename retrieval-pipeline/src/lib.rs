pub mod bm25;
pub mod kl_prf;
pub mod lm;
pub mod pivoted;
pub mod ranker;
pub mod score_data;
pub mod similarity;
pub mod top_k;

pub use ranker::{rank, Query, Ranker, RankerSpec};
pub use score_data::ScoreData;
pub use top_k::{Scored, SearchResult};
