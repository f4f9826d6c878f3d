use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};

use common::error::AppError;
use common::ids::Identifier;
use rayon::prelude::*;
use tracing::debug;

use crate::chunk::Chunk;
use crate::codec;
use crate::corpus::{Document, RawDocument, Tokenizer};
use crate::merger;
use crate::postings::PostingsData;

/// Tokenizes a corpus with worker threads. Doc_id assignment stays on the
/// driver side: ids are positions in the driver's output order, which the
/// order-preserving parallel map cannot change.
pub fn tokenize_corpus(raw: Vec<RawDocument>, tokenizer: &dyn Tokenizer) -> Vec<Document> {
    raw.into_par_iter()
        .map(|doc| Document {
            tokens: tokenizer.tokenize(&doc.text),
            name: doc.name,
            label: doc.label,
        })
        .collect()
}

/// Accumulates postings in memory, spills sorted chunks once the byte
/// budget is exceeded, and merges everything into the final postings file
/// plus lexicon on `finish`.
pub struct IndexWriter<P, S> {
    dir: PathBuf,
    accumulator: HashMap<u64, PostingsData<P, S>>,
    chunk_budget_bytes: u64,
    chunks: Vec<Chunk>,
}

impl<P: Identifier, S: Identifier> IndexWriter<P, S> {
    /// Prepares an empty index directory. Building over a non-empty
    /// directory is refused; a build is one-shot.
    pub fn create(dir: &Path, chunk_budget_bytes: u64) -> Result<Self, AppError> {
        if dir.exists() && dir.read_dir()?.next().is_some() {
            return Err(AppError::IndexAlreadyExists(dir.to_path_buf()));
        }
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            accumulator: HashMap::new(),
            chunk_budget_bytes,
            chunks: Vec::new(),
        })
    }

    pub fn add(&mut self, primary: P, secondary: S, count: u64) -> Result<(), AppError> {
        self.accumulator
            .entry(primary.raw())
            .or_insert_with(|| PostingsData::new(primary))
            .increment(secondary, count);
        if self.accumulator_bytes() >= self.chunk_budget_bytes {
            self.spill()?;
        }
        Ok(())
    }

    fn accumulator_bytes(&self) -> u64 {
        (self.accumulator.len() * mem::size_of::<(u64, PostingsData<P, S>)>()) as u64
    }

    fn spill(&mut self) -> Result<(), AppError> {
        if self.accumulator.is_empty() {
            return Ok(());
        }
        let mut sorted: Vec<_> = self.accumulator.drain().collect();
        sorted.sort_unstable_by_key(|&(primary, _)| primary);

        let path = self.dir.join(format!("chunk-{}", self.chunks.len()));
        let mut writer = BufWriter::new(File::create(&path)?);
        for (_, record) in &sorted {
            codec::encode(record, &mut writer)?;
        }
        writer.flush()?;
        drop(writer);
        debug!(chunk = %path.display(), records = sorted.len(), "Spilled sorted chunk");

        self.chunks.push(Chunk::new(path)?);
        Ok(())
    }

    /// Spills the final partial chunk, merges all chunks into
    /// `postings.index`, and writes `lexicon.index`.
    pub fn finish(mut self) -> Result<(), AppError> {
        self.spill()?;
        let postings_path = self.dir.join("postings.index");
        merger::merge_chunks::<P, S>(mem::take(&mut self.chunks), &postings_path)?;
        let lexicon = merger::build_lexicon::<P, S>(&postings_path)?;
        merger::save_lexicon(&lexicon, &self.dir.join("lexicon.index"))?;
        Ok(())
    }
}
