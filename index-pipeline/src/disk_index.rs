use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use common::config::{CacheKind, CorpusKind, IndexConfig};
use common::error::AppError;
use common::ids::{DocId, Identifier, TermId};
use common::mapping::VocabMap;
use memmap2::Mmap;
use tracing::info;

use crate::cache::{build_cache, PostingsCache};
use crate::codec;
use crate::corpus::{DirectoryCorpus, Document, LineCorpus, WhitespaceTokenizer};
use crate::indexer::{tokenize_corpus, IndexWriter};
use crate::merger;
use crate::postings::PostingsData;

const POSTINGS_FILE: &str = "postings.index";
const LEXICON_FILE: &str = "lexicon.index";
const DOC_IDS_FILE: &str = "docids.mapping";
const DOC_SIZES_FILE: &str = "docsizes.counts";
const DOC_LABELS_FILE: &str = "doclabels.mapping";
const TERM_IDS_FILE: &str = "termids.mapping";
const CONFIG_COPY: &str = "config.toml";

/// On-disk index generic over the key roles: the inverted index keys
/// records by term with documents as secondaries, the forward index is the
/// transpose. The index exclusively owns its mapped postings file and its
/// cache; readers borrow it immutably.
pub struct DiskIndex<P, S> {
    dir: PathBuf,
    postings: Option<Mmap>,
    lexicon: HashMap<u64, u64>,
    doc_names: Vec<String>,
    doc_labels: Vec<Option<String>>,
    doc_sizes: Vec<u64>,
    total_terms: u64,
    cache: Mutex<Box<dyn PostingsCache<PostingsData<P, S>>>>,
}

impl<P: Identifier, S: Identifier> DiskIndex<P, S> {
    pub fn open(dir: &Path, cache_capacity: usize) -> Result<Self, AppError> {
        Self::open_with_cache(dir, build_cache(CacheKind::Splay, cache_capacity))
    }

    pub fn open_with_cache(
        dir: &Path,
        cache: Box<dyn PostingsCache<PostingsData<P, S>>>,
    ) -> Result<Self, AppError> {
        let lexicon = merger::load_lexicon(&dir.join(LEXICON_FILE))?;
        let doc_names = load_dense(&dir.join(DOC_IDS_FILE), |v| Some(v.to_owned()))?;
        let doc_sizes = load_dense(&dir.join(DOC_SIZES_FILE), |v| v.parse::<u64>().ok())?;

        let labels_path = dir.join(DOC_LABELS_FILE);
        let mut doc_labels = vec![None; doc_names.len()];
        if labels_path.is_file() {
            let reader = BufReader::new(File::open(&labels_path)?);
            for line in reader.lines() {
                let line = line?;
                if let Some((id, label)) = line.split_once(' ') {
                    if let Ok(id) = id.parse::<usize>() {
                        if let Some(slot) = doc_labels.get_mut(id) {
                            *slot = Some(label.to_owned());
                        }
                    }
                }
            }
        }

        let postings_file = File::open(dir.join(POSTINGS_FILE))?;
        let postings = if postings_file.metadata()?.len() == 0 {
            None
        } else {
            // Safety: the postings file is written once at build time and
            // never modified afterwards.
            Some(unsafe { Mmap::map(&postings_file)? })
        };

        let total_terms = doc_sizes.iter().sum();
        Ok(Self {
            dir: dir.to_path_buf(),
            postings,
            lexicon,
            doc_names,
            doc_labels,
            doc_sizes,
            total_terms,
            cache: Mutex::new(cache),
        })
    }

    /// Returns the record for `key`, or an empty record when the key was
    /// never indexed. Cache hits do not touch the postings file and are
    /// bit-exact copies of what storage would serve.
    pub fn postings(&self, key: P) -> Result<PostingsData<P, S>, AppError> {
        {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.find(key.raw()) {
                return Ok(hit);
            }
        }

        let Some(&offset) = self.lexicon.get(&key.raw()) else {
            return Ok(PostingsData::new(key));
        };
        let record = self.read_record(offset)?;

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.insert(key.raw(), record.clone());
        Ok(record)
    }

    fn read_record(&self, offset: u64) -> Result<PostingsData<P, S>, AppError> {
        let path = self.dir.join(POSTINGS_FILE);
        let corrupt = |detail: &str| AppError::CorruptPostings {
            path: path.clone(),
            offset,
            detail: detail.to_owned(),
        };

        let Some(mapped) = &self.postings else {
            return Err(corrupt("lexicon offset into empty postings file"));
        };
        let bytes: &[u8] = mapped;
        let start = usize::try_from(offset).map_err(|_| corrupt("offset overflow"))?;
        if start >= bytes.len() {
            return Err(corrupt("offset beyond end of postings file"));
        }
        let rest = &bytes[start..];
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        let line = std::str::from_utf8(&rest[..end]).map_err(|_| corrupt("record is not utf-8"))?;
        codec::decode(line, &path, offset)
    }

    pub fn num_docs(&self) -> u64 {
        self.doc_names.len() as u64
    }

    pub fn doc_name(&self, doc: DocId) -> Option<&str> {
        self.doc_names.get(doc.index()).map(String::as_str)
    }

    pub fn doc_label(&self, doc: DocId) -> Option<&str> {
        self.doc_labels.get(doc.index())?.as_deref()
    }

    pub fn doc_size(&self, doc: DocId) -> Option<u64> {
        self.doc_sizes.get(doc.index()).copied()
    }

    pub fn total_terms(&self) -> u64 {
        self.total_terms
    }

    pub fn avg_doc_length(&self) -> f64 {
        if self.doc_sizes.is_empty() {
            0.0
        } else {
            self.total_terms as f64 / self.doc_sizes.len() as f64
        }
    }

    pub fn docs(&self) -> impl Iterator<Item = DocId> {
        (0..self.doc_names.len() as u64).map(DocId)
    }
}

fn load_dense<T>(path: &Path, parse: impl Fn(&str) -> Option<T>) -> Result<Vec<T>, AppError> {
    let reader = BufReader::new(File::open(path)?);
    let mut values = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let parsed = line.split_once(' ').and_then(|(id, value)| {
            let id: usize = id.parse().ok()?;
            (id == values.len()).then(|| parse(value))?
        });
        match parsed {
            Some(value) => values.push(value),
            None => {
                return Err(AppError::CorruptModel {
                    path: path.to_path_buf(),
                    detail: format!("malformed mapping entry on line {}", line_no + 1),
                })
            }
        }
    }
    Ok(values)
}

fn save_metadata(
    dir: &Path,
    docs: &[Document],
    terms: &VocabMap<TermId>,
    config_path: &Path,
) -> Result<(), AppError> {
    let mut names = BufWriter::new(File::create(dir.join(DOC_IDS_FILE))?);
    let mut sizes = BufWriter::new(File::create(dir.join(DOC_SIZES_FILE))?);
    let mut labels = Vec::new();
    for (id, doc) in docs.iter().enumerate() {
        writeln!(names, "{id} {}", doc.name)?;
        writeln!(sizes, "{id} {}", doc.length())?;
        if let Some(label) = &doc.label {
            labels.push((id, label.clone()));
        }
    }
    names.flush()?;
    sizes.flush()?;

    if !labels.is_empty() {
        let mut writer = BufWriter::new(File::create(dir.join(DOC_LABELS_FILE))?);
        for (id, label) in labels {
            writeln!(writer, "{id} {label}")?;
        }
        writer.flush()?;
    }

    terms.save(&dir.join(TERM_IDS_FILE))?;
    // keep the build configuration so the tokenization pipeline can be
    // reconstructed when the index is reopened
    std::fs::copy(config_path, dir.join(CONFIG_COPY))?;
    Ok(())
}

/// The term-keyed view of the corpus.
pub struct InvertedIndex {
    index: DiskIndex<TermId, DocId>,
    terms: VocabMap<TermId>,
}

/// The document-keyed transpose, used for feedback models.
pub struct ForwardIndex {
    index: DiskIndex<DocId, TermId>,
    terms: VocabMap<TermId>,
}

/// Opens the inverted index with the cache variant the config selects.
pub fn open_inverted(config: &IndexConfig) -> Result<InvertedIndex, AppError> {
    InvertedIndex::open_with_cache(
        Path::new(&config.inverted_path),
        build_cache(config.cache, config.cache_capacity),
    )
}

/// Opens the forward index with the cache variant the config selects.
pub fn open_forward(config: &IndexConfig) -> Result<ForwardIndex, AppError> {
    ForwardIndex::open_with_cache(
        Path::new(&config.forward_path),
        build_cache(config.cache, config.cache_capacity),
    )
}

/// One-shot build of both index views: drives the corpus, tokenizes with
/// worker threads, spills and merges chunks, and persists every mapping
/// table into each index directory.
pub fn build(config: &IndexConfig, config_path: &Path) -> Result<(InvertedIndex, ForwardIndex), AppError> {
    let raw = match config.corpus_kind {
        CorpusKind::Directory => DirectoryCorpus::open(Path::new(&config.corpus))?.documents()?,
        CorpusKind::Line => LineCorpus::open(Path::new(&config.corpus))?.documents()?,
    };
    let docs = tokenize_corpus(raw, &WhitespaceTokenizer);
    info!(documents = docs.len(), corpus = %config.corpus, "Tokenized corpus");

    let mut terms: VocabMap<TermId> = VocabMap::new();
    let mut per_doc_counts: Vec<Vec<(TermId, u64)>> = Vec::with_capacity(docs.len());
    for doc in &docs {
        let mut counts: HashMap<TermId, u64> = HashMap::new();
        for token in &doc.tokens {
            *counts.entry(terms.get_or_insert(token)).or_insert(0) += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_unstable_by_key(|&(term, _)| term);
        per_doc_counts.push(counts);
    }

    let inverted_dir = Path::new(&config.inverted_path);
    let mut writer = IndexWriter::<TermId, DocId>::create(inverted_dir, config.chunk_budget_bytes)?;
    for (position, counts) in per_doc_counts.iter().enumerate() {
        let doc_id = DocId(position as u64);
        for &(term, count) in counts {
            writer.add(term, doc_id, count)?;
        }
    }
    writer.finish()?;
    save_metadata(inverted_dir, &docs, &terms, config_path)?;

    let forward_dir = Path::new(&config.forward_path);
    let mut writer = IndexWriter::<DocId, TermId>::create(forward_dir, config.chunk_budget_bytes)?;
    for (position, counts) in per_doc_counts.iter().enumerate() {
        let doc_id = DocId(position as u64);
        for &(term, count) in counts {
            writer.add(doc_id, term, count)?;
        }
    }
    writer.finish()?;
    save_metadata(forward_dir, &docs, &terms, config_path)?;

    info!(
        terms = terms.len(),
        documents = docs.len(),
        "Index build complete"
    );
    Ok((open_inverted(config)?, open_forward(config)?))
}

impl InvertedIndex {
    pub fn open(dir: &Path, cache_capacity: usize) -> Result<Self, AppError> {
        let index = DiskIndex::open(dir, cache_capacity)?;
        let terms = VocabMap::load(&dir.join(TERM_IDS_FILE))?;
        Ok(Self { index, terms })
    }

    pub fn open_with_cache(
        dir: &Path,
        cache: Box<dyn PostingsCache<PostingsData<TermId, DocId>>>,
    ) -> Result<Self, AppError> {
        let index = DiskIndex::open_with_cache(dir, cache)?;
        let terms = VocabMap::load(&dir.join(TERM_IDS_FILE))?;
        Ok(Self { index, terms })
    }

    pub fn postings(&self, term: TermId) -> Result<PostingsData<TermId, DocId>, AppError> {
        self.index.postings(term)
    }

    pub fn term_id(&self, term: &str) -> Option<TermId> {
        self.terms.id(term)
    }

    pub fn term(&self, id: TermId) -> Option<&str> {
        self.terms.key(id)
    }

    pub fn num_terms(&self) -> u64 {
        self.terms.len() as u64
    }

    pub fn inner(&self) -> &DiskIndex<TermId, DocId> {
        &self.index
    }
}

impl ForwardIndex {
    pub fn open(dir: &Path, cache_capacity: usize) -> Result<Self, AppError> {
        let index = DiskIndex::open(dir, cache_capacity)?;
        let terms = VocabMap::load(&dir.join(TERM_IDS_FILE))?;
        Ok(Self { index, terms })
    }

    pub fn open_with_cache(
        dir: &Path,
        cache: Box<dyn PostingsCache<PostingsData<DocId, TermId>>>,
    ) -> Result<Self, AppError> {
        let index = DiskIndex::open_with_cache(dir, cache)?;
        let terms = VocabMap::load(&dir.join(TERM_IDS_FILE))?;
        Ok(Self { index, terms })
    }

    pub fn postings(&self, doc: DocId) -> Result<PostingsData<DocId, TermId>, AppError> {
        self.index.postings(doc)
    }

    pub fn term(&self, id: TermId) -> Option<&str> {
        self.terms.key(id)
    }

    pub fn inner(&self) -> &DiskIndex<DocId, TermId> {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_mini_corpus() -> (tempfile::TempDir, IndexConfig, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus_dir = dir.path().join("corpus");
        std::fs::create_dir(&corpus_dir).expect("mkdir corpus");
        std::fs::write(corpus_dir.join("d1.txt"), "the cat sat").expect("write d1");
        std::fs::write(corpus_dir.join("d2.txt"), "the dog ran").expect("write d2");

        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[index]\n").expect("write config");

        let config = IndexConfig {
            corpus: corpus_dir.to_string_lossy().into_owned(),
            inverted_path: dir.path().join("inv").to_string_lossy().into_owned(),
            forward_path: dir.path().join("fwd").to_string_lossy().into_owned(),
            chunk_budget_bytes: 1024 * 1024,
            cache_capacity: 8,
            ..IndexConfig::default()
        };
        (dir, config, config_path)
    }

    #[test]
    fn mini_corpus_document_frequencies() {
        let (_dir, config, config_path) = build_mini_corpus();
        let (inverted, _forward) = build(&config, &config_path).expect("build index");

        let the = inverted.term_id("the").expect("'the' indexed");
        let cat = inverted.term_id("cat").expect("'cat' indexed");

        let the_postings = inverted.postings(the).expect("postings for 'the'");
        assert_eq!(the_postings.doc_count(), 2);
        assert_eq!(the_postings.count(DocId(0)), 1);
        assert_eq!(the_postings.count(DocId(1)), 1);

        let cat_postings = inverted.postings(cat).expect("postings for 'cat'");
        assert_eq!(cat_postings.doc_count(), 1);
        assert_eq!(cat_postings.count(DocId(0)), 1);
    }

    #[test]
    fn postings_counts_match_raw_token_counts() {
        let (_dir, config, config_path) = build_mini_corpus();
        let (inverted, forward) = build(&config, &config_path).expect("build index");

        for (doc, text) in [(DocId(0), "the cat sat"), (DocId(1), "the dog ran")] {
            for token in text.split_whitespace() {
                let term = inverted.term_id(token).expect("token indexed");
                let pd = inverted.postings(term).expect("postings");
                assert_eq!(pd.count(doc), 1, "count for {token} in {doc}");
                let fwd = forward.postings(doc).expect("forward postings");
                assert_eq!(fwd.count(term), 1, "forward count for {token} in {doc}");
            }
        }
        assert_eq!(inverted.inner().doc_size(DocId(0)), Some(3));
        assert_eq!(inverted.inner().avg_doc_length(), 3.0);
    }

    #[test]
    fn line_corpus_builds_an_equivalent_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus_path = dir.path().join("docs.txt");
        std::fs::write(&corpus_path, "the cat sat\nthe dog ran\n").expect("write corpus");
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[index]\n").expect("write config");

        let config = IndexConfig {
            corpus: corpus_path.to_string_lossy().into_owned(),
            corpus_kind: CorpusKind::Line,
            inverted_path: dir.path().join("inv").to_string_lossy().into_owned(),
            forward_path: dir.path().join("fwd").to_string_lossy().into_owned(),
            ..IndexConfig::default()
        };
        let (inverted, _forward) = build(&config, &config_path).expect("build index");

        assert_eq!(inverted.inner().num_docs(), 2);
        assert_eq!(inverted.inner().doc_name(DocId(0)), Some("docs.txt:1"));
        let the = inverted.term_id("the").expect("'the' indexed");
        assert_eq!(inverted.postings(the).expect("postings").doc_count(), 2);
    }

    #[test]
    fn unknown_term_returns_empty_record() {
        let (_dir, config, config_path) = build_mini_corpus();
        let (inverted, _forward) = build(&config, &config_path).expect("build index");

        let pd = inverted.postings(TermId(999)).expect("no error for unknown");
        assert!(pd.is_empty());
        assert_eq!(pd.doc_count(), 0);
    }

    #[test]
    fn cache_serves_identical_records() {
        let (_dir, config, config_path) = build_mini_corpus();
        let (inverted, _forward) = build(&config, &config_path).expect("build index");

        let the = inverted.term_id("the").expect("'the' indexed");
        let cold = inverted.postings(the).expect("cold read");
        let warm = inverted.postings(the).expect("warm read");
        assert_eq!(cold, warm, "cached record must be bit-exact");
    }

    #[test]
    fn reopen_serves_same_postings() {
        let (dir, config, config_path) = build_mini_corpus();
        let postings_before;
        let the;
        {
            let (inverted, _forward) = build(&config, &config_path).expect("build index");
            the = inverted.term_id("the").expect("'the' indexed");
            postings_before = inverted.postings(the).expect("postings");
        }

        let reopened = InvertedIndex::open(&dir.path().join("inv"), 8).expect("reopen");
        assert_eq!(reopened.term_id("the"), Some(the));
        let postings_after = reopened.postings(the).expect("postings after reopen");
        assert_eq!(postings_before, postings_after);
        assert!(dir.path().join("inv").join(CONFIG_COPY).is_file());
    }

    #[test]
    fn rebuild_into_same_directory_fails() {
        let (_dir, config, config_path) = build_mini_corpus();
        build(&config, &config_path).expect("first build");

        let result = build(&config, &config_path);
        assert!(matches!(result, Err(AppError::IndexAlreadyExists(_))));
    }
}
