use std::collections::HashMap;
use std::path::{Path, PathBuf};

use common::error::AppError;
use tracing::debug;

/// A document before tokenization, as produced by the corpus driver.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub name: String,
    pub text: String,
    pub label: Option<String>,
}

/// A tokenized document. The doc_id is its position in the corpus driver's
/// output order.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub label: Option<String>,
    pub tokens: Vec<String>,
}

impl Document {
    pub fn length(&self) -> u64 {
        self.tokens.len() as u64
    }
}

/// Splits tokens into terms. The indexing core treats this as an external
/// collaborator; this whitespace/lowercase implementation is the stand-in
/// used by the bundled binaries.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|token| !token.is_empty())
            .collect()
    }
}

/// Directory corpus: one `.txt` file per document, ordered by file name.
/// An optional `labels.tsv` (`file<TAB>label` per line) assigns class
/// labels.
#[derive(Debug)]
pub struct DirectoryCorpus {
    root: PathBuf,
    labels: HashMap<String, String>,
}

impl DirectoryCorpus {
    pub fn open(root: &Path) -> Result<Self, AppError> {
        let labels_path = root.join("labels.tsv");
        let mut labels = HashMap::new();
        if labels_path.is_file() {
            for line in std::fs::read_to_string(&labels_path)?.lines() {
                if let Some((name, label)) = line.split_once('\t') {
                    labels.insert(name.to_owned(), label.to_owned());
                }
            }
            debug!(corpus = %root.display(), labels = labels.len(), "Loaded document labels");
        }
        Ok(Self {
            root: root.to_path_buf(),
            labels,
        })
    }

    /// Reads every document in the corpus. The returned order defines the
    /// doc_id assignment, so it is deterministic (sorted by file name).
    pub fn documents(&self) -> Result<Vec<RawDocument>, AppError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let text = std::fs::read_to_string(&path)?;
            let label = self.labels.get(&name).cloned();
            documents.push(RawDocument { name, text, label });
        }
        Ok(documents)
    }
}

/// Line corpus: one document per non-empty line of a single file, named
/// `<file>:<line>`. An optional `<file>.labels` sibling carries one class
/// label per line.
#[derive(Debug)]
pub struct LineCorpus {
    path: PathBuf,
}

impl LineCorpus {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if !path.is_file() {
            return Err(AppError::InvalidParameter(format!(
                "line corpus {} is not a file",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn documents(&self) -> Result<Vec<RawDocument>, AppError> {
        let stem = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut labels = Vec::new();
        let labels_path = self.path.with_extension("labels");
        if labels_path.is_file() {
            labels = std::fs::read_to_string(&labels_path)?
                .lines()
                .map(str::to_owned)
                .collect();
        }

        let contents = std::fs::read_to_string(&self.path)?;
        let mut documents = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            documents.push(RawDocument {
                name: format!("{stem}:{}", line_no + 1),
                text: line.to_owned(),
                label: labels.get(line_no).cloned(),
            });
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_tokenizer_lowercases_and_strips_punctuation() {
        let tokens = WhitespaceTokenizer.tokenize("The cat, the DOG!");
        assert_eq!(tokens, vec!["the", "cat", "the", "dog"]);
    }

    #[test]
    fn line_corpus_names_documents_by_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docs.txt");
        std::fs::write(&path, "the cat sat\n\nthe dog ran\n").expect("write corpus");
        std::fs::write(dir.path().join("docs.labels"), "pets\n\npets\n").expect("write labels");

        let corpus = LineCorpus::open(&path).expect("open corpus");
        let docs = corpus.documents().expect("read documents");

        assert_eq!(docs.len(), 2, "blank lines are skipped");
        assert_eq!(docs[0].name, "docs.txt:1");
        assert_eq!(docs[0].label.as_deref(), Some("pets"));
        assert_eq!(docs[1].name, "docs.txt:3");
        assert_eq!(docs[1].text, "the dog ran");
    }

    #[test]
    fn directory_corpus_orders_by_file_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("b.txt"), "second doc").expect("write");
        std::fs::write(dir.path().join("a.txt"), "first doc").expect("write");
        std::fs::write(dir.path().join("notes.md"), "ignored").expect("write");
        std::fs::write(dir.path().join("labels.tsv"), "a.txt\tnews\n").expect("write");

        let corpus = DirectoryCorpus::open(dir.path()).expect("open corpus");
        let docs = corpus.documents().expect("read documents");

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].name, "a.txt");
        assert_eq!(docs[0].label.as_deref(), Some("news"));
        assert_eq!(docs[1].name, "b.txt");
        assert_eq!(docs[1].label, None);
    }
}
