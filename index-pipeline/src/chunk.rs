use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use common::error::AppError;
use common::ids::Identifier;

use crate::codec::{self, PostingsReader};
use crate::postings::PostingsData;

/// A temporary on-disk fragment of the index, sorted by primary key.
/// Chunks order by byte size so the merger can always pick the two
/// smallest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    path: PathBuf,
    size: u64,
}

impl Chunk {
    pub fn new(path: PathBuf) -> Result<Self, AppError> {
        let size = std::fs::metadata(&path)?.len();
        Ok(Self { path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Ord for Chunk {
    fn cmp(&self, other: &Self) -> Ordering {
        self.size
            .cmp(&other.size)
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for Chunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Cursor over one chunk that also enforces ascending primary-key order;
/// a violation means the producer wrote a bad chunk.
struct ChunkCursor<P, S> {
    reader: PostingsReader<BufReader<File>>,
    pending: Option<PostingsData<P, S>>,
    last_primary: Option<u64>,
}

impl<P: Identifier, S: Identifier> ChunkCursor<P, S> {
    fn open(path: &Path) -> Result<Self, AppError> {
        let reader = PostingsReader::new(BufReader::new(File::open(path)?), path.to_path_buf());
        let mut cursor = Self {
            reader,
            pending: None,
            last_primary: None,
        };
        cursor.advance()?;
        Ok(cursor)
    }

    fn advance(&mut self) -> Result<(), AppError> {
        self.pending = match self.reader.next_record::<P, S>()? {
            Some((_, record)) => {
                let primary = record.primary().raw();
                if let Some(last) = self.last_primary {
                    if primary <= last {
                        return Err(AppError::CorruptChunk {
                            path: self.reader.path().to_path_buf(),
                            detail: format!(
                                "primary keys out of order ({last} then {primary})"
                            ),
                        });
                    }
                }
                self.last_primary = Some(primary);
                Some(record)
            }
            None => None,
        };
        Ok(())
    }

    fn take(&mut self) -> Result<Option<PostingsData<P, S>>, AppError> {
        let record = self.pending.take();
        if record.is_some() {
            self.advance()?;
        }
        Ok(record)
    }

    fn peek_primary(&self) -> Option<u64> {
        self.pending.as_ref().map(|r| r.primary().raw())
    }
}

/// Streaming two-way merge of two sorted chunks into `dest`. Records that
/// share a primary key are combined with counts summed per secondary key.
pub fn merge_pair<P, S>(first: &Chunk, second: &Chunk, dest: PathBuf) -> Result<Chunk, AppError>
where
    P: Identifier,
    S: Identifier,
{
    let mut left = ChunkCursor::<P, S>::open(first.path())?;
    let mut right = ChunkCursor::<P, S>::open(second.path())?;
    let mut writer = BufWriter::new(File::create(&dest)?);

    loop {
        let record = match (left.peek_primary(), right.peek_primary()) {
            (None, None) => break,
            (Some(_), None) => left.take()?,
            (None, Some(_)) => right.take()?,
            (Some(l), Some(r)) => {
                if l < r {
                    left.take()?
                } else if r < l {
                    right.take()?
                } else {
                    match (left.take()?, right.take()?) {
                        (Some(mut combined), Some(other)) => {
                            combined.merge_with(other);
                            Some(combined)
                        }
                        (only, _) => only,
                    }
                }
            }
        };
        if let Some(record) = record {
            codec::encode(&record, &mut writer)?;
        }
    }
    writer.flush()?;
    drop(writer);

    std::fs::remove_file(first.path())?;
    std::fs::remove_file(second.path())?;
    Chunk::new(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ids::{DocId, TermId};

    fn write_chunk(path: &Path, lines: &str) -> Chunk {
        std::fs::write(path, lines).expect("write chunk fixture");
        Chunk::new(path.to_path_buf()).expect("stat chunk")
    }

    #[test]
    fn merges_disjoint_and_shared_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        // chunk A: term 1 -> {doc 1: 1}
        let a = write_chunk(&dir.path().join("chunk-0"), "1 1 1\n");
        // chunk B: term 1 -> {doc 2: 1}, term 2 -> {doc 1: 1}
        let b = write_chunk(&dir.path().join("chunk-1"), "1 2 1\n2 1 1\n");

        let merged = merge_pair::<TermId, DocId>(&a, &b, dir.path().join("chunk-2"))
            .expect("merge should succeed");

        let contents = std::fs::read_to_string(merged.path()).expect("read merged");
        assert_eq!(contents, "1 1 1 2 1\n2 1 1\n");
        assert!(!a.path().exists(), "inputs are removed after merging");
        assert!(!b.path().exists());
    }

    #[test]
    fn sums_duplicate_secondaries_across_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = write_chunk(&dir.path().join("chunk-0"), "5 1 2\n");
        let b = write_chunk(&dir.path().join("chunk-1"), "5 1 3 4 1\n");

        let merged = merge_pair::<TermId, DocId>(&a, &b, dir.path().join("chunk-2"))
            .expect("merge should succeed");

        let contents = std::fs::read_to_string(merged.path()).expect("read merged");
        assert_eq!(contents, "5 1 5 4 1\n");
    }

    #[test]
    fn out_of_order_chunk_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = write_chunk(&dir.path().join("chunk-0"), "3 1 1\n1 1 1\n");
        let b = write_chunk(&dir.path().join("chunk-1"), "2 1 1\n");

        let result = merge_pair::<TermId, DocId>(&a, &b, dir.path().join("chunk-2"));
        assert!(matches!(result, Err(AppError::CorruptChunk { .. })));
    }
}
