use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use common::error::AppError;
use common::ids::Identifier;
use tracing::{debug, info};

use crate::chunk::{merge_pair, Chunk};
use crate::codec::PostingsReader;

/// Size-priority pairwise merge: repeatedly pop the two smallest chunks,
/// merge them into a fresh chunk, and push it back until one remains. The
/// survivor is renamed to `dest`. On failure all intermediate output is
/// removed.
pub fn merge_chunks<P, S>(chunks: Vec<Chunk>, dest: &Path) -> Result<(), AppError>
where
    P: Identifier,
    S: Identifier,
{
    let result = merge_chunks_inner::<P, S>(chunks, dest);
    if result.is_err() {
        let _ = std::fs::remove_file(dest);
    }
    result
}

fn merge_chunks_inner<P, S>(chunks: Vec<Chunk>, dest: &Path) -> Result<(), AppError>
where
    P: Identifier,
    S: Identifier,
{
    if chunks.is_empty() {
        File::create(dest)?;
        return Ok(());
    }

    let work_dir = dest.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut next_id = chunks.len();
    let mut heap: BinaryHeap<Reverse<Chunk>> = chunks.into_iter().map(Reverse).collect();

    while let Some(Reverse(first)) = heap.pop() {
        let Some(Reverse(second)) = heap.pop() else {
            std::fs::rename(first.path(), dest)?;
            info!(
                postings = %dest.display(),
                bytes = std::fs::metadata(dest)?.len(),
                "Created postings file"
            );
            return Ok(());
        };
        debug!(
            first = %first.path().display(),
            first_bytes = first.size(),
            second = %second.path().display(),
            second_bytes = second.size(),
            remaining = heap.len(),
            "Merging chunk pair"
        );

        let merged_path = work_dir.join(format!("chunk-{next_id}"));
        next_id += 1;
        let merged = match merge_pair::<P, S>(&first, &second, merged_path) {
            Ok(chunk) => chunk,
            Err(e) => {
                // remove whatever intermediates are still queued
                for Reverse(chunk) in heap.drain() {
                    let _ = std::fs::remove_file(chunk.path());
                }
                return Err(e);
            }
        };
        heap.push(Reverse(merged));
    }

    Ok(())
}

/// Single pass over the final postings file recording, for each record,
/// the byte offset it starts at, keyed by primary key.
pub fn build_lexicon<P, S>(postings_path: &Path) -> Result<HashMap<u64, u64>, AppError>
where
    P: Identifier,
    S: Identifier,
{
    let mut reader = PostingsReader::new(
        BufReader::new(File::open(postings_path)?),
        postings_path.to_path_buf(),
    );
    let mut lexicon = HashMap::new();
    while let Some((offset, record)) = reader.next_record::<P, S>()? {
        lexicon.insert(record.primary().raw(), offset);
    }
    Ok(lexicon)
}

/// Persists the lexicon as one `primary_key byte_offset` pair per line,
/// sorted by primary key.
pub fn save_lexicon(lexicon: &HashMap<u64, u64>, path: &Path) -> Result<(), AppError> {
    let mut entries: Vec<_> = lexicon.iter().collect();
    entries.sort_unstable();
    let mut writer = BufWriter::new(File::create(path)?);
    for (primary, offset) in entries {
        writeln!(writer, "{primary} {offset}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn load_lexicon(path: &Path) -> Result<HashMap<u64, u64>, AppError> {
    let reader = BufReader::new(File::open(path)?);
    let mut lexicon = HashMap::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let parsed = line
            .split_once(' ')
            .and_then(|(p, o)| Some((p.parse::<u64>().ok()?, o.parse::<u64>().ok()?)));
        let Some((primary, offset)) = parsed else {
            return Err(AppError::CorruptModel {
                path: path.to_path_buf(),
                detail: format!("malformed lexicon entry on line {}", line_no + 1),
            });
        };
        lexicon.insert(primary, offset);
    }
    Ok(lexicon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ids::{DocId, TermId};

    fn chunk(dir: &Path, name: &str, contents: &str) -> Chunk {
        let path = dir.join(name);
        std::fs::write(&path, contents).expect("write chunk");
        Chunk::new(path).expect("stat chunk")
    }

    #[test]
    fn merges_multiset_union_across_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let chunks = vec![
            chunk(dir.path(), "chunk-0", "1 1 1\n"),
            chunk(dir.path(), "chunk-1", "1 2 1\n2 1 1\n"),
            chunk(dir.path(), "chunk-2", "0 3 4\n2 2 2\n"),
        ];
        let dest = dir.path().join("postings.index");

        merge_chunks::<TermId, DocId>(chunks, &dest).expect("merge should succeed");

        let contents = std::fs::read_to_string(&dest).expect("read postings");
        assert_eq!(contents, "0 3 4\n1 1 1 2 1\n2 1 1 2 2\n");
    }

    #[test]
    fn single_chunk_is_renamed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let only = chunk(dir.path(), "chunk-0", "3 0 7\n");
        let dest = dir.path().join("postings.index");

        merge_chunks::<TermId, DocId>(vec![only], &dest).expect("merge should succeed");
        assert_eq!(
            std::fs::read_to_string(&dest).expect("read postings"),
            "3 0 7\n"
        );
    }

    #[test]
    fn lexicon_offsets_point_at_matching_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("postings.index");
        std::fs::write(&dest, "0 3 4\n1 1 1 2 1\n2 1 1 2 2\n").expect("write postings");

        let lexicon = build_lexicon::<TermId, DocId>(&dest).expect("build lexicon");
        let raw = std::fs::read(&dest).expect("read bytes");
        for (&primary, &offset) in &lexicon {
            let rest = &raw[offset as usize..];
            let line_end = rest.iter().position(|&b| b == b'\n').expect("newline");
            let line = std::str::from_utf8(&rest[..line_end]).expect("utf8");
            let first_field: u64 = line
                .split_ascii_whitespace()
                .next()
                .expect("field")
                .parse()
                .expect("integer");
            assert_eq!(first_field, primary, "offset must point at its record");
        }

        let lex_path = dir.path().join("lexicon.index");
        save_lexicon(&lexicon, &lex_path).expect("save lexicon");
        let loaded = load_lexicon(&lex_path).expect("load lexicon");
        assert_eq!(loaded, lexicon);
    }

    #[test]
    fn random_chunk_sets_merge_to_the_multiset_union() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use std::collections::BTreeMap;
        use std::io::BufReader;

        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        for round in 0..10 {
            let dir = tempfile::tempdir().expect("tempdir");
            let num_chunks = rng.gen_range(1..6);
            let mut expected: BTreeMap<u64, BTreeMap<u64, u64>> = BTreeMap::new();

            let mut chunks = Vec::new();
            for c in 0..num_chunks {
                let mut records: BTreeMap<u64, BTreeMap<u64, u64>> = BTreeMap::new();
                for _ in 0..rng.gen_range(0..12) {
                    let primary = rng.gen_range(0..8_u64);
                    let secondary = rng.gen_range(0..6_u64);
                    let count = rng.gen_range(1..4_u64);
                    *records.entry(primary).or_default().entry(secondary).or_insert(0) += count;
                    *expected.entry(primary).or_default().entry(secondary).or_insert(0) += count;
                }
                let mut contents = String::new();
                for (primary, counts) in &records {
                    contents.push_str(&primary.to_string());
                    for (secondary, count) in counts {
                        contents.push_str(&format!(" {secondary} {count}"));
                    }
                    contents.push('\n');
                }
                chunks.push(chunk(dir.path(), &format!("chunk-{c}"), &contents));
            }

            let dest = dir.path().join("postings.index");
            merge_chunks::<TermId, DocId>(chunks, &dest).expect("merge should succeed");

            let mut reader = PostingsReader::new(
                BufReader::new(File::open(&dest).expect("open merged")),
                dest.clone(),
            );
            let mut merged: BTreeMap<u64, BTreeMap<u64, u64>> = BTreeMap::new();
            let mut last_primary = None;
            while let Some((_, record)) = reader
                .next_record::<TermId, DocId>()
                .expect("decode merged record")
            {
                let primary = record.primary().0;
                assert!(
                    last_primary.is_none() || last_primary < Some(primary),
                    "output is sorted by primary key"
                );
                last_primary = Some(primary);
                let counts = merged.entry(primary).or_default();
                for &(doc, count) in record.counts() {
                    counts.insert(doc.0, count);
                }
            }
            assert_eq!(merged, expected, "round {round}: merged output is the union");
        }
    }

    #[test]
    fn corrupt_chunk_removes_partial_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let chunks = vec![
            chunk(dir.path(), "chunk-0", "2 1 1\n1 1 1\n"),
            chunk(dir.path(), "chunk-1", "1 1 1\n"),
        ];
        let dest = dir.path().join("postings.index");

        let result = merge_chunks::<TermId, DocId>(chunks, &dest);
        assert!(matches!(result, Err(AppError::CorruptChunk { .. })));
        assert!(!dest.exists(), "partial output must be removed");
    }
}
