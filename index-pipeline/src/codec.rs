use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use common::error::AppError;
use common::ids::Identifier;

use crate::postings::PostingsData;

/// Encodes one record as a self-delimiting text line:
/// `<pk> <sk0> <c0> <sk1> <c1> ...\n`.
pub fn encode<P, S, W>(record: &PostingsData<P, S>, writer: &mut W) -> io::Result<()>
where
    P: Identifier,
    S: Identifier,
    W: Write,
{
    let mut line = record.primary().raw().to_string();
    for &(secondary, count) in record.counts() {
        line.push(' ');
        line.push_str(&secondary.raw().to_string());
        line.push(' ');
        line.push_str(&count.to_string());
    }
    line.push('\n');
    writer.write_all(line.as_bytes())
}

/// Decodes one record from a line (without the trailing newline). `offset`
/// is the byte position of the line start, reported on failure.
pub fn decode<P, S>(line: &str, path: &Path, offset: u64) -> Result<PostingsData<P, S>, AppError>
where
    P: Identifier,
    S: Identifier,
{
    let corrupt = |detail: String| AppError::CorruptPostings {
        path: path.to_path_buf(),
        offset,
        detail,
    };

    let mut fields = line.split_ascii_whitespace();
    let primary_field = fields.next().ok_or_else(|| corrupt("empty record".to_string()))?;
    let primary: u64 = primary_field
        .parse()
        .map_err(|_| corrupt(format!("non-integer primary key '{primary_field}'")))?;

    let rest: Vec<&str> = fields.collect();
    if rest.len() % 2 != 0 {
        return Err(corrupt(format!(
            "odd number of fields ({}) after primary key",
            rest.len()
        )));
    }

    let mut counts = Vec::with_capacity(rest.len() / 2);
    let mut previous: Option<u64> = None;
    for pair in rest.chunks_exact(2) {
        let secondary: u64 = pair[0]
            .parse()
            .map_err(|_| corrupt(format!("non-integer secondary key '{}'", pair[0])))?;
        let count: u64 = pair[1]
            .parse()
            .map_err(|_| corrupt(format!("non-integer count '{}'", pair[1])))?;
        if let Some(prev) = previous {
            if secondary <= prev {
                return Err(corrupt(format!(
                    "secondary keys not strictly increasing ({prev} then {secondary})"
                )));
            }
        }
        previous = Some(secondary);
        counts.push((S::from_raw(secondary), count));
    }

    Ok(PostingsData::from_sorted(P::from_raw(primary), counts))
}

/// Streaming reader over a postings or chunk file, yielding each record
/// together with the byte offset it starts at.
pub struct PostingsReader<R> {
    reader: R,
    path: PathBuf,
    offset: u64,
    line: String,
}

impl<R: BufRead> PostingsReader<R> {
    pub fn new(reader: R, path: PathBuf) -> Self {
        Self {
            reader,
            path,
            offset: 0,
            line: String::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the next record, or `None` at end of file.
    pub fn next_record<P, S>(&mut self) -> Result<Option<(u64, PostingsData<P, S>)>, AppError>
    where
        P: Identifier,
        S: Identifier,
    {
        loop {
            self.line.clear();
            let bytes = self.reader.read_line(&mut self.line)?;
            if bytes == 0 {
                return Ok(None);
            }
            let start = self.offset;
            self.offset += bytes as u64;
            let trimmed = self.line.trim_end_matches('\n');
            if trimmed.is_empty() {
                continue;
            }
            let record = decode(trimmed, &self.path, start)?;
            return Ok(Some((start, record)));
        }
    }
}
