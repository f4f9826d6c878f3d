use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use common::error::AppError;

use crate::sequence::{Observation, Sequence};

/// Reads a plain tagged corpus: one `symbol<TAB>tag` pair per line, blank
/// lines separating sequences. This is the hand-off format produced by the
/// (external) treebank tooling.
pub fn read_tagged_file(path: &Path) -> Result<Vec<Sequence>, AppError> {
    let reader = BufReader::new(File::open(path)?);
    let mut sequences = Vec::new();
    let mut current = Sequence::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            if !current.is_empty() {
                sequences.push(std::mem::take(&mut current));
            }
            continue;
        }
        let Some((symbol, tag)) = trimmed.split_once('\t') else {
            return Err(AppError::InvalidParameter(format!(
                "{}:{}: expected 'symbol<TAB>tag', got '{trimmed}'",
                path.display(),
                line_no + 1
            )));
        };
        current.push(Observation::new(symbol, Some(tag.to_string())));
    }
    if !current.is_empty() {
        sequences.push(current);
    }
    Ok(sequences)
}
