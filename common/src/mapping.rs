use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;

use crate::error::AppError;
use crate::ids::Identifier;

/// Append-only bijection between surface strings and dense ids. Ids are
/// assigned in first-seen order, so the reverse direction is a plain vector.
#[derive(Debug, Clone, Default)]
pub struct VocabMap<I> {
    keys: Vec<String>,
    ids: HashMap<String, usize>,
    _marker: PhantomData<I>,
}

impl<I: Identifier> VocabMap<I> {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            ids: HashMap::new(),
            _marker: PhantomData,
        }
    }

    /// Returns the id for `key`, assigning the next dense id on first sight.
    pub fn get_or_insert(&mut self, key: &str) -> I {
        if let Some(&index) = self.ids.get(key) {
            return I::from_index(index);
        }
        let index = self.keys.len();
        self.keys.push(key.to_owned());
        self.ids.insert(key.to_owned(), index);
        I::from_index(index)
    }

    pub fn id(&self, key: &str) -> Option<I> {
        self.ids.get(key).map(|&index| I::from_index(index))
    }

    pub fn key(&self, id: I) -> Option<&str> {
        self.keys.get(id.index()).map(String::as_str)
    }

    /// One-past-the-end id, used as the sentinel for unseen keys in
    /// read-only analysis.
    pub fn sentinel(&self) -> I {
        I::from_index(self.keys.len())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &str)> {
        self.keys
            .iter()
            .enumerate()
            .map(|(index, key)| (I::from_index(index), key.as_str()))
    }

    /// Persists the mapping as one `id key` pair per line.
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let mut writer = BufWriter::new(File::create(path)?);
        for (index, key) in self.keys.iter().enumerate() {
            writeln!(writer, "{index} {key}")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let reader = BufReader::new(File::open(path)?);
        let mut map = Self::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (id_part, key) = line.split_once(' ').ok_or_else(|| corrupt(path, line_no))?;
            let id: usize = id_part.parse().map_err(|_| corrupt(path, line_no))?;
            if id != map.keys.len() {
                return Err(corrupt(path, line_no));
            }
            map.get_or_insert(key);
        }
        Ok(map)
    }
}

fn corrupt(path: &Path, line_no: usize) -> AppError {
    AppError::CorruptModel {
        path: path.to_path_buf(),
        detail: format!("malformed mapping entry on line {}", line_no + 1),
    }
}
