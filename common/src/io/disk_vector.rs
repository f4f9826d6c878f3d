use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::AppError;

/// Element of a length-prefixed, little-endian binary vector file. All of
/// the flat model files share this one format.
pub trait VectorElement: Copy {
    fn write_to<W: Write>(self, writer: &mut W) -> io::Result<()>;
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self>;
}

impl VectorElement for u32 {
    fn write_to<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self)
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_u32::<LittleEndian>()
    }
}

impl VectorElement for u64 {
    fn write_to<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self)
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_u64::<LittleEndian>()
    }
}

impl VectorElement for f64 {
    fn write_to<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_f64::<LittleEndian>(self)
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_f64::<LittleEndian>()
    }
}

pub fn write_vector<T: VectorElement>(path: &Path, values: &[T]) -> Result<(), AppError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_u64::<LittleEndian>(values.len() as u64)?;
    for &value in values {
        value.write_to(&mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_vector<T: VectorElement>(path: &Path) -> Result<Vec<T>, AppError> {
    let mut reader = BufReader::new(File::open(path)?);
    let len = reader.read_u64::<LittleEndian>().map_err(|_| corrupt(path, "missing length prefix"))?;
    let mut values = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    for index in 0..len {
        let value = T::read_from(&mut reader)
            .map_err(|_| corrupt(path, &format!("truncated at element {index} of {len}")))?;
        values.push(value);
    }
    Ok(values)
}

fn corrupt(path: &Path, detail: &str) -> AppError {
    AppError::CorruptModel {
        path: path.to_path_buf(),
        detail: detail.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_doubles_and_ids() {
        let dir = tempfile::tempdir().expect("tempdir");

        let weights = vec![0.0_f64, -1.5, 3.25];
        let weight_path = dir.path().join("observation_weights.vector");
        write_vector(&weight_path, &weights).expect("write weights");
        assert_eq!(read_vector::<f64>(&weight_path).expect("read weights"), weights);

        let ranges = vec![0_u64, 2, 5];
        let range_path = dir.path().join("observation_ranges.vector");
        write_vector(&range_path, &ranges).expect("write ranges");
        assert_eq!(read_vector::<u64>(&range_path).expect("read ranges"), ranges);
    }

    #[test]
    fn truncated_file_reports_corrupt_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("transition_weights.vector");
        write_vector(&path, &[1.0_f64, 2.0, 3.0]).expect("write");

        let full = std::fs::read(&path).expect("read bytes");
        std::fs::write(&path, &full[..full.len() - 4]).expect("truncate");

        let result = read_vector::<f64>(&path);
        assert!(matches!(result, Err(AppError::CorruptModel { .. })));
    }
}
