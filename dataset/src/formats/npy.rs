//! Minimal reader/writer for NumPy `.npy` arrays and `.npz` archives of them.

use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};
use crate::error::FormatError;

const MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl NpyArray {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Self {
        Self { shape, data }
    }

    /// Rows of a 2D array with `cols` columns.
    pub fn rows(&self, cols: usize) -> Result<impl Iterator<Item = &[f64]>, FormatError> {
        if self.shape.len() != 2 || self.shape[1] != cols {
            return Err(invalid(format!(
                "Expected an array of shape (N, {cols}), got {:?}",
                self.shape
            )));
        }
        Ok(self.data.chunks_exact(cols))
    }
}

fn invalid(msg: impl Into<String>) -> FormatError {
    FormatError::InvalidArray(msg.into())
}

pub fn parse_npy(bytes: &[u8]) -> Result<NpyArray, FormatError> {
    if bytes.len() < 10 || !bytes.starts_with(MAGIC) {
        return Err(invalid("Missing NUMPY magic"));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(invalid("Truncated header"));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        v => return Err(invalid(format!("Unsupported npy version {v}"))),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| invalid("Invalid header"))?;

    let descr = dict_value(header, "descr")
        .and_then(quoted)
        .ok_or_else(|| invalid("Missing descr"))?;
    if dict_value(header, "fortran_order").is_some_and(|v| v.starts_with("True")) {
        return Err(invalid("Fortran ordered arrays are not supported"));
    }
    let shape = parse_shape(header)?;

    let body = &bytes[data_start..];
    let count = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| invalid(format!("Shape {shape:?} is too large")))?;
    let data: Vec<f64> = match descr {
        "<f8" => body
            .chunks_exact(8)
            .take(count)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                f64::from_le_bytes(b)
            })
            .collect(),
        "<f4" => body
            .chunks_exact(4)
            .take(count)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        other => return Err(invalid(format!("Unsupported dtype {other}"))),
    };
    if data.len() != count {
        return Err(invalid("Array data is truncated"));
    }

    Ok(NpyArray { shape, data })
}

fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{key}':");
    let start = header.find(&pattern)? + pattern.len();
    Some(header[start..].trim_start())
}

/// The string literal a dict value starts with.
fn quoted(value: &str) -> Option<&str> {
    let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    value[1..].split(quote).next()
}

fn parse_shape(header: &str) -> Result<Vec<usize>, FormatError> {
    let value = dict_value(header, "shape").ok_or_else(|| invalid("Missing shape"))?;
    let inner = value
        .strip_prefix('(')
        .and_then(|v| v.split(')').next())
        .ok_or_else(|| invalid("Malformed shape"))?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| invalid(format!("Malformed shape entry {s}"))))
        .collect()
}

pub fn write_npy(array: &NpyArray) -> Vec<u8> {
    let shape = match array.shape.as_slice() {
        [n] => format!("({n},)"),
        dims => format!(
            "({})",
            dims.iter().map(usize::to_string).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!("{{'descr': '<f8', 'fortran_order': False, 'shape': {shape}, }}");
    // Data starts on a 64 byte boundary, header ends with a newline.
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + array.data.len() * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in &array.data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn read_npz_entry(bytes: &[u8], name: &str) -> Result<NpyArray, FormatError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = archive.by_name(&format!("{name}.npy"))?;
    let mut data = vec![];
    entry.read_to_end(&mut data)?;
    parse_npy(&data)
}

pub fn write_npz(entries: &[(&str, NpyArray)]) -> Result<Vec<u8>, FormatError> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, array) in entries {
            writer.start_file(format!("{name}.npy"), options)?;
            writer.write_all(&write_npy(array))?;
        }
        writer.finish()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn npy_f4(shape: &str, values: &[f32]) -> Vec<u8> {
        let header = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': {shape}, }}\n");
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn reads_float32_points() {
        let bytes = npy_f4("(2, 3)", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let array = parse_npy(&bytes).unwrap();
        assert_eq!(array.shape, vec![2, 3]);
        let rows: Vec<_> = array.rows(3).unwrap().collect();
        assert_eq!(rows[1], &[4.0, 5.0, 6.0]);
        assert!(array.rows(17).is_err());
    }

    #[test]
    fn rejects_truncated_data() {
        let bytes = npy_f4("(2, 3)", &[1.0, 2.0]);
        assert!(parse_npy(&bytes).is_err());
    }

    #[test]
    fn written_header_is_aligned() {
        let bytes = write_npy(&NpyArray::new(vec![3], vec![0.5, -1.0, 2.0]));
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
    }

    #[test]
    fn written_arrays_read_back() {
        let array = NpyArray::new(vec![1, 3], vec![1.0, 2.0, 3.0]);
        assert_eq!(parse_npy(&write_npy(&array)).unwrap(), array);

        let bytes = npy_f4("(2,)", &[0.25, 4.0]);
        assert_eq!(parse_npy(&bytes).unwrap().data, vec![0.25, 4.0]);
    }

    #[test]
    fn oversized_shapes_are_rejected() {
        let bytes = npy_f4("(4294967296, 4294967296, 4294967296)", &[]);
        assert!(matches!(parse_npy(&bytes), Err(FormatError::InvalidArray(_))));
    }

    #[test]
    fn npz_entries_are_found_by_name() {
        let translate = NpyArray::new(vec![3], vec![0.5, -1.0, 2.0]);
        let bytes = write_npz(&[("translate", translate.clone())]).unwrap();
        assert_eq!(read_npz_entry(&bytes, "translate").unwrap(), translate);
        assert!(read_npz_entry(&bytes, "scale").is_err());
    }
}
