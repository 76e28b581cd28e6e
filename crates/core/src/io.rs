//! Loaders for the `.fvecs` / `.ivecs` benchmark data formats.
//!
//! Both formats are sequences of records: a little-endian `i32` dimension
//! followed by `dim` little-endian payload values (`f32` for fvecs, `i32`
//! for ivecs). Every record in a file must share the same dimension.

use std::fs;
use std::path::Path;

use crate::error::EngineError;

/// Load an `.fvecs` file into one flat `count * dim` float array.
pub fn load_fvecs(path: &Path) -> Result<(usize, Vec<f32>), EngineError> {
    let bytes = read_file(path)?;
    let mut data = Vec::new();
    let mut dim = 0usize;
    let mut offset = 0usize;

    while offset < bytes.len() {
        let record_dim = read_dim(path, &bytes, &mut offset)?;
        if dim == 0 {
            dim = record_dim;
        } else if record_dim != dim {
            return Err(format_error(
                path,
                format!("record dimension {record_dim} != file dimension {dim}"),
            ));
        }
        let end = offset + dim * 4;
        if end > bytes.len() {
            return Err(format_error(path, "truncated record".to_string()));
        }
        data.reserve(dim);
        for chunk in bytes[offset..end].chunks_exact(4) {
            data.push(f32::from_le_bytes(chunk.try_into().unwrap()));
        }
        offset = end;
    }

    if dim == 0 {
        return Err(format_error(path, "empty file".to_string()));
    }
    Ok((dim, data))
}

/// Load an `.ivecs` file (typically ground-truth neighbor lists).
pub fn load_ivecs(path: &Path) -> Result<(usize, Vec<Vec<u32>>), EngineError> {
    let bytes = read_file(path)?;
    let mut rows = Vec::new();
    let mut dim = 0usize;
    let mut offset = 0usize;

    while offset < bytes.len() {
        let record_dim = read_dim(path, &bytes, &mut offset)?;
        if dim == 0 {
            dim = record_dim;
        } else if record_dim != dim {
            return Err(format_error(
                path,
                format!("record dimension {record_dim} != file dimension {dim}"),
            ));
        }
        let end = offset + dim * 4;
        if end > bytes.len() {
            return Err(format_error(path, "truncated record".to_string()));
        }
        let row: Vec<u32> = bytes[offset..end]
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()) as u32)
            .collect();
        rows.push(row);
        offset = end;
    }

    if dim == 0 {
        return Err(format_error(path, "empty file".to_string()));
    }
    Ok((dim, rows))
}

fn read_file(path: &Path) -> Result<Vec<u8>, EngineError> {
    fs::read(path).map_err(|source| EngineError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn read_dim(path: &Path, bytes: &[u8], offset: &mut usize) -> Result<usize, EngineError> {
    let end = *offset + 4;
    if end > bytes.len() {
        return Err(format_error(path, "truncated record header".to_string()));
    }
    let dim = i32::from_le_bytes(bytes[*offset..end].try_into().unwrap());
    *offset = end;
    if dim <= 0 {
        return Err(format_error(path, format!("invalid dimension {dim}")));
    }
    Ok(dim as usize)
}

fn format_error(path: &Path, reason: String) -> EngineError {
    EngineError::Format {
        path: path.display().to_string(),
        reason,
    }
}
