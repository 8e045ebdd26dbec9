//! JSON-lines input files.

use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Errors reading an input file.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// The file could not be read.
    #[error("cannot read {path:?}: {source}")]
    Io {
        /// Input path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A line is not valid JSON.
    #[error("line {line}: {source}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A line is valid JSON but not an object.
    #[error("line {line}: expected a JSON object")]
    NotAnObject {
        /// 1-based line number.
        line: usize,
    },
}

/// Reads one JSON object per line, skipping blank lines.
pub fn read_json_lines(path: &Path) -> Result<Vec<Value>, InputError> {
    let io_error = |source| InputError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::open(path).map_err(io_error)?;

    let mut rows = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_error)?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).map_err(|source| InputError::Parse {
            line: index + 1,
            source,
        })?;
        if !value.is_object() {
            return Err(InputError::NotAnObject { line: index + 1 });
        }
        rows.push(value);
    }
    tracing::debug!(path = %path.display(), rows = rows.len(), "input read");
    Ok(rows)
}
