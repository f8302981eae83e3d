//! Atomic CSV persistence of result tables.
//!
//! Writes to a temporary file in the same directory as the destination,
//! then atomically replaces the destination on `finish()`. If dropped
//! before finishing, the temporary file is automatically cleaned up.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::Writer;
use tempfile::NamedTempFile;

use super::table::{cell_to_string, ResultTable};
use crate::error::ScoreError;

/// Fails if `path` exists and may not be replaced.
pub fn ensure_output_writable(path: &Path, overwrite: bool) -> Result<(), ScoreError> {
    if path.exists() && !overwrite {
        return Err(ScoreError::OutputExists(path.to_path_buf()));
    }
    Ok(())
}

/// Writes `table` as CSV to `path`, replacing it atomically.
pub fn write_table(table: &ResultTable, path: &Path) -> Result<PathBuf, ScoreError> {
    let mut writer = AtomicCsvWriter::new(path)?;
    write_rows(table, writer.writer_mut())?;
    writer.finish()
}

/// Writes `table` as CSV to any writer (e.g. stdout).
pub fn write_table_to<W: Write>(table: &ResultTable, out: W) -> Result<(), ScoreError> {
    let mut writer = Writer::from_writer(out);
    write_rows(table, &mut writer)?;
    writer.flush()?;
    Ok(())
}

fn write_rows<W: Write>(table: &ResultTable, writer: &mut Writer<W>) -> Result<(), ScoreError> {
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(cell_to_string))?;
    }
    Ok(())
}

/// A CSV writer that only ever exposes complete files at its target path.
pub struct AtomicCsvWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
}

impl AtomicCsvWriter {
    /// Creates a writer targeting `final_path`.
    ///
    /// The temporary file lives next to `final_path` so the final rename
    /// stays on one filesystem.
    ///
    /// # Errors
    ///
    /// Returns `ScoreError::Io` if the parent directory cannot be determined
    /// or the temporary file cannot be created.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, ScoreError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = match final_path.parent() {
            Some(p) if p.as_os_str().is_empty() => Path::new("."),
            Some(p) => p,
            None => {
                return Err(ScoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Cannot determine parent directory for: {}", final_path.display()),
                )))
            }
        };

        let temp_file = NamedTempFile::new_in(parent_dir)?;

        Ok(Self {
            writer: Writer::from_writer(BufWriter::new(temp_file)),
            final_path,
        })
    }

    pub fn writer_mut(&mut self) -> &mut Writer<BufWriter<NamedTempFile>> {
        &mut self.writer
    }

    /// Flushes all buffers and atomically persists the file to the final path.
    pub fn finish(self) -> Result<PathBuf, ScoreError> {
        let buf_writer = self.writer.into_inner().map_err(|e| {
            ScoreError::Io(std::io::Error::new(
                e.error().kind(),
                format!("Failed to flush CSV writer: {}", e.error()),
            ))
        })?;

        let named_temp = buf_writer
            .into_inner()
            .map_err(|e| ScoreError::Io(e.into_error()))?;

        named_temp
            .persist(&self.final_path)
            .map_err(|e| ScoreError::Io(e.error))?;

        Ok(self.final_path)
    }
}
