//! Input records and content keys.
//!
//! Texts arrive either as an in-memory list (with optional parallel ids) or
//! as a CSV file with a text column and an optional id column. Either way
//! they become an ordered list of [`Record`]s, created once and never
//! mutated afterwards.

mod dedup;

pub use dedup::{deduplicate, Deduplicated, KeyedText};

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use sha2::{Digest, Sha256};

use crate::error::ScoreError;

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// One input text with its caller-facing id.
///
/// Id uniqueness is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    /// `None` when the text is missing (e.g. a short CSV row).
    pub text: Option<String>,
}

impl Record {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: Some(text.into()),
        }
    }

    /// Empty or missing text. Blank records are never deduplicated.
    pub fn is_blank(&self) -> bool {
        self.text.as_deref().map_or(true, str::is_empty)
    }

    /// Text as sent on the wire; missing text is sent as `""`.
    pub fn content(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ContentKey
// ─────────────────────────────────────────────────────────────────────────────

/// Stable fingerprint of a text, sent as `request_id` and echoed back by the
/// API to correlate results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey(String);

impl ContentKey {
    /// Lowercase hex SHA-256 of the text bytes.
    pub fn of_text(text: &str) -> Self {
        Self(hex_digest(text.as_bytes()))
    }

    /// Key for a blank record at `position` in the input.
    ///
    /// Blank texts all hash alike, so each one gets a key of its own to keep
    /// its result row addressable.
    pub(crate) fn blank(position: usize) -> Self {
        Self(hex_digest(format!("\0blank:{}", position).as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ─────────────────────────────────────────────────────────────────────────────
// TextInput
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum TextSource {
    Texts(Vec<Option<String>>),
    Csv { path: PathBuf, text_column: String },
}

/// Where the texts (and optionally their ids) come from.
#[derive(Debug, Clone)]
pub struct TextInput {
    source: TextSource,
    ids: Option<Vec<String>>,
    id_column: Option<String>,
}

impl TextInput {
    /// In-memory texts. Without explicit ids, records are numbered from 1.
    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::optional_texts(texts.into_iter().map(|t| Some(t.into())))
    }

    /// In-memory texts where some entries may be missing.
    pub fn optional_texts<I>(texts: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        Self {
            source: TextSource::Texts(texts.into_iter().collect()),
            ids: None,
            id_column: None,
        }
    }

    /// Texts read from the `text_column` of a CSV file with a header row.
    pub fn csv(path: impl Into<PathBuf>, text_column: impl Into<String>) -> Self {
        Self {
            source: TextSource::Csv {
                path: path.into(),
                text_column: text_column.into(),
            },
            ids: None,
            id_column: None,
        }
    }

    /// Explicit ids, parallel to the texts.
    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.ids = Some(ids.into_iter().map(|id| id.to_string()).collect());
        self
    }

    /// Reads ids from a CSV column. Only valid for CSV input.
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = Some(column.into());
        self
    }

    /// Resolves the input into ordered records.
    ///
    /// # Errors
    ///
    /// - `ScoreError::MissingColumn` - a requested column is not in the CSV header
    /// - `ScoreError::IdLengthMismatch` - ids and texts differ in length
    /// - `ScoreError::Csv` / `ScoreError::Io` - the file cannot be read
    pub async fn into_records(self) -> Result<Vec<Record>, ScoreError> {
        let (texts, column_ids) = match self.source {
            TextSource::Texts(texts) => {
                if let Some(column) = self.id_column {
                    return Err(ScoreError::MissingColumn { role: "id", column });
                }
                (texts, None)
            }
            TextSource::Csv { path, text_column } => {
                let id_column = self.id_column;
                tokio::task::spawn_blocking(move || {
                    read_csv_columns(&path, &text_column, id_column.as_deref())
                })
                .await
                .map_err(|e| ScoreError::Internal(format!("CSV read task failed: {}", e)))??
            }
        };

        let ids = match (self.ids, column_ids) {
            (Some(ids), _) | (None, Some(ids)) => {
                if ids.len() != texts.len() {
                    return Err(ScoreError::IdLengthMismatch {
                        texts: texts.len(),
                        ids: ids.len(),
                    });
                }
                ids
            }
            (None, None) => (1..=texts.len()).map(|n| n.to_string()).collect(),
        };

        Ok(ids
            .into_iter()
            .zip(texts)
            .map(|(id, text)| Record { id, text })
            .collect())
    }
}

type CsvColumns = (Vec<Option<String>>, Option<Vec<String>>);

/// Blocking read of the text (and id) columns of a CSV file.
fn read_csv_columns(
    path: &Path,
    text_column: &str,
    id_column: Option<&str>,
) -> Result<CsvColumns, ScoreError> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers = reader.headers()?.clone();
    let position = |column: &str, role: &'static str| {
        headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| ScoreError::MissingColumn {
                role,
                column: column.to_string(),
            })
    };

    let text_idx = position(text_column, "text")?;
    let id_idx = id_column.map(|c| position(c, "id")).transpose()?;

    let mut texts = Vec::new();
    let mut ids = id_idx.map(|_| Vec::new());

    for result in reader.records() {
        let row = result?;
        texts.push(row.get(text_idx).map(str::to_string));
        if let (Some(idx), Some(ids)) = (id_idx, ids.as_mut()) {
            ids.push(row.get(idx).unwrap_or_default().to_string());
        }
    }

    Ok((texts, ids))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("input.csv");
        std::fs::write(&path, contents).unwrap();
        path
    }

    // ─────────────────────────────────────────────────────────────────────────
    // ContentKey Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn content_key_is_stable_sha256_hex() {
        let key = ContentKey::of_text("hello");
        assert_eq!(
            key.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(key, ContentKey::of_text("hello"));
        assert_ne!(key, ContentKey::of_text("hello "));
    }

    #[test]
    fn blank_keys_differ_by_position_and_from_text_keys() {
        assert_ne!(ContentKey::blank(0), ContentKey::blank(1));
        assert_eq!(ContentKey::blank(4), ContentKey::blank(4));
        assert_ne!(ContentKey::blank(0), ContentKey::of_text(""));
    }

    #[test]
    fn record_blankness() {
        assert!(Record::new("1", "").is_blank());
        assert!(Record { id: "2".into(), text: None }.is_blank());
        assert!(!Record::new("3", " ").is_blank());
        assert_eq!(Record { id: "4".into(), text: None }.content(), "");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // In-memory Input Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn texts_get_one_based_ids() {
        let records = TextInput::texts(["a", "b", "c"]).into_records().await.unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(records[1].text.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn explicit_ids_are_kept() {
        let records = TextInput::texts(["a", "b"])
            .with_ids(["doc-9", "doc-3"])
            .into_records()
            .await
            .unwrap();

        assert_eq!(records[0], Record::new("doc-9", "a"));
        assert_eq!(records[1], Record::new("doc-3", "b"));
    }

    #[tokio::test]
    async fn id_length_mismatch_is_rejected() {
        let result = TextInput::texts(["a", "b", "c"])
            .with_ids([1, 2])
            .into_records()
            .await;

        match result {
            Err(ScoreError::IdLengthMismatch { texts, ids }) => {
                assert_eq!(texts, 3);
                assert_eq!(ids, 2);
            }
            other => panic!("Expected IdLengthMismatch, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn id_column_requires_csv_input() {
        let result = TextInput::texts(["a"]).with_id_column("id").into_records().await;
        assert!(matches!(result, Err(ScoreError::MissingColumn { role: "id", .. })));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // CSV Input Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn csv_reads_text_and_id_columns() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_csv(
            &temp_dir,
            "doc,body\nd1,\"hello, world\"\nd2,\"multi\nline\"\nd3,\n",
        );

        let records = TextInput::csv(&path, "body")
            .with_id_column("doc")
            .into_records()
            .await
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0], Record::new("d1", "hello, world"));
        assert_eq!(records[1], Record::new("d2", "multi\nline"));
        assert!(records[2].is_blank());
    }

    #[tokio::test]
    async fn csv_short_rows_have_missing_text() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_csv(&temp_dir, "id,text\n1,first\n2\n");

        let records = TextInput::csv(&path, "text").into_records().await.unwrap();

        assert_eq!(records[0].text.as_deref(), Some("first"));
        assert_eq!(records[1].text, None);
        assert_eq!(records[1].id, "2");
    }

    #[tokio::test]
    async fn csv_missing_text_column_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_csv(&temp_dir, "id,body\n1,hi\n");

        let result = TextInput::csv(&path, "text").into_records().await;

        match result {
            Err(ScoreError::MissingColumn { role, column }) => {
                assert_eq!(role, "text");
                assert_eq!(column, "text");
            }
            other => panic!("Expected MissingColumn, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn csv_missing_id_column_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_csv(&temp_dir, "text\nhi\n");

        let result = TextInput::csv(&path, "text")
            .with_id_column("key")
            .into_records()
            .await;

        assert!(matches!(result, Err(ScoreError::MissingColumn { role: "id", .. })));
    }

    #[tokio::test]
    async fn csv_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = TextInput::csv(temp_dir.path().join("nope.csv"), "text")
            .into_records()
            .await;

        assert!(matches!(result, Err(ScoreError::Io(_))));
    }
}
