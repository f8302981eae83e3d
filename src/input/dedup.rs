//! Collapses duplicate texts so each distinct text is scored once.

use std::collections::HashSet;

use tracing::debug;

use super::{ContentKey, Record};
use crate::error::ScoreError;

/// A text to transmit, with the key its result row will carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedText {
    pub key: ContentKey,
    pub text: String,
}

/// Distinct texts in first-appearance order, plus each original record's key.
#[derive(Debug, Clone)]
pub struct Deduplicated {
    /// Texts to transmit.
    pub unique: Vec<KeyedText>,
    /// Key of every original record, parallel to the input.
    pub keys: Vec<ContentKey>,
}

impl Deduplicated {
    /// Number of input records that were folded into an earlier duplicate.
    pub fn duplicates(&self) -> usize {
        self.keys.len() - self.unique.len()
    }
}

/// Deduplicates records by content.
///
/// Non-empty texts that are byte-identical share one key and are transmitted
/// once. Blank (empty or missing) texts are always kept, each under a key of
/// its own.
///
/// # Errors
///
/// Returns `ScoreError::EmptyInput` if nothing is left to send.
pub fn deduplicate(records: &[Record]) -> Result<Deduplicated, ScoreError> {
    let mut seen: HashSet<ContentKey> = HashSet::with_capacity(records.len());
    let mut unique = Vec::with_capacity(records.len());
    let mut keys = Vec::with_capacity(records.len());

    for (position, record) in records.iter().enumerate() {
        let key = if record.is_blank() {
            ContentKey::blank(position)
        } else {
            ContentKey::of_text(record.content())
        };

        if seen.insert(key.clone()) {
            unique.push(KeyedText {
                key: key.clone(),
                text: record.content().to_string(),
            });
        }
        keys.push(key);
    }

    if unique.is_empty() {
        return Err(ScoreError::EmptyInput);
    }

    debug!(
        "[BUNDLE] {} records, {} distinct texts",
        records.len(),
        unique.len()
    );

    Ok(Deduplicated { unique, keys })
}
