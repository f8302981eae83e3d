//! Bundle partitioning under record-count and byte-size limits.
//!
//! Records are first split into near-even groups of at most `max_records`,
//! so a run never ends with a tiny remainder bundle. Any group whose payload
//! is over `max_bytes` is then split greedily by size.

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{RequestOptions, DEFAULT_BUNDLE_BYTE_LIMIT, MAX_BUNDLE_SIZE};
use crate::error::ScoreError;
use crate::input::{ContentKey, KeyedText};

/// Bytes of the enclosing `[` `]` of a payload array.
const ARRAY_OVERHEAD: usize = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Limits applied to every bundle.
#[derive(Debug, Clone, Copy)]
pub struct BundleConfig {
    /// Maximum records per bundle.
    pub max_records: usize,
    /// Maximum serialized payload bytes per bundle.
    pub max_bytes: usize,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            max_records: MAX_BUNDLE_SIZE,
            max_bytes: DEFAULT_BUNDLE_BYTE_LIMIT,
        }
    }
}

impl From<&RequestOptions> for BundleConfig {
    fn from(options: &RequestOptions) -> Self {
        Self {
            max_records: options.effective_bundle_size(),
            max_bytes: options.bundle_byte_limit,
        }
    }
}

impl BundleConfig {
    pub fn max_records(mut self, records: usize) -> Self {
        self.max_records = records;
        self
    }

    pub fn max_bytes(mut self, bytes: usize) -> Self {
        self.max_bytes = bytes;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire items
// ─────────────────────────────────────────────────────────────────────────────

/// One request item, pre-serialized so its size is known.
#[derive(Debug, Clone)]
pub struct WireItem {
    pub key: ContentKey,
    body: Value,
    size: usize,
}

impl WireItem {
    /// Serialized size of this item in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Builds the request item for every text.
///
/// Each item is `{"content": .., "request_id": .., ...extra}`; `content` and
/// `request_id` win over same-named keys in `extra`.
pub fn build_items(
    texts: &[KeyedText],
    extra: &Map<String, Value>,
) -> Result<Vec<WireItem>, ScoreError> {
    texts
        .iter()
        .map(|text| {
            let mut fields = extra.clone();
            fields.insert("content".to_string(), Value::String(text.text.clone()));
            fields.insert(
                "request_id".to_string(),
                Value::String(text.key.as_str().to_string()),
            );
            let body = Value::Object(fields);
            let size = serde_json::to_vec(&body)
                .map_err(|e| ScoreError::Internal(format!("Failed to serialize item: {}", e)))?
                .len();
            Ok(WireItem {
                key: text.key.clone(),
                body,
                size,
            })
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Bundle
// ─────────────────────────────────────────────────────────────────────────────

/// A contiguous run of items sent in one request. Immutable once formed.
#[derive(Debug, Clone)]
pub struct Bundle {
    index: usize,
    items: Vec<WireItem>,
    byte_size: usize,
}

impl Bundle {
    fn new(index: usize, items: Vec<WireItem>) -> Self {
        let byte_size = payload_len(items.iter().map(WireItem::size));
        Self {
            index,
            items,
            byte_size,
        }
    }

    /// Position of this bundle in submission order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Exact length of `payload()`.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn keys(&self) -> impl Iterator<Item = &ContentKey> {
        self.items.iter().map(|item| &item.key)
    }

    pub fn items(&self) -> &[WireItem] {
        &self.items
    }

    /// The JSON array sent as the request body.
    pub fn payload(&self) -> Result<Vec<u8>, ScoreError> {
        let bodies: Vec<&Value> = self.items.iter().map(WireItem::body).collect();
        serde_json::to_vec(&bodies)
            .map_err(|e| ScoreError::Internal(format!("Failed to serialize bundle: {}", e)))
    }
}

/// Length of a compact JSON array holding items of the given sizes.
fn payload_len(sizes: impl Iterator<Item = usize>) -> usize {
    let (count, total) = sizes.fold((0usize, 0usize), |(n, sum), s| (n + 1, sum + s));
    ARRAY_OVERHEAD + total + count.saturating_sub(1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Partitioning
// ─────────────────────────────────────────────────────────────────────────────

/// Splits items into bundles that satisfy `config`, preserving order.
///
/// # Errors
///
/// Returns `ScoreError::OversizedRecord` if any single item cannot fit in a
/// bundle of its own. Nothing is partitioned in that case.
pub fn partition(items: Vec<WireItem>, config: BundleConfig) -> Result<Vec<Bundle>, ScoreError> {
    if let Some(item) = items
        .iter()
        .find(|item| payload_len(std::iter::once(item.size)) > config.max_bytes)
    {
        return Err(ScoreError::OversizedRecord {
            size: payload_len(std::iter::once(item.size)),
            limit: config.max_bytes,
        });
    }

    let max_records = config.max_records.max(1);
    let mut bundles: Vec<Bundle> = Vec::new();
    let mut rest = items;

    for group_len in even_group_sizes(rest.len(), max_records) {
        let tail = rest.split_off(group_len);
        let group = std::mem::replace(&mut rest, tail);

        if payload_len(group.iter().map(WireItem::size)) <= config.max_bytes {
            bundles.push(Bundle::new(bundles.len(), group));
            continue;
        }

        for sub_group in split_by_bytes(group, config.max_bytes) {
            bundles.push(Bundle::new(bundles.len(), sub_group));
        }
    }

    debug!(
        "[BUNDLE] Partitioned into {} bundles (max {} records, {} bytes)",
        bundles.len(),
        max_records,
        config.max_bytes
    );

    Ok(bundles)
}

/// Sizes of the fewest groups of at most `max` that cover `total`, with the
/// remainder spread one-per-group from the front.
fn even_group_sizes(total: usize, max: usize) -> Vec<usize> {
    if total == 0 {
        return Vec::new();
    }
    let groups = total.div_ceil(max);
    let base = total / groups;
    let remainder = total % groups;
    (0..groups)
        .map(|g| if g < remainder { base + 1 } else { base })
        .collect()
}

/// Greedy split: fill a sub-group until the next item would push it past
/// `max_bytes`. Every item is known to fit on its own.
fn split_by_bytes(group: Vec<WireItem>, max_bytes: usize) -> Vec<Vec<WireItem>> {
    let mut out = Vec::new();
    let mut current: Vec<WireItem> = Vec::new();
    let mut current_bytes = ARRAY_OVERHEAD;

    for item in group {
        let added = item.size + usize::from(!current.is_empty());
        if !current.is_empty() && current_bytes + added > max_bytes {
            out.push(std::mem::take(&mut current));
            current_bytes = ARRAY_OVERHEAD;
        }
        current_bytes += item.size + usize::from(!current.is_empty());
        current.push(item);
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
