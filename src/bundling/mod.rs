//! Partitioning of distinct texts into size-bounded request bundles.
//!
//! Each bundle respects both a record limit and a serialized byte limit, so
//! one bundle always fits in one bulk request.

mod bundler;

pub use bundler::{build_items, partition, Bundle, BundleConfig, WireItem};
