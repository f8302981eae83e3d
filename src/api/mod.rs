//! Scoring API access: HTTP client, worker pool and bundle dispatch.

pub mod client;
pub mod dispatcher;
pub mod scheduler;

pub use client::ScoringClient;
pub use dispatcher::{dispatch, BundleSender, DispatchSettings};
pub use scheduler::{WorkerPool, WorkerSlot};
