//! Bundle dispatch with per-bundle retry and bounded concurrency.
//!
//! Each bundle is sent up to `retry_limit + 1` times with a fixed pause
//! between attempts. The first bundle that exhausts its retries fails the
//! whole dispatch: no new bundles start, in-flight ones are allowed to
//! finish, and every partial result is discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scheduler::{WorkerPool, WorkerSlot};
use crate::bundling::Bundle;
use crate::config::RequestOptions;
use crate::error::ScoreError;
use crate::results::ResultTable;

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Sends one bundle in a single attempt.
pub trait BundleSender: Send + Sync {
    fn send_bundle<'a>(
        &'a self,
        bundle: &'a Bundle,
    ) -> Pin<Box<dyn Future<Output = Result<ResultTable, ScoreError>> + Send + 'a>>;
}

impl BundleSender for super::client::ScoringClient {
    fn send_bundle<'a>(
        &'a self,
        bundle: &'a Bundle,
    ) -> Pin<Box<dyn Future<Output = Result<ResultTable, ScoreError>> + Send + 'a>> {
        Box::pin(self.score_bundle(bundle))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// Extra attempts after the first failure.
    pub retry_limit: u32,
    pub retry_backoff: Duration,
    /// Bundles in flight at once. 1 or less dispatches sequentially.
    pub concurrency: usize,
}

impl From<&RequestOptions> for DispatchSettings {
    fn from(options: &RequestOptions) -> Self {
        Self {
            retry_limit: options.retry_limit,
            retry_backoff: options.retry_backoff,
            concurrency: options.concurrency,
        }
    }
}

/// A bundle plus how many more times it may be resent.
struct DispatchJob {
    bundle: Bundle,
    retries_remaining: u32,
}

/// Outcome of one spawned bundle task. `None` means it never ran.
struct BundleOutcome {
    position: usize,
    result: Option<Result<ResultTable, ScoreError>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Sends every bundle and returns their results in bundle order.
///
/// # Errors
///
/// Returns `ScoreError::BundleFailed` naming the first bundle that ran out
/// of retries. No partial results are returned.
pub async fn dispatch(
    sender: Arc<dyn BundleSender>,
    bundles: Vec<Bundle>,
    settings: DispatchSettings,
) -> Result<Vec<ResultTable>, ScoreError> {
    info!(
        "[DISPATCH] Sending {} bundle(s) with {} worker(s)",
        bundles.len(),
        settings.concurrency.max(1)
    );

    if settings.concurrency <= 1 || bundles.len() <= 1 {
        return dispatch_sequential(sender.as_ref(), bundles, settings).await;
    }
    dispatch_concurrent(sender, bundles, settings).await
}

async fn dispatch_sequential(
    sender: &dyn BundleSender,
    bundles: Vec<Bundle>,
    settings: DispatchSettings,
) -> Result<Vec<ResultTable>, ScoreError> {
    let mut tables = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let job = DispatchJob {
            bundle,
            retries_remaining: settings.retry_limit,
        };
        tables.push(send_with_retry(sender, job, settings.retry_backoff).await?);
    }
    Ok(tables)
}

async fn dispatch_concurrent(
    sender: Arc<dyn BundleSender>,
    bundles: Vec<Bundle>,
    settings: DispatchSettings,
) -> Result<Vec<ResultTable>, ScoreError> {
    let total = bundles.len();
    let pool = WorkerPool::new(settings.concurrency);
    let cancel = CancellationToken::new();
    let mut join_set: JoinSet<BundleOutcome> = JoinSet::new();

    for (position, bundle) in bundles.into_iter().enumerate() {
        // A failed bundle cancels the run; stop handing out work
        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            slot = pool.acquire() => slot?,
        };

        let sender = Arc::clone(&sender);
        let cancel = cancel.clone();
        let job = DispatchJob {
            bundle,
            retries_remaining: settings.retry_limit,
        };

        join_set.spawn(async move {
            let result = run_job(sender.as_ref(), job, slot, &cancel, settings.retry_backoff).await;
            BundleOutcome { position, result }
        });
    }

    let mut slots: Vec<Option<ResultTable>> = (0..total).map(|_| None).collect();
    let mut failure: Option<ScoreError> = None;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(BundleOutcome {
                position,
                result: Some(Ok(table)),
            }) => {
                debug!("[DISPATCH] Bundle {} done, {} in flight", position, join_set.len());
                slots[position] = Some(table);
            }
            Ok(BundleOutcome {
                result: Some(Err(e)),
                ..
            }) => {
                if failure.is_none() {
                    warn!("[DISPATCH] Stopping dispatch: {}", e);
                    failure = Some(e);
                }
            }
            Ok(BundleOutcome { result: None, .. }) => {}
            Err(e) => {
                cancel.cancel();
                failure.get_or_insert(ScoreError::Internal(format!(
                    "Dispatch task failed: {}",
                    e
                )));
            }
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(position, slot)| {
            slot.ok_or_else(|| {
                ScoreError::Internal(format!("bundle {} produced no result", position))
            })
        })
        .collect()
}

/// Runs one job while holding `slot`. Returns `None` if the run was
/// cancelled before the job started; cancels the run if the job fails.
async fn run_job(
    sender: &dyn BundleSender,
    job: DispatchJob,
    slot: WorkerSlot,
    cancel: &CancellationToken,
    backoff: Duration,
) -> Option<Result<ResultTable, ScoreError>> {
    let _slot = slot;

    if cancel.is_cancelled() {
        return None;
    }

    let result = send_with_retry(sender, job, backoff).await;
    if result.is_err() {
        cancel.cancel();
    }
    Some(result)
}

/// Sends `job.bundle` until it succeeds or its retries run out.
async fn send_with_retry(
    sender: &dyn BundleSender,
    mut job: DispatchJob,
    backoff: Duration,
) -> Result<ResultTable, ScoreError> {
    let index = job.bundle.index();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match sender.send_bundle(&job.bundle).await {
            Ok(table) => {
                if attempts > 1 {
                    info!("[DISPATCH] Bundle {} succeeded on attempt {}", index, attempts);
                }
                return Ok(table);
            }
            Err(e) if job.retries_remaining == 0 => {
                warn!(
                    "[DISPATCH] Bundle {} failed after {} attempt(s): {}",
                    index, attempts, e
                );
                return Err(ScoreError::BundleFailed {
                    bundle: index,
                    attempts,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                job.retries_remaining -= 1;
                warn!(
                    "[DISPATCH] Bundle {} attempt {} failed ({} retries left): {}",
                    index, attempts, job.retries_remaining, e
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
