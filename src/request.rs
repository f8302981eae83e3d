//! End-to-end scoring of a text collection.
//!
//! Local work (output check, input loading, deduplication, bundling) runs
//! first, so any input error surfaces before the first network call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::api::{dispatch, BundleSender, DispatchSettings, ScoringClient};
use crate::bundling::{build_items, partition, Bundle, BundleConfig};
use crate::config::RequestOptions;
use crate::error::ScoreError;
use crate::input::{deduplicate, ContentKey, Record, TextInput};
use crate::results::{
    assemble, ensure_output_writable, write_table, FrameworkSelection, ResultTable,
};

/// Records plus the bundles that carry their distinct texts.
#[derive(Debug)]
pub struct PreparedRequest {
    pub records: Vec<Record>,
    /// Content key of every record, in record order.
    pub keys: Vec<ContentKey>,
    pub bundles: Vec<Bundle>,
}

/// Deduplicates `records` and partitions the distinct texts into bundles.
pub fn prepare(
    records: Vec<Record>,
    options: &RequestOptions,
) -> Result<PreparedRequest, ScoreError> {
    let deduplicated = deduplicate(&records)?;
    let items = build_items(&deduplicated.unique, &options.api_args)?;
    let bundles = partition(items, BundleConfig::from(options))?;

    Ok(PreparedRequest {
        records,
        keys: deduplicated.keys,
        bundles,
    })
}

/// Dispatches prepared bundles and assembles the final table.
pub async fn score_prepared(
    prepared: PreparedRequest,
    options: &RequestOptions,
    sender: Arc<dyn BundleSender>,
) -> Result<ResultTable, ScoreError> {
    let fragments = dispatch(sender, prepared.bundles, DispatchSettings::from(options)).await?;

    let selection = FrameworkSelection {
        frameworks: options.frameworks.clone(),
        keep_prefix: options.framework_prefix,
    };
    assemble(fragments, &prepared.records, &prepared.keys, &selection)
}

/// Scores every text in `input` and returns one row per input record.
///
/// When `options.output` is set the table is also written there as CSV.
///
/// # Errors
///
/// Input and precondition errors are returned before any request is made.
/// A bundle that exhausts its retries fails the whole run with
/// `ScoreError::BundleFailed`; no partial table is returned.
pub async fn request(
    input: TextInput,
    options: &RequestOptions,
    client: &ScoringClient,
) -> Result<ResultTable, ScoreError> {
    let start = Instant::now();

    if let Some(output) = &options.output {
        ensure_output_writable(output, options.overwrite)?;
    }

    let records = input.into_records().await?;
    info!(
        "[SCORE] Loaded {} texts ({:.4}s)",
        records.len(),
        start.elapsed().as_secs_f64()
    );

    let prepared = prepare(records, options)?;
    info!(
        "[SCORE] Prepared text in {} bundle(s) ({:.4}s)",
        prepared.bundles.len(),
        start.elapsed().as_secs_f64()
    );

    client.ensure_ready().await?;

    let table = score_prepared(prepared, options, Arc::new(client.clone())).await?;
    info!(
        "[SCORE] Scored {} rows ({:.4}s)",
        table.len(),
        start.elapsed().as_secs_f64()
    );

    match &options.output {
        Some(path) => {
            let (table, written) = persist(table, path.clone()).await?;
            info!("[SCORE] Wrote results to {}", written.display());
            Ok(table)
        }
        None => Ok(table),
    }
}

/// Writes `table` to `path` on the blocking pool and hands the table back.
async fn persist(table: ResultTable, path: PathBuf) -> Result<(ResultTable, PathBuf), ScoreError> {
    let (table, written) = tokio::task::spawn_blocking(move || {
        let written = write_table(&table, &path);
        (table, written)
    })
    .await
    .map_err(|e| ScoreError::Internal(format!("Output write task failed: {}", e)))?;

    Ok((table, written?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiSettings, Credentials};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Echoes every item back as a scored row keyed by its `request_id`.
    struct EchoScorer;

    impl Respond for EchoScorer {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let items: Vec<Value> = serde_json::from_slice(&request.body).unwrap();
            let results: Vec<Value> = items
                .iter()
                .map(|item| {
                    let content = item["content"].as_str().unwrap_or_default();
                    json!({
                        "request_id": item["request_id"],
                        "response_id": "r",
                        "summary": {"word_count": content.split_whitespace().count()},
                        "tone": {"length": content.len()}
                    })
                })
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "results": results }))
        }
    }

    /// Fails the first `failures` calls with a 500, then echoes.
    struct FlakyScorer {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Respond for FlakyScorer {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return ResponseTemplate::new(500).set_body_string("temporarily unavailable");
            }
            EchoScorer.respond(request)
        }
    }

    async fn ready_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    fn client_for(server: &MockServer) -> ScoringClient {
        let settings = ApiSettings::new(&server.uri()).unwrap();
        ScoringClient::new(&settings, Credentials::new("key", "secret")).unwrap()
    }

    fn options() -> RequestOptions {
        RequestOptions::default()
            .retry_backoff(Duration::from_millis(1))
            .concurrency(2)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn duplicates_and_blanks_are_reexpanded() {
        let server = ready_server().await;
        Mock::given(method("POST"))
            .and(path("/v1/framework/bulk"))
            .respond_with(EchoScorer)
            .expect(2)
            .mount(&server)
            .await;

        let input = TextInput::texts(["hello", "hello", "", "world"]);
        let table = request(input, &options().bundle_size(2), &client_for(&server))
            .await
            .unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(
            table.columns(),
            &["id", "request_id", "summary.word_count", "tone.length"]
        );
        let ids: Vec<&Value> = (0..4).map(|i| table.get(i, "id").unwrap()).collect();
        assert_eq!(ids, vec![&json!("1"), &json!("2"), &json!("3"), &json!("4")]);
        assert_eq!(table.rows()[0][1..], table.rows()[1][1..]);
        assert_eq!(table.get(2, "tone.length"), Some(&json!(0)));
        assert_eq!(table.get(3, "tone.length"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn unique_texts_keep_input_order() {
        let server = ready_server().await;
        Mock::given(method("POST"))
            .respond_with(EchoScorer)
            .mount(&server)
            .await;

        let texts: Vec<String> = (0..10).map(|i| format!("text{}", i)).collect();
        let ids: Vec<String> = (0..10).map(|i| format!("doc-{}", i)).collect();
        let input = TextInput::texts(texts.clone()).with_ids(ids.clone());

        let table = request(input, &options().bundle_size(3), &client_for(&server))
            .await
            .unwrap();

        let got: Vec<&Value> = (0..10).map(|i| table.get(i, "id").unwrap()).collect();
        let expected: Vec<Value> = ids.iter().map(|id| json!(id)).collect();
        assert_eq!(got, expected.iter().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn framework_selection_strips_single_prefix() {
        let server = ready_server().await;
        Mock::given(method("POST"))
            .respond_with(EchoScorer)
            .mount(&server)
            .await;

        let table = request(
            TextInput::texts(["a b c"]),
            &options().frameworks(["summary"]),
            &client_for(&server),
        )
        .await
        .unwrap();

        assert_eq!(table.columns(), &["id", "request_id", "word_count"]);
        assert_eq!(table.get(0, "word_count"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn api_args_are_sent_with_every_item() {
        let server = ready_server().await;
        Mock::given(method("POST"))
            .respond_with(|req: &Request| {
                let items: Vec<Value> = serde_json::from_slice(&req.body).unwrap();
                if items.iter().all(|i| i["lang"] == json!("en")) {
                    EchoScorer.respond(req)
                } else {
                    ResponseTemplate::new(400)
                }
            })
            .mount(&server)
            .await;

        let result = request(
            TextInput::texts(["x", "y"]),
            &options().retry_limit(0).api_arg("lang", json!("en")),
            &client_for(&server),
        )
        .await;

        assert!(result.is_ok(), "got: {:?}", result.err());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retry Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let server = ready_server().await;
        Mock::given(method("POST"))
            .respond_with(FlakyScorer {
                failures: 2,
                calls: AtomicUsize::new(0),
            })
            .expect(3)
            .mount(&server)
            .await;

        let table = request(
            TextInput::texts(["one", "two"]),
            &options().retry_limit(5).concurrency(1),
            &client_for(&server),
        )
        .await
        .unwrap();

        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_run() {
        let server = ready_server().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .expect(3)
            .mount(&server)
            .await;

        let result = request(
            TextInput::texts(["one"]),
            &options().retry_limit(2),
            &client_for(&server),
        )
        .await;

        match result {
            Err(ScoreError::BundleFailed { bundle, attempts, .. }) => {
                assert_eq!(bundle, 0);
                assert_eq!(attempts, 3);
            }
            other => panic!("Expected BundleFailed, got: {:?}", other),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Precondition Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn oversized_text_makes_no_calls() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = request(
            TextInput::texts(["x".repeat(500)]),
            &options().bundle_byte_limit(100),
            &client_for(&server),
        )
        .await;

        assert!(matches!(result, Err(ScoreError::OversizedRecord { .. })));
    }

    #[tokio::test]
    async fn failed_status_check_stops_before_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/ping"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(EchoScorer)
            .expect(0)
            .mount(&server)
            .await;

        let result = request(TextInput::texts(["a"]), &options(), &client_for(&server)).await;

        assert!(matches!(
            result,
            Err(ScoreError::StatusCheckFailed { status: 503 })
        ));
    }

    #[tokio::test]
    async fn existing_output_fails_before_any_call() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("scores.csv");
        std::fs::write(&out, "old").unwrap();

        let result = request(
            TextInput::texts(["a"]),
            &options().output(&out),
            &client_for(&server),
        )
        .await;

        assert!(matches!(result, Err(ScoreError::OutputExists(_))));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "old");
    }

    #[tokio::test]
    async fn output_file_holds_final_table() {
        let server = ready_server().await;
        Mock::given(method("POST"))
            .respond_with(EchoScorer)
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("scores.csv");

        let table = request(
            TextInput::texts(["hi there"]).with_ids(["a1"]),
            &options().output(&out),
            &client_for(&server),
        )
        .await
        .unwrap();

        let content = std::fs::read_to_string(&out).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("id,request_id,summary.word_count,tone.length"));
        assert!(lines.next().unwrap().starts_with("a1,"));
        assert_eq!(table.len(), 1);
    }
}
