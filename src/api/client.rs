//! Scoring API HTTP client with basic auth and safe logging.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use tracing::{info, warn};
use url::Url;

use crate::bundling::Bundle;
use crate::config::{ApiSettings, Credentials};
use crate::error::{redact_body, ScoreError};
use crate::results::ResultTable;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all API requests.
const CLIENT_USER_AGENT: &str = concat!("textscore/", env!("CARGO_PKG_VERSION"));

/// Loggable form of a request URL: the path only, never host or query.
fn log_path(url: &Url) -> &str {
    url.path()
}

// ─────────────────────────────────────────────────────────────────────────────
// ScoringClient
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client for the bulk scoring endpoint.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct ScoringClient {
    http: reqwest::Client,
    bulk_url: Url,
    status_url: Url,
    credentials: Credentials,
}

impl std::fmt::Debug for ScoringClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringClient")
            .field("bulk_url", &log_path(&self.bulk_url))
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl ScoringClient {
    /// Creates a client for the API described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns `ScoreError::Configuration` if the endpoint URLs cannot be
    /// built, or `ScoreError::Internal` if the HTTP client fails to initialize.
    pub fn new(settings: &ApiSettings, credentials: Credentials) -> Result<Self, ScoreError> {
        Ok(Self {
            http: build_http_client(settings.timeout)?,
            bulk_url: settings.bulk_url()?,
            status_url: settings.status_url()?,
            credentials,
        })
    }

    /// Queries the status endpoint and returns its HTTP status.
    pub async fn status(&self) -> Result<StatusCode, ScoreError> {
        let response = self
            .execute(Method::GET, self.status_url.clone(), None)
            .await?;
        Ok(response.status())
    }

    /// Fails unless the status endpoint answers 200.
    pub async fn ensure_ready(&self) -> Result<(), ScoreError> {
        let status = self.status().await?;
        if status != StatusCode::OK {
            warn!("[SCORE] API status check returned {}", status.as_u16());
            return Err(ScoreError::StatusCheckFailed {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// Sends one bundle and normalizes the response. Single attempt, no retry.
    ///
    /// # Errors
    ///
    /// - `ScoreError::Remote` - the API answered with a non-200 status
    /// - `ScoreError::ConnectionFailed` - network error or timeout
    /// - `ScoreError::Internal` - a 200 response that is not a `results` list
    pub async fn score_bundle(&self, bundle: &Bundle) -> Result<ResultTable, ScoreError> {
        let payload = bundle.payload()?;
        let response = self
            .execute(Method::POST, self.bulk_url.clone(), Some(payload))
            .await?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|_| ScoreError::ConnectionFailed("Failed to read response body".to_string()))?;

        if status != StatusCode::OK {
            return Err(ScoreError::Remote {
                status: status.as_u16(),
                body: redact_body(&String::from_utf8_lossy(&body)),
            });
        }

        ResultTable::from_response_body(&body)
    }

    /// Executes a single authenticated request with timing and logging.
    ///
    /// Never logs credentials or bodies; error messages never contain the
    /// raw URL.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, ScoreError> {
        let start = Instant::now();
        let logged_path = log_path(&url).to_string();

        let mut request = self.http.request(method.clone(), url).basic_auth(
            &self.credentials.key,
            Some(self.credentials.secret.expose_secret()),
        );
        if let Some(bytes) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(bytes);
        }

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                let x_request_id = response
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");

                info!(
                    "[SCORE] {} {} {} {}ms {}",
                    method,
                    logged_path,
                    response.status().as_u16(),
                    duration_ms,
                    x_request_id
                );

                Ok(response)
            }
            Err(e) => {
                info!("[SCORE] {} {} FAILED {}ms", method, logged_path, duration_ms);
                let reason = if e.is_timeout() {
                    "Request to scoring API timed out"
                } else {
                    "Connection to scoring API failed"
                };
                Err(ScoreError::ConnectionFailed(reason.to_string()))
            }
        }
    }
}

/// Builds the configured HTTP client.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ScoreError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| ScoreError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
