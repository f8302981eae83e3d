//! Run configuration: where the API lives, how to authenticate, and how a
//! request is bundled and dispatched.
//!
//! Environment lookup is one explicit source, resolved once at the boundary
//! via `ApiSettings::from_env()` / `Credentials::from_env()`. Library code
//! never reads the environment on its own.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::error::ScoreError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

pub const ENV_URL: &str = "TEXTSCORE_URL";
pub const ENV_VERSION: &str = "TEXTSCORE_VERSION";
pub const ENV_ENDPOINT: &str = "TEXTSCORE_ENDPOINT";
pub const ENV_KEY: &str = "TEXTSCORE_KEY";
pub const ENV_SECRET: &str = "TEXTSCORE_SECRET";

pub const DEFAULT_VERSION: &str = "v1";
pub const DEFAULT_ENDPOINT: &str = "framework";

/// Per-call timeout. Bundles can be several megabytes, so this is generous.
pub const DEFAULT_TIMEOUT_SECS: u64 = 9_999;

/// Largest number of texts the bulk endpoint accepts in one request.
pub const MAX_BUNDLE_SIZE: usize = 1_000;

pub const DEFAULT_BUNDLE_BYTE_LIMIT: usize = 7_500_000;
pub const DEFAULT_RETRY_LIMIT: u32 = 50;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Key/secret pair sent as HTTP basic auth.
///
/// The secret is wrapped in `SecretString` so it never shows up in `Debug`
/// output or logs.
#[derive(Clone)]
pub struct Credentials {
    pub key: String,
    pub secret: SecretString,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    /// Reads `TEXTSCORE_KEY` and `TEXTSCORE_SECRET`.
    ///
    /// # Errors
    ///
    /// Returns `ScoreError::Configuration` if the key is unset or empty.
    pub fn from_env() -> Result<Self, ScoreError> {
        let key = env_non_empty(ENV_KEY)
            .ok_or_else(|| ScoreError::Configuration(format!("{} is not set", ENV_KEY)))?;
        let secret = env_non_empty(ENV_SECRET).unwrap_or_default();
        Ok(Self::new(key, secret))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ApiSettings
// ─────────────────────────────────────────────────────────────────────────────

/// Location of the scoring API.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Normalized base URL, without version segment or trailing slash.
    pub base_url: Url,
    pub version: String,
    pub endpoint: String,
    /// Timeout applied to every network call.
    pub timeout: Duration,
}

impl ApiSettings {
    /// Creates settings for `base_url` with the default version and endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ScoreError::Configuration` if the URL cannot be parsed.
    pub fn new(base_url: &str) -> Result<Self, ScoreError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            version: DEFAULT_VERSION.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Reads `TEXTSCORE_URL`, `TEXTSCORE_VERSION` and `TEXTSCORE_ENDPOINT`.
    pub fn from_env() -> Result<Self, ScoreError> {
        let url = env_non_empty(ENV_URL)
            .ok_or_else(|| ScoreError::Configuration(format!("{} is not set", ENV_URL)))?;
        let mut settings = Self::new(&url)?;
        if let Some(version) = env_non_empty(ENV_VERSION) {
            settings.version = version;
        }
        if let Some(endpoint) = env_non_empty(ENV_ENDPOINT) {
            settings.endpoint = endpoint;
        }
        Ok(settings)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `{base}/{version}/{endpoint}/bulk`
    pub fn bulk_url(&self) -> Result<Url, ScoreError> {
        self.join(&format!("{}/{}/bulk", self.version, self.endpoint))
    }

    /// `{base}/{version}/ping`
    pub fn status_url(&self) -> Result<Url, ScoreError> {
        self.join(&format!("{}/ping", self.version))
    }

    fn join(&self, path: &str) -> Result<Url, ScoreError> {
        // Url::join replaces the last segment unless the base ends in '/'.
        let base = format!("{}/", self.base_url.as_str().trim_end_matches('/'));
        Url::parse(&base)
            .and_then(|b| b.join(path))
            .map_err(|_| ScoreError::Configuration(format!("Invalid API path: {}", path)))
    }
}

/// Normalizes a user-supplied API URL.
///
/// Adds `https://` when no scheme is given, then strips a trailing version
/// segment (`/v1`, `/V2/anything`) and trailing slashes.
pub fn normalize_base_url(raw: &str) -> Result<Url, ScoreError> {
    let raw = raw.trim();
    let with_scheme = if raw.to_ascii_lowercase().starts_with("http") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let stripped = strip_version_suffix(&with_scheme).trim_end_matches('/');

    Url::parse(stripped)
        .map_err(|e| ScoreError::Configuration(format!("Invalid API URL `{}`: {}", raw, e)))
}

/// Cuts the URL at the first `/v<digit>` path segment, if any.
fn strip_version_suffix(url: &str) -> &str {
    let path_start = url
        .find("://")
        .map(|i| i + 3)
        .and_then(|host_start| url[host_start..].find('/').map(|p| host_start + p));

    let Some(path_start) = path_start else {
        return url;
    };

    let mut offset = path_start;
    for segment in url[path_start..].split('/') {
        let bytes = segment.as_bytes();
        if bytes.len() == 2
            && (bytes[0] == b'v' || bytes[0] == b'V')
            && bytes[1].is_ascii_digit()
        {
            // cut before the '/' that opens this segment
            return &url[..offset.saturating_sub(1).max(path_start)];
        }
        offset += segment.len() + 1;
    }
    url
}

/// Loads a `.env` file into the process environment.
///
/// Variables that are already set are left untouched. A missing file is not
/// an error; a malformed one is.
pub fn load_dotenv(path: &Path) -> Result<(), ScoreError> {
    let file = if path.is_dir() {
        path.join(".env")
    } else {
        path.to_path_buf()
    };
    if !file.exists() {
        debug!("[CONFIG] No env file at {}", file.display());
        return Ok(());
    }
    dotenvy::from_path(&file).map_err(|e| {
        ScoreError::Configuration(format!("Failed to read {}: {}", file.display(), e))
    })?;
    debug!("[CONFIG] Loaded env file {}", file.display());
    Ok(())
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// RequestOptions
// ─────────────────────────────────────────────────────────────────────────────

/// Bundling, dispatch and output options for a single request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Maximum texts per bundle (clamped to `1..=MAX_BUNDLE_SIZE`).
    pub bundle_size: usize,
    /// Maximum serialized payload bytes per bundle.
    pub bundle_byte_limit: usize,
    /// Retries allowed per bundle after its first attempt.
    pub retry_limit: u32,
    /// Fixed wait between attempts on the same bundle.
    pub retry_backoff: Duration,
    /// Number of bundles in flight at once; `<= 1` dispatches sequentially.
    pub concurrency: usize,
    /// Frameworks to keep in the output. Empty keeps everything.
    pub frameworks: Vec<String>,
    /// Whether to keep the `framework.` prefix on column names.
    /// `None` keeps it, unless exactly one framework is selected.
    pub framework_prefix: Option<bool>,
    /// Extra fields merged into every request item.
    pub api_args: Map<String, Value>,
    /// File the final table is written to.
    pub output: Option<PathBuf>,
    /// Replace `output` if it already exists.
    pub overwrite: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            bundle_size: MAX_BUNDLE_SIZE,
            bundle_byte_limit: DEFAULT_BUNDLE_BYTE_LIMIT,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            concurrency: default_concurrency(),
            frameworks: Vec::new(),
            framework_prefix: None,
            api_args: Map::new(),
            output: None,
            overwrite: false,
        }
    }
}

impl RequestOptions {
    pub fn bundle_size(mut self, size: usize) -> Self {
        self.bundle_size = size;
        self
    }

    pub fn bundle_byte_limit(mut self, bytes: usize) -> Self {
        self.bundle_byte_limit = bytes;
        self
    }

    pub fn retry_limit(mut self, retries: u32) -> Self {
        self.retry_limit = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers;
        self
    }

    pub fn frameworks<I, S>(mut self, frameworks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frameworks = frameworks.into_iter().map(Into::into).collect();
        self
    }

    pub fn framework_prefix(mut self, keep: bool) -> Self {
        self.framework_prefix = Some(keep);
        self
    }

    pub fn api_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.api_args.insert(key.into(), value);
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Bundle size after clamping to what the endpoint accepts.
    pub fn effective_bundle_size(&self) -> usize {
        self.bundle_size.clamp(1, MAX_BUNDLE_SIZE)
    }
}

/// Available parallelism minus two, floored at one.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(2)
        .max(1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
