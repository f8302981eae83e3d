//! textscore
//! ---------
//! Scores one column of a CSV file with the remote text-scoring API and
//! prints the result table as CSV (or writes it to `--output`).
//!
//! Connection settings come from the environment (optionally a `.env`
//! file): TEXTSCORE_URL, TEXTSCORE_KEY, TEXTSCORE_SECRET, and optionally
//! TEXTSCORE_VERSION and TEXTSCORE_ENDPOINT.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use textscore::results::write_table_to;
use textscore::{
    load_dotenv, request, ApiSettings, Credentials, RequestOptions, ScoreError, ScoringClient,
    TextInput,
};

/// Exit status when the run failed before any bundle was sent.
const EXIT_PRE_DISPATCH: u8 = 2;
/// Exit status when scoring itself failed.
const EXIT_SCORING_FAILED: u8 = 1;

// ================================
// CLI
// ================================

#[derive(Debug, Parser)]
#[command(
    name = "textscore",
    version,
    about = "Score a column of texts with a remote text-scoring API"
)]
struct Cli {
    /// Input CSV file
    #[arg(long, value_name = "FILE")]
    input: PathBuf,

    /// Column holding the texts to score
    #[arg(long, value_name = "NAME")]
    text_column: String,

    /// Column holding record ids (default: 1-based row numbers)
    #[arg(long, value_name = "NAME")]
    id_column: Option<String>,

    /// Write the result table here instead of stdout
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Replace --output if it already exists
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Keep only this framework's columns (repeatable)
    #[arg(long = "framework", value_name = "NAME")]
    frameworks: Vec<String>,

    /// Strip the `framework.` prefix from column names
    #[arg(long, default_value_t = false, conflicts_with = "keep_framework_prefix")]
    no_framework_prefix: bool,

    /// Keep the `framework.` prefix even when one framework is selected
    #[arg(long, default_value_t = false)]
    keep_framework_prefix: bool,

    /// Extra field sent with every text; VALUE is parsed as JSON, else kept as a string
    #[arg(long = "api-arg", value_name = "KEY=VALUE", value_parser = parse_api_arg)]
    api_args: Vec<(String, Value)>,

    /// Maximum texts per request (1-1000)
    #[arg(long)]
    bundle_size: Option<usize>,

    /// Maximum request body size in bytes
    #[arg(long)]
    bundle_byte_limit: Option<usize>,

    /// Retries per request after the first failure
    #[arg(long)]
    retry_limit: Option<u32>,

    /// Requests in flight at once (default: CPUs minus two)
    #[arg(long)]
    concurrency: Option<usize>,

    /// .env file, or directory containing one
    #[arg(long, value_name = "PATH", default_value = ".")]
    dotenv: PathBuf,

    /// Debug-level logging
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn exit_code_for(err: &ScoreError) -> u8 {
    if err.is_pre_dispatch() {
        EXIT_PRE_DISPATCH
    } else {
        EXIT_SCORING_FAILED
    }
}

fn parse_api_arg(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{}`", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

impl Cli {
    fn request_options(&self) -> RequestOptions {
        let mut options = RequestOptions::default()
            .frameworks(self.frameworks.iter().cloned())
            .overwrite(self.overwrite);

        if self.no_framework_prefix {
            options = options.framework_prefix(false);
        } else if self.keep_framework_prefix {
            options = options.framework_prefix(true);
        }
        for (key, value) in &self.api_args {
            options = options.api_arg(key.clone(), value.clone());
        }
        if let Some(path) = &self.output {
            options = options.output(path.clone());
        }
        if let Some(size) = self.bundle_size {
            options = options.bundle_size(size);
        }
        if let Some(bytes) = self.bundle_byte_limit {
            options = options.bundle_byte_limit(bytes);
        }
        if let Some(retries) = self.retry_limit {
            options = options.retry_limit(retries);
        }
        if let Some(workers) = self.concurrency {
            options = options.concurrency(workers);
        }
        options
    }
}

// ================================
// Main
// ================================

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ---- Logging setup (stderr; stdout may carry the table) ----
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();

    load_dotenv(&cli.dotenv).context("Failed to load .env file")?;
    let settings = ApiSettings::from_env().context("Failed to resolve API settings")?;
    let credentials = Credentials::from_env().context("Failed to resolve API credentials")?;
    let client = ScoringClient::new(&settings, credentials).context("Failed to create API client")?;

    let mut input = TextInput::csv(&cli.input, &cli.text_column);
    if let Some(column) = &cli.id_column {
        input = input.with_id_column(column);
    }

    let options = cli.request_options();
    let table = match request(input, &options, &client).await {
        Ok(table) => table,
        Err(e) => {
            error!("Failed to score {}: {}", cli.input.display(), e);
            return Ok(ExitCode::from(exit_code_for(&e)));
        }
    };

    if options.output.is_none() {
        write_table_to(&table, io::stdout().lock()).context("Failed to write results to stdout")?;
    }

    info!("Done: {} rows x {} columns", table.len(), table.columns().len());
    Ok(ExitCode::SUCCESS)
}

// ================================
// Tests
// ================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(extra: &[&str]) -> Cli {
        let mut args = vec!["textscore", "--input", "texts.csv", "--text-column", "text"];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn api_arg_value_is_json_when_it_parses() {
        assert_eq!(parse_api_arg("limit=3").unwrap(), ("limit".to_string(), json!(3)));
        assert_eq!(parse_api_arg("flag=true").unwrap(), ("flag".to_string(), json!(true)));
        assert_eq!(
            parse_api_arg(r#"tags=["a","b"]"#).unwrap(),
            ("tags".to_string(), json!(["a", "b"]))
        );
    }

    #[test]
    fn api_arg_value_falls_back_to_string() {
        assert_eq!(parse_api_arg("lang=en").unwrap(), ("lang".to_string(), json!("en")));
        assert_eq!(parse_api_arg("expr=a=b").unwrap(), ("expr".to_string(), json!("a=b")));
        assert_eq!(parse_api_arg("empty=").unwrap(), ("empty".to_string(), json!("")));
        assert!(parse_api_arg("no-separator").is_err());
    }

    #[test]
    fn framework_prefix_flags_map_to_options() {
        assert_eq!(parse(&[]).request_options().framework_prefix, None);
        assert_eq!(
            parse(&["--no-framework-prefix"]).request_options().framework_prefix,
            Some(false)
        );
        assert_eq!(
            parse(&["--keep-framework-prefix"]).request_options().framework_prefix,
            Some(true)
        );
        assert!(Cli::try_parse_from([
            "textscore",
            "--input",
            "t.csv",
            "--text-column",
            "text",
            "--no-framework-prefix",
            "--keep-framework-prefix",
        ])
        .is_err());
    }

    #[test]
    fn flags_map_to_request_options() {
        let options = parse(&[
            "--framework",
            "X",
            "--framework",
            "Y",
            "--api-arg",
            "lang=en",
            "--bundle-size",
            "25",
            "--retry-limit",
            "0",
            "--concurrency",
            "4",
            "--output",
            "out.csv",
            "--overwrite",
        ])
        .request_options();

        assert_eq!(options.frameworks, vec!["X", "Y"]);
        assert_eq!(options.api_args.get("lang"), Some(&json!("en")));
        assert_eq!(options.bundle_size, 25);
        assert_eq!(options.retry_limit, 0);
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.output, Some(PathBuf::from("out.csv")));
        assert!(options.overwrite);
    }

    #[test]
    fn pre_dispatch_failures_get_their_own_exit_code() {
        assert_eq!(exit_code_for(&ScoreError::EmptyInput), EXIT_PRE_DISPATCH);
        assert_eq!(
            exit_code_for(&ScoreError::StatusCheckFailed { status: 401 }),
            EXIT_PRE_DISPATCH
        );
        assert_eq!(
            exit_code_for(&ScoreError::IncompleteResults { missing: 2 }),
            EXIT_SCORING_FAILED
        );
    }
}
