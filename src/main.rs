use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{engine::AssessmentMode, prelude::*, ui::Ui};

mod async_utils;
mod cmd;
mod config;
mod engine;
mod errors;
mod prelude;
mod queues;
mod schema;
mod server;
mod ui;

/// Assess OCR output: rebuild reading order from token layouts, extract
/// fields, and score the result against reference data.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - OCR_QUALITY_CONFIG (optional): A JSON or TOML engine config file.
  - OCR_QUALITY_HOST, OCR_QUALITY_PORT (optional): Where `serve` listens.
  - RUST_LOG (optional): Log filter, such as "debug" or "ocr_quality=trace".

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Assess a single document of recognized tokens.
    Process(cmd::process::ProcessOpts),
    /// Assess a single document recognized from a denoised image.
    Noise(cmd::process::ProcessOpts),
    /// Assess a JSONL stream of documents. Each record needs an `id`.
    Batch(cmd::batch::BatchOpts),
    /// Compare extracted texts with reference texts, from JSONL or CSV.
    Metrics(cmd::metrics::MetricsOpts),
    /// Print schemas for input and output formats.
    Schema(cmd::schema::SchemaOpts),
    /// Run the HTTP service.
    Serve(cmd::serve::ServeOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Process(opts) | Cmd::Noise(opts) => opts.output_path.is_none(),
            Cmd::Batch(opts) => opts.output_path.is_none(),
            Cmd::Metrics(opts) => opts.output_path.is_none(),
            Cmd::Schema(opts) => opts.output_path.is_none(),
            Cmd::Serve(_) => false,
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive = Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Progress bars would corrupt output on stdout, and a server has nothing
    // to show them for.
    if opts.subcmd.using_stdout_for_output() || matches!(opts.subcmd, Cmd::Serve(_)) {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Process(opts) => {
            cmd::process::cmd_process(ui, opts, AssessmentMode::Standard).await?;
        }
        Cmd::Noise(opts) => {
            cmd::process::cmd_process(ui, opts, AssessmentMode::Noisy).await?;
        }
        Cmd::Batch(opts) => {
            cmd::batch::cmd_batch(ui, opts).await?;
        }
        Cmd::Metrics(opts) => {
            cmd::metrics::cmd_metrics(ui, opts).await?;
        }
        Cmd::Schema(schema_opts) => {
            cmd::schema::cmd_schema(schema_opts).await?;
        }
        Cmd::Serve(serve_opts) => {
            cmd::serve::cmd_serve(serve_opts).await?;
        }
    }
    Ok(())
}
