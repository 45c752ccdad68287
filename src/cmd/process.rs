//! The `process` and `noise` subcommands.

use clap::Args;

use super::EngineOpts;
use crate::{
    async_utils::io::{read_json_or_toml, read_text, write_json_pretty},
    engine::{AssessmentMode, AssessmentRequest},
    prelude::*,
    schema::Schema,
    ui::{ProgressConfig, Ui},
};

/// Options for assessing a single document.
#[derive(Debug, Args)]
pub struct ProcessOpts {
    /// A JSON or TOML document with `tokens`, and optionally `ground_truth`,
    /// `expected_fields`, `ground_truth_fields` and `schema`.
    pub input_path: PathBuf,

    /// Read the reference transcription from this text file. Overrides any
    /// `ground_truth` in the input.
    #[clap(long)]
    pub ground_truth_file: Option<PathBuf>,

    /// A JSON or TOML schema for the extracted fields. Overrides any
    /// `schema` in the input.
    #[clap(long = "schema")]
    pub schema_path: Option<PathBuf>,

    /// Where to write the report. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub engine_opts: EngineOpts,
}

/// Assess one document and write its report as pretty JSON.
#[instrument(level = "debug", skip_all, fields(input = %opts.input_path.display(), ?mode))]
pub async fn cmd_process(ui: Ui, opts: &ProcessOpts, mode: AssessmentMode) -> Result<()> {
    let mut request = read_json_or_toml::<AssessmentRequest>(&opts.input_path).await?;
    if let Some(path) = &opts.ground_truth_file {
        request.ground_truth = Some(read_text(path).await?);
    }
    if let Some(path) = &opts.schema_path {
        let schema = read_json_or_toml::<Schema>(path)
            .await
            .with_context(|| format!("failed to load schema from {:?}", path))?;
        request.schema = Some(schema.into());
    }

    let (engine, worker) = opts.engine_opts.start_engine(1).await?;
    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🔍",
        msg: "Assessing document",
        done_msg: "Assessed document",
    });
    let report = engine
        .assess(request, mode)
        .await
        .with_context(|| format!("failed to assess {:?}", opts.input_path))?;
    spinner.finish_using_style();
    debug!(
        total_pages = report.total_pages,
        has_multiple_columns = report.has_multiple_columns,
        "Built report"
    );

    // Let the engine's worker exit before we write.
    drop(engine);
    worker.join().await?;

    write_json_pretty(opts.output_path.as_deref(), &report).await
}
