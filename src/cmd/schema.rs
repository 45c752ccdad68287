//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;
use tokio::io::AsyncWriteExt as _;

use crate::{
    async_utils::io::create_writer,
    config::EngineConfig,
    engine::{AssessmentRequest, MetricsRequest, QualityMetrics, QualityReport},
    prelude::*,
    queues::work::{WorkInput, WorkOutput},
    schema::Schema,
};

/// The different schema types we support.
///
/// We parse these as PascalCase, because they represent type names.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "PascalCase")]
pub enum SchemaType {
    /// A document for `process` or `noise`.
    Document,
    /// The report for a single document.
    Report,
    /// One record of `batch` input.
    BatchInput,
    /// One record of `batch` output.
    BatchOutput,
    /// One record of `metrics` input.
    MetricsInput,
    /// One record of `metrics` output.
    MetricsOutput,
    /// An engine configuration file.
    Config,
    /// A field schema, as passed to `--schema`.
    Schema,
}

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = match schema_opts.schema_type {
        SchemaType::Document => schema_for!(AssessmentRequest),
        SchemaType::Report => schema_for!(QualityReport),
        SchemaType::BatchInput => schema_for!(WorkInput<AssessmentRequest>),
        SchemaType::BatchOutput => schema_for!(WorkOutput<QualityReport>),
        SchemaType::MetricsInput => schema_for!(WorkInput<MetricsRequest>),
        SchemaType::MetricsOutput => schema_for!(WorkOutput<QualityMetrics>),
        SchemaType::Config => schema_for!(EngineConfig),
        SchemaType::Schema => schema_for!(Schema),
    };

    let mut wtr = create_writer(schema_opts.output_path.as_deref()).await?;
    let mut schema_str =
        serde_json::to_string_pretty(&schema).context("failed to serialize schema")?;
    schema_str.push('\n');
    wtr.write_all(schema_str.as_bytes())
        .await
        .context("failed to write schema")?;
    wtr.flush().await.context("failed to flush schema")?;
    Ok(())
}
