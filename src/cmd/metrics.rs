//! The `metrics` subcommand.

use clap::Args;
use futures::{FutureExt as _, StreamExt as _};

use super::{EngineOpts, StreamOpts};
use crate::{
    engine::{MetricsRequest, QualityMetrics},
    prelude::*,
    queues::{
        engine::EngineQueue,
        work::{WorkInput, WorkOutput},
    },
    ui::{ProgressConfig, Ui},
};

/// Options for comparing pairs of texts.
#[derive(Debug, Args)]
pub struct MetricsOpts {
    /// JSONL or CSV input with `id`, `extracted_text`, `ground_truth` and
    /// optionally `expected_fields`. Reads standard input if omitted.
    pub input_path: Option<PathBuf>,

    /// Where to write JSONL metrics. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub stream_opts: StreamOpts,

    #[clap(flatten)]
    pub engine_opts: EngineOpts,
}

/// Run the `metrics` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_metrics(ui: Ui, opts: &MetricsOpts) -> Result<()> {
    let (input, len) =
        WorkInput::<MetricsRequest>::read_stream(&ui, opts.input_path.as_deref()).await?;
    let input = opts.stream_opts.apply_stream_input_opts(input);

    let pb = ui.new_for_len(
        &ProgressConfig {
            emoji: "📏",
            msg: "Comparing texts",
            done_msg: "Compared texts",
        },
        opts.stream_opts.expected_len(len),
    );

    let jobs = opts.stream_opts.jobs.max(1);
    let (engine, worker) = opts.engine_opts.start_engine(jobs).await?;
    let futures = input.map(move |record| {
        let engine = engine.clone();
        async move { compare_record(&engine, record?).await }.boxed()
    });
    let output = pb.wrap_stream(futures.buffered(jobs)).boxed();

    WorkOutput::write_stream(&ui, opts.output_path.as_deref(), output, &opts.stream_opts)
        .await?;
    worker.join().await
}

#[instrument(level = "debug", skip_all, fields(id = %record.id))]
async fn compare_record(
    engine: &EngineQueue,
    record: WorkInput<Result<MetricsRequest>>,
) -> Result<WorkOutput<QualityMetrics>> {
    let WorkInput { id, data } = record;
    let result = match data {
        Ok(request) => engine.metrics(request).await,
        Err(err) => Err(err),
    };
    Ok(WorkOutput::from_result(id, result))
}
