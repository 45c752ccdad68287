//! The `batch` subcommand.

use clap::Args;
use futures::{FutureExt as _, StreamExt as _};

use super::{EngineOpts, StreamOpts};
use crate::{
    engine::{AssessmentMode, AssessmentRequest, QualityReport},
    prelude::*,
    queues::{
        engine::EngineQueue,
        work::{WorkInput, WorkOutput},
    },
    ui::{ProgressConfig, Ui},
};

/// Options for assessing a stream of documents.
#[derive(Debug, Args)]
pub struct BatchOpts {
    /// JSONL input, one document per line, each with an `id`. Reads standard
    /// input if omitted.
    pub input_path: Option<PathBuf>,

    /// The tokens were recognized from denoised images.
    #[clap(long)]
    pub noisy: bool,

    /// Where to write JSONL reports. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub stream_opts: StreamOpts,

    #[clap(flatten)]
    pub engine_opts: EngineOpts,
}

/// Run the `batch` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_batch(ui: Ui, opts: &BatchOpts) -> Result<()> {
    // Open up our input stream and parse into records.
    let (input, len) =
        WorkInput::<AssessmentRequest>::read_stream(&ui, opts.input_path.as_deref()).await?;
    let input = opts.stream_opts.apply_stream_input_opts(input);

    // Configure our progress bar.
    let pb = ui.new_for_len(
        &ProgressConfig {
            emoji: "📄",
            msg: "Assessing documents",
            done_msg: "Assessed documents",
        },
        opts.stream_opts.expected_len(len),
    );

    let jobs = opts.stream_opts.jobs.max(1);
    let (engine, worker) = opts.engine_opts.start_engine(jobs).await?;
    let mode = if opts.noisy {
        AssessmentMode::Noisy
    } else {
        AssessmentMode::Standard
    };

    // Each record becomes a future. The engine queue bounds how many actually
    // run, and `buffered` keeps the output in input order.
    let futures = input.map(move |record| {
        let engine = engine.clone();
        async move { assess_record(&engine, record?, mode).await }.boxed()
    });
    let output = pb.wrap_stream(futures.buffered(jobs)).boxed();

    WorkOutput::write_stream(&ui, opts.output_path.as_deref(), output, &opts.stream_opts)
        .await?;

    // Wait for our work queue's background task to exit.
    worker.join().await
}

/// Assess one record. Only I/O problems are errors here. A bad document
/// becomes a failed output record.
#[instrument(level = "debug", skip_all, fields(id = %record.id))]
async fn assess_record(
    engine: &EngineQueue,
    record: WorkInput<Result<AssessmentRequest>>,
    mode: AssessmentMode,
) -> Result<WorkOutput<QualityReport>> {
    let WorkInput { id, data } = record;
    let result = match data {
        Ok(request) => engine
            .assess(request, mode)
            .await
            .with_context(|| format!("could not assess document {}", id)),
        Err(err) => Err(err),
    };
    Ok(WorkOutput::from_result(id, result))
}
