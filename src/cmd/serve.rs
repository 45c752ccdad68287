//! The `serve` subcommand.

use clap::Args;

use super::EngineOpts;
use crate::{prelude::*, server::run_server};

/// Options for the HTTP service.
#[derive(Debug, Args)]
pub struct ServeOpts {
    /// The address to listen on.
    #[clap(long, default_value = "127.0.0.1", env = "OCR_QUALITY_HOST")]
    pub host: String,

    /// The port to listen on.
    #[clap(long, default_value = "8000", env = "OCR_QUALITY_PORT")]
    pub port: u16,

    /// Max number of documents to assess at a time, across all requests.
    /// Defaults to the number of CPUs.
    #[clap(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    #[clap(flatten)]
    pub engine_opts: EngineOpts,
}

/// Run the HTTP service until we're asked to stop.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_serve(opts: &ServeOpts) -> Result<()> {
    let jobs = opts.jobs.unwrap_or_else(num_cpus::get).max(1);
    let (engine, worker) = opts.engine_opts.start_engine(jobs).await?;
    info!(jobs, "Started assessment engine");

    // The router owns the only engine handles, so the worker exits once the
    // server has shut down.
    run_server(&opts.host, opts.port, engine).await?;
    worker.join().await
}
