//! Command-line entry points.

use clap::Args;
use futures::StreamExt as _;

use crate::{
    async_utils::{BoxedStream, JoinWorker},
    config::ConfigOpts,
    prelude::*,
    queues::engine::EngineQueue,
};

pub mod batch;
pub mod metrics;
pub mod process;
pub mod schema;
pub mod serve;

/// Common options for subcommands that process record streams.
#[derive(Debug, Clone, Args)]
pub struct StreamOpts {
    /// Limit processing to the first N records.
    #[clap(long)]
    pub take_first: Option<usize>,

    /// Max number of documents to assess at a time.
    #[clap(short = 'j', long = "jobs", default_value = "8")]
    pub jobs: usize,

    /// What portion of inputs should we allow to fail? Specified as a
    /// number between 0.0 and 1.0.
    #[clap(long, default_value = "0.01")]
    pub allowed_failure_rate: f32,
}

impl StreamOpts {
    /// Apply any necessary stream opts to our input stream.
    pub fn apply_stream_input_opts<T>(
        &self,
        input: BoxedStream<Result<T>>,
    ) -> BoxedStream<Result<T>>
    where
        T: 'static,
    {
        if let Some(take_first) = self.take_first {
            input.take(take_first).boxed()
        } else {
            input
        }
    }

    /// How many records we expect to process, given how many we found.
    pub fn expected_len(&self, found: Option<u64>) -> Option<u64> {
        match (found, self.take_first) {
            (Some(found), Some(take_first)) => Some(found.min(take_first as u64)),
            (found, _) => found,
        }
    }
}

/// Options shared by every subcommand that runs the engine.
#[derive(Debug, Clone, Args)]
pub struct EngineOpts {
    #[clap(flatten)]
    pub config_opts: ConfigOpts,

    /// Always report a `processing_time` of 0, so that output is
    /// reproducible.
    #[clap(long)]
    pub freeze_time: bool,
}

impl EngineOpts {
    /// Load our configuration and start the engine with up to `jobs`
    /// documents in flight.
    pub async fn start_engine(&self, jobs: usize) -> Result<(EngineQueue, JoinWorker)> {
        let config = self.config_opts.load().await?;
        Ok(EngineQueue::start(config, jobs, self.freeze_time))
    }
}

#[cfg(test)]
mod tests {
    use futures::{StreamExt as _, TryStreamExt as _, stream};

    use super::*;

    #[tokio::test]
    async fn take_first_limits_input_and_length() {
        let opts = StreamOpts {
            take_first: Some(2),
            jobs: 1,
            allowed_failure_rate: 0.0,
        };
        let input: BoxedStream<Result<i32>> = stream::iter((0..5).map(Ok)).boxed();
        let taken = opts
            .apply_stream_input_opts(input)
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(taken, vec![0, 1]);
        assert_eq!(opts.expected_len(Some(5)), Some(2));
        assert_eq!(opts.expected_len(Some(1)), Some(1));
        assert_eq!(opts.expected_len(None), None);
    }
}
