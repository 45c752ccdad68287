//! Asynchronous utilities for use with Tokio.
//!
//! The assessment engine itself is synchronous and CPU-bound. Everything in
//! here exists to feed it documents from async streams and HTTP requests
//! without blocking the runtime.

use std::pin::Pin;

use futures::Stream;
use tokio::task::JoinHandle;

use crate::prelude::*;

pub mod io;

/// A type alias for a boxed future. This is used to make it easier to work with
/// with complex futures.
pub type BoxedFuture<Output> = Pin<Box<dyn Future<Output = Output> + Send>>;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// A handle for one or more background workers. This can be awaited
/// to wait for all workers to complete normally.
pub struct JoinWorker {
    /// The task handle.
    future: BoxedFuture<Result<()>>,
}

impl JoinWorker {
    /// Create a new worker handle from a [`JoinHandle`].
    pub fn from_handle(handle: JoinHandle<Result<()>>) -> Self {
        Self {
            future: Box::pin(async move { handle.await.context("could not join task")? }),
        }
    }

    /// Wait for the worker to complete.
    pub async fn join(self) -> Result<()> {
        self.future.await
    }
}

/// Run CPU-bound work on Tokio's blocking thread pool.
///
/// A panic in `f` is reported as an error rather than unwinding into the
/// caller, so one bad document can't take down a batch.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("blocking task panicked or was cancelled")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_blocking_returns_results_and_errors() {
        assert_eq!(run_blocking(|| Ok(2 + 2)).await.unwrap(), 4);
        let err = run_blocking(|| -> Result<()> { Err(anyhow!("nope")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[tokio::test]
    async fn run_blocking_catches_panics() {
        let result = run_blocking(|| -> Result<()> { panic!("boom") }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn join_worker_propagates_errors() {
        let worker = JoinWorker::from_handle(tokio::spawn(async { Err(anyhow!("failed")) }));
        assert!(worker.join().await.is_err());
    }
}
