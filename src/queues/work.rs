//! Async work processing with backpressure, plus the record types used by
//! our batch commands.
//!
//! Following ["Queues Don't Fix
//! Overload"](https://ferd.ca/queues-don-t-fix-overload.html), we limit the
//! number of items which may be in flight at once. When that limit is reached,
//! submitting more work waits until something finishes. For us, this bounds
//! the memory used by concurrent alignments.

use std::sync::{Arc, Mutex};

use futures::{SinkExt as _, StreamExt as _, TryStreamExt as _, channel::{mpsc, oneshot}};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::{
    async_utils::{
        BoxedFuture, BoxedStream, JoinWorker,
        io::{RecordStream, read_jsonl_or_csv, write_jsonl},
    },
    cmd::StreamOpts,
    engine::{QualityMetrics, QualityReport, metrics::TextMetrics},
    prelude::*,
    ui::Ui,
};

/// An input record: an ID plus the record's own fields.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct WorkInput<T> {
    /// The unique ID of the record. Any JSON value.
    pub id: Value,

    #[serde(flatten)]
    pub data: T,
}

impl<T> WorkInput<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Parse a record. A malformed body doesn't lose the record's ID, so we
    /// can still report the failure against it.
    pub fn from_json(mut value: Value) -> WorkInput<Result<T>> {
        let id = match &mut value {
            Value::Object(map) => map.remove("id").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        let data = serde_json::from_value::<T>(value)
            .with_context(|| format!("failed to parse input record {}", id));
        WorkInput { id, data }
    }

    /// Read records from a JSONL or CSV file, or from standard input. Also
    /// returns the number of records, if known.
    ///
    /// The outer `Result` of each item reports I/O errors. The inner one
    /// reports malformed records. A record which isn't even valid JSON gets
    /// a `null` ID.
    pub async fn read_stream(
        ui: &Ui,
        path: Option<&Path>,
    ) -> Result<(BoxedStream<Result<WorkInput<Result<T>>>>, Option<u64>)> {
        let RecordStream { records, len } = read_jsonl_or_csv(ui, path).await?;
        let stream = records
            .map_ok(|record| match record {
                Ok(value) => Self::from_json(value),
                Err(err) => WorkInput {
                    id: Value::Null,
                    data: Err(err),
                },
            })
            .boxed();
        Ok((stream, len))
    }
}

/// Did a record succeed?
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Ok,
    Failed,
}

/// An output record.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct WorkOutput<T> {
    /// The ID of the matching input record.
    pub id: Value,

    pub status: WorkStatus,

    /// The error chain, if the record failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    /// The result, if the record succeeded.
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T> WorkOutput<T> {
    /// Turn a processing result into an output record. Errors become a
    /// failed record listing every cause in the chain.
    pub fn from_result(id: Value, result: Result<T>) -> Self {
        match result {
            Ok(data) => Self {
                id,
                status: WorkStatus::Ok,
                errors: vec![],
                data: Some(data),
            },
            Err(err) => {
                error!(%id, "Failed to process record: {:?}", err);
                Self {
                    id,
                    status: WorkStatus::Failed,
                    errors: err.chain().map(|cause| cause.to_string()).collect(),
                    data: None,
                }
            }
        }
    }
}

impl<T> WorkOutput<T>
where
    T: Scored + Serialize + Send + 'static,
{
    /// Write a stream of outputs as JSONL, then report a summary. Fails if too
    /// many records failed.
    pub async fn write_stream(
        ui: &Ui,
        path: Option<&Path>,
        stream: BoxedStream<Result<Self>>,
        stream_opts: &StreamOpts,
    ) -> Result<BatchSummary> {
        let summary = Arc::new(Mutex::new(BatchSummary::default()));
        let summary_for_stream = summary.clone();
        let output = stream
            .map(move |output| {
                let output = output?;
                summary_for_stream
                    .lock()
                    .expect("lock poisoned")
                    .record(&output);
                serde_json::to_value(&output).context("failed to serialize output")
            })
            .boxed();
        write_jsonl(path, output).await?;

        let summary = summary.lock().expect("lock poisoned").clone();
        summary.display(ui);
        summary.check_failure_rate(stream_opts.allowed_failure_rate)?;
        Ok(summary)
    }
}

/// Outputs which may carry text metrics, for batch averages.
pub trait Scored {
    fn text_metrics(&self) -> Option<&TextMetrics>;
}

impl Scored for QualityReport {
    fn text_metrics(&self) -> Option<&TextMetrics> {
        self.metrics.text.as_ref()
    }
}

impl Scored for QualityMetrics {
    fn text_metrics(&self) -> Option<&TextMetrics> {
        self.text.as_ref()
    }
}

/// Totals and averages over a batch.
///
/// Averages only include documents with a reference text, and are `null` if
/// there were none.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_documents: usize,
    pub failed_documents: usize,

    /// Successful documents which had a reference text.
    pub scored_documents: usize,

    pub average_cer: Option<f64>,
    pub average_wer: Option<f64>,

    /// Share of scored documents which matched exactly, from 0 to 100.
    pub exact_match_percentage: Option<f64>,

    #[serde(skip)]
    sums: ScoreSums,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct ScoreSums {
    cer: f64,
    wer: f64,
    exact_match: f64,
}

impl BatchSummary {
    /// Add one output record.
    pub fn record<T: Scored>(&mut self, output: &WorkOutput<T>) {
        self.total_documents += 1;
        if output.status == WorkStatus::Failed {
            self.failed_documents += 1;
        }
        let Some(text) = output.data.as_ref().and_then(Scored::text_metrics) else {
            return;
        };
        self.scored_documents += 1;
        self.sums.cer += text.cer;
        self.sums.wer += text.wer;
        self.sums.exact_match += text.exact_match;

        let n = self.scored_documents as f64;
        self.average_cer = Some(self.sums.cer / n);
        self.average_wer = Some(self.sums.wer / n);
        self.exact_match_percentage = Some(100.0 * self.sums.exact_match / n);
    }

    fn failure_rate(&self) -> f32 {
        if self.total_documents == 0 {
            0.0
        } else {
            self.failed_documents as f32 / self.total_documents as f32
        }
    }

    /// Fail if more than `allowed` of all records failed.
    pub fn check_failure_rate(&self, allowed: f32) -> Result<()> {
        let rate = self.failure_rate();
        if rate > allowed {
            return Err(anyhow!(
                "{}/{} ({:.2}%) of outputs were failures, but only {:.2}% were allowed",
                self.failed_documents,
                self.total_documents,
                rate * 100.0,
                allowed * 100.0
            ));
        }
        Ok(())
    }

    /// Tell the user how it went.
    pub fn display(&self, ui: &Ui) {
        if let (Some(cer), Some(wer), Some(exact)) = (
            self.average_cer,
            self.average_wer,
            self.exact_match_percentage,
        ) {
            ui.display_message(
                "📈",
                &format!(
                    "{} documents scored: average CER {:.4}, average WER {:.4}, {:.1}% exact",
                    self.scored_documents, cer, wer, exact
                ),
            );
        }
        if self.failed_documents > 0 {
            ui.display_message(
                "❌",
                &format!("{} records could not be processed", self.failed_documents),
            );
        }
    }
}

/// A unit of work, and where to send its result.
struct WorkItem<Input, Output> {
    input: Input,
    tx: oneshot::Sender<Result<Output>>,
}

/// An async work function.
pub type WorkFn<Input, Output> =
    Arc<dyn Fn(Input) -> BoxedFuture<Result<Output>> + Send + Sync + 'static>;

/// Runs a work function over submitted inputs, with at most
/// `concurrency_limit` running at once.
pub struct WorkQueue<Input, Output> {
    tx: mpsc::Sender<WorkItem<Input, Output>>,
}

impl<Input, Output> WorkQueue<Input, Output>
where
    Input: Send + 'static,
    Output: Send + 'static,
{
    /// Start a work queue. The returned [`JoinWorker`] finishes once the queue
    /// and every handle to it have been dropped.
    ///
    /// Up to `concurrency_limit` items may wait in the channel while another
    /// `concurrency_limit` are processed.
    pub fn new(concurrency_limit: usize, work_fn: WorkFn<Input, Output>) -> (Self, JoinWorker) {
        let concurrency_limit = concurrency_limit.max(1);
        let (tx, rx) = mpsc::channel(concurrency_limit);
        let worker = tokio::spawn(async move {
            rx.for_each_concurrent(concurrency_limit, |item: WorkItem<Input, Output>| {
                let work_fn = work_fn.clone();
                async move {
                    let result = work_fn(item.input).await;
                    if item.tx.send(result).is_err() {
                        debug!("Dropping work result because the receiver went away");
                    }
                }
            })
            .await;
            Ok(())
        });
        (Self { tx }, JoinWorker::from_handle(worker))
    }

    /// Get a cheaply-cloneable handle for submitting work.
    pub fn handle(&self) -> WorkQueueHandle<Input, Output> {
        WorkQueueHandle {
            tx: self.tx.clone(),
        }
    }
}

/// A handle to a [`WorkQueue`].
pub struct WorkQueueHandle<Input, Output> {
    tx: mpsc::Sender<WorkItem<Input, Output>>,
}

// Manual `Clone`, so that `Input` and `Output` needn't be `Clone`.
impl<Input, Output> Clone for WorkQueueHandle<Input, Output> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<Input, Output> WorkQueueHandle<Input, Output>
where
    Input: Send + 'static,
    Output: Send + 'static,
{
    /// Submit an input and wait for its output. Waits for queue capacity
    /// first.
    pub async fn process(&self, input: Input) -> Result<Output> {
        let (tx, rx) = oneshot::channel();
        let mut sender = self.tx.clone();
        sender
            .send(WorkItem { input, tx })
            .await
            .context("failed to send work item")?;
        rx.await.context("failed to receive work item result")?
    }
}
