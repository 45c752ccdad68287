//! Running the assessment engine on a bounded pool of blocking threads.

use std::sync::Arc;

use futures::FutureExt as _;

use super::work::{WorkQueue, WorkQueueHandle};
use crate::{
    async_utils::{JoinWorker, run_blocking},
    config::EngineConfig,
    engine::{
        AssessmentMode, AssessmentRequest, FrozenStopwatch, InstantStopwatch,
        MetricsCalculator, MetricsRequest, QualityMetrics, QualityReport,
        QualityReportBuilder,
    },
    prelude::*,
};

/// A job for the engine.
pub enum EngineJob {
    Assess {
        request: AssessmentRequest,
        mode: AssessmentMode,
    },
    Metrics(MetricsRequest),
}

/// The result of an [`EngineJob`].
pub enum EngineOutput {
    Report(Box<QualityReport>),
    Metrics(QualityMetrics),
}

/// Engine settings shared by every job.
struct EngineState {
    builder: QualityReportBuilder,
    calculator: MetricsCalculator,
    freeze_time: bool,
}

impl EngineState {
    fn run(&self, job: EngineJob) -> Result<EngineOutput> {
        match job {
            EngineJob::Assess { request, mode } => {
                let report = if self.freeze_time {
                    self.builder.build(request, mode, &FrozenStopwatch(0.0))
                } else {
                    self.builder.build(request, mode, &InstantStopwatch::start())
                };
                Ok(EngineOutput::Report(Box::new(report?)))
            }
            EngineJob::Metrics(request) => {
                Ok(EngineOutput::Metrics(self.calculator.calculate(&request)))
            }
        }
    }
}

/// A cheaply-cloneable handle for submitting work to the engine.
///
/// At most `jobs` documents are processed at once, no matter how many
/// callers share the handle.
#[derive(Clone)]
pub struct EngineQueue {
    handle: WorkQueueHandle<EngineJob, EngineOutput>,
}

impl EngineQueue {
    /// Start the engine. The [`JoinWorker`] completes once every handle has
    /// been dropped.
    ///
    /// With `freeze_time`, reports have a `processing_time` of zero, making
    /// output reproducible.
    pub fn start(config: EngineConfig, jobs: usize, freeze_time: bool) -> (Self, JoinWorker) {
        let state = Arc::new(EngineState {
            calculator: MetricsCalculator::new(&config),
            builder: QualityReportBuilder::new(config),
            freeze_time,
        });
        let (queue, worker) = WorkQueue::new(
            jobs,
            Arc::new(move |job: EngineJob| {
                let state = state.clone();
                run_blocking(move || state.run(job)).boxed()
            }),
        );
        (
            Self {
                handle: queue.handle(),
            },
            worker,
        )
    }

    /// Assess one document.
    pub async fn assess(
        &self,
        request: AssessmentRequest,
        mode: AssessmentMode,
    ) -> Result<QualityReport> {
        match self
            .handle
            .process(EngineJob::Assess { request, mode })
            .await?
        {
            EngineOutput::Report(report) => Ok(*report),
            EngineOutput::Metrics(_) => Err(anyhow!("engine returned metrics for an assessment")),
        }
    }

    /// Compare two texts.
    pub async fn metrics(&self, request: MetricsRequest) -> Result<QualityMetrics> {
        match self.handle.process(EngineJob::Metrics(request)).await? {
            EngineOutput::Metrics(metrics) => Ok(metrics),
            EngineOutput::Report(_) => Err(anyhow!("engine returned a report for metrics")),
        }
    }
}
