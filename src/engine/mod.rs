//! The quality assessment engine.
//!
//! This is a pure, synchronous transform from a document's tokens (plus
//! optional reference data) to a [`QualityReport`]. It shares no state
//! between documents, so callers may run as many documents in parallel as
//! memory allows. See [`crate::queues::engine`] for how we do that.

pub mod align;
pub mod assembly;
pub mod columns;
pub mod fields;
pub mod language;
pub mod metrics;
pub mod report;
pub mod scoring;
pub mod token;

pub use self::{
    metrics::{MetricsCalculator, MetricsRequest, QualityMetrics},
    report::{
        AssessmentMode, AssessmentRequest, FrozenStopwatch, InstantStopwatch, QualityReport,
        QualityReportBuilder,
    },
};
