//! Building a [`QualityReport`] for one document.

use std::{collections::BTreeMap, thread, time::Instant};

use schemars::JsonSchema;

use super::{
    assembly::{Page, PageAssembler, document_text},
    fields::{FieldExtractor, FieldName, StructuredData},
    metrics::{MetricsCalculator, QualityMetrics, TextMetrics},
    scoring::{FieldScorer, GroundTruthFields},
    token::TokenLayout,
};
use crate::{
    config::EngineConfig,
    errors::AssessError,
    prelude::*,
    schema::{SchemaInput, SchemaResult, SchemaValidator},
};

/// Measures how long an assessment took.
pub trait Stopwatch {
    /// Seconds since the stopwatch was started.
    fn elapsed_secs(&self) -> f64;
}

/// A [`Stopwatch`] backed by the system's monotonic clock.
#[derive(Clone, Copy, Debug)]
pub struct InstantStopwatch(Instant);

impl InstantStopwatch {
    pub fn start() -> Self {
        Self(Instant::now())
    }
}

impl Stopwatch for InstantStopwatch {
    fn elapsed_secs(&self) -> f64 {
        self.0.elapsed().as_secs_f64()
    }
}

/// A [`Stopwatch`] which always reports the same time. Used to make reports
/// reproducible.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrozenStopwatch(pub f64);

impl Stopwatch for FrozenStopwatch {
    fn elapsed_secs(&self) -> f64 {
        self.0
    }
}

/// How the tokens were produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AssessmentMode {
    /// Straight from the recognizer.
    #[default]
    Standard,
    /// From a recognizer run on a denoised image.
    Noisy,
}

/// Everything we need to assess one document.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct AssessmentRequest {
    /// Recognized tokens.
    #[serde(flatten)]
    pub layout: TokenLayout,

    /// The reference transcription, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,

    /// Fields to extract. Defaults to every known field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_fields: Option<Vec<FieldName>>,

    /// Known-good values for some fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth_fields: Option<GroundTruthFields>,

    /// A schema for the extracted fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaInput>,

    /// Keys we don't recognize. A request with any of these is rejected, so
    /// that a misspelled key isn't silently ignored.
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(skip)]
    pub unknown: BTreeMap<String, Value>,
}

/// The assessment of one document.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct QualityReport {
    /// The text of every page, in reading order.
    pub extracted_text: String,

    /// Pages with at least one token.
    pub pages: Vec<Page>,

    /// Number of pages, counting pages without tokens.
    pub total_pages: usize,

    /// Does any page have two columns?
    pub has_multiple_columns: bool,

    pub structured_data: StructuredData,

    pub metrics: QualityMetrics,

    #[serde(flatten)]
    pub schema: SchemaResult,

    /// Seconds spent building this report.
    pub processing_time: f64,

    /// Were the tokens recognized from a denoised image?
    pub noise_processed: bool,
}

/// Runs every stage of the assessment.
#[derive(Clone, Debug)]
pub struct QualityReportBuilder {
    config: EngineConfig,
    assembler: PageAssembler,
    calculator: MetricsCalculator,
}

impl QualityReportBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            assembler: PageAssembler::new(&config),
            calculator: MetricsCalculator::new(&config),
            config,
        }
    }

    /// Assess one document.
    ///
    /// Only malformed input and broken internal invariants are errors. Missing
    /// fields, schema mismatches and poor scores are all reported as data.
    pub fn build(
        &self,
        request: AssessmentRequest,
        mode: AssessmentMode,
        stopwatch: &impl Stopwatch,
    ) -> Result<QualityReport, AssessError> {
        let AssessmentRequest {
            layout,
            ground_truth,
            expected_fields,
            ground_truth_fields,
            schema,
            unknown,
        } = request;

        if !unknown.is_empty() {
            let keys = unknown.keys().cloned().collect::<Vec<_>>();
            return Err(AssessError::input(format!(
                "unknown fields in request: {}",
                keys.join(", ")
            )));
        }
        let validator = SchemaValidator::new(schema.as_ref())?;
        let total_pages = layout.page_count();
        let page_tokens = layout.into_pages(self.config.min_confidence)?;
        let pages = self.assembler.assemble(page_tokens)?;
        let has_multiple_columns = pages.iter().any(|p| p.has_multiple_columns);
        let extracted_text = document_text(&pages);
        debug!(
            total_pages,
            assembled_pages = pages.len(),
            has_multiple_columns,
            "Assembled pages"
        );

        // Alignment and extraction only share the assembled text.
        let (text_metrics, structured_data) = thread::scope(|scope| {
            let alignment = scope.spawn(|| -> Option<TextMetrics> {
                ground_truth
                    .as_deref()
                    .map(|gt| self.calculator.text_metrics(&extracted_text, gt))
            });
            let structured_data =
                FieldExtractor.extract(&extracted_text, expected_fields.as_deref());
            let text_metrics = alignment
                .join()
                .map_err(|_| AssessError::internal("text alignment panicked"))?;
            Ok::<_, AssessError>((text_metrics, structured_data))
        })?;

        let mut metrics = QualityMetrics {
            text: text_metrics,
            ..QualityMetrics::default()
        };
        if let Some(expected) = &ground_truth_fields {
            metrics.set_field_scores(FieldScorer.score(&structured_data, expected));
        }
        if mode == AssessmentMode::Noisy {
            metrics.record_noise_metrics();
        }
        let schema = validator.check(&structured_data);

        Ok(QualityReport {
            extracted_text,
            pages,
            total_pages,
            has_multiple_columns,
            structured_data,
            metrics,
            schema,
            processing_time: stopwatch.elapsed_secs(),
            noise_processed: mode == AssessmentMode::Noisy,
        })
    }
}
