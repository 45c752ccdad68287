//! Quality metrics for extracted text.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserializer, de::Error as _};

use super::{
    align::TextAligner,
    fields::{FieldExtractor, FieldName},
    scoring::{FieldMetrics, FieldScorer, FieldScores, GroundTruthFields},
};
use crate::{
    config::{EngineConfig, MetricWeights},
    prelude::*,
};

/// Metrics comparing extracted text to a reference text.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct TextMetrics {
    /// Character error rate, clamped to 1.0.
    pub cer: f64,
    /// Word error rate, clamped to 1.0.
    pub wer: f64,
    pub normalized_levenshtein: f64,
    pub char_precision: f64,
    pub char_recall: f64,
    pub char_f1: f64,
    pub word_precision: f64,
    pub word_recall: f64,
    pub word_f1: f64,
    /// 1.0 if the normalized texts are identical, else 0.0.
    pub exact_match: f64,
    /// Weighted combination of the error rates, between 0.0 and 1.0.
    pub quality_score: f64,
    /// Were the texts cut down before alignment?
    pub alignment_truncated: bool,
}

/// Everything we measured about a document.
///
/// Text metrics are absent when there was no reference text. Per-field
/// metrics and any additional named metrics are only present when they were
/// computed.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct QualityMetrics {
    #[serde(flatten)]
    pub text: Option<TextMetrics>,

    /// Per-field scores, for fields with a known value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<FieldName, FieldMetrics>,

    /// 1.0 if every scored field matched exactly, else 0.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact_match_per_document: Option<f64>,

    /// Additional named metrics, such as `noise_cer`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

impl QualityMetrics {
    /// Attach field scores.
    pub fn set_field_scores(&mut self, scores: FieldScores) {
        self.fields = scores.fields;
        self.exact_match_per_document = Some(scores.exact_match_per_document);
    }

    /// Copy the text error rates into `noise_cer` and `noise_wer`.
    pub fn record_noise_metrics(&mut self) {
        if let Some(text) = &self.text {
            self.extra.insert("noise_cer".to_owned(), text.cer);
            self.extra.insert("noise_wer".to_owned(), text.wer);
        }
    }
}

/// A request to compare two texts directly, without any layout.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsRequest {
    /// Text produced by the OCR pipeline.
    pub extracted_text: String,

    /// The reference transcription.
    pub ground_truth: String,

    /// Fields to extract from both texts and compare. In CSV input, this may
    /// be a single cell like `name;date`.
    #[serde(
        default,
        deserialize_with = "field_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_fields: Option<Vec<FieldName>>,
}

/// Accept either a list of field names, or one string of names separated by
/// commas, semicolons or whitespace. An empty string means no fields.
fn field_list<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<FieldName>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawFields {
        List(Vec<FieldName>),
        Joined(String),
    }

    match Option::<RawFields>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawFields::List(fields)) => Ok(Some(fields)),
        Some(RawFields::Joined(joined)) => {
            let fields = joined
                .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                .filter(|name| !name.is_empty())
                .map(|name| serde_json::from_value::<FieldName>(Value::String(name.to_owned())))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(D::Error::custom)?;
            Ok((!fields.is_empty()).then_some(fields))
        }
    }
}

/// Computes [`TextMetrics`] and [`QualityMetrics`].
#[derive(Clone, Debug)]
pub struct MetricsCalculator {
    aligner: TextAligner,
    weights: MetricWeights,
}

impl MetricsCalculator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            aligner: TextAligner::new(config.max_alignment_chars),
            weights: config.metric_weights.clone(),
        }
    }

    /// Compare `extracted` against `reference`.
    pub fn text_metrics(&self, extracted: &str, reference: &str) -> TextMetrics {
        let cmp = self.aligner.compare(extracted, reference);
        if cmp.truncated {
            warn!(
                extracted_chars = extracted.chars().count(),
                reference_chars = reference.chars().count(),
                "Truncated texts before alignment"
            );
        }

        let cer = cmp.chars.error_rate();
        let wer = cmp.words.error_rate();
        let normalized_levenshtein = cmp.chars.normalized_distance();
        let exact_match = if cmp.exact_match { 1.0 } else { 0.0 };
        let w = &self.weights;
        let quality_score = (1.0
            - (w.cer * cer + w.wer * wer + w.levenshtein * normalized_levenshtein)
            + w.exact_match_bonus * exact_match)
            .clamp(0.0, 1.0);

        TextMetrics {
            cer,
            wer,
            normalized_levenshtein,
            char_precision: cmp.chars.precision(),
            char_recall: cmp.chars.recall(),
            char_f1: cmp.chars.f1(),
            word_precision: cmp.words.precision(),
            word_recall: cmp.words.recall(),
            word_f1: cmp.words.f1(),
            exact_match,
            quality_score,
            alignment_truncated: cmp.truncated,
        }
    }

    /// Compare two texts, and optionally the fields found in each.
    pub fn calculate(&self, request: &MetricsRequest) -> QualityMetrics {
        let mut metrics = QualityMetrics {
            text: Some(self.text_metrics(&request.extracted_text, &request.ground_truth)),
            ..QualityMetrics::default()
        };
        if let Some(fields) = &request.expected_fields {
            let extracted = FieldExtractor.extract(&request.extracted_text, Some(fields));
            let expected = FieldExtractor
                .extract(&request.ground_truth, Some(fields))
                .into_iter()
                .filter_map(|(field, f)| f.value.map(|v| (field, v)))
                .collect::<GroundTruthFields>();
            metrics.set_field_scores(FieldScorer.score(&extracted, &expected));
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> MetricsCalculator {
        MetricsCalculator::new(&EngineConfig::default())
    }

    #[test]
    fn identical_texts_score_perfectly() {
        let m = calculator().text_metrics("Иван Иванов 01.01.2023", "Иван Иванов 01.01.2023");
        assert_eq!(m.cer, 0.0);
        assert_eq!(m.wer, 0.0);
        assert_eq!(m.normalized_levenshtein, 0.0);
        assert_eq!(m.exact_match, 1.0);
        assert_eq!(m.char_f1, 1.0);
        assert_eq!(m.word_f1, 1.0);
        assert_eq!(m.quality_score, 1.0);
    }

    #[test]
    fn quality_score_uses_weights() {
        // One substituted word out of two: cer = 1/11, wer = 1/2, lev = 1/11.
        let m = calculator().text_metrics("hello worle", "hello world");
        let expected = 1.0 - (0.4 / 11.0 + 0.3 * 0.5 + 0.3 / 11.0);
        assert!((m.quality_score - expected).abs() < 1e-12);
        assert_eq!(m.exact_match, 0.0);
        assert_eq!(m.word_precision, 0.5);
    }

    #[test]
    fn all_metrics_stay_in_range() {
        let m = calculator().text_metrics("совсем другой длинный текст", "x");
        for value in [
            m.cer,
            m.wer,
            m.normalized_levenshtein,
            m.char_precision,
            m.char_recall,
            m.char_f1,
            m.word_precision,
            m.word_recall,
            m.word_f1,
            m.quality_score,
        ] {
            assert!((0.0..=1.0).contains(&value), "{value} out of range");
        }
    }

    #[test]
    fn missing_text_metrics_are_omitted() {
        let json = serde_json::to_value(QualityMetrics::default()).unwrap();
        assert_eq!(json, json!({}));
    }

    #[test]
    fn noise_metrics_copy_error_rates() {
        let mut metrics = QualityMetrics {
            text: Some(calculator().text_metrics("abc", "abd")),
            ..QualityMetrics::default()
        };
        metrics.record_noise_metrics();
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["extra"]["noise_cer"], json["cer"]);
        assert_eq!(json["extra"]["noise_wer"], json["wer"]);
    }

    #[test]
    fn expected_fields_accept_csv_cells() {
        let parse = |fields: Value| {
            serde_json::from_value::<MetricsRequest>(json!({
                "extracted_text": "a",
                "ground_truth": "a",
                "expected_fields": fields,
            }))
        };
        assert_eq!(
            parse(json!("name; date")).unwrap().expected_fields,
            Some(vec![FieldName::Name, FieldName::Date])
        );
        assert_eq!(
            parse(json!(["inn"])).unwrap().expected_fields,
            Some(vec![FieldName::Inn])
        );
        assert_eq!(parse(json!("")).unwrap().expected_fields, None);
        assert!(parse(json!("name,snils")).is_err());
    }

    #[test]
    fn calculate_scores_fields_from_both_texts() {
        let request = MetricsRequest {
            extracted_text: "Иван Иванов 01.01.2O23".to_owned(),
            ground_truth: "Иван Иванов 01.01.2023".to_owned(),
            expected_fields: Some(vec![FieldName::Name, FieldName::Date]),
        };
        let metrics = calculator().calculate(&request);
        assert_eq!(metrics.fields[&FieldName::Name].exact_match, 1.0);
        assert_eq!(metrics.fields[&FieldName::Date].exact_match, 0.0);
        assert_eq!(metrics.exact_match_per_document, Some(0.0));
        assert!(metrics.text.unwrap().cer > 0.0);
    }
}
