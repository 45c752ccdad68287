//! Scoring extracted fields against known-good values.

use std::collections::BTreeMap;

use schemars::JsonSchema;

use super::{
    align::{Alignment, normalize_text},
    fields::{FieldName, StructuredData},
};
use crate::prelude::*;

/// Ground-truth values for some fields.
pub type GroundTruthFields = BTreeMap<FieldName, String>;

/// How well one field was extracted.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct FieldMetrics {
    /// 1.0 if the normalized values are equal, else 0.0.
    pub exact_match: f64,

    /// Character-level F1 of the extracted value against the expected one.
    /// 0.0 if nothing was extracted.
    pub char_f1: f64,
}

/// Scores for all ground-truth fields of a document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldScores {
    pub fields: BTreeMap<FieldName, FieldMetrics>,

    /// 1.0 if every ground-truth field matched exactly, else 0.0.
    pub exact_match_per_document: f64,
}

/// Compares [`StructuredData`] with [`GroundTruthFields`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FieldScorer;

impl FieldScorer {
    /// Score every field in `expected`. Fields which are absent from
    /// `extracted` score zero.
    pub fn score(&self, extracted: &StructuredData, expected: &GroundTruthFields) -> FieldScores {
        let fields = expected
            .iter()
            .map(|(&field, expected_value)| {
                let extracted_value = extracted.get(&field).and_then(|f| f.value.as_deref());
                (field, score_field(field, extracted_value, expected_value))
            })
            .collect::<BTreeMap<_, _>>();
        let all_match = fields.values().all(|m| m.exact_match == 1.0);
        FieldScores {
            fields,
            exact_match_per_document: if all_match { 1.0 } else { 0.0 },
        }
    }
}

fn score_field(field: FieldName, extracted: Option<&str>, expected: &str) -> FieldMetrics {
    let Some(extracted) = extracted else {
        return FieldMetrics {
            exact_match: 0.0,
            char_f1: 0.0,
        };
    };
    // Ground truth is written by people, so run it through the same cleanup
    // as extracted values.
    let expected = normalize_text(&field.normalize_value(expected));
    let extracted = normalize_text(extracted);
    let alignment = Alignment::align(
        &extracted.chars().collect::<Vec<_>>(),
        &expected.chars().collect::<Vec<_>>(),
    );
    FieldMetrics {
        exact_match: if extracted == expected { 1.0 } else { 0.0 },
        char_f1: alignment.f1(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fields::ExtractedField;

    fn extracted(pairs: &[(FieldName, Option<&str>)]) -> StructuredData {
        pairs
            .iter()
            .map(|&(field, value)| {
                (
                    field,
                    ExtractedField {
                        value: value.map(str::to_owned),
                        confidence: if value.is_some() { 0.8 } else { 0.0 },
                    },
                )
            })
            .collect()
    }

    #[test]
    fn all_fields_match() {
        let data = extracted(&[
            (FieldName::Name, Some("Иван Иванов")),
            (FieldName::Date, Some("01.01.2023")),
        ]);
        let expected = GroundTruthFields::from([
            (FieldName::Name, "иван иванов".to_owned()),
            (FieldName::Date, "01/01/2023".to_owned()),
        ]);
        let scores = FieldScorer.score(&data, &expected);
        assert_eq!(scores.exact_match_per_document, 1.0);
        assert_eq!(scores.fields[&FieldName::Date].char_f1, 1.0);
    }

    #[test]
    fn partial_and_missing_fields() {
        let data = extracted(&[(FieldName::Name, Some("Иван Иваноф")), (FieldName::Date, None)]);
        let expected = GroundTruthFields::from([
            (FieldName::Name, "Иван Иванов".to_owned()),
            (FieldName::Date, "01.01.2023".to_owned()),
            (FieldName::Inn, "7712345678".to_owned()),
        ]);
        let scores = FieldScorer.score(&data, &expected);
        assert_eq!(scores.exact_match_per_document, 0.0);

        let name = &scores.fields[&FieldName::Name];
        assert_eq!(name.exact_match, 0.0);
        assert!(name.char_f1 > 0.8 && name.char_f1 < 1.0);

        assert_eq!(scores.fields[&FieldName::Date].char_f1, 0.0);
        assert_eq!(scores.fields[&FieldName::Inn].exact_match, 0.0);
    }
}
