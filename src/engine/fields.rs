//! Pattern-based extraction of a fixed set of document fields.

use std::{collections::BTreeMap, fmt, sync::LazyLock};

use regex::Regex;
use schemars::JsonSchema;

use crate::prelude::*;

/// The fields we know how to extract.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    Name,
    Date,
    Phone,
    Email,
    Address,
    Passport,
    Inn,
    Amount,
}

impl FieldName {
    /// Every field, in extraction order.
    pub const ALL: [FieldName; 8] = [
        FieldName::Name,
        FieldName::Date,
        FieldName::Phone,
        FieldName::Email,
        FieldName::Address,
        FieldName::Passport,
        FieldName::Inn,
        FieldName::Amount,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldName::Name => "name",
            FieldName::Date => "date",
            FieldName::Phone => "phone",
            FieldName::Email => "email",
            FieldName::Address => "address",
            FieldName::Passport => "passport",
            FieldName::Inn => "inn",
            FieldName::Amount => "amount",
        }
    }

    /// Clean up a raw match for this field.
    pub fn normalize_value(self, raw: &str) -> String {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        match self {
            FieldName::Phone => collapsed
                .chars()
                .enumerate()
                .filter(|&(i, c)| c.is_ascii_digit() || (i == 0 && c == '+'))
                .map(|(_, c)| c)
                .collect(),
            FieldName::Email => collapsed.to_lowercase(),
            FieldName::Date => collapsed.replace(['/', '-'], "."),
            FieldName::Amount => {
                let number = AMOUNT_NUMBER
                    .find(&collapsed)
                    .map(|m| m.as_str())
                    .unwrap_or(&collapsed);
                number.replace(',', ".")
            }
            FieldName::Name => collapsed
                .split(' ')
                .map(title_case)
                .collect::<Vec<_>>()
                .join(" "),
            FieldName::Address | FieldName::Passport | FieldName::Inn => collapsed,
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// A single extracted value.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ExtractedField {
    /// The normalized value, or `null` if nothing matched.
    pub value: Option<String>,

    /// How specific the matching pattern was. 0.0 if nothing matched.
    pub confidence: f64,
}

impl ExtractedField {
    pub fn missing() -> Self {
        Self {
            value: None,
            confidence: 0.0,
        }
    }
}

/// Extracted fields, keyed by field name.
pub type StructuredData = BTreeMap<FieldName, ExtractedField>;

/// A pattern and how much we trust its matches. The value is capture group 1.
struct FieldPattern {
    regex: Regex,
    confidence: f64,
}

impl FieldPattern {
    fn new(pattern: &str, confidence: f64) -> Self {
        Self {
            regex: Regex::new(pattern).expect("failed to compile field regex"),
            confidence,
        }
    }
}

/// Label prefix: a keyword, optional colon, horizontal whitespace only.
macro_rules! labeled {
    ($labels:literal, $value:literal) => {
        concat!(r"(?i)\b(?:", $labels, r")[ \t]*:?[ \t]*", $value)
    };
}

static AMOUNT_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("failed to compile regex"));

/// Patterns for each field, most specific first.
static FIELD_PATTERNS: LazyLock<BTreeMap<FieldName, Vec<FieldPattern>>> = LazyLock::new(|| {
    BTreeMap::from([
        (
            FieldName::Name,
            vec![
                FieldPattern::new(
                    labeled!(r"имя|name|фио|ф\.и\.о\.?", r"([а-яёa-z][а-яёa-z \t\-]*)"),
                    0.9,
                ),
                FieldPattern::new(
                    r"\b([А-ЯЁ][а-яё]+[ \t]+[А-ЯЁ][а-яё]+(?:[ \t]+[А-ЯЁ][а-яё]+)?)\b",
                    0.6,
                ),
            ],
        ),
        (
            FieldName::Date,
            vec![
                FieldPattern::new(
                    labeled!(r"дата|date", r"(\d{1,2}[./\-]\d{1,2}[./\-]\d{2,4})\b"),
                    0.95,
                ),
                FieldPattern::new(r"\b(\d{1,2}[./\-]\d{1,2}[./\-]\d{4})\b", 0.8),
                FieldPattern::new(r"\b(\d{1,2}[./\-]\d{1,2}[./\-]\d{2})\b", 0.5),
            ],
        ),
        (
            FieldName::Phone,
            vec![
                FieldPattern::new(
                    labeled!(r"телефон|phone|тел\.?", r"(\+?\d[\d \t\-()]{4,}\d)"),
                    0.9,
                ),
                FieldPattern::new(r"(\+?\d[\d \t\-()]{8,}\d)", 0.5),
            ],
        ),
        (
            FieldName::Email,
            vec![
                FieldPattern::new(
                    labeled!(
                        r"e-mail|email|почта",
                        r"([a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,})"
                    ),
                    0.95,
                ),
                FieldPattern::new(r"([a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,})", 0.85),
            ],
        ),
        (
            FieldName::Address,
            vec![
                FieldPattern::new(
                    labeled!(r"адрес|address|адр\.?", r"([а-яёa-z0-9][а-яёa-z0-9 \t,.\-]*)"),
                    0.9,
                ),
                FieldPattern::new(
                    r"(?i)(г\.[ \t]*[а-яё \t\-]+,[ \t]*[а-яё0-9 \t,.\-]+)",
                    0.6,
                ),
            ],
        ),
        (
            FieldName::Passport,
            vec![
                FieldPattern::new(
                    labeled!(r"паспорт|passport|пасп\.?", r"(\d{4}[ \t]*\d{6})\b"),
                    0.95,
                ),
                FieldPattern::new(r"\b(\d{4}[ \t]?\d{6})\b", 0.5),
            ],
        ),
        (
            FieldName::Inn,
            vec![
                FieldPattern::new(labeled!(r"инн|inn", r"(\d{10,12})\b"), 0.95),
                FieldPattern::new(r"\b(\d{10}|\d{12})\b", 0.4),
            ],
        ),
        (
            FieldName::Amount,
            vec![
                FieldPattern::new(
                    labeled!(r"сумма|amount|сумм\.?", r"(\d+(?:[.,]\d+)?)"),
                    0.9,
                ),
                FieldPattern::new(r"(?i)(\d+(?:[.,]\d+)?)[ \t]*(?:руб|р\.|₽)", 0.7),
            ],
        ),
    ])
});

/// Extracts [`StructuredData`] from assembled text.
#[derive(Clone, Copy, Debug, Default)]
pub struct FieldExtractor;

impl FieldExtractor {
    /// Extract `fields`, or every known field if `fields` is `None`.
    ///
    /// Every attempted field appears in the output. Fields which don't match
    /// have a `null` value.
    pub fn extract(&self, text: &str, fields: Option<&[FieldName]>) -> StructuredData {
        let fields = fields.unwrap_or(&FieldName::ALL);
        fields
            .iter()
            .map(|&field| (field, self.extract_field(text, field)))
            .collect()
    }

    /// Try each of a field's patterns in order and keep the first non-blank
    /// match.
    pub fn extract_field(&self, text: &str, field: FieldName) -> ExtractedField {
        let patterns = FIELD_PATTERNS.get(&field).map(Vec::as_slice).unwrap_or(&[]);
        for pattern in patterns {
            let found = pattern
                .regex
                .captures_iter(text)
                .filter_map(|caps| caps.get(1))
                .map(|m| m.as_str().trim())
                .find(|value| !value.is_empty());
            if let Some(raw) = found {
                trace!(%field, raw, confidence = pattern.confidence, "Matched field");
                return ExtractedField {
                    value: Some(field.normalize_value(raw)),
                    confidence: pattern.confidence,
                };
            }
        }
        ExtractedField::missing()
    }
}
