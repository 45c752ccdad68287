//! Recognized tokens and their geometry.

use std::collections::BTreeMap;

use schemars::JsonSchema;

use crate::{errors::AssessError, prelude::*};

/// An axis-aligned rectangle locating a token on a page. `y` grows
/// downwards.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn x_min(&self) -> f64 {
        self.x
    }

    pub fn x_max(&self) -> f64 {
        self.x + self.width
    }

    /// Horizontal centroid.
    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    /// Vertical centroid.
    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    fn check(&self) -> Result<(), String> {
        let coords = [self.x, self.y, self.width, self.height];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err("bounding box has non-finite coordinates".to_owned());
        }
        if self.width < 0.0 || self.height < 0.0 {
            return Err("bounding box has negative size".to_owned());
        }
        Ok(())
    }
}

/// A piece of text recognized by an external OCR engine.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Token {
    /// The recognized text.
    pub text: String,

    /// Where the text was found.
    pub bbox: BoundingBox,

    /// Recognition confidence, between 0.0 and 1.0.
    pub confidence: f64,

    /// Zero-based page index.
    #[serde(default)]
    pub page: usize,
}

/// The raw output of a recognizer for one document.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TokenLayout {
    /// Every token in the document, in any order.
    pub tokens: Vec<Token>,

    /// The width of the page images, if known. When absent, the horizontal
    /// extent of each page's tokens is used instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_width: Option<f64>,
}

/// Page indices must be below this.
pub const MAX_PAGES: usize = 100_000;

/// The tokens of one page, ready for clustering.
#[derive(Clone, Debug)]
pub struct PageTokens {
    /// Zero-based page index.
    pub index: usize,

    /// Horizontal span of the page: `(left, right)`.
    pub span: (f64, f64),

    /// The page's tokens, in input order.
    pub tokens: Vec<Token>,
}

impl TokenLayout {
    /// Check the layout and group it by page.
    ///
    /// Blank tokens and tokens under `min_confidence` are dropped here. Pages
    /// left with no tokens are simply absent from the output.
    pub fn into_pages(self, min_confidence: f64) -> Result<Vec<PageTokens>, AssessError> {
        if self.tokens.is_empty() {
            return Err(AssessError::input("token layout contains no tokens"));
        }
        if let Some(width) = self.page_width
            && (!width.is_finite() || width <= 0.0)
        {
            return Err(AssessError::input(format!("page_width must be positive, got {width}")));
        }

        let mut by_page: BTreeMap<usize, Vec<Token>> = BTreeMap::new();
        for (idx, mut token) in self.tokens.into_iter().enumerate() {
            token
                .bbox
                .check()
                .map_err(|msg| AssessError::input(format!("token {idx}: {msg}")))?;
            if !(0.0..=1.0).contains(&token.confidence) {
                return Err(AssessError::input(format!(
                    "token {idx}: confidence must be between 0.0 and 1.0, got {}",
                    token.confidence
                )));
            }
            if token.page >= MAX_PAGES {
                return Err(AssessError::input(format!(
                    "token {idx}: page must be below {MAX_PAGES}, got {}",
                    token.page
                )));
            }
            let trimmed = token.text.trim();
            if trimmed.is_empty() || token.confidence < min_confidence {
                continue;
            }
            if trimmed.len() != token.text.len() {
                token.text = trimmed.to_owned();
            }
            by_page.entry(token.page).or_default().push(token);
        }

        Ok(by_page
            .into_iter()
            .map(|(index, tokens)| {
                let span = match self.page_width {
                    Some(width) => (0.0, width),
                    None => horizontal_extent(&tokens),
                };
                PageTokens {
                    index,
                    span,
                    tokens,
                }
            })
            .collect())
    }

    /// How many pages does this layout span? Pages without any tokens still
    /// count if a later page has tokens.
    pub fn page_count(&self) -> usize {
        self.tokens
            .iter()
            .map(|t| t.page.saturating_add(1))
            .max()
            .unwrap_or(0)
    }
}

/// The `(min x, max x)` covered by a non-empty set of tokens.
fn horizontal_extent(tokens: &[Token]) -> (f64, f64) {
    let left = tokens
        .iter()
        .map(|t| t.bbox.x_min())
        .fold(f64::INFINITY, f64::min);
    let right = tokens
        .iter()
        .map(|t| t.bbox.x_max())
        .fold(f64::NEG_INFINITY, f64::max);
    (left, right)
}

/// Test helper: build a token on page 0.
#[cfg(test)]
pub fn token(text: &str, x: f64, y: f64, width: f64, height: f64) -> Token {
    Token {
        text: text.to_owned(),
        bbox: BoundingBox {
            x,
            y,
            width,
            height,
        },
        confidence: 0.9,
        page: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_layout_is_input_error() {
        let err = TokenLayout::default().into_pages(0.0).unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn groups_by_page_and_skips_empty_pages() {
        let mut a = token("a", 0.0, 0.0, 10.0, 10.0);
        a.page = 2;
        let b = token("b", 5.0, 0.0, 10.0, 10.0);
        let layout = TokenLayout {
            tokens: vec![a, b],
            page_width: None,
        };
        assert_eq!(layout.page_count(), 3);
        let pages = layout.into_pages(0.0).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].index, 0);
        assert_eq!(pages[1].index, 2);
        assert_eq!(pages[0].span, (5.0, 15.0));
    }

    #[test]
    fn drops_blank_and_low_confidence_tokens() {
        let mut low = token("low", 0.0, 0.0, 10.0, 10.0);
        low.confidence = 0.1;
        let layout = TokenLayout {
            tokens: vec![low, token("  ", 0.0, 0.0, 1.0, 1.0), token(" ok ", 0.0, 0.0, 1.0, 1.0)],
            page_width: Some(100.0),
        };
        let pages = layout.into_pages(0.3).unwrap();
        assert_eq!(pages[0].tokens.len(), 1);
        assert_eq!(pages[0].tokens[0].text, "ok");
        assert_eq!(pages[0].span, (0.0, 100.0));
    }

    #[test]
    fn rejects_bad_geometry_and_confidence() {
        let mut bad = token("x", 0.0, 0.0, -1.0, 1.0);
        let layout = TokenLayout {
            tokens: vec![bad.clone()],
            page_width: None,
        };
        assert!(layout.into_pages(0.0).is_err());

        bad.bbox.width = 1.0;
        bad.confidence = 1.5;
        let layout = TokenLayout {
            tokens: vec![bad],
            page_width: None,
        };
        assert!(layout.into_pages(0.0).unwrap_err().is_input_error());
    }

    #[test]
    fn rejects_huge_page_index() {
        let mut far = token("x", 0.0, 0.0, 1.0, 1.0);
        far.page = usize::MAX;
        let layout = TokenLayout {
            tokens: vec![far],
            page_width: None,
        };
        assert_eq!(layout.page_count(), usize::MAX);
        let err = layout.into_pages(0.0).unwrap_err();
        assert!(err.is_input_error());
        assert!(err.to_string().contains("page must be below"));
    }
}
