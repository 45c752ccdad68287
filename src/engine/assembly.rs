//! Turning clustered tokens into reading-order text.

use schemars::JsonSchema;

use super::{
    columns::{ClusteredColumn, ColumnClusterer, Side},
    language::{Language, detect_language},
    token::{PageTokens, Token},
};
use crate::{config::EngineConfig, errors::AssessError, prelude::*};

/// Separates the text of the left and right columns of a page.
pub const COLUMN_DELIMITER: &str = "\n\n";

/// Separates the text of consecutive pages in a document.
pub const PAGE_DELIMITER: &str = "\n\n";

/// One reading column of a page.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct Column {
    pub side: Side,

    /// Member tokens, in reading order.
    pub tokens: Vec<Token>,

    /// Tokens joined by spaces, lines joined by newlines.
    pub text: String,

    pub language: Language,

    /// Mean confidence of the member tokens.
    pub confidence_avg: f64,

    pub items_count: usize,
}

/// One page of a document.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct Page {
    /// 1-based page number.
    pub page_number: usize,

    /// One or two columns, left first.
    pub columns: Vec<Column>,

    pub has_multiple_columns: bool,

    /// Column texts, left then right.
    pub text: String,

    pub columns_count: usize,
}

/// Orders tokens into lines, columns and pages.
#[derive(Clone, Debug)]
pub struct PageAssembler {
    clusterer: ColumnClusterer,
    line_tolerance: f64,
    script_minor_fraction: f64,
}

impl PageAssembler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            clusterer: ColumnClusterer::new(config),
            line_tolerance: config.line_tolerance,
            script_minor_fraction: config.script_minor_fraction,
        }
    }

    /// Assemble all the pages of a document. Pages must be sorted by index.
    pub fn assemble(&self, pages: Vec<PageTokens>) -> Result<Vec<Page>, AssessError> {
        let pages = pages
            .into_iter()
            .map(|page| self.assemble_page(page))
            .collect::<Result<Vec<_>, _>>()?;
        for pair in pages.windows(2) {
            if pair[0].page_number >= pair[1].page_number {
                return Err(AssessError::internal(format!(
                    "page {} follows page {}",
                    pair[1].page_number, pair[0].page_number
                )));
            }
        }
        Ok(pages)
    }

    fn assemble_page(&self, page: PageTokens) -> Result<Page, AssessError> {
        let page_number = page.index.saturating_add(1);
        let columns = self
            .clusterer
            .cluster(page)
            .into_iter()
            .map(|column| self.assemble_column(column))
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() || columns.len() > 2 {
            return Err(AssessError::internal(format!(
                "page {page_number} has {} columns",
                columns.len()
            )));
        }

        let text = columns
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(COLUMN_DELIMITER);
        Ok(Page {
            page_number,
            has_multiple_columns: columns.len() > 1,
            columns_count: columns.len(),
            columns,
            text,
        })
    }

    fn assemble_column(&self, column: ClusteredColumn) -> Result<Column, AssessError> {
        if column.tokens.is_empty() {
            return Err(AssessError::internal(format!(
                "{:?} column has no tokens",
                column.side
            )));
        }

        let lines = group_lines(column.tokens, self.line_tolerance);
        let text = lines
            .iter()
            .map(|line| {
                line.iter()
                    .map(|t| t.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n");
        let tokens = lines.into_iter().flatten().collect::<Vec<_>>();

        let items_count = tokens.len();
        let confidence_avg = tokens.iter().map(|t| t.confidence).sum::<f64>() / items_count as f64;
        let language = detect_language(
            tokens.iter().map(|t| t.text.as_str()),
            self.script_minor_fraction,
        );
        Ok(Column {
            side: column.side,
            tokens,
            text,
            language,
            confidence_avg,
            items_count,
        })
    }
}

/// Group tokens into lines, top to bottom, each line ordered left to right.
///
/// Tokens are visited by vertical centre. A token joins the current line when
/// its centre is within `tolerance` times the median token height of the
/// line's mean centre.
fn group_lines(mut tokens: Vec<Token>, tolerance: f64) -> Vec<Vec<Token>> {
    let threshold = tolerance * median_height(&tokens);
    tokens.sort_by(|a, b| {
        a.bbox
            .center_y()
            .total_cmp(&b.bbox.center_y())
            .then(a.bbox.x.total_cmp(&b.bbox.x))
    });

    let mut lines: Vec<Vec<Token>> = vec![];
    let mut line_center_sum = 0.0;
    for token in tokens {
        let center = token.bbox.center_y();
        if let Some(line) = lines.last_mut() {
            let mean = line_center_sum / line.len() as f64;
            if (center - mean).abs() <= threshold {
                line_center_sum += center;
                line.push(token);
                continue;
            }
        }
        line_center_sum = center;
        lines.push(vec![token]);
    }

    // `sort_by` is stable, so tokens at the same x keep their vertical order.
    for line in &mut lines {
        line.sort_by(|a, b| a.bbox.x.total_cmp(&b.bbox.x));
    }
    lines
}

fn median_height(tokens: &[Token]) -> f64 {
    let mut heights = tokens.iter().map(|t| t.bbox.height).collect::<Vec<_>>();
    if heights.is_empty() {
        return 0.0;
    }
    heights.sort_by(f64::total_cmp);
    let mid = heights.len() / 2;
    if heights.len() % 2 == 0 {
        (heights[mid - 1] + heights[mid]) / 2.0
    } else {
        heights[mid]
    }
}

/// Join the texts of several pages into one document text.
pub fn document_text(pages: &[Page]) -> String {
    pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(PAGE_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::token::token;

    fn page_tokens(index: usize, tokens: Vec<Token>) -> PageTokens {
        PageTokens {
            index,
            span: (0.0, 1000.0),
            tokens,
        }
    }

    #[test]
    fn orders_lines_top_to_bottom_and_left_to_right() {
        // Slightly ragged baselines, deliberately shuffled.
        let tokens = vec![
            token("Иванов", 120.0, 52.0, 80.0, 20.0),
            token("01.01.2023", 10.0, 100.0, 100.0, 20.0),
            token("Иван", 10.0, 50.0, 90.0, 20.0),
        ];
        let lines = group_lines(tokens, 0.5);
        let texts = lines
            .iter()
            .map(|l| l.iter().map(|t| t.text.as_str()).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec![vec!["Иван", "Иванов"], vec!["01.01.2023"]]);
    }

    #[test]
    fn single_column_page() {
        let assembler = PageAssembler::new(&EngineConfig::default());
        let tokens = vec![
            token("Иван", 10.0, 50.0, 90.0, 20.0),
            token("Иванов", 120.0, 50.0, 80.0, 20.0),
            token("01.01.2023", 10.0, 100.0, 100.0, 20.0),
        ];
        let pages = assembler.assemble(vec![page_tokens(0, tokens)]).unwrap();
        assert_eq!(pages.len(), 1);
        let page = &pages[0];
        assert_eq!(page.page_number, 1);
        assert!(!page.has_multiple_columns);
        assert_eq!(page.columns_count, 1);
        assert_eq!(page.text, "Иван Иванов\n01.01.2023");

        let column = &page.columns[0];
        assert_eq!(column.side, Side::Left);
        assert_eq!(column.items_count, 3);
        assert_eq!(column.language, Language::Ru);
        assert!((column.confidence_avg - 0.9).abs() < 1e-12);
    }

    #[test]
    fn two_column_page_puts_left_text_first() {
        let assembler = PageAssembler::new(&EngineConfig::default());
        let mut tokens = vec![];
        for row in 0..3 {
            let y = 100.0 + row as f64 * 30.0;
            tokens.push(token("Surname", 550.0, y, 150.0, 20.0));
            tokens.push(token("Фамилия", 50.0, y, 150.0, 20.0));
        }
        let pages = assembler.assemble(vec![page_tokens(0, tokens)]).unwrap();
        let page = &pages[0];
        assert!(page.has_multiple_columns);
        assert_eq!(page.columns_count, 2);
        assert_eq!(page.columns[0].language, Language::Ru);
        assert_eq!(page.columns[1].language, Language::En);
        assert_eq!(
            page.text,
            "Фамилия\nФамилия\nФамилия\n\nSurname\nSurname\nSurname"
        );
    }

    #[test]
    fn page_numbers_follow_indices() {
        let assembler = PageAssembler::new(&EngineConfig::default());
        let pages = assembler
            .assemble(vec![
                page_tokens(0, vec![token("one", 0.0, 0.0, 10.0, 10.0)]),
                page_tokens(3, vec![token("four", 0.0, 0.0, 10.0, 10.0)]),
            ])
            .unwrap();
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[1].page_number, 4);
        assert_eq!(document_text(&pages), "one\n\nfour");
    }

    #[test]
    fn out_of_order_pages_are_internal_errors() {
        let assembler = PageAssembler::new(&EngineConfig::default());
        let err = assembler
            .assemble(vec![
                page_tokens(1, vec![token("two", 0.0, 0.0, 10.0, 10.0)]),
                page_tokens(0, vec![token("one", 0.0, 0.0, 10.0, 10.0)]),
            ])
            .unwrap_err();
        assert!(!err.is_input_error());
    }
}
