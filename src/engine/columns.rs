//! Splitting a page's tokens into reading columns.
//!
//! We project every token onto the X axis, merge the resulting intervals into
//! a coverage set, and look for the widest uncovered gap inside the central
//! band of the page. A wide enough gap with enough tokens on either side
//! becomes a column boundary.

use schemars::JsonSchema;

use super::token::{PageTokens, Token};
use crate::{config::EngineConfig, prelude::*};

/// Which reading column a token belongs to. Single-column pages use
/// [`Side::Left`].
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// The layout decision for one page.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColumnLayout {
    /// All tokens form one column.
    Single,
    /// Tokens with a horizontal centroid below `split_x` are on the left.
    Double { split_x: f64 },
}

/// Tokens assigned to one side of a page.
#[derive(Clone, Debug)]
pub struct ClusteredColumn {
    pub side: Side,
    pub tokens: Vec<Token>,
}

/// Partitions page tokens into one or two columns.
#[derive(Clone, Debug)]
pub struct ColumnClusterer {
    gap_fraction: f64,
    margin_fraction: f64,
    min_tokens: usize,
}

impl ColumnClusterer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            gap_fraction: config.column_gap_fraction,
            margin_fraction: config.column_margin_fraction,
            min_tokens: config.min_tokens_per_column,
        }
    }

    /// Decide between one and two columns for a page.
    pub fn layout(&self, page: &PageTokens) -> ColumnLayout {
        let (left, right) = page.span;
        let width = right - left;
        if page.tokens.is_empty() || width <= 0.0 {
            return ColumnLayout::Single;
        }

        let band = (
            left + self.margin_fraction * width,
            right - self.margin_fraction * width,
        );
        let Some((gap_lo, gap_hi)) = widest_gap(&coverage(&page.tokens), band) else {
            return ColumnLayout::Single;
        };
        if gap_hi - gap_lo <= self.gap_fraction * width {
            return ColumnLayout::Single;
        }

        let split_x = (gap_lo + gap_hi) / 2.0;
        let left_count = page
            .tokens
            .iter()
            .filter(|t| t.bbox.center_x() < split_x)
            .count();
        let right_count = page.tokens.len() - left_count;
        if left_count < self.min_tokens || right_count < self.min_tokens {
            trace!(
                page = page.index,
                left_count, right_count, "Gap found, but too few tokens for two columns"
            );
            return ColumnLayout::Single;
        }
        ColumnLayout::Double { split_x }
    }

    /// Assign every token of a page to a column. Returns one or two non-empty
    /// columns, left first.
    pub fn cluster(&self, page: PageTokens) -> Vec<ClusteredColumn> {
        match self.layout(&page) {
            ColumnLayout::Single => vec![ClusteredColumn {
                side: Side::Left,
                tokens: page.tokens,
            }],
            ColumnLayout::Double { split_x } => {
                debug!(page = page.index, split_x, "Detected two columns");
                let (left, right): (Vec<_>, Vec<_>) = page
                    .tokens
                    .into_iter()
                    .partition(|t| t.bbox.center_x() < split_x);
                vec![
                    ClusteredColumn {
                        side: Side::Left,
                        tokens: left,
                    },
                    ClusteredColumn {
                        side: Side::Right,
                        tokens: right,
                    },
                ]
            }
        }
    }
}

/// Merge the horizontal extents of `tokens` into sorted, disjoint intervals.
/// Touching intervals are merged.
fn coverage(tokens: &[Token]) -> Vec<(f64, f64)> {
    let mut intervals = tokens
        .iter()
        .map(|t| (t.bbox.x_min(), t.bbox.x_max()))
        .collect::<Vec<_>>();
    intervals.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Find the widest gap between covered intervals, clipped to `band`. Ties go
/// to the leftmost gap.
fn widest_gap(coverage: &[(f64, f64)], band: (f64, f64)) -> Option<(f64, f64)> {
    let mut best: Option<(f64, f64)> = None;
    for pair in coverage.windows(2) {
        let lo = pair[0].1.max(band.0);
        let hi = pair[1].0.min(band.1);
        if hi <= lo {
            continue;
        }
        match best {
            Some((best_lo, best_hi)) if hi - lo <= best_hi - best_lo => {}
            _ => best = Some((lo, hi)),
        }
    }
    best
}
