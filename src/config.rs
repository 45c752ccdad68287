//! Engine configuration.
//!
//! None of these thresholds have a "true" value. The defaults were picked to
//! work on bilingual two-column forms scanned at ordinary resolutions, and
//! they can all be overridden from a JSON or TOML file.

use clap::Args;
use schemars::JsonSchema;

use crate::{async_utils::io::read_json_or_toml, errors::AssessError, prelude::*};

/// Tunable thresholds for layout reconstruction and scoring.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Minimum width of an uncovered horizontal gap, as a fraction of page
    /// width, before we consider splitting a page into two columns.
    pub column_gap_fraction: f64,

    /// Fraction of the page width on each side which is ignored when looking
    /// for a column gap. Keeps marginal artifacts from causing splits.
    pub column_margin_fraction: f64,

    /// Each column of a two-column page must contain at least this many
    /// tokens.
    pub min_tokens_per_column: usize,

    /// Tokens whose vertical centres are within this fraction of the
    /// column's median token height are placed on the same line.
    pub line_tolerance: f64,

    /// Share of letters that both Cyrillic and Latin must exceed before a
    /// column is reported as `mixed`.
    pub script_minor_fraction: f64,

    /// Tokens with a confidence below this are dropped before clustering.
    pub min_confidence: f64,

    /// Texts are truncated to this many characters (after normalization)
    /// before alignment.
    pub max_alignment_chars: usize,

    /// Weights for the composite quality score.
    pub metric_weights: MetricWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            column_gap_fraction: 0.05,
            column_margin_fraction: 0.10,
            min_tokens_per_column: 3,
            line_tolerance: 0.5,
            script_minor_fraction: 0.2,
            min_confidence: 0.0,
            max_alignment_chars: 10_000,
            metric_weights: MetricWeights::default(),
        }
    }
}

impl EngineConfig {
    /// Check that our thresholds make sense.
    pub fn validate(&self) -> Result<(), AssessError> {
        let fractions = [
            ("column_gap_fraction", self.column_gap_fraction),
            ("column_margin_fraction", self.column_margin_fraction),
            ("script_minor_fraction", self.script_minor_fraction),
            ("min_confidence", self.min_confidence),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(AssessError::input(format!(
                    "{name} must be between 0.0 and 1.0, got {value}"
                )));
            }
        }
        if self.column_margin_fraction >= 0.5 {
            return Err(AssessError::input("column_margin_fraction must be below 0.5"));
        }
        if !self.line_tolerance.is_finite() || self.line_tolerance < 0.0 {
            return Err(AssessError::input("line_tolerance must be non-negative"));
        }
        if self.max_alignment_chars == 0 {
            return Err(AssessError::input("max_alignment_chars must be positive"));
        }
        self.metric_weights.validate()
    }
}

/// Weights combining error rates into `quality_score`.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricWeights {
    /// Weight of the character error rate.
    pub cer: f64,
    /// Weight of the word error rate.
    pub wer: f64,
    /// Weight of the normalized Levenshtein distance.
    pub levenshtein: f64,
    /// Added to the score when the texts match exactly.
    pub exact_match_bonus: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            cer: 0.4,
            wer: 0.3,
            levenshtein: 0.3,
            exact_match_bonus: 0.1,
        }
    }
}

impl MetricWeights {
    fn validate(&self) -> Result<(), AssessError> {
        let weights = [self.cer, self.wer, self.levenshtein, self.exact_match_bonus];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AssessError::input("metric weights must be finite and non-negative"));
        }
        Ok(())
    }
}

/// Command-line options for locating our configuration.
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigOpts {
    /// A JSON or TOML file overriding the default engine thresholds.
    #[clap(long = "config", env = "OCR_QUALITY_CONFIG")]
    pub config_path: Option<PathBuf>,
}

impl ConfigOpts {
    /// Load our configuration, falling back to the defaults.
    #[instrument(level = "debug", skip_all)]
    pub async fn load(&self) -> Result<EngineConfig> {
        let config = match &self.config_path {
            Some(path) => read_json_or_toml::<EngineConfig>(path)
                .await
                .with_context(|| format!("failed to load config from {:?}", path))?,
            None => EngineConfig::default(),
        };
        config.validate()?;
        debug!(?config, "Engine configuration");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
min_tokens_per_column = 5

[metric_weights]
cer = 0.5
"#,
        )
        .unwrap();
        assert_eq!(config.min_tokens_per_column, 5);
        assert_eq!(config.column_gap_fraction, 0.05);
        assert_eq!(config.metric_weights.cer, 0.5);
        assert_eq!(config.metric_weights.wer, 0.3);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_keys() {
        let result = toml::from_str::<EngineConfig>("column_gap = 0.1");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_out_of_range_fractions() {
        let config = EngineConfig {
            column_gap_fraction: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().unwrap_err().is_input_error());

        let config = EngineConfig {
            column_margin_fraction: 0.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
