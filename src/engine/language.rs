//! Script-based language guessing for columns.

use schemars::JsonSchema;

use crate::prelude::*;

/// The language we think a column is written in.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// Mostly Cyrillic.
    Ru,
    /// Mostly Latin.
    En,
    /// Substantial amounts of both Cyrillic and Latin.
    Mixed,
    /// No letters, or mostly some other script.
    Other,
}

/// Letter counts by script.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ScriptCounts {
    cyrillic: usize,
    latin: usize,
    other: usize,
}

impl ScriptCounts {
    fn count<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut counts = Self::default();
        for c in texts.into_iter().flat_map(str::chars) {
            if !c.is_alphabetic() {
                continue;
            }
            if is_cyrillic(c) {
                counts.cyrillic += 1;
            } else if is_latin(c) {
                counts.latin += 1;
            } else {
                counts.other += 1;
            }
        }
        counts
    }

    fn total(&self) -> usize {
        self.cyrillic + self.latin + self.other
    }
}

fn is_cyrillic(c: char) -> bool {
    matches!(c, '\u{0400}'..='\u{052F}')
}

fn is_latin(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '\u{00C0}'..='\u{024F}')
}

/// Guess a language from a set of texts.
///
/// If Cyrillic and Latin letters each make up more than `minor_fraction` of
/// all letters, the result is [`Language::Mixed`]. Otherwise the most common
/// script wins.
pub fn detect_language<'a>(
    texts: impl IntoIterator<Item = &'a str>,
    minor_fraction: f64,
) -> Language {
    let counts = ScriptCounts::count(texts);
    let total = counts.total();
    if total == 0 {
        return Language::Other;
    }
    let share = |n: usize| n as f64 / total as f64;
    if share(counts.cyrillic) > minor_fraction && share(counts.latin) > minor_fraction {
        Language::Mixed
    } else if counts.cyrillic > counts.latin && counts.cyrillic > counts.other {
        Language::Ru
    } else if counts.latin > counts.cyrillic && counts.latin > counts.other {
        Language::En
    } else {
        Language::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_single_scripts() {
        assert_eq!(detect_language(["Привет", "мир"], 0.2), Language::Ru);
        assert_eq!(detect_language(["Hello", "world"], 0.2), Language::En);
        assert_eq!(detect_language(["こんにちは"], 0.2), Language::Other);
        assert_eq!(detect_language(["12345", "--"], 0.2), Language::Other);
    }

    #[test]
    fn minor_presence_does_not_make_mixed() {
        // One Latin letter in a sea of Cyrillic.
        assert_eq!(detect_language(["Паспорт серии N"], 0.2), Language::Ru);
    }

    #[test]
    fn substantial_presence_makes_mixed() {
        assert_eq!(detect_language(["Имя Name"], 0.2), Language::Mixed);
    }
}
