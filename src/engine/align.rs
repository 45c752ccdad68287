//! Edit-distance alignment and the error rates built on top of it.

/// The result of aligning two sequences with unit-cost edits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Alignment {
    /// Minimum number of insertions, deletions and substitutions.
    pub distance: usize,

    /// Number of positions aligned without an edit, on the best-matching
    /// minimum-cost path.
    pub matches: usize,

    /// Length of the first ("extracted") sequence.
    pub len_a: usize,

    /// Length of the second ("reference") sequence.
    pub len_b: usize,
}

impl Alignment {
    /// Align `a` against `b`.
    ///
    /// Among all minimum-distance alignments, we pick the one with the most
    /// exact matches. Only two rows of the DP table are kept, so memory is
    /// `O(len(b))`.
    pub fn align<T: PartialEq>(a: &[T], b: &[T]) -> Self {
        // Each cell holds (distance, matches).
        let mut prev = (0..=b.len()).map(|j| (j, 0)).collect::<Vec<_>>();
        let mut curr = vec![(0, 0); b.len() + 1];

        for (i, item_a) in a.iter().enumerate() {
            curr[0] = (i + 1, 0);
            for (j, item_b) in b.iter().enumerate() {
                let diagonal = if item_a == item_b {
                    (prev[j].0, prev[j].1 + 1)
                } else {
                    (prev[j].0 + 1, prev[j].1)
                };
                let deletion = (prev[j + 1].0 + 1, prev[j + 1].1);
                let insertion = (curr[j].0 + 1, curr[j].1);
                curr[j + 1] = [diagonal, deletion, insertion]
                    .into_iter()
                    .min_by(|x, y| x.0.cmp(&y.0).then(y.1.cmp(&x.1)))
                    .unwrap_or(diagonal);
            }
            std::mem::swap(&mut prev, &mut curr);
        }

        let (distance, matches) = prev[b.len()];
        Self {
            distance,
            matches,
            len_a: a.len(),
            len_b: b.len(),
        }
    }

    /// `distance / max(1, len_b)`, clamped to 1.0.
    pub fn error_rate(&self) -> f64 {
        (self.distance as f64 / self.len_b.max(1) as f64).min(1.0)
    }

    /// `distance / max(1, max(len_a, len_b))`.
    pub fn normalized_distance(&self) -> f64 {
        self.distance as f64 / self.len_a.max(self.len_b).max(1) as f64
    }

    /// Matches as a share of the extracted sequence.
    pub fn precision(&self) -> f64 {
        self.matches as f64 / self.len_a.max(1) as f64
    }

    /// Matches as a share of the reference sequence.
    pub fn recall(&self) -> f64 {
        self.matches as f64 / self.len_b.max(1) as f64
    }

    /// Harmonic mean of precision and recall, or 0.0 if both are 0.0.
    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

/// Case-fold, collapse whitespace runs to single spaces, and trim.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cut `text` to at most `max_chars` characters. Returns `true` if anything
/// was removed.
fn truncate_chars(text: &mut String, max_chars: usize) -> bool {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            text.truncate(byte_idx);
            true
        }
        None => false,
    }
}

/// Character and word alignments of an extracted text against a reference.
#[derive(Clone, Debug, PartialEq)]
pub struct TextComparison {
    pub chars: Alignment,
    pub words: Alignment,

    /// Did the normalized texts match before any truncation?
    pub exact_match: bool,

    /// Was either text cut down to the length cap?
    pub truncated: bool,
}

/// Compares texts after normalization, with a cap on aligned length.
#[derive(Clone, Copy, Debug)]
pub struct TextAligner {
    max_chars: usize,
}

impl TextAligner {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn compare(&self, extracted: &str, reference: &str) -> TextComparison {
        let mut extracted = normalize_text(extracted);
        let mut reference = normalize_text(reference);
        let exact_match = extracted == reference;

        let truncated_extracted = truncate_chars(&mut extracted, self.max_chars);
        let truncated_reference = truncate_chars(&mut reference, self.max_chars);
        let truncated = truncated_extracted || truncated_reference;

        let chars_a = extracted.chars().collect::<Vec<_>>();
        let chars_b = reference.chars().collect::<Vec<_>>();
        let words_a = extracted.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>();
        let words_b = reference.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>();

        TextComparison {
            chars: Alignment::align(&chars_a, &chars_b),
            words: Alignment::align(&words_a, &words_b),
            exact_match,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn classic_distances() {
        let a = Alignment::align(&chars("kitten"), &chars("sitting"));
        assert_eq!(a.distance, 3);
        assert_eq!(a.matches, 4);

        let a = Alignment::align(&chars(""), &chars("abc"));
        assert_eq!(a.distance, 3);
        assert_eq!(a.matches, 0);

        let a = Alignment::align(&chars("abc"), &chars(""));
        assert_eq!(a.distance, 3);
    }

    #[test]
    fn prefers_alignments_with_more_matches() {
        // "ab" -> "ba" costs 2 either way, but one path keeps a match.
        let a = Alignment::align(&chars("ab"), &chars("ba"));
        assert_eq!(a.distance, 2);
        assert_eq!(a.matches, 1);
    }

    #[test]
    fn error_rate_is_clamped() {
        let a = Alignment::align(&chars("completely different"), &chars("x"));
        assert_eq!(a.error_rate(), 1.0);
        assert!(a.normalized_distance() <= 1.0);
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_text("  Иван\t ИВАНОВ \n"), "иван иванов");
        assert_eq!(normalize_text(" \n "), "");
    }

    #[test]
    fn identical_after_normalization() {
        let cmp = TextAligner::new(100).compare("Иван  Иванов", "иван иванов ");
        assert!(cmp.exact_match);
        assert_eq!(cmp.chars.distance, 0);
        assert_eq!(cmp.words.distance, 0);
        assert_eq!(cmp.chars.f1(), 1.0);
        assert!(!cmp.truncated);
    }

    #[test]
    fn both_empty() {
        let cmp = TextAligner::new(100).compare("", "   ");
        assert!(cmp.exact_match);
        assert_eq!(cmp.chars.error_rate(), 0.0);
        assert_eq!(cmp.words.error_rate(), 0.0);
        assert_eq!(cmp.chars.normalized_distance(), 0.0);
        assert_eq!(cmp.chars.f1(), 0.0);
    }

    #[test]
    fn truncates_long_inputs() {
        let long = "абв".repeat(10);
        let cmp = TextAligner::new(5).compare(&long, &long);
        assert!(cmp.truncated);
        assert!(cmp.exact_match);
        assert_eq!(cmp.chars.len_a, 5);
        assert_eq!(cmp.chars.len_b, 5);
    }

    #[test]
    fn more_noise_never_lowers_cer() {
        let reference = "паспорт серии 4510 номер 123456 выдан";
        let mut noisy = chars(reference);
        let mut last = 0.0;
        for k in 0..noisy.len() {
            noisy[k] = '#';
            let text = noisy.iter().collect::<String>();
            let cer = TextAligner::new(1000)
                .compare(&text, reference)
                .chars
                .error_rate();
            assert!(cer >= last, "cer went from {last} to {cer} at k = {k}");
            last = cer;
        }
    }
}
