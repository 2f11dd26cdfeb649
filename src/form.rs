//! Form-string parsing.
//!
//! A form string is the runner's trailing finish history, most recent
//! on the left: digits are finishing positions (`1` = win, `0` =
//! finished 10th or worse), letters are non-completions (`F` fell,
//! `P` pulled up, `U` unseated, etc.), and `-` / `/` separate seasons.
//!
//! Every factor rule in the scorer consumes this one parser; nothing
//! else in the crate inspects raw form text.

use serde::{Deserialize, Serialize};

/// A single figure in a form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormFigure {
    /// Finishing position digit; `0` means finished 10th or worse.
    Position(u8),
    /// Non-completion code (`F`, `P`, `U`, `R`, `B`, ...).
    NonCompletion(char),
}

/// Counts over a recent window of figures, used by the going rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecentProfile {
    pub wins: usize,
    /// Finishes in positions 1..=3.
    pub places: usize,
    /// Letters plus `0` finishes, matching how the legacy analyser
    /// counted failures.
    pub non_completions: usize,
}

/// Parsed form, most recent figure first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedForm {
    figures: Vec<FormFigure>,
    /// Figure indexes that a season separator precedes.
    separators: Vec<usize>,
}

impl ParsedForm {
    /// Parse a raw form string. Unknown characters are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut figures = Vec::new();
        let mut separators = Vec::new();

        for c in raw.trim().chars() {
            if let Some(d) = c.to_digit(10) {
                figures.push(FormFigure::Position(d as u8));
            } else if c == '-' || c == '/' {
                separators.push(figures.len());
            } else if c.is_ascii_alphabetic() {
                figures.push(FormFigure::NonCompletion(c.to_ascii_uppercase()));
            }
        }

        Self {
            figures,
            separators,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }

    pub fn figures(&self) -> &[FormFigure] {
        &self.figures
    }

    pub fn separators(&self) -> &[usize] {
        &self.separators
    }

    /// Finishing-position digits, most recent first, up to `limit`.
    pub fn digit_positions(&self, limit: usize) -> Vec<u8> {
        self.figures
            .iter()
            .filter_map(|f| match f {
                FormFigure::Position(p) => Some(*p),
                FormFigure::NonCompletion(_) => None,
            })
            .take(limit)
            .collect()
    }

    /// Positive (non-zero) finishing positions among the first
    /// `digit_limit` digits — the improvement-trend input.
    pub fn positive_positions(&self, digit_limit: usize) -> Vec<u8> {
        self.digit_positions(digit_limit)
            .into_iter()
            .filter(|p| *p > 0)
            .collect()
    }

    /// Whether any of the first `n` figures is a win.
    pub fn has_win_in_first(&self, n: usize) -> bool {
        self.figures
            .iter()
            .take(n)
            .any(|f| matches!(f, FormFigure::Position(1)))
    }

    /// Win/place/failure counts over the first `window` figures.
    pub fn recent_profile(&self, window: usize) -> RecentProfile {
        let mut profile = RecentProfile::default();
        for figure in self.figures.iter().take(window) {
            match figure {
                FormFigure::Position(1) => {
                    profile.wins += 1;
                    profile.places += 1;
                }
                FormFigure::Position(p) if (2..=3).contains(p) => profile.places += 1,
                FormFigure::Position(0) => profile.non_completions += 1,
                FormFigure::Position(_) => {}
                FormFigure::NonCompletion(_) => profile.non_completions += 1,
            }
        }
        profile
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_digits_and_letters() {
        let form = ParsedForm::parse("1F/212-2");
        assert_eq!(
            form.figures(),
            &[
                FormFigure::Position(1),
                FormFigure::NonCompletion('F'),
                FormFigure::Position(2),
                FormFigure::Position(1),
                FormFigure::Position(2),
                FormFigure::Position(2),
            ]
        );
        // Separators sit after figure 2 and figure 5.
        assert_eq!(form.separators(), &[2, 5]);
    }

    #[test]
    fn test_parse_empty_and_garbage() {
        assert!(ParsedForm::parse("").is_empty());
        assert!(ParsedForm::parse("  ").is_empty());
        assert!(ParsedForm::parse("--/").is_empty());
    }

    #[test]
    fn test_lowercase_letters_normalised() {
        let form = ParsedForm::parse("p1u");
        assert_eq!(
            form.figures(),
            &[
                FormFigure::NonCompletion('P'),
                FormFigure::Position(1),
                FormFigure::NonCompletion('U'),
            ]
        );
    }

    #[test]
    fn test_digit_positions_limit() {
        let form = ParsedForm::parse("1762-52");
        assert_eq!(form.digit_positions(5), vec![1, 7, 6, 2, 5]);
        assert_eq!(form.digit_positions(2), vec![1, 7]);
    }

    #[test]
    fn test_digit_positions_skip_letters() {
        let form = ParsedForm::parse("1F05-7");
        assert_eq!(form.digit_positions(5), vec![1, 0, 5, 7]);
    }

    #[test]
    fn test_positive_positions_drop_zeros() {
        let form = ParsedForm::parse("1005-71");
        assert_eq!(form.positive_positions(4), vec![1, 5]);
    }

    #[test]
    fn test_has_win_in_first() {
        assert!(ParsedForm::parse("1").has_win_in_first(3));
        assert!(ParsedForm::parse("231").has_win_in_first(3));
        assert!(!ParsedForm::parse("2314").has_win_in_first(2));
        // A separator does not consume a slot.
        assert!(ParsedForm::parse("2-31").has_win_in_first(3));
        assert!(!ParsedForm::parse("F0P1").has_win_in_first(3));
    }

    #[test]
    fn test_recent_profile_counts() {
        // 2,3,3,2,2,1 → 1 win, 6 places, 0 failures
        let p = ParsedForm::parse("23-3221").recent_profile(6);
        assert_eq!(p.wins, 1);
        assert_eq!(p.places, 6);
        assert_eq!(p.non_completions, 0);
    }

    #[test]
    fn test_recent_profile_failures() {
        // F and 0 both count as non-completions, 4 counts as neither.
        let p = ParsedForm::parse("1F04").recent_profile(5);
        assert_eq!(p.wins, 1);
        assert_eq!(p.places, 1);
        assert_eq!(p.non_completions, 2);
    }

    #[test]
    fn test_recent_profile_window() {
        let p = ParsedForm::parse("111111").recent_profile(3);
        assert_eq!(p.wins, 3);
    }
}
