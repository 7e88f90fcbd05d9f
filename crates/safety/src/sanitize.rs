//! User-input normalization.
//!
//! The output is byte-lossy and idempotent: sanitizing twice yields the
//! same string.

use unicode_normalization::UnicodeNormalization;

use pal_domain::error::{Error, Result};

/// Zero-width characters stripped outright (joiners, non-joiners,
/// word-joiners, BOM).
const ZERO_WIDTH: &[char] = &[
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}',
];

/// Normalize one user utterance.
///
/// - rejects empty / whitespace-only input (`InputEmpty`)
/// - rejects input longer than `max_chars` (`InputTooLong`)
/// - NFKC-normalizes, strips ASCII control characters except `\n` and
///   `\t`, removes zero-width characters
/// - collapses runs of spaces/tabs within a line to the run's first
///   character and trims line-trailing whitespace, preserving line breaks
pub fn sanitize(input: &str, max_chars: usize) -> Result<String> {
    if input.trim().is_empty() {
        return Err(Error::InputEmpty);
    }
    if input.chars().count() > max_chars {
        return Err(Error::InputTooLong { max: max_chars });
    }

    let mut cleaned = String::with_capacity(input.len());
    for ch in input.nfkc() {
        if ZERO_WIDTH.contains(&ch) {
            continue;
        }
        if ch.is_control() && ch != '\n' && ch != '\t' {
            continue;
        }
        cleaned.push(ch);
    }

    let mut out = String::with_capacity(cleaned.len());
    for (i, line) in cleaned.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&collapse_line(line));
    }

    let out = out.trim_matches(|c| c == ' ' || c == '\t' || c == '\n').to_string();
    if out.is_empty() {
        return Err(Error::InputEmpty);
    }
    Ok(out)
}

/// Collapse each run of spaces/tabs to its first character and drop
/// trailing whitespace.
fn collapse_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_run = false;
    for ch in line.chars() {
        if ch == ' ' || ch == '\t' {
            if !in_run {
                out.push(ch);
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    while out.ends_with(' ') || out.ends_with('\t') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 2000;

    #[test]
    fn empty_and_whitespace_rejected() {
        assert!(matches!(sanitize("", MAX), Err(Error::InputEmpty)));
        assert!(matches!(sanitize("   \n\t ", MAX), Err(Error::InputEmpty)));
    }

    #[test]
    fn over_length_rejected() {
        let long = "x".repeat(2001);
        assert!(matches!(
            sanitize(&long, MAX),
            Err(Error::InputTooLong { max: 2000 })
        ));
    }

    #[test]
    fn control_characters_stripped_but_newline_and_tab_survive() {
        let out = sanitize("a\u{0007}b\tc\nd", MAX).unwrap();
        assert_eq!(out, "ab\tc\nd");
    }

    #[test]
    fn zero_width_characters_removed() {
        let out = sanitize("he\u{200D}llo\u{FEFF} world", MAX).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn nfkc_folds_compatibility_forms() {
        // Fullwidth letters fold to ASCII under NFKC.
        let out = sanitize("ｈｅｌｌｏ", MAX).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn whitespace_runs_collapse_within_lines() {
        let out = sanitize("a   b\t\tc\nd  e", MAX).unwrap();
        assert_eq!(out, "a b\tc\nd e");
    }

    #[test]
    fn line_breaks_preserved() {
        let out = sanitize("first\nsecond\nthird", MAX).unwrap();
        assert_eq!(out.matches('\n').count(), 2);
    }

    #[test]
    fn idempotent() {
        let samples = [
            "  hello   world  ",
            "a\u{200B}b   c\n\n  d\t\te",
            "ｈｅｌｌｏ \u{0007} there",
            "multi\nline\n  input ",
        ];
        for sample in samples {
            let once = sanitize(sample, MAX).unwrap();
            let twice = sanitize(&once, MAX).unwrap();
            assert_eq!(once, twice, "sanitize must be idempotent for {sample:?}");
        }
    }
}
