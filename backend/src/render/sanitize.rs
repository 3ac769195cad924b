//! Text cleanup applied to every field value before it reaches the page.
//!
//! Spreadsheet exports routinely smuggle in terminal escape sequences, control
//! characters and "smart" punctuation from word processors. The output encoder
//! works in WinAnsi, so this pass strips what cannot be drawn and folds the
//! common Unicode punctuation down to its ASCII equivalent.

use common::model::row::Row;
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest stem an archive entry may carry before the `.pdf` suffix.
const ENTRY_STEM_MAX: usize = 64;

// CSI sequences (ESC [ ... final byte) and two-byte ESC sequences.
static ESCAPE_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b(?:\[[0-9;?]*[@-~]|[@-Z\\^_])").expect("escape pattern compiles")
});

/// Returns `text` with escape sequences and control characters removed and
/// typographic punctuation normalized to ASCII.
pub fn sanitize_text(text: &str) -> String {
    let stripped = ESCAPE_SEQUENCE.replace_all(text, "");

    let mut out = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2039}' | '\u{203A}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' => out.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{00A0}' | '\u{2007}' | '\u{202F}' => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Picks the archive entry stem for a row: the value of its `name` column
/// (matched case-insensitively) when that survives sanitization, otherwise a
/// positional `certificate_<n>` fallback counting from 1.
pub fn entry_stem(row: &Row, row_index: usize) -> String {
    row.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("name"))
        .map(|(_, value)| sanitize_entry_stem(value))
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| format!("certificate_{}", row_index + 1))
}

/// Folds arbitrary text into the archive-safe charset `[a-z0-9._-]`.
///
/// Uppercase is folded down, whitespace and path separators become `_`, and
/// anything else that falls outside the charset becomes `_` too. Leading and
/// trailing dots and underscores are dropped so the stem cannot masquerade as
/// a dotfile or a relative path segment.
pub fn sanitize_entry_stem(raw: &str) -> String {
    let cleaned = sanitize_text(raw);
    let mut stem = String::with_capacity(cleaned.len());
    for c in cleaned.chars() {
        match c {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => stem.push(c),
            'A'..='Z' => stem.push(c.to_ascii_lowercase()),
            _ => stem.push('_'),
        }
    }
    stem.trim_matches(|c| c == '.' || c == '_')
        .chars()
        .take(ENTRY_STEM_MAX)
        .collect()
}
