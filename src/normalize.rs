//! Post-extraction text cleanup and the quality heuristic.

use unicode_normalization::UnicodeNormalization;

/// Canonical form of extracted text.
///
/// NFC composition, control characters removed (tab and newline kept, CR
/// folded into LF), horizontal whitespace runs collapsed to one space, lines
/// trimmed, at most one blank line in a row, and the whole thing trimmed.
pub fn normalize_text(raw: &str) -> String {
    let composed: String = raw.replace("\r\n", "\n").replace('\r', "\n").nfc().collect();

    let mut out = String::with_capacity(composed.len());
    let mut blank_run = 0usize;
    for line in composed.split('\n') {
        let line = collapse_line(line);
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }

    out.trim().to_string()
}

fn collapse_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut pending_space = false;
    for c in line.chars() {
        if c == '\u{feff}' || (c.is_control() && c != '\t') {
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out
}

/// Share of Latin and Cyrillic letters in `text`, as a 0–100 percentage.
///
/// Descriptive only: a low score never keeps an entry out of the index.
pub fn quality_score(text: &str) -> u8 {
    let mut total = 0usize;
    let mut letters = 0usize;
    for c in text.chars() {
        total += 1;
        if is_latin_or_cyrillic_letter(c) {
            letters += 1;
        }
    }
    if total == 0 {
        return 0;
    }
    let pct = (letters as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

fn is_latin_or_cyrillic_letter(c: char) -> bool {
    if !c.is_alphabetic() {
        return false;
    }
    c.is_ascii_alphabetic()
        || ('\u{00C0}'..='\u{024F}').contains(&c)
        || ('\u{0400}'..='\u{04FF}').contains(&c)
        || ('\u{0500}'..='\u{052F}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(normalize_text("  hello \t  world  "), "hello world");
        assert_eq!(normalize_text("\n\n a \n\n\n\n b \n"), "a\n\nb");
    }

    #[test]
    fn strips_controls_but_keeps_newlines() {
        assert_eq!(normalize_text("a\u{0007}b\r\nc\u{0000}"), "ab\nc");
        assert_eq!(normalize_text("\u{feff}bom"), "bom");
    }

    #[test]
    fn composes_to_nfc() {
        let decomposed = "e\u{0301}";
        assert_eq!(normalize_text(decomposed), "\u{00e9}");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(" \n\t \n"), "");
    }

    #[test]
    fn quality_bounds() {
        assert_eq!(quality_score(""), 0);
        assert_eq!(quality_score("abc"), 100);
        assert_eq!(quality_score("1234"), 0);
        assert_eq!(quality_score("ab12"), 50);
    }

    #[test]
    fn cyrillic_counts_as_letters() {
        assert_eq!(quality_score("привет"), 100);
        // CJK is alphabetic but outside the scored scripts.
        assert_eq!(quality_score("漢字"), 0);
    }
}
