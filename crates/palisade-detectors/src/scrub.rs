//! Content scrubbing for the sanitize mitigation.
//!
//! Strips the character-level attack surface while preserving legitimate
//! text: control characters, zero-width and directional-formatting code
//! points, and ANSI escape sequences. Span-level redaction of flagged
//! phrasing lives on [`crate::SignatureDetector::redact`]; this module
//! handles what a regex over visible text cannot see.

use regex::Regex;
use std::sync::OnceLock;

/// Removes invisible and control characters from `input`.
///
/// Newlines and tabs survive; zero-width characters, directional overrides,
/// BOMs, and C0/C1 control characters do not.
pub fn scrub(input: &str) -> String {
    let mut output = String::with_capacity(input.len());

    for c in input.chars() {
        match c {
            ' '..='~' => output.push(c),
            '\n' | '\r' | '\t' => output.push(c),
            // Zero-width, directional formatting, invisible operators, BOM.
            '\u{200B}'..='\u{200F}' => {}
            '\u{202A}'..='\u{202E}' => {}
            '\u{2060}'..='\u{2064}' => {}
            '\u{FEFF}' => {}
            // C0/C1 control characters.
            '\u{0000}'..='\u{001F}' => {}
            '\u{007F}'..='\u{009F}' => {}
            c if !c.is_control() => output.push(c),
            _ => {}
        }
    }

    output
}

/// Strips ANSI escape sequences.
pub fn strip_ansi(input: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap());
    re.replace_all(input, "").into_owned()
}
