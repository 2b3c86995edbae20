//! Source-language detection by script presence.
//! Any Han character classifies the text as Chinese, otherwise any Thai
//! character classifies it as Thai. Mixed text with a single Han character
//! is still Chinese: this is a presence test, not a majority vote.

use super::Language;

/// Classify `text`. Returns `None` for blank text or text in neither script.
pub fn detect(text: &str) -> Option<Language> {
    if text.trim().is_empty() {
        return None;
    }
    if text.chars().any(is_han) {
        return Some(Language::Zh);
    }
    if text.chars().any(is_thai) {
        return Some(Language::Th);
    }
    None
}

/// Detect, defaulting to the authoring language when the script is unknown.
pub fn detect_or_source(text: &str) -> Language {
    detect(text).unwrap_or(Language::SOURCE)
}

#[inline]
fn is_han(c: char) -> bool {
    matches!(c,
        '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}')
}

#[inline]
fn is_thai(c: char) -> bool {
    matches!(c, '\u{0E00}'..='\u{0E7F}')
}
