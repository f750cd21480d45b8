use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

static CJK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]").expect("cjk")
});
static MEANINGFUL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{N}\p{P}\p{S}\s]").expect("meaningful"));

pub fn contains_cjk(text: &str) -> bool {
    CJK_RE.is_match(text)
}

/// False for blank text and for text made only of numbers, punctuation and symbols.
pub fn is_valid_text_content(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && MEANINGFUL_RE.is_match(trimmed)
}

/// Truncates to at most `max` Unicode scalar values.
pub fn truncate_runes(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn truncate_for_log(text: &str, limit: usize) -> Cow<'_, str> {
    let cut = truncate_runes(text, limit);
    if cut.len() == text.len() {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{cut}...(truncated)"))
    }
}

/// Decodes XML entities. Text with a malformed or unknown entity is returned as-is.
pub fn xml_unescape(raw: &str) -> Cow<'_, str> {
    match quick_xml::escape::unescape(raw) {
        Ok(text) => text,
        Err(err) => {
            log::trace!("keep raw text, unescape failed: {err}");
            Cow::Borrowed(raw)
        }
    }
}

pub fn xml_escape(text: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(text)
}
