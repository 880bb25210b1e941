//! Formatting-code and match-span helpers
//!
//! Host chat text carries inline formatting escapes: a section sign (`§`)
//! followed by a single hex digit or style letter. Rule files use the `&`
//! shorthand instead, which is rewritten once when an action is built.
//! Every transform in the pipeline goes through the helpers here so that the
//! working text never ends up with a dangling escape or a span cut through
//! the middle of a multi-byte character.

use std::ops::Range;

use lazy_static::lazy_static;
use regex::Regex;

/// The host's native formatting escape introducer.
pub const SECTION: char = '\u{00A7}';

lazy_static! {
    static ref AMP_CODE: Regex = Regex::new("&([0-9a-fk-or])").unwrap();
}

/// Rewrite `&`-shorthand formatting codes into the host's native `§` escapes.
///
/// Called once when an action is constructed, never per execution.
pub fn normalize_codes(s: &str) -> String {
    AMP_CODE.replace_all(s, "\u{00A7}$1").into_owned()
}

/// True if the text contains no truncated formatting escape: every `§` is
/// followed by a code character.
pub fn text_is_clean(text: &str) -> bool {
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == SECTION && chars.next().is_none() {
            return false;
        }
    }
    true
}

/// Check that a span can be transformed in place: it lies within bounds, both
/// ends sit on char boundaries, and transforming it would not orphan a `§`
/// immediately before the span.
pub fn span_is_usable(text: &str, span: &Range<usize>) -> bool {
    if span.start > span.end || span.end > text.len() {
        return false;
    }
    if !text.is_char_boundary(span.start) || !text.is_char_boundary(span.end) {
        return false;
    }
    // A `§` just before the span would lose its code char if the span is
    // replaced with arbitrary text.
    text[..span.start].chars().next_back() != Some(SECTION)
}

/// Splice `replacement` over `span`, returning the new text and the span now
/// covering the replacement.
pub fn replace_span(text: &str, span: &Range<usize>, replacement: &str) -> (String, Range<usize>) {
    let mut out = String::with_capacity(text.len() - span.len() + replacement.len());
    out.push_str(&text[..span.start]);
    out.push_str(replacement);
    out.push_str(&text[span.end..]);
    let new_span = span.start..span.start + replacement.len();
    (out, new_span)
}

/// Fold the span to lowercase, returning the new text and the (possibly
/// resized) span. Lowercasing can change byte length for some scripts.
pub fn lowercase_span(text: &str, span: &Range<usize>) -> (String, Range<usize>) {
    let folded: String = text[span.clone()].chars().flat_map(char::to_lowercase).collect();
    replace_span(text, span, &folded)
}
