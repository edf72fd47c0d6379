//! Text normalization for speakable output.
//!
//! Game text arrives full of icon glyphs, auto-translate brackets and other
//! structural markers that synthesizers read out loud as garbage. Before any
//! further processing, input is stripped down to the characters a voice can
//! actually say.

use once_cell::sync::Lazy;
use regex::Regex;

/// Runs of letters, combining marks, digits and whitespace. Everything else
/// is dropped.
static SPEAKABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\p{L}+|\p{M}+|\p{N}+|\s+").expect("valid regex"));

/// Strip `input` down to speakable characters.
///
/// Keeps letters, combining marks, digits and whitespace in their original
/// relative order, with no insertions. The result may be empty or
/// whitespace-only; callers treat that as "nothing to say" rather than an
/// error.
pub fn clean_text(input: &str) -> String {
    SPEAKABLE_RE
        .find_iter(input)
        .map(|m| m.as_str())
        .collect()
}

/// True when `text` contains nothing a synthesizer could speak.
pub fn is_unspeakable(text: &str) -> bool {
    text.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::{clean_text, is_unspeakable};

    #[test]
    fn strips_punctuation_and_symbols() {
        assert_eq!(clean_text("Welcome to Eorzea!"), "Welcome to Eorzea");
        assert_eq!(clean_text("Hello, world."), "Hello world");
    }

    #[test]
    fn keeps_digits_and_whitespace() {
        assert_eq!(clean_text("level 50 quest"), "level 50 quest");
    }

    #[test]
    fn keeps_accented_and_marked_characters() {
        assert_eq!(clean_text("Y'shtola région"), "Yshtola région");
    }

    #[test]
    fn preserves_relative_order_without_insertions() {
        let input = "a<icon>b *c* d!";
        let cleaned = clean_text(input);
        // Every kept character must appear in the input, in order.
        let mut rest = input;
        for ch in cleaned.chars() {
            let pos = rest.find(ch).expect("character came from the input");
            rest = &rest[pos + ch.len_utf8()..];
        }
    }

    #[test]
    fn icon_only_input_becomes_unspeakable() {
        let cleaned = clean_text("\u{e0bb}!!");
        assert!(is_unspeakable(&cleaned));
        assert!(is_unspeakable("   "));
        assert!(!is_unspeakable(" a "));
    }
}
