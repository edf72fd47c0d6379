//! User-configurable pronunciation lexicons.
//!
//! A lexicon is a pronunciation-lexicon (`.pls`) XML document mapping literal
//! text patterns (graphemes) to either a phonetic pronunciation (phoneme) or
//! a plain replacement (alias). All documents in a directory are loaded once
//! at startup; which of them actually apply is decided per call from the
//! enabled-lexicon list in the configuration.
//!
//! Rewriting is tag-safe: a phoneme annotation emitted for one lexeme is
//! never re-wrapped by a later, shorter-matching lexeme. See [`ssml`] for the
//! boundary-scanning algorithm.

pub mod ssml;

use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum LexiconError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse lexicon document: {0}")]
    Parse(#[from] quick_xml::DeError),
}

/// A single pronunciation rule: the literal `grapheme` to match, and the
/// `phoneme` and/or `alias` to apply to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    pub grapheme: String,
    pub phoneme: String,
    pub alias: String,
}

/// A named, ordered set of pronunciation rules, longest grapheme first.
#[derive(Debug, Clone)]
pub struct Lexicon {
    pub name: String,
    pub lexemes: Vec<Lexeme>,
}

#[derive(Debug, Deserialize)]
struct PlsDocument {
    #[serde(rename = "lexeme", default)]
    lexemes: Vec<PlsLexeme>,
}

#[derive(Debug, Deserialize)]
struct PlsLexeme {
    #[serde(rename = "grapheme", default)]
    graphemes: Vec<String>,
    #[serde(rename = "phoneme", default)]
    phonemes: Vec<String>,
    #[serde(rename = "alias", default)]
    aliases: Vec<String>,
}

/// Normalize a phoneme string before storage.
///
/// Some synthesis-markup readers choke on ASCII colons, embedded spaces or
/// hyphens, and the single-glyph affricate; rewrite them to the forms every
/// reader accepts.
fn normalize_phoneme(raw: &str) -> String {
    raw.replace(':', "ː")
        .replace(' ', "")
        .replace('-', "")
        .replace('ʤ', "d͡ʒ")
}

impl Lexicon {
    /// Parse a `.pls` document into a lexicon named `name`.
    ///
    /// Every `<grapheme>` of a `<lexeme>` pairs with that lexeme's first
    /// `<phoneme>` and first `<alias>`. The resulting rule list is sorted by
    /// descending grapheme length so longer patterns always win.
    pub fn parse(xml: &str, name: &str) -> Result<Self, LexiconError> {
        let doc: PlsDocument = quick_xml::de::from_str(xml)?;

        let mut lexemes = Vec::new();
        for entry in doc.lexemes {
            let phoneme = normalize_phoneme(entry.phonemes.first().map_or("", |s| s.as_str()));
            let alias = entry.aliases.first().cloned().unwrap_or_default();
            for grapheme in entry.graphemes {
                lexemes.push(Lexeme {
                    grapheme,
                    phoneme: phoneme.clone(),
                    alias: alias.clone(),
                });
            }
        }
        lexemes.sort_by(|a, b| b.grapheme.len().cmp(&a.grapheme.len()));

        Ok(Self {
            name: name.to_string(),
            lexemes,
        })
    }
}

/// All lexicons loaded at startup.
pub struct LexiconStore {
    lexicons: Vec<Lexicon>,
}

impl LexiconStore {
    /// Build a store from already-parsed lexicons. Used by tests and hosts
    /// that manage their own document loading.
    pub fn new(lexicons: Vec<Lexicon>) -> Self {
        Self { lexicons }
    }

    /// Load every `.pls` file in `dir`.
    ///
    /// A document that fails to parse is logged and skipped; a missing or
    /// unreadable directory is an error. The lexicon name is the file stem.
    pub fn load_dir(dir: &Path) -> Result<Self, LexiconError> {
        log::info!("Loading lexicons from {}", dir.display());
        let mut lexicons = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pls") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path)?;
            match Lexicon::parse(&content, name) {
                Ok(lexicon) => {
                    log::info!("Loaded lexicon: {name}");
                    lexicons.push(lexicon);
                }
                Err(err) => {
                    log::error!("Failed to parse lexicon file {}: {err}", path.display());
                }
            }
        }
        Ok(Self::new(lexicons))
    }

    /// Names of all loaded lexicons, in load order.
    pub fn names(&self) -> Vec<&str> {
        self.lexicons.iter().map(|l| l.name.as_str()).collect()
    }

    /// Rewrite `input` into speech markup, applying the named lexicons in
    /// the order given.
    ///
    /// Per lexeme: a non-empty alias performs a flat substring replacement
    /// and suppresses the phoneme rule for that lexeme; a non-empty phoneme
    /// wraps each eligible grapheme occurrence in a phonetic annotation,
    /// with quote characters stripped from the visible text. Lexicons not
    /// present in `enabled` are inert. The result is wrapped in the speech
    /// envelope.
    pub fn to_markup(&self, input: &str, enabled: &[String]) -> String {
        let mut text = format!(" {input} ");
        for name in enabled {
            let Some(lexicon) = self.lexicons.iter().find(|l| &l.name == name) else {
                continue;
            };
            for lexeme in &lexicon.lexemes {
                if !lexeme.alias.is_empty() {
                    text = text.replace(&lexeme.grapheme, &lexeme.alias);
                    continue;
                }
                if lexeme.phoneme.is_empty() {
                    continue;
                }
                let readable = lexeme.grapheme.replace(['\'', '"'], "");
                let annotation = ssml::phoneme_tag(&lexeme.phoneme, &readable);
                text = ssml::replace_outside_tags(&text, &lexeme.grapheme, &annotation);
            }
        }
        ssml::speak_envelope(&text)
    }
}
