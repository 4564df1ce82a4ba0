//! Conversion of song files into canonical ChordPro text.
//!
//! The publisher only depends on the [`Normalizer`] trait. It must be
//! deterministic and must never modify the source file.
//! [`ChordProNormalizer`] is the default implementation:
//!
//! 1. Text that looks like ChordPro and passes basic validation is kept.
//! 2. Anything else must use the strict fallback header format: the first
//!    non-empty line is the title, the second the artist, the rest lyrics.

use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;

use crate::errors::NormalizeError;

/// Turns one source document into canonical text.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, source: &Path) -> Result<String, NormalizeError>;
}

impl<F> Normalizer for F
where
    F: Fn(&Path) -> Result<String, NormalizeError> + Send + Sync,
{
    fn normalize(&self, source: &Path) -> Result<String, NormalizeError> {
        self(source)
    }
}

/// Default normalizer for `.cho`, `.chopro`, `.pro` and `.txt` songs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChordProNormalizer;

impl Normalizer for ChordProNormalizer {
    fn normalize(&self, source: &Path) -> Result<String, NormalizeError> {
        let bytes = std::fs::read(source)?;
        normalize_text(&decode(&bytes))
    }
}

fn key_value_directive() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\{\s*([^}:]+)\s*:\s*([^}]*)\}\s*$").expect("valid regex")
    })
}

fn chord_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\]]+\]").expect("valid regex"))
}

/// UTF-8 with a Latin-1 fallback, BOM stripped, line endings as `\n`.
fn decode(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    };
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Normalize already-decoded text.
pub fn normalize_text(text: &str) -> Result<String, NormalizeError> {
    if looks_like_chordpro(text) && validate_chordpro(text).is_ok() {
        return Ok(with_trailing_newline(text));
    }
    fallback_from_plain_text(text)
}

/// Heuristic: any directive line or chord token.
pub fn looks_like_chordpro(text: &str) -> bool {
    text.lines().map(str::trim).any(|line| {
        (line.starts_with('{') && line.ends_with('}')) || (line.contains('[') && line.contains(']'))
    })
}

/// Directive lines must be closed; `{key: value}` directives must parse.
pub fn validate_chordpro(text: &str) -> Result<(), NormalizeError> {
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if !line.starts_with('{') {
            continue;
        }
        let lineno = idx + 1;
        if !line.ends_with('}') {
            return Err(NormalizeError::Invalid(format!(
                "line {lineno} starts a directive '{{' but is missing a closing '}}'"
            )));
        }
        if line[1..line.len() - 1].contains(':') && !key_value_directive().is_match(line) {
            return Err(NormalizeError::Invalid(format!(
                "line {lineno} looks like a key:value directive but could not be parsed: {line:?}"
            )));
        }
    }
    Ok(())
}

fn looks_like_section_header(line: &str) -> bool {
    let s = line
        .trim()
        .trim_matches(|c| c == ':' || c == '-' || c == ' ')
        .to_lowercase();
    matches!(
        s.as_str(),
        "verse" | "verse 1" | "verse 2" | "chorus" | "bridge" | "intro" | "outro" | "pre-chorus"
    ) || s.starts_with("verse ")
}

fn is_directive(line: &str) -> bool {
    line.starts_with('{') && line.ends_with('}')
}

/// Strict fallback: Title line, Artist line, then lyrics verbatim.
fn fallback_from_plain_text(text: &str) -> Result<String, NormalizeError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut nonempty = lines
        .iter()
        .enumerate()
        .map(|(idx, line)| (idx, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (Some((_, title)), Some((artist_idx, artist))) = (nonempty.next(), nonempty.next()) else {
        return Err(NormalizeError::Invalid(
            "not valid ChordPro and does not match the fallback format; expected at least 2 non-empty lines: Title then Artist".into(),
        ));
    };

    if is_directive(title) {
        return Err(NormalizeError::Invalid(
            "first non-empty line looks like a ChordPro directive, but the file did not validate as ChordPro".into(),
        ));
    }
    if looks_like_section_header(title) || chord_token().is_match(title) {
        return Err(NormalizeError::Invalid(format!(
            "fallback format expects the first non-empty line to be the song title, found {title:?}"
        )));
    }
    if is_directive(artist) {
        return Err(NormalizeError::Invalid(format!(
            "fallback format expects the second non-empty line to be the artist, found directive {artist:?}"
        )));
    }
    if looks_like_section_header(artist) || chord_token().is_match(artist) {
        return Err(NormalizeError::Invalid(format!(
            "fallback format expects the second non-empty line to be the artist, found {artist:?}"
        )));
    }

    let lyrics = lines[artist_idx + 1..].join("\n");
    Ok(format!(
        "{{title: {title}}}\n{{artist: {artist}}}\n\n{}\n",
        lyrics.trim_end()
    ))
}

fn with_trailing_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}
