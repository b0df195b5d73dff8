//! JSON harvesting from MHTML archives.
//!
//! An archive is parsed as a MIME message and every leaf part is visited
//! depth-first, whatever its transfer encoding. Parts declared as HTML,
//! plain text, or JSON are decoded to text and scanned with three layered
//! heuristics whose results are concatenated:
//!
//! 1. contents of every `<script>` block, scanned with heuristic 3;
//! 2. `data-*="{...}"` attribute values, parsed as-is;
//! 3. balanced-brace spans (at most one level of nesting) containing a
//!    colon and a quote character.
//!
//! Every candidate goes through a strict JSON parse, and only non-empty
//! top-level objects are kept. The same object may be reported by more
//! than one heuristic; duplicates are not removed here.
//!
//! Known false negatives: an object nested two or more levels deep is only
//! reported through its innermost balanced span, and top-level arrays are
//! never reported.
//!
//! Nothing in this module fails on malformed content. Undecodable parts are
//! skipped, and a file that is not valid MIME is scanned as raw text.

use mailparse::ParsedMail;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::ExtractError;
use crate::models::JsonObject;

/// Content types whose bodies are scanned for JSON.
pub const SCANNED_CONTENT_TYPES: &[&str] = &["text/html", "text/plain", "application/json"];

fn script_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script[^>]*>(.*?)</script>").expect("valid regex"))
}

fn data_attribute_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"data-[^=]*="(\{.*?\})""#).expect("valid regex"))
}

fn balanced_object_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").expect("valid regex")
    })
}

/// Read an archive from disk and harvest its JSON objects.
///
/// Only a failure to read the file is reported as an error.
pub fn extract_archive(path: &Path) -> Result<Vec<JsonObject>, ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let objects = extract_from_bytes(&bytes);
    debug!(path = %path.display(), objects = objects.len(), "archive extracted");
    Ok(objects)
}

/// Harvest JSON objects from the raw bytes of an archive.
pub fn extract_from_bytes(bytes: &[u8]) -> Vec<JsonObject> {
    match mailparse::parse_mail(bytes) {
        Ok(mail) => {
            let mut texts = Vec::new();
            collect_text_parts(&mail, &mut texts);
            texts
                .iter()
                .flat_map(|text| extract_from_content(text))
                .collect()
        }
        Err(e) => {
            debug!(error = %e, "not a MIME message, scanning raw text");
            extract_from_content(&String::from_utf8_lossy(bytes))
        }
    }
}

/// Depth-first collection of decoded text from scannable leaf parts.
fn collect_text_parts(part: &ParsedMail<'_>, out: &mut Vec<String>) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_text_parts(sub, out);
        }
        return;
    }

    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    if !SCANNED_CONTENT_TYPES.contains(&mimetype.as_str()) {
        return;
    }

    match part.get_body_raw() {
        Ok(body) if !body.is_empty() => out.push(String::from_utf8_lossy(&body).into_owned()),
        Ok(_) => {}
        Err(e) => debug!(mimetype = %mimetype, error = %e, "skipping undecodable part"),
    }
}

/// Apply all three heuristics to one decoded text part.
pub fn extract_from_content(content: &str) -> Vec<JsonObject> {
    let mut objects = Vec::new();

    for caps in script_pattern().captures_iter(content) {
        if let Some(script) = caps.get(1) {
            objects.extend(find_json_in_text(script.as_str()));
        }
    }

    for caps in data_attribute_pattern().captures_iter(content) {
        if let Some(value) = caps.get(1) {
            if let Some(obj) = parse_object(value.as_str()) {
                objects.push(obj);
            }
        }
    }

    objects.extend(find_json_in_text(content));
    objects
}

/// Find balanced-brace spans that parse as non-empty JSON objects.
pub fn find_json_in_text(text: &str) -> Vec<JsonObject> {
    balanced_object_pattern()
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|candidate| looks_like_json(candidate))
        .filter_map(parse_object)
        .collect()
}

fn looks_like_json(candidate: &str) -> bool {
    candidate.contains(':') && (candidate.contains('"') || candidate.contains('\''))
}

/// Strict parse; accepts only objects with at least one key.
fn parse_object(candidate: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) if !map.is_empty() => Some(map),
        _ => None,
    }
}
