//! Core data models used throughout mhtml-search.
//!
//! These types represent the archives, extracted JSON fragments, and query
//! rows that flow through discovery, extraction, indexing, and search.

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// A top-level JSON object as harvested from an archive.
pub type JsonObject = Map<String, Value>;

/// One row of a query result: column name to value, in declared column order.
pub type ResultRow = Map<String, Value>;

/// An archive file found on disk. Identity is the absolute path.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveFile {
    pub path: PathBuf,
    pub size: u64,
    /// Last modification time as fractional seconds since the Unix epoch.
    pub modified: f64,
    /// Distance from the search root the file was found under (1 = directly inside).
    pub depth: usize,
}

impl ArchiveFile {
    /// Stat `path` and build its metadata record.
    pub fn from_path(path: &Path, depth: usize) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified,
            depth,
        })
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// A JSON object extracted from one archive, with its serialized text and hash.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonFragment {
    pub object: JsonObject,
    pub text: String,
    pub hash: String,
}

impl JsonFragment {
    pub fn new(object: JsonObject) -> Self {
        let text = serialize_object(&object);
        let hash = content_hash(&text);
        Self { object, text, hash }
    }
}

/// An archive with the fragments found in it. Lives for one quick scan only.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub archive: ArchiveFile,
    pub fragments: Vec<JsonFragment>,
}

/// A flattened (archive, fragment) pair, the input shape of the analytical engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FragmentRow {
    pub file_path: String,
    pub file_size: i64,
    pub modified_time: f64,
    pub json_data: String,
}

impl SearchResult {
    pub fn rows(&self) -> impl Iterator<Item = FragmentRow> + '_ {
        let file_path = self.archive.path_str();
        self.fragments.iter().map(move |fragment| FragmentRow {
            file_path: file_path.clone(),
            file_size: self.archive.size as i64,
            modified_time: self.archive.modified,
            json_data: fragment.text.clone(),
        })
    }
}

/// Flatten search results into one row per fragment.
pub fn flatten_results(results: &[SearchResult]) -> Vec<FragmentRow> {
    results.iter().flat_map(|r| r.rows()).collect()
}

/// Serialize an object keeping key order, with `", "` and `": "` separators
/// and no ASCII escaping of non-ASCII characters.
pub fn serialize_object(object: &JsonObject) -> String {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    if object.serialize(&mut ser).is_err() {
        return serde_json::to_string(object).unwrap_or_default();
    }
    String::from_utf8(buf).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// SHA-256 hex digest of the serialized fragment text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Drop fragments whose hash was already seen, keeping first occurrences.
///
/// Best effort: equal hashes are treated as equal fragments without comparing text.
pub fn dedup_fragments(fragments: Vec<JsonFragment>) -> Vec<JsonFragment> {
    let mut seen = HashSet::new();
    fragments
        .into_iter()
        .filter(|f| seen.insert(f.hash.clone()))
        .collect()
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(text: &str) -> JsonObject {
        match serde_json::from_str::<Value>(text).unwrap() {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn serialization_keeps_order_and_spacing() {
        let obj = object(r#"{"name":"John","age":30,"tags":["a","b"],"nested":{"k":null}}"#);
        assert_eq!(
            serialize_object(&obj),
            r#"{"name": "John", "age": 30, "tags": ["a", "b"], "nested": {"k": null}}"#
        );
    }

    #[test]
    fn serialization_keeps_unicode() {
        let obj = object(r#"{"city":"Kraków"}"#);
        assert_eq!(serialize_object(&obj), r#"{"city": "Kraków"}"#);
    }

    #[test]
    fn hash_is_stable_and_content_based() {
        let a = JsonFragment::new(object(r#"{"a": 1}"#));
        let b = JsonFragment::new(object(r#"{"a":1}"#));
        let c = JsonFragment::new(object(r#"{"a": 2}"#));
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let fragments = vec![
            JsonFragment::new(object(r#"{"a": 1}"#)),
            JsonFragment::new(object(r#"{"b": 2}"#)),
            JsonFragment::new(object(r#"{"a": 1}"#)),
        ];
        let deduped = dedup_fragments(fragments);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].text, r#"{"a": 1}"#);
        assert_eq!(deduped[1].text, r#"{"b": 2}"#);
    }

    #[test]
    fn flatten_produces_one_row_per_fragment() {
        let result = SearchResult {
            archive: ArchiveFile {
                path: PathBuf::from("/data/a.mhtml"),
                size: 10,
                modified: 1.5,
                depth: 1,
            },
            fragments: vec![
                JsonFragment::new(object(r#"{"a": 1}"#)),
                JsonFragment::new(object(r#"{"b": 2}"#)),
            ],
        };
        let rows = flatten_results(&[result]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].file_path, "/data/a.mhtml");
        assert_eq!(rows[1].json_data, r#"{"b": 2}"#);
        assert_eq!(rows[1].file_size, 10);
    }
}
