use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::error::io_error;

#[derive(Debug, Clone, Copy)]
pub enum JsonStyle {
    /// 2-space indent, sorted keys, trailing newline. The normative on-disk form.
    Pretty,
    /// No whitespace, sorted keys, no trailing newline.
    Compact,
}

fn to_json_bytes(payload: &Value, style: JsonStyle) -> Result<Vec<u8>, anyhow::Error> {
    match style {
        JsonStyle::Pretty => {
            let mut buf = Vec::new();
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
            let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
            sorted_value(payload).serialize(&mut ser)?;
            buf.push(b'\n');
            Ok(buf)
        }
        JsonStyle::Compact => {
            let bytes = serde_json::to_vec(&sorted_value(payload))?;
            Ok(bytes)
        }
    }
}

/// Recursively re-sorts object keys so serialization is deterministic
/// regardless of insertion order (serde_json's default `Map` preserves
/// insertion order unless the `preserve_order` feature is off; this makes
/// the sort explicit and independent of that feature flag).
fn sorted_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .iter()
                .map(|(k, v)| (k.clone(), sorted_value(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_value).collect()),
        other => other.clone(),
    }
}

/// Writes JSON atomically: serialize to `path.tmp`, then rename over `path`.
/// Creates parent directories. Best-effort removes the temp file on failure.
pub fn write_json_atomic(
    path: &Path,
    payload: &Value,
    style: JsonStyle,
) -> Result<(), anyhow::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(format!("{}: {e}", parent.display())))?;
    }

    let tmp_path = path.with_extension(append_tmp_suffix(path));
    let write_result = (|| -> Result<(), anyhow::Error> {
        let bytes = to_json_bytes(payload, style)?;
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if write_result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }

    write_result.map_err(|e| io_error(format!("failed to write {}: {e}", path.display())).into())
}

fn append_tmp_suffix(path: &Path) -> String {
    match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    }
}

/// Writes UTF-8 text atomically with LF newlines, same temp+rename discipline as JSON.
pub fn write_text_atomic(path: &Path, contents: &str) -> Result<(), anyhow::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(format!("{}: {e}", parent.display())))?;
    }

    let tmp_path = path.with_extension(append_tmp_suffix(path));
    let write_result = (|| -> Result<(), anyhow::Error> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if write_result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }

    write_result.map_err(|e| io_error(format!("failed to write {}: {e}", path.display())).into())
}

/// Reads and parses a JSON file, failing with `io_error` on I/O or parse problems.
pub fn read_json(path: &Path) -> Result<Value, anyhow::Error> {
    let text = fs::read_to_string(path)
        .map_err(|e| io_error(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| io_error(format!("invalid JSON in {}: {e}", path.display())).into())
}

/// Reads and parses a manifest JSON file, additionally requiring the
/// top-level value to be a JSON object.
pub fn read_manifest_json(path: &Path) -> Result<Value, anyhow::Error> {
    let value = read_json(path)?;
    if !value.is_object() {
        return Err(io_error(format!("manifest must be a JSON object: {}", path.display())).into());
    }
    Ok(value)
}

/// Appends one compact, sorted-key JSON object followed by `\n` to a file,
/// opening in append mode and flushing after every call. Used by journals,
/// where a single fsync per line would be disproportionate to the value of
/// the line (journal replay tolerates losing the last few lines on a crash;
/// payload copies, via [`write_json_atomic`], never should).
pub fn append_jsonl(path: &Path, record: &Value) -> Result<(), anyhow::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(format!("{}: {e}", parent.display())))?;
    }

    let mut line = to_json_bytes(record, JsonStyle::Compact)?;
    line.push(b'\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_error(format!("failed to open {}: {e}", path.display())))?;
    file.write_all(&line)
        .map_err(|e| io_error(format!("failed to append to {}: {e}", path.display())))?;
    file.flush()
        .map_err(|e| io_error(format!("failed to flush {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_json_atomic_roundtrips_and_sorts_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("manifest.json");
        let payload = json!({"b": 1, "a": 2});
        write_json_atomic(&path, &payload, JsonStyle::Pretty).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n  \"a\": 2,\n  \"b\": 1\n}"));
        assert!(text.ends_with('\n'));

        let read_back = read_manifest_json(&path).unwrap();
        assert_eq!(read_back, payload);
    }

    #[test]
    fn write_json_atomic_leaves_no_temp_file_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        write_json_atomic(&path, &json!({}), JsonStyle::Pretty).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("manifest.json")]);
    }

    #[test]
    fn read_manifest_json_rejects_non_object_top_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.json");
        fs::write(&path, b"[1,2,3]").unwrap();
        assert!(read_manifest_json(&path).is_err());
    }

    #[test]
    fn append_jsonl_writes_one_compact_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        append_jsonl(&path, &json!({"event": "start"})).unwrap();
        append_jsonl(&path, &json!({"event": "end"})).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![r#"{"event":"start"}"#, r#"{"event":"end"}"#]);
    }
}
