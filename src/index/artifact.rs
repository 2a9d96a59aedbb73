//! Typed loading of JSON index artifacts.
//!
//! Artifacts come in two shapes: a flat object (`{"vocab": [...], ...}`) or a
//! wrapped one (`{"fields": {...}, "arrays": {...}}`). Scalars resolve from
//! `fields.X` before top-level `X`; arrays resolve from top-level `X` before
//! `arrays.X`.

use crate::error::{AssembleError, Result};
use memmap2::Mmap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Files below this size are read directly instead of mapped
const MMAP_THRESHOLD: u64 = 64 * 1024;

/// A loaded JSON object artifact with shape-tolerant accessors
#[derive(Debug, Clone, Default)]
pub struct ArtifactObject {
    path: PathBuf,
    value: Map<String, Value>,
}

impl ArtifactObject {
    pub fn new(path: impl Into<PathBuf>, value: Map<String, Value>) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    pub fn from_value(path: impl Into<PathBuf>, value: Value) -> Result<Self> {
        let path = path.into();
        match value {
            Value::Object(map) => Ok(Self { path, value: map }),
            other => Err(AssembleError::malformed(
                path,
                format!("expected object, found {}", json_kind(&other)),
            )),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw scalar or object field: `fields.key`, then top-level `key`
    pub fn field_value(&self, key: &str) -> Option<&Value> {
        self.value
            .get("fields")
            .and_then(Value::as_object)
            .and_then(|fields| fields.get(key))
            .or_else(|| self.value.get(key))
    }

    /// Raw array: top-level `key`, then `arrays.key`
    pub fn array_value(&self, key: &str) -> Option<&Vec<Value>> {
        self.value.get(key).and_then(Value::as_array).or_else(|| {
            self.value
                .get("arrays")
                .and_then(Value::as_object)
                .and_then(|arrays| arrays.get(key))
                .and_then(Value::as_array)
        })
    }

    /// Typed field; `None` when absent or null, error when mistyped
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.field_value(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| AssembleError::malformed(&self.path, format!("field '{key}': {e}"))),
        }
    }

    /// Typed array; empty when absent
    pub fn array<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        match self.array_value(key) {
            None => Ok(Vec::new()),
            Some(items) => items
                .iter()
                .map(|item| {
                    T::deserialize(item).map_err(|e| {
                        AssembleError::malformed(&self.path, format!("array '{key}': {e}"))
                    })
                })
                .collect(),
        }
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.value
    }
}

/// Read and parse a JSON file, mapping large files into memory
pub fn read_json_file(path: &Path) -> Result<Value> {
    let file = File::open(path).map_err(|e| AssembleError::io(path, e))?;
    let len = file
        .metadata()
        .map_err(|e| AssembleError::io(path, e))?
        .len();

    let parsed = if len >= MMAP_THRESHOLD {
        // SAFETY: pieces are immutable while an assembly holds the index lock
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| AssembleError::io(path, e))?;
        serde_json::from_slice(&mmap)
    } else {
        let bytes = std::fs::read(path).map_err(|e| AssembleError::io(path, e))?;
        serde_json::from_slice(&bytes)
    };

    parsed.map_err(|e| AssembleError::malformed(path, e))
}

/// Read a JSONL file: one value per non-blank line
pub fn read_json_lines(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path).map_err(|e| AssembleError::io(path, e))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .map_err(|e| AssembleError::malformed(path, format!("line {}: {}", idx + 1, e)))
        })
        .collect()
}

/// Load a required object artifact `<dir>/<file_name>`
pub fn load_object(dir: &Path, file_name: &str) -> Result<ArtifactObject> {
    let path = dir.join(file_name);
    if !path.is_file() {
        return Err(AssembleError::MissingArtifact {
            dir: dir.to_path_buf(),
            name: file_name.to_string(),
        });
    }
    let value = read_json_file(&path)?;
    ArtifactObject::from_value(path, value)
}

/// Load an optional object artifact.
///
/// Missing files are absent. Malformed files are absent with a warning,
/// unless `strict` is set, in which case they are errors.
pub fn load_optional_object(dir: &Path, file_name: &str, strict: bool) -> Result<Option<ArtifactObject>> {
    let path = dir.join(file_name);
    if !path.is_file() {
        return Ok(None);
    }
    match read_json_file(&path).and_then(|value| ArtifactObject::from_value(&path, value)) {
        Ok(obj) => Ok(Some(obj)),
        Err(err) if !strict => {
            tracing::warn!("Ignoring unreadable optional artifact {}: {}", path.display(), err);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Locate a JSON array artifact by base name (`<name>.json` or `<name>.jsonl`)
pub fn find_array_artifact(dir: &Path, name: &str) -> Option<PathBuf> {
    [format!("{name}.json"), format!("{name}.jsonl")]
        .into_iter()
        .map(|file| dir.join(file))
        .find(|path| path.is_file())
}

/// Load a JSON array artifact as typed rows.
///
/// `<name>.json` may hold a bare array or an object with a `rows` array;
/// `<name>.jsonl` holds one row per line. Returns `None` when neither exists.
pub fn load_array<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Option<Vec<T>>> {
    let Some(path) = find_array_artifact(dir, name) else {
        return Ok(None);
    };

    let rows = if path.extension().is_some_and(|ext| ext == "jsonl") {
        read_json_lines(&path)?
    } else {
        match read_json_file(&path)? {
            Value::Array(rows) => rows,
            Value::Object(map) => {
                let obj = ArtifactObject::new(&path, map);
                obj.array_value("rows")
                    .cloned()
                    .ok_or_else(|| AssembleError::malformed(&path, "object artifact has no 'rows' array"))?
            }
            other => {
                return Err(AssembleError::malformed(
                    &path,
                    format!("expected array, found {}", json_kind(&other)),
                ));
            }
        }
    };

    rows.into_iter()
        .enumerate()
        .map(|(idx, row)| {
            serde_json::from_value(row)
                .map_err(|e| AssembleError::malformed(&path, format!("row {idx}: {e}")))
        })
        .collect::<Result<Vec<T>>>()
        .map(Some)
}

/// Optional array artifact: unreadable files degrade to absent unless strict
pub fn load_optional_array<T: DeserializeOwned>(dir: &Path, name: &str, strict: bool) -> Result<Option<Vec<T>>> {
    match load_array(dir, name) {
        Ok(rows) => Ok(rows),
        Err(err) if !strict => {
            tracing::warn!("Ignoring unreadable optional artifact {} in {}: {}", name, dir.display(), err);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Lenient numeric list: non-numeric entries read as 0, floats truncate
pub fn lenient_u32_list(values: &[Value]) -> Vec<u32> {
    values
        .iter()
        .map(|v| v.as_f64().filter(|n| n.is_finite() && *n >= 0.0).map_or(0, |n| n.trunc() as u32))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
