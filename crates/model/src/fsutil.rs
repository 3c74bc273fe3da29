//! Atomic JSON persistence shared by every on-disk store.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{ModelError, ModelResult};

/// Write a pretty-printed JSON document atomically: serialize to
/// `<path>.tmp`, then rename over the destination. Parent directories are
/// created as needed.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> ModelResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ModelError::FileWrite {
            path: parent.display().to_string(),
            reason: e.to_string(),
        })?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content).map_err(|e| ModelError::FileWrite {
        path: tmp.display().to_string(),
        reason: e.to_string(),
    })?;
    std::fs::rename(&tmp, path).map_err(|e| ModelError::FileWrite {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Read and parse a JSON document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> ModelResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| ModelError::FileRead {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Read a JSON document, falling back to `T::default()` when the file does
/// not exist yet. A present-but-corrupt file is an error.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> ModelResult<T> {
    if path.exists() {
        read_json(path)
    } else {
        Ok(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_atomic_write_creates_parents_and_no_tmp_left() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeply/state.json");

        let mut doc = BTreeMap::new();
        doc.insert("key".to_string(), 42u32);
        write_json_atomic(&path, &doc).unwrap();

        let loaded: BTreeMap<String, u32> = read_json(&path).unwrap();
        assert_eq!(loaded.get("key"), Some(&42));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_read_or_default_on_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: BTreeMap<String, u32> = read_json_or_default(&path).unwrap();
        assert!(loaded.is_empty());
    }
}
