use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use jds_types::Document;

use crate::error::{BackendError, BackendResult};
use crate::traits::BackingStore;

/// A document persisted as one JSON file.
///
/// Writes go to a temporary file in the same directory which is synced and
/// then renamed over the target, so other processes (and the change watcher)
/// only ever see complete documents.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    pretty: bool,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pretty: true,
        }
    }

    /// Indent written files (default) or write them compact.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }

    fn encode(&self, doc: &Document) -> BackendResult<Vec<u8>> {
        let mut bytes = if self.pretty {
            serde_json::to_vec_pretty(doc)
        } else {
            serde_json::to_vec(doc)
        }
        .map_err(|e| BackendError::Serialize(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

impl BackingStore for JsonFileStore {
    fn read(&self) -> BackendResult<Option<Document>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::io(&self.path, e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| BackendError::Parse {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn write(&self, doc: &Document) -> BackendResult<()> {
        let bytes = self.encode(doc)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| BackendError::io(&dir, e))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| BackendError::io(&dir, e))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| BackendError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| BackendError::io(&self.path, e.error))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "document written");
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn empty_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        fs::write(&path, "  \n").unwrap();
        assert_eq!(JsonFileStore::new(&path).read().unwrap(), None);
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("doc.json"));
        let doc = json!({"a": 1, "b": [true, null]});
        store.write(&doc).unwrap();
        assert_eq!(store.read().unwrap(), Some(doc));
    }

    #[test]
    fn write_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/deeper/doc.json"));
        store.write(&json!({"x": 1})).unwrap();
        assert!(dir.path().join("nested/deeper/doc.json").exists());
    }

    #[test]
    fn write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("doc.json"));
        store.write(&json!({"v": 1})).unwrap();
        store.write(&json!({"v": 2})).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("doc.json")]);
    }

    #[test]
    fn compact_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        JsonFileStore::new(&path)
            .pretty(false)
            .write(&json!({"a": {"b": 1}}))
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":{\"b\":1}}\n");
    }

    #[test]
    fn pretty_output_is_indented() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        JsonFileStore::new(&path).write(&json!({"a": 1})).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\n  \"a\": 1\n}\n");
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::new(&path).read().unwrap_err();
        assert!(matches!(err, BackendError::Parse { .. }));
    }
}
