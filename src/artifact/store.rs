use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;

use crate::error::ArtifactError;
use crate::types::Table;

use super::encode::{encode_table, ArtifactFormat};
use super::{ArtifactRef, ArtifactStore};

/// Stores artifacts as files in one directory.
///
/// Writes go to a temporary file in the same directory and are persisted under the final name
/// only once fully written, so a reader never sees a partial file. In single-use mode a file is
/// deleted right after its first successful [`ArtifactStore::get`].
#[derive(Debug)]
pub struct DirectoryArtifactStore {
    root: PathBuf,
    format: ArtifactFormat,
    single_use: bool,
}

impl DirectoryArtifactStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>, format: ArtifactFormat) -> Result<Self, ArtifactError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            format,
            single_use: true,
        })
    }

    /// Keep files after retrieval (useful when the host has durable storage).
    pub fn keep_after_download(mut self) -> Self {
        self.single_use = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a reference to a path inside the root, rejecting anything that is not a plain
    /// file name.
    fn path_for(&self, reference: &str) -> Result<PathBuf, ArtifactError> {
        let plain = !reference.is_empty()
            && reference != "."
            && reference != ".."
            && !reference.contains(['/', '\\', '\0']);
        if plain {
            Ok(self.root.join(reference))
        } else {
            Err(not_found(reference))
        }
    }
}

impl ArtifactStore for DirectoryArtifactStore {
    fn format(&self) -> ArtifactFormat {
        self.format
    }

    fn put(&self, name: &str, table: &Table) -> Result<ArtifactRef, ArtifactError> {
        let final_path = self.path_for(name)?;
        let bytes = encode_table(table, self.format)?;

        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&final_path).map_err(|e| ArtifactError::Persist {
            name: name.to_string(),
            message: e.error.to_string(),
        })?;

        Ok(ArtifactRef {
            name: name.to_string(),
            bytes: bytes.len() as u64,
        })
    }

    fn get(&self, reference: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_for(reference)?;
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found(reference)),
            Err(e) => return Err(e.into()),
        };
        if self.single_use {
            self.delete(reference)?;
        }
        Ok(bytes)
    }

    fn delete(&self, reference: &str) -> Result<(), ArtifactError> {
        let path = self.path_for(reference)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store with the same single-use contract as [`DirectoryArtifactStore`].
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    format: ArtifactFormat,
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new(format: ArtifactFormat) -> Self {
        Self {
            format,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored (not yet retrieved) artifacts.
    pub fn len(&self) -> usize {
        self.files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files().is_empty()
    }

    /// Names of stored artifacts, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files().keys().cloned().collect();
        names.sort();
        names
    }

    fn files(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn format(&self) -> ArtifactFormat {
        self.format
    }

    fn put(&self, name: &str, table: &Table) -> Result<ArtifactRef, ArtifactError> {
        let bytes = encode_table(table, self.format)?;
        let len = bytes.len() as u64;
        self.files().insert(name.to_string(), bytes);
        Ok(ArtifactRef {
            name: name.to_string(),
            bytes: len,
        })
    }

    fn get(&self, reference: &str) -> Result<Vec<u8>, ArtifactError> {
        self.files()
            .remove(reference)
            .ok_or_else(|| not_found(reference))
    }

    fn delete(&self, reference: &str) -> Result<(), ArtifactError> {
        self.files().remove(reference);
        Ok(())
    }
}

fn not_found(reference: &str) -> ArtifactError {
    ArtifactError::NotFound {
        reference: reference.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use tempfile::TempDir;

    fn table() -> Table {
        Table::new(&["profesional"], vec![vec![Value::Utf8("Ana".to_string())]])
    }

    #[test]
    fn directory_store_is_single_use() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryArtifactStore::new(dir.path().join("downloads"), ArtifactFormat::Csv).unwrap();

        let r = store.put("servicios_ana.csv", &table()).unwrap();
        assert_eq!(r.name, "servicios_ana.csv");
        assert!(dir.path().join("downloads/servicios_ana.csv").exists());

        let bytes = store.get(&r.name).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "profesional\nAna\n");
        assert!(matches!(store.get(&r.name), Err(ArtifactError::NotFound { .. })));
    }

    #[test]
    fn directory_store_can_keep_files() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryArtifactStore::new(dir.path(), ArtifactFormat::Csv)
            .unwrap()
            .keep_after_download();
        store.put("a.csv", &table()).unwrap();
        assert!(store.get("a.csv").is_ok());
        assert!(store.get("a.csv").is_ok());
        store.delete("a.csv").unwrap();
        store.delete("a.csv").unwrap();
        assert!(store.get("a.csv").is_err());
    }

    #[test]
    fn directory_store_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryArtifactStore::new(dir.path().join("inner"), ArtifactFormat::Csv).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "x").unwrap();
        assert!(matches!(
            store.get("../secret.txt"),
            Err(ArtifactError::NotFound { .. })
        ));
        assert!(store.put("../escape.csv", &table()).is_err());
    }

    #[test]
    fn directory_store_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryArtifactStore::new(dir.path(), ArtifactFormat::Csv).unwrap();
        store.put("a.csv", &table()).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn memory_store_is_single_use() {
        let store = MemoryArtifactStore::new(ArtifactFormat::Csv);
        store.put("a.csv", &table()).unwrap();
        assert_eq!(store.names(), vec!["a.csv"]);
        assert!(store.get("a.csv").is_ok());
        assert!(store.get("a.csv").is_err());
        assert!(store.is_empty());
    }
}
