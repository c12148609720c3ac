//! Single-file JSON backend.
//!
//! All values live in one JSON object. Every mutation writes a sibling
//! temporary file and renames it over the original, so a crash leaves
//! either the old or the new document, never a torn one.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::Backend;
use crate::error::{Result, StoreError};

pub struct FileBackend {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .finish()
    }
}

impl FileBackend {
    /// Open the document at `path`, creating parent directories as needed.
    /// A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corrupt` if the file is not a JSON object of
    /// strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(StoreError::WriteFailed)?;
            }
        }

        let values = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(StoreError::ReadFailed)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents).map_err(|e| {
                    StoreError::Corrupt(format!("{}: {}", path.display(), e))
                })?
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), count = values.len(), "opened file backend");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    /// Apply `change` to a copy, persist it, then publish it in memory.
    fn commit<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> Result<()>,
    {
        let mut values = self.lock()?;
        let mut next = values.clone();
        change(&mut next)?;
        self.persist(&next)?;
        *values = next;
        Ok(())
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(values)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let tmp = self.temp_path();
        // A leftover from a crashed write may carry looser permissions.
        match fs::remove_file(&tmp) {
            Ok(()) => debug!(path = %tmp.display(), "removed stale temporary file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::WriteFailed(e).into()),
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp).map_err(StoreError::WriteFailed)?;
        file.write_all(json.as_bytes())
            .map_err(StoreError::WriteFailed)?;
        file.sync_all().map_err(StoreError::WriteFailed)?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(StoreError::WriteFailed)?;
        Ok(())
    }

    /// Sibling of the document, distinct from it whatever its extension.
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".vaultenv-tmp");
        self.path.with_file_name(name)
    }
}

impl Backend for FileBackend {
    fn set(&self, key: &str, value: &str, _encrypt: bool) -> Result<()> {
        self.commit(|values| {
            values.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Result<String> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::SecretNotFound(key.to_string()).into())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.commit(|values| {
            values
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| StoreError::SecretNotFound(key.to_string()).into())
        })
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn set_batch(&self, entries: &[(String, String)]) -> Result<()> {
        self.commit(|values| {
            for (key, value) in entries {
                values.insert(key.clone(), value.clone());
            }
            Ok(())
        })
    }

    fn supports_atomic_batch(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("secrets.json");

        let backend = FileBackend::open(&path).unwrap();
        backend.set("A", "1", false).unwrap();
        backend
            .set_batch(&[("B".into(), "2".into()), ("C".into(), "3".into())])
            .unwrap();
        backend.delete("C").unwrap();
        drop(backend);

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.list().unwrap(), vec!["A", "B"]);
        assert_eq!(reopened.get("B").unwrap(), "2");
    }

    #[test]
    #[cfg(unix)]
    fn test_document_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.json");
        let backend = FileBackend::open(&path).unwrap();
        backend.set("A", "1", false).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(!backend.temp_path().exists());
    }

    #[test]
    fn test_tmp_named_document_survives_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.tmp");

        let backend = FileBackend::open(&path).unwrap();
        backend.set("A", "1", false).unwrap();
        backend.set("B", "2", false).unwrap();
        assert_ne!(backend.temp_path(), path);
        assert!(!backend.temp_path().exists());

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.list().unwrap(), vec!["A", "B"]);
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_stale_temp_file_is_replaced_privately() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.json");
        let backend = FileBackend::open(&path).unwrap();
        fs::write(backend.temp_path(), "leftover").unwrap();
        fs::set_permissions(backend.temp_path(), fs::Permissions::from_mode(0o644)).unwrap();

        backend.set("A", "1", false).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(FileBackend::open(&path).unwrap().get("A").unwrap(), "1");
    }

    #[test]
    fn test_failed_delete_leaves_document_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.json");
        let backend = FileBackend::open(&path).unwrap();
        backend.set("A", "1", false).unwrap();

        assert!(backend.delete("missing").unwrap_err().is_not_found());
        assert_eq!(backend.list().unwrap(), vec!["A"]);
    }

    #[test]
    fn test_corrupt_document_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileBackend::open(&path),
            Err(crate::error::Error::Store(StoreError::Corrupt(_)))
        ));
    }
}
