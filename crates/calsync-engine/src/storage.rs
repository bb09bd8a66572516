//! Per-user JSON documents.
//!
//! Each store keeps one document per user, cached in memory and, for the
//! directory backend, mirrored to `<root>/<user key>/<name>.json`. Updates
//! are applied to a copy, written to a temp file and renamed into place;
//! the cache only changes once the write succeeded, so a failed update
//! leaves both the file and the in-memory view untouched.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use calsync_core::Session;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};

/// Where the stores keep their documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// Nothing touches the disk.
    Memory,
    /// One subdirectory per user under this root.
    Directory(PathBuf),
}

pub(crate) struct Document<T> {
    location: StorageLocation,
    name: &'static str,
    cache: Mutex<HashMap<String, T>>,
}

impl<T> Document<T>
where
    T: Default + Clone + Serialize + DeserializeOwned,
{
    pub(crate) fn new(location: StorageLocation, name: &'static str) -> Self {
        Self {
            location,
            name,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, T>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn path(&self, session: &Session) -> Option<PathBuf> {
        match &self.location {
            StorageLocation::Memory => None,
            StorageLocation::Directory(root) => Some(
                root.join(session.storage_key())
                    .join(format!("{}.json", self.name)),
            ),
        }
    }

    fn load(&self, session: &Session) -> StoreResult<T> {
        let Some(path) = self.path(session) else {
            return Ok(T::default());
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        trace!(path = %path.display(), "loaded document");
        serde_json::from_str(&content).map_err(|e| StoreError::corrupt(&path, e))
    }

    fn persist(&self, session: &Session, value: &T) -> StoreResult<()> {
        let Some(path) = self.path(session) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let content = serde_json::to_vec_pretty(value)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content).map_err(|e| StoreError::io(&temp_path, e))?;
        restrict_permissions(&temp_path);
        fs::rename(&temp_path, &path).map_err(|e| StoreError::io(&path, e))?;

        debug!(document = self.name, path = %path.display(), "saved document");
        Ok(())
    }

    /// Runs `f` against the user's document.
    pub(crate) fn read<R>(&self, session: &Session, f: impl FnOnce(&T) -> R) -> StoreResult<R> {
        let mut cache = self.lock();
        let value = match cache.entry(session.storage_key()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.load(session)?),
        };
        Ok(f(value))
    }

    /// Mutates a copy of the user's document and commits it if `f` succeeds
    /// and the write goes through.
    pub(crate) fn update<R>(
        &self,
        session: &Session,
        f: impl FnOnce(&mut T) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut cache = self.lock();
        let current = match cache.entry(session.storage_key()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.load(session)?),
        };

        let mut next = current.clone();
        let result = f(&mut next)?;
        self.persist(session, &next)?;
        *current = next;
        Ok(result)
    }

    /// Drops the user's document. Removing a missing document is not an error.
    pub(crate) fn remove(&self, session: &Session) -> StoreResult<()> {
        let mut cache = self.lock();
        if let Some(path) = self.path(session) {
            match fs::remove_file(&path) {
                Ok(()) => debug!(document = self.name, path = %path.display(), "removed document"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        cache.remove(&session.storage_key());
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    fn alice() -> Session {
        Session::new("alice@example.com")
    }

    #[test]
    fn memory_documents_are_per_user() {
        let doc: Document<Counter> = Document::new(StorageLocation::Memory, "counter");
        doc.update(&alice(), |c| {
            c.value = 3;
            Ok(())
        })
        .unwrap();

        assert_eq!(doc.read(&alice(), |c| c.value).unwrap(), 3);
        assert_eq!(doc.read(&Session::new("bob"), |c| c.value).unwrap(), 0);
    }

    #[test]
    fn failed_update_changes_nothing() {
        let doc: Document<Counter> = Document::new(StorageLocation::Memory, "counter");
        let err = doc
            .update(&alice(), |c| {
                c.value = 9;
                Err::<(), _>(StoreError::EventNotFound {
                    remote_url: calsync_core::CalendarUrl::new("https://example.com/e.ics"),
                })
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::EventNotFound { .. }));
        assert_eq!(doc.read(&alice(), |c| c.value).unwrap(), 0);
    }

    #[test]
    fn directory_documents_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let location = StorageLocation::Directory(dir.path().to_path_buf());

        let doc: Document<Counter> = Document::new(location.clone(), "counter");
        doc.update(&alice(), |c| {
            c.value = 7;
            Ok(())
        })
        .unwrap();

        let path = dir.path().join("alice~40example~2ecom").join("counter.json");
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let reopened: Document<Counter> = Document::new(location, "counter");
        assert_eq!(reopened.read(&alice(), |c| c.value).unwrap(), 7);

        reopened.remove(&alice()).unwrap();
        assert!(!path.exists());
        reopened.remove(&alice()).unwrap();
        assert_eq!(reopened.read(&alice(), |c| c.value).unwrap(), 0);
    }

    #[test]
    fn corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let user_dir = dir.path().join("bob");
        fs::create_dir_all(&user_dir).unwrap();
        fs::write(user_dir.join("counter.json"), "{not json").unwrap();

        let doc: Document<Counter> =
            Document::new(StorageLocation::Directory(dir.path().to_path_buf()), "counter");
        let err = doc.read(&Session::new("bob"), |c| c.value).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
