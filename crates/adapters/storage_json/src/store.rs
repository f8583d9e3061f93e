//! [`SnapshotStore`] backed by one JSON file.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use apparatus_app::error::PersistenceError;
use apparatus_app::ports::SnapshotStore;
use apparatus_domain::snapshot::SavedState;

use crate::error::StorageError;

/// Stores the saved state in a single pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(path: &Path, state: &SavedState) -> Result<(), StorageError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, state)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(path)?;
        Ok(())
    }

    fn read(path: &Path) -> Result<Option<SavedState>, StorageError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl SnapshotStore for JsonFileStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn save(
        &self,
        state: &SavedState,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        let path = self.path.clone();
        let state = state.clone();
        async move {
            tokio::task::spawn_blocking(move || Self::write(&path, &state))
                .await
                .map_err(StorageError::from)??;
            tracing::debug!(path = %self.path.display(), "state file written");
            Ok(())
        }
    }

    fn load(&self) -> impl Future<Output = Result<Option<SavedState>, PersistenceError>> + Send {
        let path = self.path.clone();
        async move {
            let state = tokio::task::spawn_blocking(move || Self::read(&path))
                .await
                .map_err(StorageError::from)??;
            Ok(state)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn saved() -> SavedState {
        SavedState(BTreeMap::from([(
            "autoAlign".to_string(),
            BTreeMap::from([
                (
                    "MEMS".to_string(),
                    BTreeMap::from([("X".to_string(), 0.1), ("Y".to_string(), -0.25)]),
                ),
                (
                    "meter".to_string(),
                    BTreeMap::from([("power".to_string(), 0.75)]),
                ),
            ]),
        )]))
    }

    #[tokio::test]
    async fn should_read_back_what_was_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        store.save(&saved()).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, Some(saved()));
    }

    #[tokio::test]
    async fn should_return_none_when_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("missing.json"));

        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn should_write_nested_sorted_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        store.save(&saved()).await.unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();

        assert!(text.starts_with("{\n"));
        let mems = text.find("\"MEMS\"").unwrap();
        let meter = text.find("\"meter\"").unwrap();
        assert!(mems < meter);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["autoAlign"]["MEMS"]["Y"], -0.25);
    }

    #[tokio::test]
    async fn should_report_format_error_for_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = JsonFileStore::new(&path).load().await;

        assert!(matches!(result, Err(PersistenceError::Format(_))));
    }

    #[tokio::test]
    async fn should_keep_previous_file_when_directory_is_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let store = JsonFileStore::new(blocker.join("state.json"));

        let result = store.save(&saved()).await;

        assert!(matches!(result, Err(PersistenceError::Io(_))));
        assert_eq!(std::fs::read_to_string(&blocker).unwrap(), "");
    }

    #[tokio::test]
    async fn should_replace_existing_file_and_leave_no_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.save(&SavedState::default()).await.unwrap();

        store.save(&saved()).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(saved()));
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
