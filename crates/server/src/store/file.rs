//! JSON-file card state backend.
//!
//! One `{id}.json` file per request in a single directory. Writes go through
//! a temp file and a rename so readers never observe a partial document.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chatops_core::{CardState, RequestId};

use super::{CardStateBackend, StoreError};

/// Card state stored as JSON files under a directory.
#[derive(Debug, Clone)]
pub struct FileCardStateBackend {
    dir: PathBuf,
}

impl FileCardStateBackend {
    /// Use `dir` for state files. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &RequestId) -> Result<PathBuf, StoreError> {
        let raw = id.as_str();
        let safe = !raw.is_empty()
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !safe {
            return Err(StoreError::InvalidId(raw.to_string()));
        }
        Ok(self.dir.join(format!("{raw}.json")))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl CardStateBackend for FileCardStateBackend {
    async fn load(&self, id: &RequestId) -> Result<Option<CardState>, StoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn save(&self, id: &RequestId, state: &CardState) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        let bytes = serde_json::to_vec_pretty(state)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let temp_path = self
            .dir
            .join(format!(".{id}.json.tmp-{}-{nanos}", std::process::id()));
        tokio::fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        Ok(())
    }

    async fn delete(&self, id: &RequestId) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chatops_core::{ReleaseRequest, ServiceSpec};

    use super::*;

    fn state() -> CardState {
        let mut state = CardState::new(ReleaseRequest {
            title: "release".to_string(),
            services: vec![ServiceSpec {
                name: "svc".to_string(),
                object_id: "svc".to_string(),
                branches: vec!["master".to_string()],
                actions: vec!["official".to_string()],
            }],
            object_id: String::new(),
            receive_id: "ou_1".to_string(),
            receive_id_type: "open_id".to_string(),
        });
        state.increment("svc", "do_official_release");
        state
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCardStateBackend::new(dir.path().join("cards"));
        let id = RequestId::from("req_1");

        backend.save(&id, &state()).await.unwrap();
        let loaded = backend.load(&id).await.unwrap();

        assert_eq!(loaded, Some(state()));
        assert!(dir.path().join("cards/req_1.json").exists());
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCardStateBackend::new(dir.path());
        assert!(backend.load(&RequestId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCardStateBackend::new(dir.path());
        let id = RequestId::from("req_2");

        backend.save(&id, &state()).await.unwrap();
        backend.save(&id, &state()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["req_2.json".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCardStateBackend::new(dir.path());

        for id in ["../escape", "a/b", ".hidden", ""] {
            let result = backend.load(&RequestId::from(id)).await;
            assert!(matches!(result, Err(StoreError::InvalidId(_))), "{id}");
        }
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCardStateBackend::new(dir.path());
        backend.delete(&RequestId::from("gone")).await.unwrap();
    }
}
