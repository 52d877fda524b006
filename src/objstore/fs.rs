//! Local-directory object store. Keys map to paths under `root`.

use std::path::{Path, PathBuf};

use super::{validate_key, ObjectStore, StorageError};

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }
}

fn io_err(context: &str, e: std::io::Error) -> StorageError {
    StorageError::Backend(format!("{}: {}", context, e))
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        if !tokio::fs::try_exists(&self.root)
            .await
            .map_err(|e| io_err("stat root", e))?
        {
            return Err(StorageError::Backend(format!(
                "root directory {} does not exist",
                self.root.display()
            )));
        }

        let mut keys = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, rel)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| io_err(&format!("read {}", dir.display()), e))?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_err("read entry", e))? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if rel.is_empty() {
                    name
                } else {
                    format!("{}/{}", rel, name)
                };
                let file_type = entry.file_type().await.map_err(|e| io_err("file type", e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(self.uri(key)))
            }
            Err(e) => Err(io_err(&format!("read {}", path.display()), e)),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(&format!("create {}", parent.display()), e))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| io_err(&format!("write {}", path.display()), e))
    }

    fn uri(&self, key: &str) -> String {
        format!("file://{}/{}", self.root.display(), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store
            .put("events/dt=2025-01-01/a.jsonl", b"{}\n".to_vec(), "application/json")
            .await
            .unwrap();
        store.put("other/b.jsonl", b"x".to_vec(), "text/plain").await.unwrap();

        let data = store.get("events/dt=2025-01-01/a.jsonl").await.unwrap();
        assert_eq!(data, b"{}\n");

        let keys = store.list("events/").await.unwrap();
        assert_eq!(keys, vec!["events/dt=2025-01-01/a.jsonl".to_string()]);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(
            store.get("events/nope.jsonl").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_root_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("absent"));
        assert!(matches!(store.list("events/").await, Err(StorageError::Backend(_))));
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(
            store.put("../escape", vec![], "text/plain").await,
            Err(StorageError::InvalidKey { .. })
        ));
    }
}
