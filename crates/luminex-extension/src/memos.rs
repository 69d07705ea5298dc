//! Small key/value state extensions keep across restarts.
//!
//! Every memento is a namespace inside one JSON file. An extension gets a
//! global memento (`<id>|global`) and one per workspace root
//! (`<id>|<root>`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::store::{StoreError, StoreResult};

/// The memo file shared by all mementos.
#[derive(Debug)]
pub struct Memos {
    path: PathBuf,
    content: Mutex<Map<String, Value>>,
    /// Serializes writers so the file always holds a complete snapshot
    write_lock: tokio::sync::Mutex<()>,
}

impl Memos {
    /// Opens the memo file; a missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| match serde_json::from_str::<Map<String, Value>>(&text) {
                Ok(map) => Some(map),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt memo file");
                    None
                }
            })
            .unwrap_or_default();

        Arc::new(Self {
            path,
            content: Mutex::new(content),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates a memento over the namespace `key`.
    pub fn memento(self: &Arc<Self>, key: impl Into<String>) -> Memento {
        Memento {
            key: key.into(),
            memos: Arc::clone(self),
        }
    }

    async fn persist(&self) -> StoreResult<()> {
        let _writer = self.write_lock.lock().await;
        let text = {
            let content = self.content.lock();
            serde_json::to_string_pretty(&*content).map_err(|source| StoreError::Json {
                path: self.path.clone(),
                source,
            })?
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// One namespace of the memo file.
#[derive(Debug, Clone)]
pub struct Memento {
    key: String,
    memos: Arc<Memos>,
}

impl Memento {
    /// Reads a value, or `None` if absent or of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let content = self.memos.content.lock();
        let value = content.get(&self.key)?.get(key)?.clone();
        serde_json::from_value(value).ok()
    }

    /// Stores a value and writes the memo file.
    pub async fn update(&self, key: &str, value: impl Serialize) -> StoreResult<()> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Json {
            path: self.memos.path.clone(),
            source,
        })?;
        {
            let mut content = self.memos.content.lock();
            let namespace = content
                .entry(self.key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !namespace.is_object() {
                *namespace = Value::Object(Map::new());
            }
            if let Value::Object(map) = namespace {
                map.insert(key.to_string(), value);
            }
        }
        self.memos.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memento_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memos.json");

        let memos = Memos::open(&path);
        let global = memos.memento("python|global");
        let workspace = memos.memento("python|/src/app");
        assert_eq!(global.get::<u32>("runs"), None);

        global.update("runs", 3).await.unwrap();
        workspace.update("runs", 1).await.unwrap();
        assert_eq!(global.get::<u32>("runs"), Some(3));
        assert_eq!(global.get::<String>("runs"), None);

        let reopened = Memos::open(&path);
        assert_eq!(reopened.memento("python|global").get::<u32>("runs"), Some(3));
        assert_eq!(reopened.memento("python|/src/app").get::<u32>("runs"), Some(1));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memos.json");
        std::fs::write(&path, "[1, 2").unwrap();
        let memos = Memos::open(&path);
        assert_eq!(memos.memento("x").get::<u32>("a"), None);
    }
}
