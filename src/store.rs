use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::Store;

/// The student store, persisted as one JSON document.
///
/// Every call reads or writes the whole file. Writers go through `update`,
/// which serializes load-mutate-save cycles so concurrent requests cannot
/// overwrite each other's changes.
pub struct JsonStore {
    data_file: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(data_file: impl Into<PathBuf>) -> Self {
        Self {
            data_file: data_file.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.data_file
    }

    /// Read the document. A missing file is an empty store.
    pub async fn load(&self) -> Result<Store, StoreError> {
        let content = match tokio::fs::read_to_string(&self.data_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Store::default()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.data_file.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.data_file.clone(),
            source,
        })
    }

    /// Replace the document with `store`.
    ///
    /// The new content lands in a sibling temp file first and is renamed
    /// over the target.
    pub async fn save(&self, store: &Store) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(store)?;

        if let Some(parent) = self.data_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| self.io_error(source))?;
            }
        }

        let tmp_file = self.tmp_path();
        tokio::fs::write(&tmp_file, content)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&tmp_file, &self.data_file)
            .await
            .map_err(|source| self.io_error(source))?;

        Ok(())
    }

    /// Load, apply `f`, and save, holding the write lock throughout.
    ///
    /// `f` returns its result and whether it changed the store; an
    /// unchanged store is not written back.
    pub async fn update<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Store) -> (T, bool),
    {
        let _guard = self.write_lock.lock().await;
        let mut store = self.load().await?;
        let (value, changed) = f(&mut store);
        if changed {
            self.save(&store).await?;
        }
        Ok(value)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .data_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.data_file.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.data_file.clone(),
            source,
        }
    }
}
