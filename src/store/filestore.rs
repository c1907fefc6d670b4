use async_trait::async_trait;
use echocore::store::{KeyValueStore, Result, StoreError};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Durable key-value store keeping one file per key under a base directory.
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a key to a file name. ASCII letters, digits and `-` are kept; every
    /// other byte becomes `_XX` (hex), so distinct keys get distinct files.
    fn sanitize_filename(key: &str) -> String {
        key.bytes().fold(String::with_capacity(key.len()), |mut name, b| {
            if b.is_ascii_alphanumeric() || b == b'-' {
                name.push(char::from(b));
            } else {
                name.push_str(&format!("_{b:02X}"));
            }
            name
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(Self::sanitize_filename(key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => String::from_utf8(data)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        // Write-then-rename so a crash never leaves a truncated value behind.
        let path = self.path_for(key);
        let tmp = self
            .base_path
            .join(format!(".{}.tmp", Self::sanitize_filename(key)));
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await.map_err(StoreError::from)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        fs::remove_file(self.path_for(key))
            .await
            .or_else(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(e)
                }
            })
            .map_err(StoreError::from)
    }
}
