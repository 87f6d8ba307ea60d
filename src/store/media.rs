//! Image storage for imported product pictures.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use super::{StoreError, StoreResult};

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store an image under `key` and return the reference to save on the item.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<String>;
}

/// Writes images as files under a directory.
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<String> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| StoreError::Other(format!("media dir: {e}")))?;
        let path = self.root.join(format!("{key}{}", sniff_extension(&bytes)));
        tokio::fs::write(&path, bytes).await.map_err(|e| StoreError::Other(format!("media write: {e}")))?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Keeps images in memory.
#[derive(Default)]
pub struct MemoryMediaStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryMediaStore {
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> { self.objects.lock().await.get(key).cloned() }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<String> {
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(format!("memory://{key}"))
    }
}

fn sniff_extension(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => ".png",
        [0xFF, 0xD8, 0xFF, ..] => ".jpg",
        [b'G', b'I', b'F', ..] => ".gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => ".webp",
        _ => ".bin",
    }
}
