//! File Persistence Module
//!
//! One JSON document per key under a root directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::warn;

use crate::error::Result;
use crate::persistence::PersistenceAdapter;

const EXTENSION: &str = "json";

/// Encoded names longer than this are replaced by a hash; most filesystems
/// cap a name at 255 bytes.
const MAX_FILE_STEM: usize = 200;

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    key: String,
    value: Value,
}

// == File Persistence ==
/// Durable adapter writing `<root>/<encoded-key>.json`.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-write leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    root: PathBuf,
}

impl FilePersistence {
    /// Creates an adapter rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", encode_key(key), EXTENSION))
    }

    async fn read_document(path: &Path) -> Result<Option<Document>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl PersistenceAdapter for FilePersistence {
    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        let document = Document {
            key: key.to_string(),
            value: value.clone(),
        };
        let bytes = serde_json::to_vec(&document)?;

        fs::create_dir_all(&self.root).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(Self::read_document(&self.path_for(key))
            .await?
            .map(|doc| doc.value))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn clear_all(&self) -> Result<()> {
        for path in self.document_paths().await? {
            if let Err(err) = fs::remove_file(&path).await {
                if err.kind() != ErrorKind::NotFound {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for path in self.document_paths().await? {
            match Self::read_document(&path).await {
                Ok(Some(doc)) => keys.push(doc.key),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable cache document"),
            }
        }
        Ok(keys)
    }
}

impl FilePersistence {
    async fn document_paths(&self) -> Result<Vec<PathBuf>> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

/// Keeps `[A-Za-z0-9_-]` and percent-encodes every other byte. Names that
/// grow too long become `~<sha256>`; `~` never survives plain encoding, so
/// the two forms cannot collide. The original key lives in the document.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    if encoded.len() > MAX_FILE_STEM {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        return format!("~{}", hex::encode(hasher.finalize()));
    }
    encoded
}
