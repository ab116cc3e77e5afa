use async_trait::async_trait;
use std::{
    io::{self, ErrorKind::NotFound},
    path::{Path, PathBuf},
};
use thiserror::Error as ThisError;
use tokio::{fs, io::AsyncWriteExt};

#[derive(ThisError, Debug)]
pub enum StorageError {
    #[error("Error creating upload directory {}: {source}", path.display())]
    Create { path: PathBuf, source: io::Error },

    #[error("Upload path {} exists but is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("Error inspecting upload directory {}: {source}", path.display())]
    Inspect { path: PathBuf, source: io::Error },
}

/// One immediate entry of the storage directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub name: String,
    pub is_dir: bool,
}

#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
    /// Immediate entries, in whatever order the backing store yields them.
    async fn entries(&self) -> io::Result<Vec<StoredEntry>>;

    /// Write a new file. Fails with `AlreadyExists` rather than overwrite.
    async fn create(&self, name: &str, bytes: &[u8]) -> io::Result<()>;
}

/// Flat directory on local disk.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open `root`, creating it (mode `0o777` before umask) if it is missing.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();

        match fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(StorageError::NotADirectory { path: root }),
            Err(err) if err.kind() == NotFound => {
                let mut builder = fs::DirBuilder::new();
                builder.recursive(true);
                #[cfg(unix)]
                builder.mode(0o777);

                if let Err(source) = builder.create(&root).await {
                    return Err(StorageError::Create { path: root, source });
                }
                tracing::info!(path = %root.display(), "Created upload directory");
            }
            Err(source) => return Err(StorageError::Inspect { path: root, source }),
        }

        Ok(DiskStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ImageStore for DiskStore {
    async fn entries(&self) -> io::Result<Vec<StoredEntry>> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let is_dir = entry.file_type().await?.is_dir();
            entries.push(StoredEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }

        Ok(entries)
    }

    async fn create(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.root.join(name);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;

        if written.is_err() {
            drop(file);
            // don't leave a truncated image behind
            let _ = fs::remove_file(&path).await;
        }
        written
    }
}

#[cfg(test)]
pub use memory::MemoryStore;
