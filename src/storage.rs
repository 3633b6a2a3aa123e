//! Server-side file storage
// (c) 2024 Ross Younger

use std::{
    fmt::Debug,
    fs::OpenOptions,
    io::{ErrorKind, Write as _},
    path::{Path, PathBuf},
};

use tracing::warn;

/// One stored item, as reported by [`Storage::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// Errors from [`Storage::create`]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An item of that name is already stored
    #[error("File {0} already exists")]
    AlreadyExists(String),
    /// The name does not reduce to a usable file name
    #[error("invalid file name {0:?}")]
    InvalidName(String),
    /// Something went wrong writing the item
    #[error("Failed to save file: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the server keeps uploaded files.
///
/// Implementations must be safe to call concurrently from many connections,
/// and must never overwrite an existing item.
pub trait Storage: Send + Sync + Debug {
    /// Enumerates stored items
    fn list(&self) -> std::io::Result<Vec<StoredItem>>;

    /// Stores a new item.
    ///
    /// The name is first reduced to its final path component.
    /// On success, returns the name actually used.
    fn create(&self, name: &str, data: &[u8]) -> Result<String, StorageError>;
}

/// Reduces a client-supplied name to its final path component.
///
/// Returns None if nothing usable is left (empty, `.`, `..`, or only separators).
#[must_use]
pub fn sanitize_name(name: &str) -> Option<&str> {
    Path::new(name).file_name().and_then(std::ffi::OsStr::to_str)
}

/// Stores files as plain files in one directory
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    /// Opens a storage directory, creating it if necessary
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The storage directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Storage for DirectoryStorage {
    fn list(&self) -> std::io::Result<Vec<StoredItem>> {
        let mut items = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            items.push(StoredItem {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
            });
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    fn create(&self, name: &str, data: &[u8]) -> Result<String, StorageError> {
        let Some(safe) = sanitize_name(name) else {
            return Err(StorageError::InvalidName(name.to_string()));
        };
        let path = self.root.join(safe);

        // create_new is O_CREAT|O_EXCL: of two racing creators, exactly one wins.
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(safe.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = file.write_all(data) {
            drop(file);
            let _ = std::fs::remove_file(&path)
                .inspect_err(|e2| warn!("could not remove partial file {}: {e2}", path.display()));
            return Err(e.into());
        }
        Ok(safe.to_string())
    }
}
