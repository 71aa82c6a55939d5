//! Durable home of collection photos. The engine only ever lists, fetches and
//! writes raw image bytes; there is no manifest, entries are found by listing.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Image file extensions a collection listing picks up.
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub trait StorageAdapter: Send + Sync {
    /// Identifiers of every image in the collection, in insertion order.
    /// A collection that does not exist lists as empty.
    fn list(&self, collection: &str) -> Result<Vec<String>>;
    fn fetch(&self, collection: &str, identifier: &str) -> Result<Vec<u8>>;
    /// Store a new object. Never replaces one: an existing identifier fails
    /// with [`Error::AlreadyExists`], atomically with respect to other writers.
    fn put(&self, collection: &str, identifier: &str, bytes: &[u8]) -> Result<()>;
    /// Delete one object; deleting a missing object is not an error.
    fn remove(&self, collection: &str, identifier: &str) -> Result<()>;
    /// Remove the collection and everything in it.
    fn purge(&self, collection: &str) -> Result<()>;
}

/// Reject names that could escape the storage root.
pub fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.starts_with('.');
    if bad {
        return Err(Error::InvalidCollection(name.to_string()));
    }
    Ok(())
}

fn is_image_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Uploads are stored as `00001.jpg`, `00002.jpg`, ... so that name order is
/// upload order.
pub fn sequence_name(seq: u64) -> String {
    format!("{seq:05}.jpg")
}

fn sequence_of(identifier: &str) -> Option<u64> {
    Path::new(identifier).file_stem()?.to_str()?.parse().ok()
}

/// The sequence number following the highest numeric name already present.
pub fn next_sequence(identifiers: &[String]) -> u64 {
    identifiers
        .iter()
        .filter_map(|id| sequence_of(id))
        .max()
        .map_or(1, |n| n + 1)
}

/// Numbered uploads first, by number (so `100000.jpg` follows `99999.jpg`),
/// then any other names alphabetically.
pub fn insertion_order(a: &str, b: &str) -> Ordering {
    match (sequence_of(a), sequence_of(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// One directory per collection under a common root.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        validate_name(collection)?;
        Ok(self.root.join(collection))
    }

    fn object_path(&self, collection: &str, identifier: &str) -> Result<PathBuf> {
        validate_name(identifier)?;
        Ok(self.collection_path(collection)?.join(identifier))
    }
}

impl StorageAdapter for DirectoryStorage {
    fn list(&self, collection: &str) -> Result<Vec<String>> {
        let dir = self.collection_path(collection)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(Error::storage(format!("listing {}", dir.display()), e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage(format!("listing {}", dir.display()), e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if let Some(name) = entry.file_name().to_str() {
                if is_file && is_image_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort_by(|a, b| insertion_order(a, b));
        Ok(names)
    }

    fn fetch(&self, collection: &str, identifier: &str) -> Result<Vec<u8>> {
        let path = self.object_path(collection, identifier)?;
        std::fs::read(&path).map_err(|e| Error::storage(format!("reading {}", path.display()), e))
    }

    fn put(&self, collection: &str, identifier: &str, bytes: &[u8]) -> Result<()> {
        let path = self.object_path(collection, identifier)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::storage(format!("creating {}", parent.display()), e))?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists {
                    collection: collection.to_string(),
                    identifier: identifier.to_string(),
                })
            }
            Err(e) => return Err(Error::storage(format!("creating {}", path.display()), e)),
        };
        if let Err(e) = file.write_all(bytes).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(Error::storage(format!("writing {}", path.display()), e));
        }
        Ok(())
    }

    fn remove(&self, collection: &str, identifier: &str) -> Result<()> {
        let path = self.object_path(collection, identifier)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!("removing {}", path.display()), e)),
        }
    }

    fn purge(&self, collection: &str) -> Result<()> {
        let dir = self.collection_path(collection)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!("removing {}", dir.display()), e)),
        }
    }
}
