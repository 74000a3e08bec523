//! Preset file storage.
//!
//! [`PresetStorage`] is the slice of the host file manager the sync routine
//! needs. [`LocalStorage`] implements it on a plain directory tree.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use filamentdryer_core::normalize_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Per-folder file holding display names.
pub const METADATA_FILE: &str = ".metadata.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("file already exists: {0}")]
    AlreadyExists(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Path relative to the storage root, `/` separated.
    pub path: String,
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

pub trait PresetStorage {
    /// Creates `path` and its parents; an existing folder is not an error.
    fn add_folder(&self, path: &str) -> Result<(), StorageError>;

    /// Files directly inside `folder`, sorted by path.
    fn list_files(&self, folder: &str) -> Result<Vec<StoredFile>, StorageError>;

    fn remove_file(&self, path: &str) -> Result<(), StorageError>;

    fn add_file(
        &self,
        path: &str,
        contents: &[u8],
        allow_overwrite: bool,
        display: &str,
    ) -> Result<(), StorageError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    display: Option<String>,
}

type FolderMetadata = BTreeMap<String, FileMetadata>;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path.trim_start_matches('/'));
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(StorageError::InvalidPath(path.to_string())),
            }
        }
        Ok(self.root.join(rel))
    }

    fn split(&self, path: &str) -> Result<(PathBuf, String), StorageError> {
        let full = self.resolve(path)?;
        let name = full
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        if name == METADATA_FILE {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        let dir = full
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        Ok((dir, name))
    }

    fn read_metadata(dir: &Path) -> Result<FolderMetadata, StorageError> {
        match fs::read(dir.join(METADATA_FILE)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FolderMetadata::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_metadata(dir: &Path, metadata: &FolderMetadata) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(metadata)?;
        write_atomic(dir, &dir.join(METADATA_FILE), &bytes)
    }
}

impl PresetStorage for LocalStorage {
    fn add_folder(&self, path: &str) -> Result<(), StorageError> {
        let dir = self.resolve(path)?;
        fs::create_dir_all(&dir)?;
        Ok(())
    }

    fn list_files(&self, folder: &str) -> Result<Vec<StoredFile>, StorageError> {
        let dir = self.resolve(folder)?;
        let metadata = Self::read_metadata(&dir)?;
        let prefix = normalize_dir(folder);
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            files.push(StoredFile {
                path,
                size: entry.metadata()?.len(),
                display: metadata.get(&name).and_then(|m| m.display.clone()),
                name,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn remove_file(&self, path: &str) -> Result<(), StorageError> {
        let (dir, name) = self.split(path)?;
        match fs::remove_file(dir.join(&name)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        let mut metadata = Self::read_metadata(&dir)?;
        if metadata.remove(&name).is_some() {
            Self::write_metadata(&dir, &metadata)?;
        }
        debug!(path, "Removed file");
        Ok(())
    }

    fn add_file(
        &self,
        path: &str,
        contents: &[u8],
        allow_overwrite: bool,
        display: &str,
    ) -> Result<(), StorageError> {
        let (dir, name) = self.split(path)?;
        let target = dir.join(&name);
        if !allow_overwrite && target.exists() {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        fs::create_dir_all(&dir)?;
        write_atomic(&dir, &target, contents)?;

        let mut metadata = Self::read_metadata(&dir)?;
        metadata.insert(
            name,
            FileMetadata {
                display: Some(display.to_string()),
            },
        );
        Self::write_metadata(&dir, &metadata)?;
        debug!(path, bytes = contents.len(), "Stored file");
        Ok(())
    }
}

/// Writes through a temporary file in `dir`, then renames over `target`.
fn write_atomic(dir: &Path, target: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(target).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_list_remove() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.add_folder("presets").unwrap();
        storage.add_folder("presets").unwrap();

        storage
            .add_file("presets/pla.filamentdryer", b"G4 S60\n", false, "PLA (4.0h @ 50°C)")
            .unwrap();
        storage
            .add_file("presets/abs.filamentdryer", b"G4 S60\nG4 S60\n", false, "ABS (5.0h @ 70°C)")
            .unwrap();

        let files = storage.list_files("presets").unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["presets/abs.filamentdryer", "presets/pla.filamentdryer"]);
        assert_eq!(files[0].size, 14);
        assert_eq!(files[1].display.as_deref(), Some("PLA (4.0h @ 50°C)"));

        storage.remove_file("presets/pla.filamentdryer").unwrap();
        let files = storage.list_files("presets").unwrap();
        assert_eq!(files.len(), 1);
        assert!(matches!(
            storage.remove_file("presets/pla.filamentdryer"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn overwrite_flag_is_honoured() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.add_file("a.gcode", b"one\n", false, "A").unwrap();
        assert!(matches!(
            storage.add_file("a.gcode", b"two\n", false, "A"),
            Err(StorageError::AlreadyExists(_))
        ));
        storage.add_file("a.gcode", b"two\n", true, "A2").unwrap();
        assert_eq!(fs::read(tmp.path().join("a.gcode")).unwrap(), b"two\n");
        assert_eq!(storage.list_files("").unwrap()[0].display.as_deref(), Some("A2"));
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());
        assert!(matches!(storage.add_folder("../outside"), Err(StorageError::InvalidPath(_))));
        assert!(matches!(
            storage.add_file("x/../../y", b"", true, ""),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            storage.add_file(METADATA_FILE, b"{}", true, ""),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn listing_skips_folders_and_hidden_files() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.add_folder("p/nested").unwrap();
        storage.add_file("p/x.filamentdryer", b"x", true, "X").unwrap();
        fs::write(tmp.path().join("p/.hidden"), b"h").unwrap();
        let files = storage.list_files("p").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "x.filamentdryer");
    }
}
