//! Shared folders offered to the group.
//!
//! Files and folders are identified by the hex SHA-256 of their full path,
//! so ids stay stable across rescans and reveal nothing about the path.
//! The index is rescanned on every query; symlinks are not followed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use shroud_types::messages::{BrowseListing, FileEntry, FolderEntry};

/// A shared file resolved from its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    /// Location on disk.
    pub path: PathBuf,
    /// File name shown to peers.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Read-only view of the shared folders.
#[derive(Debug, Clone, Default)]
pub struct ShareIndex {
    roots: Arc<Vec<PathBuf>>,
}

/// Id of a shared path.
pub fn path_id(path: &Path) -> String {
    hex::encode(Sha256::digest(path.to_string_lossy().as_bytes()))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

impl ShareIndex {
    /// Index over `roots`. Missing roots are skipped at query time.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: Arc::new(roots),
        }
    }

    /// Shared root folders.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Files whose name contains `keyword`, ignoring case.
    ///
    /// A blank keyword matches nothing.
    pub fn search(&self, keyword: &str) -> Vec<FileEntry> {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return Vec::new();
        }
        let mut files: Vec<FileEntry> = self
            .files()
            .into_iter()
            .filter(|f| f.name.to_lowercase().contains(&keyword))
            .map(|f| entry(&f))
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }

    /// Contents of one folder, or the share roots when `folder` is `None`.
    ///
    /// Returns `None` for an unknown folder id.
    pub fn browse(&self, folder: Option<&str>) -> Option<BrowseListing> {
        let Some(id) = folder else {
            let folders = self
                .roots
                .iter()
                .filter(|r| r.is_dir())
                .map(|r| FolderEntry {
                    id: path_id(r),
                    name: display_name(r),
                })
                .collect();
            return Some(BrowseListing {
                folders,
                files: Vec::new(),
            });
        };

        let dir = self.folders().into_iter().find(|d| path_id(d) == id)?;
        let mut listing = BrowseListing::default();
        for (path, meta) in children(&dir) {
            if meta.is_dir() {
                listing.folders.push(FolderEntry {
                    id: path_id(&path),
                    name: display_name(&path),
                });
            } else if meta.is_file() {
                listing.files.push(FileEntry {
                    id: path_id(&path),
                    name: display_name(&path),
                    size: meta.len(),
                });
            }
        }
        listing.folders.sort_by(|a, b| a.name.cmp(&b.name));
        listing.files.sort_by(|a, b| a.name.cmp(&b.name));
        Some(listing)
    }

    /// Resolve a file id.
    pub fn file(&self, id: &str) -> Option<SharedFile> {
        self.files().into_iter().find(|f| path_id(&f.path) == id)
    }

    fn files(&self) -> Vec<SharedFile> {
        let mut files = Vec::new();
        self.walk(|path, meta| {
            if meta.is_file() {
                files.push(SharedFile {
                    name: display_name(path),
                    path: path.to_path_buf(),
                    size: meta.len(),
                });
            }
        });
        files
    }

    fn folders(&self) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = self.roots.iter().filter(|r| r.is_dir()).cloned().collect();
        self.walk(|path, meta| {
            if meta.is_dir() {
                folders.push(path.to_path_buf());
            }
        });
        folders
    }

    fn walk(&self, mut visit: impl FnMut(&Path, &fs::Metadata)) {
        let mut pending: Vec<PathBuf> = self.roots.iter().cloned().collect();
        while let Some(dir) = pending.pop() {
            for (path, meta) in children(&dir) {
                visit(&path, &meta);
                if meta.is_dir() {
                    pending.push(path);
                }
            }
        }
    }
}

fn entry(file: &SharedFile) -> FileEntry {
    FileEntry {
        id: path_id(&file.path),
        name: file.name.clone(),
        size: file.size,
    }
}

fn children(dir: &Path) -> Vec<(PathBuf, fs::Metadata)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| {
            let path = e.path();
            fs::symlink_metadata(&path).ok().map(|meta| (path, meta))
        })
        .collect()
}
