//! Durable file storage used for queue snapshots.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Synchronous file primitives.
///
/// `write` must be atomic: readers see either the previous contents or the
/// complete new contents, never a partial file.
pub trait FileClient: Send + Sync {
    fn write(&self, data: &[u8], path: &Path) -> io::Result<()>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn file_exists(&self, path: &Path) -> bool;

    fn remove_item(&self, path: &Path) -> io::Result<()>;

    /// Directory that holds SDK-private files
    fn library_directory(&self) -> PathBuf;
}

/// `FileClient` over the local filesystem rooted at one directory.
#[derive(Debug, Clone)]
pub struct LocalFileClient {
    root: PathBuf,
}

impl LocalFileClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileClient for LocalFileClient {
    fn write(&self, data: &[u8], path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a sibling temp file, then rename over the target
        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        Ok(())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn remove_item(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn library_directory(&self) -> PathBuf {
        self.root.clone()
    }
}
