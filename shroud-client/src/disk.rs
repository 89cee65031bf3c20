//! Positional file access for chunked transfers.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Read exactly `len` bytes at `offset`.
pub async fn read_at(path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write `bytes` at `offset`.
pub async fn write_at(file: &mut File, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(bytes).await?;
    file.flush().await
}

/// Create (or truncate) `path` and size it to `size` bytes, creating parent
/// folders as needed.
pub async fn create_sized(path: &Path, size: u64) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(path)
        .await?;
    file.set_len(size).await?;
    Ok(file)
}

/// Destination for a file named by a peer.
///
/// Only the final path component is used, so a peer cannot write outside
/// `dir`.
pub fn destination(dir: &Path, name: &str) -> Option<PathBuf> {
    Path::new(name).file_name().map(|name| dir.join(name))
}
