//! Output-file I/O for segmented downloads.
//!
//! The file is opened create-or-open, read-write and never truncated, so a
//! paused task's earlier segment writes survive a resume. All writes are
//! positional (pwrite on Unix); segments own disjoint ranges, so the shared
//! handle needs no cursor coordination.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Shared handle to a download's output file. Cloneable across workers;
/// each `write_at` is independent.
#[derive(Clone)]
pub struct OutputFile {
    file: Arc<File>,
    path: PathBuf,
}

impl OutputFile {
    /// Open `path` create-if-absent, read-write, without truncation.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open output file: {}", path.display()))?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Current on-disk length.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata().context("stat output file")?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Preallocate `size` bytes. On Unix tries `posix_fallocate` for real
    /// block allocation and falls back to `set_len` on failure or non-Unix.
    pub fn preallocate(&self, size: u64) -> Result<()> {
        #[cfg(unix)]
        {
            let fd = self.file.as_raw_fd();
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file
            .set_len(size)
            .context("failed to preallocate output file")?;
        Ok(())
    }

    /// Write `data` at `offset` without moving any shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        let n = self.file.write_at(data, offset)?;
        if n != data.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short write: {} of {}", n, data.len()),
            ));
        }
        Ok(())
    }

    /// Non-Unix fallback: seek + write on a cloned descriptor.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        Ok(())
    }

    /// Flush file data to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().context("output file sync failed")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Best-effort removal of a canceled task's partial file.
pub fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "could not remove partial file");
        }
    }
}
