//! Exclusive advisory lock scoped to one collection.
//!
//! The lock file is a zero-byte sentinel at `<collection>/.metadata.lock`.
//! Acquisition uses the OS blocking lock (`flock` on Unix, `LockFileEx` on
//! Windows), never polling. Locks are held per open file, so two threads in
//! the same process exclude each other just like two processes do.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded};
use fs2::FileExt;

use crate::error::{ErrorContext, StoreError, StoreResult};

/// Name of the lock file inside a collection root.
pub const LOCK_FILE: &str = ".metadata.lock";

/// Guard for the collection lock. Released on drop.
#[derive(Debug)]
pub struct CollectionLock {
    file: File,
    path: PathBuf,
}

impl CollectionLock {
    /// Acquires the lock for the collection at `root`.
    ///
    /// `None` or a zero timeout blocks until the lock is free. Otherwise the
    /// blocking call runs on a helper thread and the caller gives up after
    /// `timeout` with [`StoreError::LockTimeout`]. An abandoned helper
    /// releases the lock as soon as it obtains it.
    pub fn acquire(root: &Path, timeout: Option<Duration>) -> StoreResult<Self> {
        let path = root.join(LOCK_FILE);
        match timeout {
            Some(limit) if !limit.is_zero() => Self::acquire_with_timeout(path, limit),
            _ => {
                let file = open_lock_file(&path)?;
                file.lock_exclusive().write_context(&path)?;
                tracing::trace!(path = %path.display(), "acquired collection lock");
                Ok(Self { file, path })
            }
        }
    }

    fn acquire_with_timeout(path: PathBuf, limit: Duration) -> StoreResult<Self> {
        let file = open_lock_file(&path)?;
        // Fast path avoids spawning a thread when nobody holds the lock
        if file.try_lock_exclusive().is_ok() {
            return Ok(Self { file, path });
        }
        drop(file);

        let (tx, rx) = bounded::<std::io::Result<File>>(1);
        let helper_path = path.clone();
        std::thread::spawn(move || {
            let result = File::options()
                .read(true)
                .write(true)
                .open(&helper_path)
                .and_then(|file| file.lock_exclusive().map(|()| file));
            // Receiver gone means the caller timed out; dropping the file
            // releases the lock we just took.
            let _ = tx.send(result);
        });

        match rx.recv_timeout(limit) {
            Ok(Ok(file)) => Ok(Self { file, path }),
            Ok(Err(source)) => Err(StoreError::FileWrite { path, source }),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(path = %path.display(), waited = ?limit, "lock acquisition timed out");
                Err(StoreError::LockTimeout {
                    path,
                    waited: limit,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::FileWrite {
                path,
                source: std::io::Error::other("lock helper thread exited"),
            }),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CollectionLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(error = %e, path = %self.path.display(), "failed to release collection lock");
        }
    }
}

/// Opens or creates the lock file. The collection directory must already
/// exist; a handle whose collection was dropped must not bring it back.
fn open_lock_file(path: &Path) -> StoreResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => StoreError::CollectionNotFound {
                name: collection_name(path),
            },
            _ => StoreError::FileWrite {
                path: path.to_path_buf(),
                source,
            },
        })
}

fn collection_name(lock_path: &Path) -> String {
    lock_path
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| lock_path.display().to_string())
}
