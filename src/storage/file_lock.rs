// Copyright 2025 Flatbase Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Advisory file locking
//!
//! Table files are opened with a shared lock and upgraded to exclusive on
//! the first mutation. Acquisition is non-blocking `flock()` retried until
//! the configured wait timeout; timing out yields `LockWait` without
//! touching the transaction. The lock is released when the handle drops.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::core::{Error, Result};
use crate::executor::context::ExecutionContext;

const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Lock strength currently held on a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// An advisory lock on one table file
///
/// The handle keeps the file open for the lifetime of the lock.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl FileLock {
    /// Open `path` and acquire a shared lock, retrying until `timeout`.
    pub fn open_shared(
        ctx: &ExecutionContext,
        path: &Path,
        timeout: Duration,
    ) -> Result<FileLock> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        acquire_with_retry(ctx, &file, path, LockMode::Shared, timeout)?;
        Ok(FileLock {
            file,
            path: path.to_path_buf(),
            mode: LockMode::Shared,
        })
    }

    /// Upgrade to an exclusive lock, retrying until `timeout`. First caller
    /// wins; a competing holder leaves this call timing out with `LockWait`.
    pub fn upgrade_exclusive(&mut self, ctx: &ExecutionContext, timeout: Duration) -> Result<()> {
        if self.mode == LockMode::Exclusive {
            return Ok(());
        }
        acquire_with_retry(ctx, &self.file, &self.path, LockMode::Exclusive, timeout)?;
        self.mode = LockMode::Exclusive;
        Ok(())
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        release(&self.file);
    }
}

fn acquire_with_retry(
    ctx: &ExecutionContext,
    file: &File,
    path: &Path,
    mode: LockMode,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        ctx.check()?;
        match try_acquire(file, mode) {
            Ok(true) => return Ok(()),
            Ok(false) => {
                if Instant::now() >= deadline {
                    return Err(Error::LockWait {
                        path: path.display().to_string(),
                    });
                }
                log::warn!(
                    "waiting for {} lock on {}",
                    match mode {
                        LockMode::Shared => "shared",
                        LockMode::Exclusive => "exclusive",
                    },
                    path.display()
                );
                std::thread::sleep(RETRY_INTERVAL.min(deadline - Instant::now()));
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Unix implementation
// ============================================================================

#[cfg(unix)]
fn try_acquire(file: &File, mode: LockMode) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    let op = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    } | libc::LOCK_NB;

    let result = unsafe { libc::flock(file.as_raw_fd(), op) };
    if result == 0 {
        return Ok(true);
    }
    let errno = std::io::Error::last_os_error();
    if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(Error::io(errno))
    }
}

#[cfg(unix)]
fn release(file: &File) {
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

// ============================================================================
// Fallback implementation
//
// Closing the handle releases any OS lock; platforms without flock get
// in-process exclusion only, which the view cache already provides.
// ============================================================================

#[cfg(not(unix))]
fn try_acquire(_file: &File, _mode: LockMode) -> Result<bool> {
    Ok(true)
}

#[cfg(not(unix))]
fn release(_file: &File) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_then_exclusive_upgrade() {
        let dir = std::env::temp_dir();
        let path = dir.join("flatbase_lock_test.csv");
        std::fs::write(&path, "a\n1\n").expect("write fixture");

        let ctx = ExecutionContext::background();
        let mut lock = FileLock::open_shared(&ctx, &path, Duration::from_secs(1))
            .expect("shared lock should succeed");
        assert_eq!(lock.mode(), LockMode::Shared);
        lock.upgrade_exclusive(&ctx, Duration::from_secs(1))
            .expect("upgrade should succeed");
        assert_eq!(lock.mode(), LockMode::Exclusive);

        drop(lock);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_io_error() {
        let ctx = ExecutionContext::background();
        let err = FileLock::open_shared(
            &ctx,
            Path::new("/nonexistent/flatbase.csv"),
            Duration::from_millis(10),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
