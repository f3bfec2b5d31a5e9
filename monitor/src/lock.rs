use std::path::{Path, PathBuf};
use std::time::Duration;

use util::Timer;

use crate::Error;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exclusive lock on a store, held as the directory `<store>.lock`.
///
/// Directory creation is atomic even on network filesystems, so this works
/// across hosts as long as they share the store's directory.
/// The lock is released on drop.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    held: bool,
}

impl DirLock {
    /// Block until the lock for `store` is acquired, or fail after `timeout`.
    pub fn acquire(store: &Path, timeout: Duration) -> Result<Self, Error> {
        let path = lock_path(store)?;
        let timer = Timer::now();
        loop {
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    log::trace!("acquired lock {}", path.display());
                    return Ok(Self { path, held: true });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if timer.expired(timeout) {
                        return Err(Error::LockAcquire(path, timeout));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn release(&mut self) -> Result<(), Error> {
        if self.held {
            self.held = false;
            std::fs::remove_dir(&self.path)?;
            log::trace!("released lock {}", self.path.display());
        }
        Ok(())
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("unable to release lock {}: {e}", self.path.display());
        }
    }
}

fn lock_path(store: &Path) -> Result<PathBuf, Error> {
    let abs = if store.is_absolute() {
        store.to_path_buf()
    } else {
        std::env::current_dir()?.join(store)
    };
    let mut s = abs.into_os_string();
    s.push(".lock");
    Ok(PathBuf::from(s))
}
