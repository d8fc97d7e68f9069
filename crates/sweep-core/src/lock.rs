use anyhow::Context;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process;

/// Exclusive lock held for the duration of a pull or push run.
///
/// The holder is described in a sidecar `<lock>.owner` file, which stays readable
/// where file locks are mandatory.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    owner: PathBuf,
    file: File,
}

impl RunLock {
    /// Returns `None` when another run already holds the lock.
    pub fn try_acquire(path: &Path, operation: &str) -> anyhow::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create lock directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open run lock {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let owner = owner_path(path);
                let lock = Self {
                    path: path.to_path_buf(),
                    owner,
                    file,
                };
                fs::write(&lock.owner, format!("{operation} pid {}", process::id()))
                    .with_context(|| format!("write lock owner {}", lock.owner.display()))?;
                Ok(Some(lock))
            }
            Err(err) if is_lock_held(&err) => Ok(None),
            Err(err) => Err(err).context("lock run file exclusively"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Description of the current holder, such as `push pid 4242`.
    pub fn holder(path: &Path) -> Option<String> {
        let text = fs::read_to_string(owner_path(path)).ok()?;
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.owner);
        let _ = self.file.unlock();
    }
}

fn owner_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".owner");
    PathBuf::from(name)
}

fn is_lock_held(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::WouldBlock {
        return true;
    }
    matches!(err.raw_os_error(), Some(33))
}
