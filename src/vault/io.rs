//! Vault directory layout and file IO primitives.
//!
//! The goals of this module are:
//! - Restrictive permissions (0700 directory, 0600 files), enforced on
//!   create and re-checked on unlock.
//! - Cross-process exclusion via an advisory lock on `vault.lock`;
//!   conflicting processes fail fast with `VaultBusy`.
//! - Crash-safe writes via the write-temp, fsync, atomic-rename pattern.
//! - Disk-space guards before any mutation.
//!
//! This module is intentionally low-level and format-agnostic: it
//! reads/writes raw bytes.  Higher layers own parsing and encryption.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::{Result, SecretCtlError};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Free space required before a vault write proceeds (10 MiB).
pub const VAULT_WRITE_RESERVE: u64 = 10 * 1024 * 1024;

/// Free space required before an audit append proceeds (1 MiB).
pub const AUDIT_WRITE_RESERVE: u64 = 1024 * 1024;

/// Filesystem usage fraction above which a warning is surfaced.
pub const USAGE_WARN_RATIO: f64 = 0.90;

/// Well-known file names inside a vault directory.
#[derive(Debug, Clone)]
pub struct VaultLayout {
    dir: PathBuf,
}

impl VaultLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn salt_path(&self) -> PathBuf {
        self.dir.join("vault.salt")
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join("vault.meta")
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.join("vault.db")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.dir.join("audit.jsonl")
    }

    pub fn policy_path(&self) -> PathBuf {
        self.dir.join("mcp-policy.yaml")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join("vault.lock")
    }

    /// True once `vault.salt` exists — the marker for an initialized vault.
    pub fn is_initialized(&self) -> bool {
        self.salt_path().exists()
    }

    /// Create the vault directory with owner-only permissions.
    pub fn create_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| SecretCtlError::io("creating the vault directory", e))?;
        #[cfg(unix)]
        fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| SecretCtlError::io("restricting the vault directory", e))?;
        Ok(())
    }

    /// Re-assert owner-only permissions on the directory and every
    /// secret-bearing file.  Called on every unlock.
    pub fn enforce_permissions(&self) -> Result<()> {
        #[cfg(unix)]
        {
            fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700))
                .map_err(|e| SecretCtlError::io("restricting the vault directory", e))?;
            for path in [
                self.salt_path(),
                self.meta_path(),
                self.db_path(),
                self.audit_path(),
            ] {
                if path.exists() {
                    fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                        .map_err(|e| SecretCtlError::io("restricting a vault file", e))?;
                }
            }
        }
        Ok(())
    }
}

/// Write `bytes` to `path` atomically with 0600 permissions.
///
/// 1. Write to a dot-prefixed temp file in the same directory.
/// 2. fsync the temp file.
/// 3. Rename over the target (atomic on the same filesystem).
/// 4. fsync the directory so the rename is durable.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    let mut open = OpenOptions::new();
    open.write(true).create(true).truncate(true);
    #[cfg(unix)]
    open.mode(0o600);

    let mut tmp = open
        .open(&tmp_path)
        .map_err(|e| SecretCtlError::io("creating a temp file", e))?;
    tmp.write_all(bytes)
        .map_err(|e| SecretCtlError::io("writing a temp file", e))?;
    tmp.sync_all()
        .map_err(|e| SecretCtlError::io("syncing a temp file", e))?;
    drop(tmp);

    fs::rename(&tmp_path, path).map_err(|e| SecretCtlError::io("renaming into place", e))?;
    fsync_dir(parent)?;
    Ok(())
}

pub(crate) fn fsync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let file =
            File::open(dir).map_err(|e| SecretCtlError::io("opening a directory to sync", e))?;
        file.sync_all()
            .map_err(|e| SecretCtlError::io("syncing a directory", e))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Advisory exclusive lock on `vault.lock`, held for the duration of a
/// write transaction.  Dropping the guard releases the lock.
#[derive(Debug)]
pub struct VaultLock {
    #[allow(dead_code)]
    file: File,
}

impl VaultLock {
    /// Acquire the lock without blocking; a held lock means another
    /// process is mutating this vault.
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        let mut open = OpenOptions::new();
        open.read(true).write(true).create(true);
        #[cfg(unix)]
        open.mode(0o600);

        let file = open
            .open(lock_path)
            .map_err(|e| SecretCtlError::io("opening vault.lock", e))?;

        #[cfg(unix)]
        {
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                return Err(SecretCtlError::VaultBusy);
            }
        }

        Ok(Self { file })
    }
}

/// Free bytes available to the current user on the filesystem holding `dir`.
#[cfg(unix)]
pub fn free_space(dir: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(dir.as_os_str().as_bytes())
        .map_err(|_| SecretCtlError::validation("path", "contains an interior NUL byte"))?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(SecretCtlError::io(
            "checking free disk space",
            std::io::Error::last_os_error(),
        ));
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn free_space(_dir: &Path) -> Result<u64> {
    Ok(u64::MAX)
}

/// Fraction of the filesystem holding `dir` that is in use.
#[cfg(unix)]
pub fn usage_ratio(dir: &Path) -> Result<f64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(dir.as_os_str().as_bytes())
        .map_err(|_| SecretCtlError::validation("path", "contains an interior NUL byte"))?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(SecretCtlError::io(
            "checking disk usage",
            std::io::Error::last_os_error(),
        ));
    }
    if stat.f_blocks == 0 {
        return Ok(0.0);
    }
    Ok(1.0 - (stat.f_bavail as f64 / stat.f_blocks as f64))
}

#[cfg(not(unix))]
pub fn usage_ratio(_dir: &Path) -> Result<f64> {
    Ok(0.0)
}

/// Fail with `DiskFull` unless at least `required` bytes are free.
pub fn ensure_free_space(dir: &Path, required: u64) -> Result<()> {
    if free_space(dir)? < required {
        return Err(SecretCtlError::DiskFull { required });
    }
    Ok(())
}
