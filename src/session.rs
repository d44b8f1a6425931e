//! Session persistence between runs: a storage-state file (cookies plus
//! per-origin localStorage) and an exclusive lock on the profile directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const LOCK_FILE: &str = ".uipilot.lock";

/// Serialized session: restored at run start, overwritten at run end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageState {
    /// Cookies as reported by the engine, kept opaque.
    pub cookies: Vec<Value>,
    pub origins: Vec<OriginStorage>,
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OriginStorage {
    pub origin: String,
    pub local_storage: BTreeMap<String, String>,
}

impl StorageState {
    /// `Ok(None)` when no state has been saved yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("corrupt storage state {}: {e}", path.display()))
        })?;
        Ok(Some(state))
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), cookies = self.cookies.len(), "storage state saved");
        Ok(())
    }

    /// Replace (or add) the localStorage snapshot for one origin.
    pub fn put_origin(&mut self, origin: OriginStorage) {
        self.origins.retain(|o| o.origin != origin.origin);
        self.origins.push(origin);
    }

    pub fn origin(&self, origin: &str) -> Option<&OriginStorage> {
        self.origins.iter().find(|o| o.origin == origin)
    }
}

/// Exclusive use of a persistent profile directory for the life of a run.
///
/// The lock file holds the owner's PID. A lock whose owner is no longer
/// running (killed before `Drop` ran) is taken over.
#[derive(Debug)]
pub struct ProfileLock {
    path: PathBuf,
}

impl ProfileLock {
    pub fn acquire(profile_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(profile_dir)?;
        let path = profile_dir.join(LOCK_FILE);
        let mut file = match create_lock(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let pid = match lock_owner(&path) {
                    Some(pid) if !is_process_alive(pid) => pid,
                    _ => return Err(Error::ProfileLocked(profile_dir.to_path_buf())),
                };
                warn!(path = %path.display(), pid, "taking over stale profile lock");
                std::fs::remove_file(&path)?;
                create_lock(&path).map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => Error::ProfileLocked(profile_dir.to_path_buf()),
                    _ => e.into(),
                })?
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "profile locked");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("cannot release profile lock {}: {e}", self.path.display());
        }
    }
}

fn create_lock(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// PID recorded in a lock file. `None` when unreadable or not yet written,
/// which counts as held.
fn lock_owner(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };
        // EPERM means the process exists under another user.
        !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
    }

    #[cfg(not(unix))]
    {
        std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}")])
            .output()
            .map(|output| String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()))
            .unwrap_or(true)
    }
}
