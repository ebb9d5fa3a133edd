//! Single-instance program lock
//!
//! At most one program may drive a physical chamber at a time. The lock is a
//! file created exclusively by the holder; it records the holder's PID and a
//! one-line description of what it is running, and is removed on drop by the
//! process that still owns it. A lock whose PID no longer exists is stale and
//! is reclaimed on the next acquire.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, Signal, System};
use thiserror::Error;

fn with_process<F, R>(pid: u32, f: F) -> Option<R>
where
    F: FnOnce(&Process) -> R,
{
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map(f)
}

/// Lock error types
#[derive(Error, Debug)]
pub enum LockError {
    /// Another process holds the lock
    #[error("a program is currently running with PID {}: {}", .0.pid, .0.program)]
    Held(LockHolder),

    /// I/O error
    #[error("Lock file {path}: {source}")]
    Io {
        /// Lock file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// Current lock holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Process id
    pub pid: u32,
    /// What the holder is running
    pub program: String,
}

impl LockHolder {
    fn parse(content: &str) -> Option<Self> {
        let mut lines = content.lines();
        let pid = lines.next()?.trim().parse().ok()?;
        let program = lines.next().unwrap_or_default().trim().to_string();
        Some(Self { pid, program })
    }

    /// Whether the recorded process still runs
    pub fn is_alive(&self) -> bool {
        with_process(self.pid, |p| p.status() != ProcessStatus::Zombie).unwrap_or(false)
    }

    /// Ask the holder to terminate and wait up to `wait` for it to exit.
    ///
    /// Returns `true` once the process is gone. This process is never
    /// signalled.
    pub fn terminate(&self, wait: Duration) -> bool {
        if self.pid == std::process::id() {
            return false;
        }

        let signalled = with_process(self.pid, |p| p.kill_with(Signal::Term).unwrap_or_else(|| p.kill()));
        match signalled {
            None => return true,
            Some(false) => {
                tracing::warn!(pid = self.pid, "could not signal lock holder");
                return false;
            }
            Some(true) => tracing::info!(pid = self.pid, "sent SIGTERM to lock holder"),
        }

        let deadline = Instant::now() + wait;
        while Instant::now() < deadline {
            if !self.is_alive() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        !self.is_alive()
    }
}

/// Held program lock, released on drop
#[derive(Debug)]
pub struct ProgramLock {
    path: PathBuf,
    holder: LockHolder,
}

impl ProgramLock {
    /// Take the lock for `program`, failing if a live process holds it
    pub fn acquire(path: impl AsRef<Path>, program: &str) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;
        }

        match Self::create(path.clone(), program) {
            Err(LockError::Held(holder)) if holder.pid != 0 && !holder.is_alive() => {
                tracing::warn!(
                    pid = holder.pid,
                    "reclaiming program lock {} from a process that no longer exists",
                    path.display()
                );
                // Only remove it if nobody reclaimed it in the meantime
                if Self::inspect(&path)?.as_ref() == Some(&holder) {
                    Self::break_stale(&path)?;
                }
                Self::create(path, program)
            }
            other => other,
        }
    }

    fn create(path: PathBuf, program: &str) -> Result<Self, LockError> {
        let io_err = |source: io::Error| LockError::Io {
            path: path.clone(),
            source,
        };

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return match Self::inspect(&path)? {
                    Some(holder) => Err(LockError::Held(holder)),
                    // Unreadable or half-written; report it as held by nobody we know
                    None => Err(LockError::Held(LockHolder {
                        pid: 0,
                        program: "unknown".to_string(),
                    })),
                };
            }
            Err(e) => return Err(io_err(e)),
        };

        let holder = LockHolder {
            pid: std::process::id(),
            program: program.replace('\n', " ").trim().to_string(),
        };
        writeln!(file, "{}\n{}", holder.pid, holder.program).map_err(io_err)?;

        tracing::debug!("acquired program lock {}", path.display());
        Ok(Self { path, holder })
    }

    /// Current holder, if the lock file exists
    pub fn inspect(path: impl AsRef<Path>) -> Result<Option<LockHolder>, LockError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Ok(LockHolder::parse(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Remove a lock left behind by another process
    pub fn break_stale(path: impl AsRef<Path>) -> Result<Option<LockHolder>, LockError> {
        let path = path.as_ref();
        let holder = Self::inspect(path)?;
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::warn!("removed program lock {}", path.display());
                Ok(holder)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(holder),
            Err(source) => Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// This process as recorded in the lock
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    fn owns_file(&self) -> bool {
        matches!(Self::inspect(&self.path), Ok(Some(ref holder)) if *holder == self.holder)
    }
}

impl Drop for ProgramLock {
    fn drop(&mut self) {
        if !self.owns_file() {
            tracing::debug!("program lock {} was taken over, leaving it", self.path.display());
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("failed to remove program lock {}: {}", self.path.display(), e);
        }
    }
}
