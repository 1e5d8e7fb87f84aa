//! OS-specific plumbing: intercept entries, real-command resolution, and
//! process-group lifecycle.
//!
//! Intercept entries are what makes the dual-mode binary answer to tool
//! names: a symlink on Unix, a `.cmd` delegator on Windows. Resolution of
//! the "real" command excludes the intercept/shim directory so a shim never
//! recursively resolves to itself.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("failed to create intercept entry {path}: {source}")]
    Entry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create intercept directory {path}: {source}")]
    Dir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Create the per-session intercept directory in the platform temp dir,
/// owner-only on Unix.
pub fn create_intercept_dir(session: &str) -> Result<PathBuf, PlatformError> {
    let dir = std::env::temp_dir().join(format!("cli-replay-intercept-{session}"));
    std::fs::create_dir_all(&dir).map_err(|source| PlatformError::Dir {
        path: dir.clone(),
        source,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        let _ = std::fs::set_permissions(&dir, perms);
    }
    Ok(dir)
}

/// Create one per-command alias inside the intercept directory.
#[cfg(unix)]
pub fn create_intercept_entry(
    dir: &Path,
    alias: &str,
    self_exe: &Path,
) -> Result<PathBuf, PlatformError> {
    let entry = dir.join(alias);
    match std::os::unix::fs::symlink(self_exe, &entry) {
        Ok(()) => Ok(entry),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(entry),
        Err(source) => Err(PlatformError::Entry {
            path: entry,
            source,
        }),
    }
}

/// Windows has no reliable symlink story for unprivileged users, so the
/// alias is a `.cmd` delegator that names itself via `CLI_REPLAY_ALIAS`.
#[cfg(not(unix))]
pub fn create_intercept_entry(
    dir: &Path,
    alias: &str,
    self_exe: &Path,
) -> Result<PathBuf, PlatformError> {
    let entry = dir.join(format!("{alias}.cmd"));
    let script = format!(
        "@echo off\r\nset \"CLI_REPLAY_ALIAS={alias}\"\r\n\"{}\" %*\r\n",
        self_exe.display()
    );
    std::fs::write(&entry, script).map_err(|source| PlatformError::Entry {
        path: entry.clone(),
        source,
    })?;
    Ok(entry)
}

/// Locate a command on PATH, skipping the intercept/shim directory.
pub fn resolve_real_command(name: &str, exclude_dir: &Path) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        if same_dir(&dir, exclude_dir) {
            continue;
        }
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        #[cfg(not(unix))]
        {
            for ext in ["exe", "cmd", "bat"] {
                let with_ext = dir.join(format!("{name}.{ext}"));
                if with_ext.is_file() {
                    return Some(with_ext);
                }
            }
        }
    }
    None
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && path
            .metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Send a signal to the child's whole process group. "No such process" is
/// not an error; the group may already be gone.
#[cfg(unix)]
pub fn kill_process_group(pgid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    let target = Pid::from_raw(-(pgid as i32));
    match kill(target, signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!("kill({target:?}, {signal:?}) failed: {e}"),
    }
}

/// SIGTERM the group, wait briefly, then SIGKILL whatever is left.
#[cfg(unix)]
pub fn terminate_process_group(pgid: u32) {
    use nix::sys::signal::Signal;
    kill_process_group(pgid, Signal::SIGTERM);
    std::thread::sleep(std::time::Duration::from_millis(100));
    kill_process_group(pgid, Signal::SIGKILL);
}

/// Non-Unix fallback: no job-object containment here, so only the direct
/// child can be addressed; grandchildren may leak.
#[cfg(not(unix))]
pub fn terminate_process_group(_pgid: u32) {
    tracing::warn!("process-group termination is unavailable on this platform; grandchildren may leak");
}
