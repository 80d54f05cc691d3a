//! Small process-related helpers shared across the workspace: no-window
//! child processes on Windows, and locating/validating the external
//! transcoder binary before it is handed arguments.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Environment variable overriding transcoder discovery.
pub const TRANSCODER_ENV: &str = "TRACKFETCH_FFMPEG";

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(windows)]
const FFMPEG_NAMES: &[&str] = &["ffmpeg.exe"];
#[cfg(not(windows))]
const FFMPEG_NAMES: &[&str] = &["ffmpeg"];

/// Locate the ffmpeg binary: the `TRACKFETCH_FFMPEG` override first, then
/// every directory on `PATH`.
pub fn find_transcoder() -> io::Result<PathBuf> {
    if let Some(explicit) = std::env::var_os(TRANSCODER_ENV) {
        return Ok(PathBuf::from(explicit));
    }

    let path = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path) {
        for name in FFMPEG_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("ffmpeg not found on PATH (set {TRANSCODER_ENV} to override)"),
    ))
}

/// Check that `path` is a genuine executable before invoking it with
/// caller-controlled arguments: it must exist, not be a symlink, be a
/// regular file, and carry an execute bit on unix. Rejecting symlinks
/// closes off binary-substitution tricks via link swaps.
pub fn validate_executable(path: &Path) -> io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;

    if metadata.file_type().is_symlink() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is a symlink, refusing to execute", path.display()),
        ));
    }
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is not executable", path.display()),
            ));
        }
    }

    Ok(())
}
