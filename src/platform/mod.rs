use std::path::{Path, PathBuf};

/// OS-specific operations behind one interface so call sites stay free of
/// `#[cfg]` blocks.
pub trait Platform {
    /// Ask the process identified by `pid` to terminate.
    fn kill_process(pid: &str) -> std::io::Result<std::process::Output>;

    /// Whether a process with this id is still running.
    fn is_process_alive(pid: &str) -> bool;

    /// Spawn a child that follows a log file.
    fn tail_file(path: &Path) -> std::io::Result<std::process::Child>;

    /// 0o700 on Unix, no-op on Windows.
    fn restrict_dir_permissions(path: &Path);

    /// 0o600 on Unix, no-op on Windows.
    fn restrict_file_permissions(path: &Path);

    /// Root data directory.
    /// Unix: `~/.finesse-watch`, Windows: `%APPDATA%\finesse-watch`.
    fn data_dir() -> PathBuf;
}

pub const DATA_DIR_ENV: &str = "FINESSE_WATCH_DATA_DIR";

/// `FINESSE_WATCH_DATA_DIR` overrides the platform default.
pub fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
        _ => default,
    }
}

/// Create the data directory (and `run/`) with restrictive permissions.
pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = NativePlatform::data_dir();
    std::fs::create_dir_all(dir.join("run"))?;
    NativePlatform::restrict_dir_permissions(&dir);
    Ok(dir)
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
