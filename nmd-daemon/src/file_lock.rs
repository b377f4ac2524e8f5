use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Default lock location: `<data_local_dir>/nmd/nmd.lock`, or the temp dir.
pub fn default_lock_path() -> PathBuf {
    let mut lock_path = dirs::data_local_dir().unwrap_or(std::env::temp_dir());
    lock_path.push("nmd");
    lock_path.push("nmd.lock");
    lock_path
}

/// Takes the single-instance lock at `lock_path`.
///
/// The lock is held until the returned file is dropped.
pub fn acquire_daemon_lock(lock_path: &Path) -> Result<File, String> {
    if let Some(dir) = lock_path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;
    }
    let file = File::create(lock_path).map_err(|e| format!("Failed to create lock file: {e}"))?;

    // Exclusive lock; fails if another daemon holds it
    file.try_lock_exclusive()
        .map_err(|_| "Another nmd instance is already running".to_string())?;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_fails_until_first_is_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/nmd.lock");

        let first = acquire_daemon_lock(&path).unwrap();
        let err = acquire_daemon_lock(&path).unwrap_err();
        assert!(err.contains("already running"));

        drop(first);
        assert!(acquire_daemon_lock(&path).is_ok());
    }
}
