//! Filesystem helpers for credential files.
//!
//! Everything written here may contain secrets, so directories are created
//! `0700` and files `0600` on unix. Other platforms fall back to the
//! default permissions of the user profile.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Creates `path` and any missing parents with owner-only permissions.
pub fn create_private_dir(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    builder.create(path)?;
    debug!("Created private directory {:?}", path);
    Ok(())
}

/// Writes `contents` to `path` atomically: a uniquely named temp file in the
/// same directory is written, flushed, then renamed over the target.
///
/// The temp name carries the PID and a counter so concurrent writers never
/// share a temp file.
pub fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        ".{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let result = (|| {
        let mut file = options.open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_private_file_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("token.json");

        write_private_file(&path, b"a much longer first version").unwrap();
        write_private_file(&path, b"short").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"short");
    }

    #[test]
    fn test_write_private_file_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("token.json");

        write_private_file(&path, b"{}").unwrap();

        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("token.json")]);
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing").join("token.json");

        assert!(write_private_file(&path, b"{}").is_err());
    }

    #[test]
    fn test_create_private_dir_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a").join("b");

        create_private_dir(&dir).unwrap();
        create_private_dir(&dir).unwrap();

        assert!(dir.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_private_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("client_secrets.json");
        write_private_file(&path, b"{}").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
