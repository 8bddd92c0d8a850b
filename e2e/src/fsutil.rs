use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use fs2::FileExt;

use crate::error::Error;

/// Write `data` to `path` while holding an exclusive lock on the file, then
/// apply the `mode` permission bits (ignored on non-unix hosts).
pub fn write_locked(path: &Path, data: &[u8], mode: u32) -> Result<(), Error> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.lock_exclusive()?;
    let written = file
        .set_len(0)
        .and_then(|_| file.write_all(data))
        .and_then(|_| file.sync_all());
    let unlocked = file.unlock();
    written?;
    unlocked?;
    set_mode(path, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrites_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fromhost");
        write_locked(&path, b"a much longer first version\n", 0o644).unwrap();
        write_locked(&path, b"test\n", 0o644).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"test\n");
    }

    #[test]
    fn arbitrary_bytes_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let data: Vec<u8> = (0u8..=255).collect();
        write_locked(&path, &data, 0o600).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[cfg(unix)]
    #[test]
    fn applies_permission_bits() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minikube-linux-amd64");
        write_locked(&path, b"#!/bin/sh\n", 0o755).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
