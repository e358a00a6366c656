//! Directory preparation ahead of installation.

use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use nix::unistd::{FchownatFlags, Gid, Uid, User, fchownat};
use tracing::info;

use crate::error::{Error, Result};

const DIR_MODE: u32 = 0o755;

/// Creates each directory (mode 0755) and, when `owner` is set, hands the whole
/// tree to that account.
///
/// # Errors
///
/// Returns an error if a directory cannot be created, the owner does not exist, or
/// ownership cannot be changed.
pub fn ensure_dirs<P: AsRef<Path>>(paths: &[P], owner: Option<&str>) -> Result<()> {
    let ids = owner.map(lookup_ids).transpose()?;

    for path in paths {
        let path = path.as_ref();
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(path)
            .map_err(|e| Error::Io("failed to create directory", e))?;

        if let Some((uid, gid)) = ids {
            chown_recursive(path, uid, gid)?;
        }

        info!(target: "install", "ensured directory exists: {}", path.display());
    }

    Ok(())
}

fn lookup_ids(name: &str) -> Result<(Uid, Gid)> {
    let user = User::from_name(name)
        .map_err(|e| Error::UserLookup(name.to_string(), e))?
        .ok_or_else(|| Error::UnknownUser(name.to_string()))?;

    Ok((user.uid, user.gid))
}

/// Changes ownership of `path` and everything below it. Symlinks themselves are
/// changed, never their targets, and symlinked directories are not descended into.
fn chown_recursive(path: &Path, uid: Uid, gid: Gid) -> Result<()> {
    fchownat(
        None,
        path,
        Some(uid),
        Some(gid),
        FchownatFlags::NoFollowSymlink,
    )
    .map_err(|e| Error::Ownership(path.to_path_buf(), e))?;

    let metadata =
        std::fs::symlink_metadata(path).map_err(|e| Error::Io("failed to stat path", e))?;
    if !metadata.is_dir() {
        return Ok(());
    }

    for entry in std::fs::read_dir(path).map_err(|e| Error::Io("failed to read directory", e))? {
        let entry = entry.map_err(|e| Error::Io("failed to read directory entry", e))?;
        chown_recursive(&entry.path(), uid, gid)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn test_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("pgsql");
        let other = dir.path().join("tmp");

        ensure_dirs(&[&nested, &other], None).unwrap();

        assert!(nested.is_dir());
        assert!(other.is_dir());
        let mode = std::fs::metadata(&nested).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o022, 0, "directory must not be group/world writable");
    }

    #[test]
    fn test_existing_directory_is_fine() {
        let dir = tempfile::tempdir().unwrap();

        ensure_dirs(&[dir.path()], None).unwrap();
        ensure_dirs(&[dir.path()], None).unwrap();
    }

    #[test]
    fn test_chown_does_not_follow_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("pgsql");
        std::fs::create_dir(&data).unwrap();
        std::fs::write(data.join("PG_VERSION"), "17\n").unwrap();
        // A dangling link only chowns cleanly when the link itself is changed.
        std::os::unix::fs::symlink("/nonexistent/dbcp/pg_wal", data.join("pg_wal")).unwrap();

        chown_recursive(dir.path(), Uid::current(), Gid::current()).unwrap();
    }

    #[test]
    fn test_unknown_owner_is_rejected_before_creating_anything() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("never");

        let err = ensure_dirs(&[&target], Some("dbcp-no-such-user")).unwrap_err();

        assert!(matches!(err, Error::UnknownUser(_)));
        assert!(!target.exists());
    }
}
