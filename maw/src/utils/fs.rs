use crate::utils::target_user::TargetUser;
use nix::unistd::chown;
use std::fs;
use std::io;
use std::path::Path;
use tracing::trace;

/// Changes the ownership of `path` to the target user, if any.
pub fn give_to(path: &Path, user: Option<&TargetUser>) -> io::Result<()> {
    let Some(user) = user else {
        return Ok(());
    };
    trace!(path = %path.display(), user = user.name, "changing ownership");
    chown(path, Some(user.uid), Some(user.gid)).map_err(io::Error::from)
}

/// Changes the ownership of `path` and everything below it to the target user, if any.
/// Symbolic links are neither followed nor changed.
pub fn give_tree_to(path: &Path, user: Option<&TargetUser>) -> io::Result<()> {
    if user.is_none() {
        return Ok(());
    }
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    give_to(path, user)?;
    if metadata.is_dir() {
        for entry in fs::read_dir(path)? {
            give_tree_to(&entry?.path(), user)?;
        }
    }
    Ok(())
}

/// Creates `path` and its parents if missing and hands the leaf directory to the target user.
pub fn ensure_dir(path: &Path, user: Option<&TargetUser>) -> io::Result<()> {
    fs::create_dir_all(path)?;
    give_to(path, user)
}
