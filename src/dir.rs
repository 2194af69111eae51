use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

pub fn create_parent_dirs(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Removes the parent directories of `path` bottom-up while they are empty, stopping at
/// `root` (which is kept). Best effort: the first failed removal ends the walk.
pub fn remove_empty_parents(path: &Path, root: &Path) {
    let (Ok(path), Ok(root)) = (std::path::absolute(path), std::path::absolute(root)) else {
        return;
    };

    let mut dir: PathBuf = match path.parent() {
        Some(parent) => parent.to_path_buf(),
        None => return,
    };

    while dir != root && dir.starts_with(&root) {
        if let Err(e) = fs::remove_dir(&dir) {
            trace!(dir = %dir.display(), error = %e, "stopped removing empty directories");
            return;
        }

        if !dir.pop() {
            return;
        }
    }
}
