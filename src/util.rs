use std::{
    fs::DirBuilder,
    io::{self, ErrorKind, Read, Write},
    path::{Component, Path, PathBuf},
};

use crate::error::{Error, Result};

/// The key of the extraction root in relative-path form.
pub(crate) const ROOT_KEY: &str = ".";

/// Lexically joins an archive name onto `root`, the way `filepath.Join` followed by
/// `Clean` would, but refusing to climb above `root`.
///
/// Leading `/` and any `.` components are dropped, so `/etc/passwd`, `./etc/passwd` and
/// `etc/./passwd` all end up at `root/etc/passwd`.  A `..` component removes the
/// previous one.  A trailing `/` makes no difference.
///
/// # Return value
///
/// On success, returns `root` joined with the normalized name; a name that normalizes to
/// nothing (like `./`) returns `root` itself.
///
/// If a `..` would remove a component of `root`, returns `Error::EscapesRoot`.
pub(crate) fn join_within(root: &Path, name: &Path) -> Result<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = vec![];

    for component in name.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(Error::EscapesRoot(name.into()));
                }
            }
            Component::Normal(part) => parts.push(part),
        }
    }

    let mut path = root.to_path_buf();
    path.extend(parts);
    Ok(path)
}

/// Checks that the directory `path` will be created in stays below `root` once symlinks
/// are resolved.
///
/// Only the deepest ancestor of `path` that already exists is resolved: whatever is
/// missing below it gets created as plain directories.  An ancestor at or above `root`
/// is not checked.  `name` is the archive name, for the error.
///
/// Returns `Error::EscapesRoot` if an existing symlink leads out of `root`.
pub(crate) fn check_beneath(root: &Path, path: &Path, name: &Path) -> Result<()> {
    let mut ancestor = path.parent();

    while let Some(dir) = ancestor {
        if dir == root || !dir.starts_with(root) {
            return Ok(());
        }
        match dir.symlink_metadata() {
            Ok(_) => {
                if !dir.canonicalize()?.starts_with(root.canonicalize()?) {
                    return Err(Error::EscapesRoot(name.into()));
                }
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => ancestor = dir.parent(),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Computes the tree key of `full_path`: its path relative to `root`, or `.` for `root`
/// itself.
///
/// Returns `Error::OutsideRoot` if `full_path` doesn't start with `root`.
pub(crate) fn relative_key(root: &Path, full_path: &Path) -> Result<PathBuf> {
    let rel = full_path
        .strip_prefix(root)
        .map_err(|_| Error::OutsideRoot(full_path.into()))?;

    let mut key = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => key.push(part),
            Component::CurDir => {}
            _ => return Err(Error::OutsideRoot(full_path.into())),
        }
    }

    if key.as_os_str().is_empty() {
        key.push(ROOT_KEY);
    }
    Ok(key)
}

/// The key of the parent of `key`, with top-level entries belonging to `.`.  The root
/// itself has no parent.
pub(crate) fn parent_key(key: &Path) -> Option<PathBuf> {
    if key == Path::new(ROOT_KEY) {
        return None;
    }
    match key.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Some(parent.into()),
        _ => Some(ROOT_KEY.into()),
    }
}

/// Creates the directories leading up to `path` if an archive didn't carry entries for
/// them.  They get the default mode (subject to umask); an entry for them later in the
/// stream will fix that up.
pub(crate) fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            DirBuilder::new().recursive(true).create(parent)
        }
        _ => Ok(()),
    }
}

/// Copies exactly `size` bytes from `reader` to `writer`.
///
/// Unlike `std::io::copy()`, running out of input early is an error
/// (`ErrorKind::UnexpectedEof`) rather than a short count.
pub(crate) fn copy_exact(
    reader: &mut impl Read,
    writer: &mut impl Write,
    size: u64,
) -> io::Result<()> {
    let copied = io::copy(&mut reader.take(size), writer)?;
    if copied != size {
        return Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("expected {size} bytes of content, got {copied}"),
        ));
    }
    Ok(())
}
