//! Entry kinds that don't exist everywhere: hard links, device nodes and FIFOs.

use std::path::{Path, PathBuf};

use rustix::fs::{linkat, makedev, mknodat, AtFlags, FileType, Mode, RawMode, CWD};
use tar::EntryType;

use crate::{
    error::{Error, Result},
    header::EntryHeader,
    util::{check_beneath, ensure_parent, join_within},
};

const S_IFIFO: RawMode = 0o010000;
const S_IFCHR: RawMode = 0o020000;
const S_IFBLK: RawMode = 0o060000;

/// Creates the filesystem objects for entries that aren't directories, regular files or
/// symlinks.
///
/// Implementations must not create anything when they return `Error::UnsupportedType`.
pub trait SpecialFileCreator {
    /// Creates the object described by `header` at `path`.  `root` is the extraction
    /// directory, against which relative hard link targets are resolved.
    fn create(&self, root: &Path, header: &EntryHeader, path: &Path) -> Result<()>;
}

/// Combines the permission bits of `mode` with the file type bits for `entry_type`.
///
/// Returns `None` for anything that isn't a character device, block device or FIFO.
pub fn special_mode(entry_type: EntryType, mode: u32) -> Option<RawMode> {
    let type_bits = match entry_type {
        EntryType::Char => S_IFCHR,
        EntryType::Block => S_IFBLK,
        EntryType::Fifo => S_IFIFO,
        _ => return None,
    };
    Some(type_bits | (mode & 0o7777) as RawMode)
}

/// Where a hard link entry should point to.
///
/// Absolute targets are taken as they are.  Relative targets are relative to the
/// extraction root, not to the directory containing the link: that's how tar stores them.
/// They may not lead out of the root, lexically or through a symlinked directory.
pub fn hardlink_target(root: &Path, target: &Path) -> Result<PathBuf> {
    if target.is_absolute() {
        return Ok(target.into());
    }
    let path = join_within(root, target)?;
    check_beneath(root, &path, target)?;
    Ok(path)
}

/// `link()` and `mknod()` based creation for Unix-like systems.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSpecialFiles;

impl UnixSpecialFiles {
    fn create_hardlink(&self, root: &Path, header: &EntryHeader, path: &Path) -> Result<()> {
        let target = header.link_target.as_deref().unwrap_or(Path::new(""));
        let target = hardlink_target(root, target)?;
        ensure_parent(path)?;
        linkat(CWD, &target, CWD, path, AtFlags::empty())?;
        Ok(())
    }

    fn create_node(&self, raw_mode: RawMode, header: &EntryHeader, path: &Path) -> Result<()> {
        let dev = makedev(header.device_major, header.device_minor);
        ensure_parent(path)?;
        mknodat(
            CWD,
            path,
            FileType::from_raw_mode(raw_mode),
            Mode::from_raw_mode(raw_mode),
            dev,
        )?;
        Ok(())
    }
}

impl SpecialFileCreator for UnixSpecialFiles {
    fn create(&self, root: &Path, header: &EntryHeader, path: &Path) -> Result<()> {
        if header.entry_type == EntryType::Link {
            return self.create_hardlink(root, header, path);
        }

        match special_mode(header.entry_type, header.mode) {
            Some(raw_mode) => self.create_node(raw_mode, header, path),
            None => Err(Error::UnsupportedType(header.type_tag())),
        }
    }
}

/// For platforms without hard links, device nodes or FIFOs: every entry is unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSpecialFiles;

impl SpecialFileCreator for NoSpecialFiles {
    fn create(&self, _root: &Path, header: &EntryHeader, _path: &Path) -> Result<()> {
        Err(Error::UnsupportedType(header.type_tag()))
    }
}
