//! Streaming extraction: create every entry as it comes past, stamp metadata at the end.

use std::{
    fs::{DirBuilder, File},
    io::{self, ErrorKind, Read},
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
};

use log::debug;
use rustix::fs::{openat, symlinkat, Mode, OFlags, CWD};
use tar::{Archive, EntryType};

use crate::{
    error::{Error, Result},
    header::EntryHeader,
    metadata::{MetadataApplier, UnixMetadata},
    special::{SpecialFileCreator, UnixSpecialFiles},
    tree::MetadataTree,
    util::{check_beneath, copy_exact, ensure_parent, join_within},
};

/// Name some writers give the entry carrying PAX global records.
const PAX_GLOBAL_HEADER_NAME: &str = "pax_global_header";

/// Knobs for [`extract_with_options()`].
#[derive(Debug, Default, Clone)]
pub struct ExtractOptions {
    /// Use the numeric uid/gid from the archive even when owner names are present.
    pub numeric_owner: bool,
}

/// Extracts a tar stream into `target` with the default behaviour.
///
/// See [`Unpacker::unpack()`].
pub fn extract(reader: impl Read, target: impl AsRef<Path>) -> Result<()> {
    extract_with_options(reader, target, &ExtractOptions::default())
}

pub fn extract_with_options(
    reader: impl Read,
    target: impl AsRef<Path>,
    options: &ExtractOptions,
) -> Result<()> {
    Unpacker::with_strategies(
        target.as_ref(),
        UnixMetadata::new(options.numeric_owner),
        UnixSpecialFiles,
    )
    .unpack(reader)
}

/// Whether an entry only carries information for the parser and has nothing to create.
fn is_skipped(header: &EntryHeader) -> bool {
    header.path == Path::new(PAX_GLOBAL_HEADER_NAME)
        || matches!(
            header.entry_type,
            EntryType::Continuous | EntryType::XGlobalHeader | EntryType::XHeader
        )
}

fn write_regular(reader: &mut impl Read, header: &EntryHeader, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let fd = openat(
        CWD,
        path,
        OFlags::CREATE | OFlags::TRUNC | OFlags::WRONLY | OFlags::CLOEXEC | OFlags::NOFOLLOW,
        Mode::from_raw_mode(0o666),
    )?;
    let mut file = File::from(fd);
    copy_exact(reader, &mut file, header.size)?;
    file.sync_all()?;
    Ok(())
}

fn write_symlink(header: &EntryHeader, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let target = header.link_target.as_deref().unwrap_or(Path::new(""));
    symlinkat(target, CWD, path)?;
    Ok(())
}

fn write_directory(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                "exists and is not a directory",
            )
            .into())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    ensure_parent(path)?;
    // owner-only until the metadata pass, so it can be populated whatever the archive says
    DirBuilder::new().mode(0o700).create(path)?;
    Ok(())
}

/// Extracts archives into one target directory.
///
/// The metadata applier and the special file strategy are pluggable; [`extract()`] uses
/// [`UnixMetadata`] and [`UnixSpecialFiles`].
#[derive(Debug)]
pub struct Unpacker<A, S> {
    target: PathBuf,
    applier: A,
    special: S,
}

impl Unpacker<UnixMetadata, UnixSpecialFiles> {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self::with_strategies(target, UnixMetadata::default(), UnixSpecialFiles)
    }
}

impl<A: MetadataApplier, S: SpecialFileCreator> Unpacker<A, S> {
    pub fn with_strategies(target: impl Into<PathBuf>, applier: A, special: S) -> Self {
        Self {
            target: target.into(),
            applier,
            special,
        }
    }

    pub fn applier(&self) -> &A {
        &self.applier
    }

    pub fn into_applier(self) -> A {
        self.applier
    }

    /// Creates the filesystem object for one entry and returns where it was put.
    ///
    /// `reader` is the entry's content; only regular files read from it.
    pub fn materialize(&self, header: &EntryHeader, reader: &mut impl Read) -> Result<PathBuf> {
        let path = join_within(&self.target, &header.path)?;
        check_beneath(&self.target, &path, &header.path)?;

        let created = match header.entry_type {
            EntryType::Regular => write_regular(reader, header, &path),
            EntryType::Directory => write_directory(&path),
            EntryType::Symlink => write_symlink(header, &path),
            _ => self.special.create(&self.target, header, &path),
        };
        created.map_err(|e| Error::unpack(&path, e))?;

        Ok(path)
    }

    /// Unpacks every entry of `reader`, then applies all recorded metadata in postorder.
    ///
    /// Stops at the first error, leaving whatever was created so far on disk.  An archive
    /// without any materialized entry fails with `Error::MissingRoot`.
    pub fn unpack(&mut self, reader: impl Read) -> Result<()> {
        let mut tree = MetadataTree::new(&self.target);
        let mut archive = Archive::new(reader);

        for entry in archive.entries().map_err(Error::Archive)? {
            let mut entry = entry.map_err(Error::Archive)?;
            let header = EntryHeader::from_entry(&mut entry).map_err(Error::Archive)?;

            if is_skipped(&header) {
                debug!("skipping {:?} entry {:?}", header.entry_type, header.path);
                continue;
            }

            let path = self.materialize(&header, &mut entry)?;
            debug!("unpacked {path:?}");
            tree.add(path, header)?;
        }

        tree.apply_all(&mut self.applier)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_is_skipped() {
        let skipped = |name: &str, ty| is_skipped(&EntryHeader::new(name, ty, 0));

        assert!(skipped("pax_global_header", EntryType::Regular));
        assert!(skipped("x", EntryType::XGlobalHeader));
        assert!(skipped("x", EntryType::XHeader));
        assert!(skipped("x", EntryType::Continuous));
        assert!(!skipped("x", EntryType::Regular));
        assert!(!skipped("dir/pax_global_header", EntryType::Regular));
    }

    #[test]
    fn test_materialize() {
        let td = tempfile::tempdir().unwrap();
        let unpacker = Unpacker::new(td.path());

        // parents are created on demand
        let mut file = EntryHeader::new("p/q/f", EntryType::Regular, 0o644);
        file.size = 2;
        unpacker.materialize(&file, &mut &b"hi"[..]).unwrap();
        assert_eq!(fs::read(td.path().join("p/q/f")).unwrap(), b"hi");

        let dir = EntryHeader::new("a/b/", EntryType::Directory, 0o755);
        assert_eq!(
            unpacker.materialize(&dir, &mut std::io::empty()).unwrap(),
            td.path().join("a/b")
        );
        // again, already existing
        unpacker.materialize(&dir, &mut std::io::empty()).unwrap();

        let mut file = EntryHeader::new("a/b/f", EntryType::Regular, 0o644);
        file.size = 3;
        unpacker
            .materialize(&file, &mut &b"abcdef"[..])
            .unwrap();
        assert_eq!(fs::read(td.path().join("a/b/f")).unwrap(), b"abc");

        // truncated content
        file.size = 10;
        let err = unpacker.materialize(&file, &mut &b"abc"[..]).unwrap_err();
        assert!(matches!(err, Error::Unpack { .. }));

        let mut link = EntryHeader::new("l", EntryType::Symlink, 0o777);
        link.link_target = Some("a/b/f".into());
        unpacker.materialize(&link, &mut std::io::empty()).unwrap();
        assert_eq!(
            fs::read_link(td.path().join("l")).unwrap(),
            Path::new("a/b/f")
        );

        let escape = EntryHeader::new("../x", EntryType::Regular, 0o644);
        assert!(matches!(
            unpacker
                .materialize(&escape, &mut std::io::empty())
                .unwrap_err(),
            Error::EscapesRoot(_)
        ));
    }

    #[test]
    fn test_materialize_through_symlink() {
        let td = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let unpacker = Unpacker::new(td.path());

        let mut link = EntryHeader::new("esc", EntryType::Symlink, 0o777);
        link.link_target = Some(outside.path().into());
        unpacker.materialize(&link, &mut std::io::empty()).unwrap();

        for (name, entry_type) in [
            ("esc/pwned", EntryType::Regular),
            ("esc/sub/pwned", EntryType::Regular),
            ("esc/dir/", EntryType::Directory),
        ] {
            let header = EntryHeader::new(name, entry_type, 0o644);
            assert!(matches!(
                unpacker
                    .materialize(&header, &mut std::io::empty())
                    .unwrap_err(),
                Error::EscapesRoot(_)
            ));
        }
        assert_eq!(fs::read_dir(outside.path()).unwrap().count(), 0);

        // the symlink itself is not replaced or written through
        let file = EntryHeader::new("esc", EntryType::Regular, 0o644);
        assert!(matches!(
            unpacker.materialize(&file, &mut std::io::empty()),
            Err(Error::Unpack { .. })
        ));
        let dir = EntryHeader::new("esc/", EntryType::Directory, 0o755);
        assert!(matches!(
            unpacker.materialize(&dir, &mut std::io::empty()),
            Err(Error::Unpack { .. })
        ));
        assert!(fs::symlink_metadata(td.path().join("esc"))
            .unwrap()
            .file_type()
            .is_symlink());
    }
}
