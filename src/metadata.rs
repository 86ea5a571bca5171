//! Applying ownership, permissions and timestamps to extracted objects.

use std::{fs, io, path::Path};

use log::debug;
use nix::unistd::{Group, User};
use rustix::{
    fs::{chmod, chownat, utimensat, AtFlags, Gid, Mode, Timespec, Timestamps, Uid, CWD},
    io::Errno,
};

use crate::{
    error::{Error, Result},
    header::{EntryHeader, Timestamp},
};

/// Applies the metadata recorded in an archive header to the object at `path`.
///
/// Called once per materialized path, after the whole archive has been unpacked and
/// after every path below `path` has been handled.
pub trait MetadataApplier {
    fn apply(&mut self, path: &Path, header: &EntryHeader) -> Result<()>;
}

/// Resolves the owner and group an entry should end up with.
///
/// Symbolic names win over the numeric ids when present, unless `numeric_owner` is set.
/// A name that isn't in the account database is an error.
pub fn resolve_owner(header: &EntryHeader, numeric_owner: bool) -> Result<(u32, u32)> {
    let uid = match &header.username {
        Some(name) if !numeric_owner => {
            match User::from_name(name).map_err(|source| lookup_failed(name, source))? {
                Some(user) => user.uid.as_raw(),
                None => return Err(Error::UnknownUser(name.clone())),
            }
        }
        _ => raw_id("uid", header.uid)?,
    };

    let gid = match &header.groupname {
        Some(name) if !numeric_owner => {
            match Group::from_name(name).map_err(|source| lookup_failed(name, source))? {
                Some(group) => group.gid.as_raw(),
                None => return Err(Error::UnknownGroup(name.clone())),
            }
        }
        _ => raw_id("gid", header.gid)?,
    };

    Ok((uid, gid))
}

fn lookup_failed(name: &str, source: nix::Error) -> Error {
    Error::AccountLookup {
        name: name.to_owned(),
        source,
    }
}

/// Archive ids are up to 64 bits wide (PAX), the system's are 32.
fn raw_id(kind: &str, id: u64) -> Result<u32> {
    u32::try_from(id).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{kind} {id} out of range"),
        )
        .into()
    })
}

fn to_timespec(ts: Timestamp) -> Timespec {
    Timespec {
        tv_sec: ts.secs as _,
        tv_nsec: ts.nanos as _,
    }
}

// rustix only hands out ids through unsafe constructors
fn ids_from_raw(uid: u32, gid: u32) -> (Uid, Gid) {
    unsafe { (Uid::from_raw(uid), Gid::from_raw(gid)) }
}

/// The metadata applier for Unix-like systems.
///
/// Applies ownership, then permission bits, then timestamps.  A chown may clear the
/// setuid/setgid bits, and both steps may touch the timestamps.
#[derive(Debug, Default, Clone)]
pub struct UnixMetadata {
    /// Ignore symbolic owner and group names and use the numeric ids.
    pub numeric_owner: bool,
}

impl UnixMetadata {
    pub fn new(numeric_owner: bool) -> Self {
        Self { numeric_owner }
    }

    fn apply_ownership(&self, path: &Path, header: &EntryHeader) -> Result<()> {
        let (uid, gid) = resolve_owner(header, self.numeric_owner)?;
        let (owner, group) = ids_from_raw(uid, gid);

        match chownat(CWD, path, Some(owner), Some(group), AtFlags::SYMLINK_NOFOLLOW) {
            Ok(()) => Ok(()),
            // unprivileged extraction of foreign-owned entries
            Err(Errno::PERM | Errno::ACCESS) => {
                debug!("not permitted to change owner of {path:?} to {uid}:{gid}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn apply_permissions(&self, path: &Path, header: &EntryHeader) -> Result<()> {
        // also covers hard links to symlinks, whose header says otherwise
        if header.is_symlink() || fs::symlink_metadata(path)?.file_type().is_symlink() {
            return Ok(());
        }
        chmod(path, Mode::from_raw_mode(header.permissions()))?;
        Ok(())
    }

    fn apply_times(&self, path: &Path, header: &EntryHeader) -> Result<()> {
        let times = Timestamps {
            last_access: to_timespec(header.atime.unwrap_or_else(Timestamp::now)),
            last_modification: to_timespec(header.mtime),
        };
        utimensat(CWD, path, &times, AtFlags::SYMLINK_NOFOLLOW)?;
        Ok(())
    }
}

impl MetadataApplier for UnixMetadata {
    fn apply(&mut self, path: &Path, header: &EntryHeader) -> Result<()> {
        self.apply_ownership(path, header)?;
        self.apply_permissions(path, header)?;
        self.apply_times(path, header)
    }
}
