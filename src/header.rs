//! Owned snapshots of tar entry headers.
//!
//! The `tar` crate hands out entries that borrow the archive reader, and the numeric
//! header fields are only the legacy ustar values.  The metadata pass runs after the whole
//! stream has been consumed, so everything it needs is copied out here, with PAX records
//! taking precedence over the fixed-size fields they extend.

use std::{
    io::{self, Read},
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use tar::{Entry, EntryType};

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// A point in time as seconds and nanoseconds relative to the Unix epoch.
///
/// `nanos` is always in `0..1_000_000_000`; times before the epoch have negative `secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn from_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                secs: d.as_secs() as i64,
                nanos: d.subsec_nanos(),
            },
            Err(e) => {
                let d = e.duration();
                Self::from_secs(-(d.as_secs() as i64)).minus_nanos(d.subsec_nanos())
            }
        }
    }

    fn minus_nanos(self, nanos: u32) -> Self {
        if nanos == 0 {
            self
        } else {
            Self {
                secs: self.secs - 1,
                nanos: NANOS_PER_SEC - nanos,
            }
        }
    }

    /// Parses a PAX time record like `1453146164.953123768` or `-1.5`.
    ///
    /// Digits beyond nanosecond precision are truncated.
    pub fn from_pax(value: &str) -> io::Result<Self> {
        let invalid = || {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid PAX timestamp {value:?}"),
            )
        };

        let (negative, digits) = match value.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, value),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

        if whole.is_empty() || !whole.bytes().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if !frac.bytes().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let secs: i64 = whole.parse().map_err(|_| invalid())?;
        let mut nanos = 0u32;
        for (i, c) in frac.bytes().take(9).enumerate() {
            nanos += u32::from(c - b'0') * 10u32.pow(8 - i as u32);
        }

        Ok(if negative {
            Self::from_secs(-secs).minus_nanos(nanos)
        } else {
            Self { secs, nanos }
        })
    }
}

impl From<Timestamp> for SystemTime {
    fn from(ts: Timestamp) -> Self {
        let base = if ts.secs >= 0 {
            UNIX_EPOCH + std::time::Duration::from_secs(ts.secs as u64)
        } else {
            UNIX_EPOCH - std::time::Duration::from_secs(ts.secs.unsigned_abs())
        };
        base + std::time::Duration::from_nanos(ts.nanos.into())
    }
}

/// Everything the extractor needs to know about one archive entry.
#[derive(Debug, Clone)]
pub struct EntryHeader {
    /// The entry name as stored in the archive (after GNU long name and PAX `path`).
    pub path: PathBuf,
    pub entry_type: EntryType,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    /// Symbolic owner, `None` when the archive leaves it empty.
    pub username: Option<String>,
    pub groupname: Option<String>,
    pub mtime: Timestamp,
    /// Only set when the archive carries a PAX `atime` record.
    pub atime: Option<Timestamp>,
    pub link_target: Option<PathBuf>,
    pub size: u64,
    pub device_major: u32,
    pub device_minor: u32,
}

impl EntryHeader {
    /// A header with no owner names, no link target and zeroed numbers.
    ///
    /// Mostly useful for building entries by hand.
    pub fn new(path: impl Into<PathBuf>, entry_type: EntryType, mode: u32) -> Self {
        Self {
            path: path.into(),
            entry_type,
            mode,
            uid: 0,
            gid: 0,
            username: None,
            groupname: None,
            mtime: Timestamp::default(),
            atime: None,
            link_target: None,
            size: 0,
            device_major: 0,
            device_minor: 0,
        }
    }

    /// Copies the header of `entry`, applying any PAX extended records.
    pub fn from_entry<R: Read>(entry: &mut Entry<'_, R>) -> io::Result<Self> {
        let header = entry.header();
        let entry_type = header.entry_type();

        // only meaningful for devices; other entries often leave the fields NUL-filled
        let (device_major, device_minor) = match entry_type {
            EntryType::Char | EntryType::Block => (
                header.device_major()?.unwrap_or(0),
                header.device_minor()?.unwrap_or(0),
            ),
            _ => (0, 0),
        };

        let mut snapshot = Self {
            path: entry.path()?.into_owned(),
            entry_type,
            mode: header.mode()?,
            uid: header.uid()?,
            gid: header.gid()?,
            username: non_empty(header.username_bytes()),
            groupname: non_empty(header.groupname_bytes()),
            mtime: Timestamp::from_secs(header.mtime()? as i64),
            atime: None,
            link_target: entry.link_name()?.map(|l| l.into_owned()),
            size: entry.size(),
            device_major,
            device_minor,
        };

        if let Some(extensions) = entry.pax_extensions()? {
            for extension in extensions {
                let extension = extension?;
                let (Ok(key), Ok(value)) = (extension.key(), extension.value()) else {
                    continue;
                };
                snapshot.apply_pax_record(key, value)?;
            }
        }

        Ok(snapshot)
    }

    fn apply_pax_record(&mut self, key: &str, value: &str) -> io::Result<()> {
        let invalid = || {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid PAX record {key}={value:?}"),
            )
        };

        match key {
            "mtime" => self.mtime = Timestamp::from_pax(value)?,
            "atime" => self.atime = Some(Timestamp::from_pax(value)?),
            "uid" => self.uid = value.parse().map_err(|_| invalid())?,
            "gid" => self.gid = value.parse().map_err(|_| invalid())?,
            "uname" => self.username = Some(value.to_owned()).filter(|s| !s.is_empty()),
            "gname" => self.groupname = Some(value.to_owned()).filter(|s| !s.is_empty()),
            _ => {}
        }
        Ok(())
    }

    /// The raw one-byte type flag, as used in diagnostics.
    pub fn type_tag(&self) -> u8 {
        self.entry_type.as_byte()
    }

    pub fn is_symlink(&self) -> bool {
        self.entry_type == EntryType::Symlink
    }

    /// Permission bits only (including setuid, setgid and sticky).
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

fn non_empty(bytes: Option<&[u8]>) -> Option<String> {
    bytes
        .filter(|b| !b.is_empty())
        .map(|b| String::from_utf8_lossy(b).into_owned())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_pax_timestamps() {
        assert_eq!(
            Timestamp::from_pax("1453146164.953123768").unwrap(),
            Timestamp {
                secs: 1453146164,
                nanos: 953123768
            }
        );
        assert_eq!(
            Timestamp::from_pax("1453251915.24892486").unwrap(),
            Timestamp {
                secs: 1453251915,
                nanos: 248924860
            }
        );
        assert_eq!(Timestamp::from_pax("42").unwrap(), Timestamp::from_secs(42));
        // more than nanosecond precision is truncated
        assert_eq!(
            Timestamp::from_pax("1.1234567899").unwrap(),
            Timestamp {
                secs: 1,
                nanos: 123456789
            }
        );
        // before the epoch
        assert_eq!(
            Timestamp::from_pax("-1.5").unwrap(),
            Timestamp {
                secs: -2,
                nanos: 500000000
            }
        );
        assert_eq!(Timestamp::from_pax("-3").unwrap(), Timestamp::from_secs(-3));

        for bad in ["", ".5", "1.x", "abc", "1e9", "--1"] {
            assert!(Timestamp::from_pax(bad).is_err(), "{bad:?} parsed");
        }
    }

    #[test]
    fn test_timestamp_to_system_time() {
        let ts = Timestamp {
            secs: 10,
            nanos: 5,
        };
        assert_eq!(
            SystemTime::from(ts),
            UNIX_EPOCH + std::time::Duration::new(10, 5)
        );
        let ts = Timestamp {
            secs: -2,
            nanos: 500_000_000,
        };
        assert_eq!(
            SystemTime::from(ts),
            UNIX_EPOCH - std::time::Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_pax_records_override_header() {
        let mut header = EntryHeader::new("f", EntryType::Regular, 0o644);
        header.username = Some("nobody".into());

        header.apply_pax_record("uid", "1000").unwrap();
        header.apply_pax_record("gname", "wheel").unwrap();
        header.apply_pax_record("uname", "").unwrap();
        header.apply_pax_record("atime", "7.25").unwrap();
        header.apply_pax_record("SCHILY.xattr.user.x", "y").unwrap();

        assert_eq!(header.uid, 1000);
        assert_eq!(header.username, None);
        assert_eq!(header.groupname.as_deref(), Some("wheel"));
        assert_eq!(
            header.atime,
            Some(Timestamp {
                secs: 7,
                nanos: 250_000_000
            })
        );
        assert!(header.apply_pax_record("gid", "x").is_err());
    }

    #[test]
    fn test_from_gnu_entries() {
        let mut builder = tar::Builder::new(vec![]);
        let gnu = |entry_type, mode| {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(entry_type);
            header.set_mode(mode);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mtime(1000);
            header.set_size(0);
            header
        };

        let mut dir = gnu(EntryType::Directory, 0o755);
        builder.append_data(&mut dir, "dir/", std::io::empty()).unwrap();
        let mut file = gnu(EntryType::Regular, 0o644);
        file.set_size(5);
        builder.append_data(&mut file, "dir/f", &b"hello"[..]).unwrap();
        let mut null = gnu(EntryType::Char, 0o666);
        null.set_device_major(1).unwrap();
        null.set_device_minor(3).unwrap();
        builder.append_data(&mut null, "null", std::io::empty()).unwrap();
        let data = builder.into_inner().unwrap();

        let mut archive = tar::Archive::new(&data[..]);
        let headers: Vec<EntryHeader> = archive
            .entries()
            .unwrap()
            .map(|entry| EntryHeader::from_entry(&mut entry.unwrap()).unwrap())
            .collect();

        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].path, Path::new("dir/"));
        assert_eq!(headers[0].entry_type, EntryType::Directory);
        assert_eq!((headers[0].device_major, headers[0].device_minor), (0, 0));
        assert_eq!(headers[1].size, 5);
        assert_eq!(headers[1].permissions(), 0o644);
        assert_eq!(headers[1].mtime, Timestamp::from_secs(1000));
        assert_eq!((headers[2].device_major, headers[2].device_minor), (1, 3));
    }
}
