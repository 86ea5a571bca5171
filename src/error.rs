use std::{io, path::PathBuf};

use thiserror::Error;

/// Everything that can abort an extraction.
///
/// Creation and metadata failures are wrapped with the path they happened on, so the
/// outermost variant tells you where and the `source()` chain tells you why.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read archive")]
    Archive(#[source] io::Error),
    #[error("failed to unpack {path:?}")]
    Unpack {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },
    #[error("failed to apply metadata to {path:?}")]
    ApplyMetadata {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },
    #[error("unsupported entry type {0:#x}")]
    UnsupportedType(u8),
    #[error("path {0:?} escapes the extraction root")]
    EscapesRoot(PathBuf),
    #[error("path {0:?} is not below the extraction root")]
    OutsideRoot(PathBuf),
    #[error("metadata tree has no root node")]
    MissingRoot,
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("unknown group {0:?}")]
    UnknownGroup(String),
    #[error("failed to look up {name:?} in the account database")]
    AccountLookup {
        name: String,
        #[source]
        source: nix::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn unpack(path: impl Into<PathBuf>, source: Error) -> Self {
        Error::Unpack {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn apply_metadata(path: impl Into<PathBuf>, source: Error) -> Self {
        Error::ApplyMetadata {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Strips the path wrappers and returns the error that actually happened.
    pub fn innermost(&self) -> &Error {
        match self {
            Error::Unpack { source, .. } | Error::ApplyMetadata { source, .. } => {
                source.innermost()
            }
            other => other,
        }
    }

    /// The raw tar type flag, if this error (or the one it wraps) is an unsupported entry.
    pub fn unsupported_type(&self) -> Option<u8> {
        match self.innermost() {
            Error::UnsupportedType(tag) => Some(*tag),
            _ => None,
        }
    }
}

impl From<rustix::io::Errno> for Error {
    fn from(errno: rustix::io::Errno) -> Self {
        Error::Io(errno.into())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_unsupported_type_through_wrappers() {
        let err = Error::unpack("/t/x", Error::UnsupportedType(b'Z'));
        assert_eq!(err.unsupported_type(), Some(b'Z'));
        assert_eq!(err.to_string(), "failed to unpack \"/t/x\"");
        assert_eq!(
            std::error::Error::source(&err).unwrap().to_string(),
            "unsupported entry type 0x5a"
        );

        let err = Error::apply_metadata("/t/x", Error::MissingRoot);
        assert_eq!(err.unsupported_type(), None);
        assert!(matches!(err.innermost(), Error::MissingRoot));
    }
}
