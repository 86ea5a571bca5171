//! Extract tar archives while faithfully restoring ownership, permissions and timestamps.
//!
//! Extraction happens in two passes.  Entries are created on disk in stream order and
//! recorded in a [`tree::MetadataTree`]; once the archive is exhausted the tree is walked
//! children-first and the metadata of each entry is applied.  That way populating a
//! directory can't clobber the mtime (or be blocked by the mode) it was archived with.
//!
//! ```no_run
//! let archive = std::fs::File::open("layer.tar")?;
//! tar_restore::extract(archive, "/srv/rootfs")?;
//! # Ok::<(), tar_restore::Error>(())
//! ```

pub mod error;
pub mod header;
pub mod metadata;
pub mod special;
pub mod tree;
pub mod unpack;
mod util;

pub use error::{Error, Result};
pub use header::{EntryHeader, Timestamp};
pub use metadata::{MetadataApplier, UnixMetadata};
pub use special::{NoSpecialFiles, SpecialFileCreator, UnixSpecialFiles};
pub use tree::MetadataTree;
pub use unpack::{extract, extract_with_options, ExtractOptions, Unpacker};
