//! Content digests recorded in file names.
//!
//! A file is only checksummed once it has stopped changing: its modification
//! time is sampled, the engine waits the settle interval, and samples again.
//! Matching samples mean the file is stable; the digest is computed and
//! stored as the `cs` tag by renaming the file. Files that are still changing
//! are skipped until a later pass.
//!
//! [`checksum_file`] handles one file; [`checksum`] streams a whole pass
//! sharing a single settle wait.

pub mod error;
mod file;
mod stream;

pub use self::file::{Checksummed, Digest, checksum_file, digest_file};
pub(crate) use self::file::{checksum_file_inner, digest_file_inner};
pub use self::stream::{ChecksumEvent, checksum};
