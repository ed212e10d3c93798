//! Drive integrity stress-test engine.
//!
//! Fills a [`Volume`](drivetest_storage::Volume) with files of random
//! content, records a content digest in each file's name, later re-reads
//! every file to confirm the digest still matches, and deletes files to
//! keep free space above a floor.
//!
//! The one-shot passes are streams ([`checksum::checksum`],
//! [`verify::verify`]); the long-running modes live in [`stress`].

pub mod blocks;
pub mod budget;
pub mod checksum;
mod context;
pub mod error;
pub mod generate;
mod human;
pub mod naming;
pub mod reclaim;
pub mod record;
pub mod stress;
pub mod verify;

pub use crate::blocks::RandomBlockPool;
pub use crate::budget::SpaceBudget;
pub use crate::context::Context;
pub use crate::human::HumanBytes;
pub use crate::naming::{FilenameTags, NamingHandle, NamingScheme};
pub use crate::record::{FileRecord, Registry};
