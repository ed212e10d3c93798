//! Random file generation.
//!
//! A file is written in one pass from blocks of a shared
//! [`RandomBlockPool`](crate::RandomBlockPool), at a random location up to
//! `max_depth` directories deep, then stat'ed to confirm the filesystem
//! reports exactly the size written.

pub mod error;
mod file;

pub use self::file::{Generated, generate_file, random_location, write_file};
pub(crate) use self::file::{left_behind, write_file_inner};
