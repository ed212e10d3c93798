//! Keeping free space above the floor.
//!
//! When stress mode runs low on space it deletes one file at a time,
//! choosing the median by age.

mod file;

pub use self::file::{Reclaimed, delete_empty_dirs, reclaim_one, select_mid_aged};
