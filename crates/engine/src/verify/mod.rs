//! Re-reading files and comparing them with the digest in their names.
//!
//! Verification never fails as such: a file that cannot be read gets an
//! [`Unreadable`](Verdict::Unreadable) verdict, so a pass always reports on
//! every file it was given.

mod file;
mod stream;

pub use self::file::{Verdict, Verification, verify_file};
pub use self::stream::{VerifyEvent, VerifySummary, verify};
