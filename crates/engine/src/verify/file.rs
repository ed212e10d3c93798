use crate::checksum::digest_file_inner;
use crate::record::FileRecord;
use crate::{Context, HumanBytes};
use std::fmt::{self, Display, Formatter};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Match,
    /// The content no longer hashes to the recorded digest.
    Mismatch { expected: String, actual: String },
    /// The file could not be opened or read to the end.
    Unreadable(String),
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => f.write_str("ok"),
            Self::Mismatch { expected, actual } => write!(f, "MISMATCH (expected {expected}, got {actual})"),
            Self::Unreadable(reason) => write!(f, "unreadable: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub record: FileRecord,
    pub verdict: Verdict,
}

/// Re-hash a tagged file and compare with its recorded digest.
///
/// Returns `None` for files without a digest. On a match the record's
/// `verified_at` is refreshed.
pub async fn verify_file(ctx: &Context, mut record: FileRecord) -> Option<Verification> {
    let expected = record.checksum()?.to_string();
    let verdict = match digest_file_inner(ctx.volume.as_ref(), &record.path, ctx.read_chunk).await {
        Ok(digest) if digest.hex == expected => {
            record.verified_at = Some(OffsetDateTime::now_utc());
            tracing::info!(path = %record.path.display(), "Checksum ok ({})", HumanBytes::from(digest.bytes));
            Verdict::Match
        },
        Ok(digest) => {
            tracing::error!(
                path = %record.path.display(),
                expected = %expected,
                actual = %digest.hex,
                "CHECKSUM MISMATCH"
            );
            Verdict::Mismatch {
                expected,
                actual: digest.hex,
            }
        },
        Err(e) => {
            tracing::warn!(path = %record.path.display(), "Could not read file to verify: {e}");
            Verdict::Unreadable(e.to_string())
        },
    };
    Some(Verification { record, verdict })
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivetest_config::Settings;
    use drivetest_storage::backend::MockVolume;
    use std::sync::Arc;

    fn setup(volume: &MockVolume) -> Context {
        Context::new(Arc::new(volume.clone()), &Settings::default())
    }

    fn tagged(content: &[u8]) -> String {
        format!("Xk2m--cs-{}", blake3::hash(content).to_hex())
    }

    #[tokio::test]
    async fn intact_file_matches() {
        let path = tagged(b"content");
        let volume = MockVolume::with_files([(path.as_str(), b"content".as_slice())]);
        let ctx = setup(&volume);
        let result = verify_file(&ctx, FileRecord::new(ctx.naming.as_ref(), &path)).await.unwrap();
        assert_eq!(result.verdict, Verdict::Match);
        assert!(result.record.verified_at.is_some());
    }

    #[tokio::test]
    async fn flipped_byte_is_a_mismatch() {
        let path = tagged(b"content");
        let volume = MockVolume::with_files([(path.as_str(), b"content".as_slice())]);
        volume.corrupt(&path, 3);
        let ctx = setup(&volume);
        let result = verify_file(&ctx, FileRecord::new(ctx.naming.as_ref(), &path)).await.unwrap();
        let Verdict::Mismatch { expected, actual } = result.verdict else {
            panic!("expected a mismatch, got {}", result.verdict);
        };
        assert_eq!(expected, blake3::hash(b"content").to_hex().to_string());
        assert_ne!(actual, expected);
        assert!(result.record.verified_at.is_none());
    }

    #[tokio::test]
    async fn missing_file_is_unreadable() {
        let ctx = setup(&MockVolume::default());
        let result = verify_file(&ctx, FileRecord::new(ctx.naming.as_ref(), tagged(b"x"))).await.unwrap();
        assert!(matches!(result.verdict, Verdict::Unreadable(_)));
    }

    #[tokio::test]
    async fn untagged_file_is_not_verified() {
        let volume = MockVolume::with_files([("Xk2m", b"content".as_slice())]);
        let ctx = setup(&volume);
        assert!(verify_file(&ctx, FileRecord::new(ctx.naming.as_ref(), "Xk2m")).await.is_none());
        assert_eq!(volume.reads(), 0);
    }
}
