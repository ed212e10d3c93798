//! Filename-embedded tags.
//!
//! A file's name is its only persistent metadata. The logical ID is the part
//! of the name before [`TAG_DELIMITER`]; everything after it is a list of
//! `key-value` pairs joined by [`PAIR_SEPARATOR`]:
//!
//! ```text
//! 3f/a9/Xk2mPq8Rzt4LwN0b--cs-5d41402abc4b2a76b9719d911017c592
//! └──── logical id ────┘  └────────── tag: cs ──────────────┘
//! ```
//!
//! Adding a tag is a single rename, so a file is always observed either with
//! or without it, never half-tagged.

pub mod error;

use crate::naming::error::{ErrorKind, Result};
use async_trait::async_trait;
use drivetest_storage::Volume;
use exn::ResultExt;
use regex::Regex;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

/// Separates the logical ID from the tags.
pub const TAG_DELIMITER: &str = "--";
/// Separates one `key-value` pair from the next.
pub const PAIR_SEPARATOR: &str = "__";
/// Tag holding the content digest.
pub const CHECKSUM_TAG: &str = "cs";

pub type Tags = BTreeMap<String, String>;
pub type NamingHandle = Arc<dyn NamingScheme>;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

regex!(PAIR_REGEX, r"^(\w+)-(.+)$");
regex!(KEY_REGEX, r"^\w+$");

/// Encodes metadata in, and decodes it from, file paths.
#[async_trait]
pub trait NamingScheme: Send + Sync {
    /// The path with every tag removed. Stable across tagging.
    fn logical_id(&self, path: &Path) -> PathBuf;

    /// Every well-formed tag in the path; malformed pairs are ignored.
    fn decode_tags(&self, path: &Path) -> Tags;

    /// The path for `logical_id` carrying exactly `tags`.
    fn encode(&self, logical_id: &Path, tags: &Tags) -> PathBuf;

    /// Reject a key or value that could not be decoded again.
    fn validate_tag(&self, key: &str, value: &str) -> Result<()>;

    fn tag(&self, path: &Path, key: &str) -> Option<String> {
        self.decode_tags(path).remove(key)
    }

    /// The path `path` would have with `key` set to `value`.
    fn tagged(&self, path: &Path, key: &str, value: &str) -> Result<PathBuf> {
        if path.file_name().and_then(OsStr::to_str).is_none() {
            exn::bail!(ErrorKind::InvalidName(path.to_path_buf()));
        }
        self.validate_tag(key, value)?;
        let mut tags = self.decode_tags(path);
        tags.insert(key.to_string(), value.to_string());
        Ok(self.encode(&self.logical_id(path), &tags))
    }

    /// Set a tag by renaming the file, returning its new path.
    ///
    /// No rename happens when the tag already has this value.
    async fn with_tag(&self, volume: &dyn Volume, path: &Path, key: &str, value: &str) -> Result<PathBuf> {
        let target = self.tagged(path, key, value)?;
        if target == path {
            return Ok(target);
        }
        volume.rename(path, &target).await.or_raise(|| ErrorKind::Rename)?;
        tracing::debug!(from = %path.display(), to = %target.display(), "Tagged file");
        Ok(target)
    }
}

/// The `name--key-value__key-value` scheme described in the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameTags;

impl FilenameTags {
    /// Split the final component into `(stem, tags)`; `None` when untagged.
    fn split(path: &Path) -> Option<(&str, &str)> {
        let name = path.file_name()?.to_str()?;
        name.split_once(TAG_DELIMITER).filter(|(stem, _)| !stem.is_empty())
    }
}

#[async_trait]
impl NamingScheme for FilenameTags {
    fn logical_id(&self, path: &Path) -> PathBuf {
        match Self::split(path) {
            Some((stem, _)) => path.with_file_name(stem),
            None => path.to_path_buf(),
        }
    }

    fn decode_tags(&self, path: &Path) -> Tags {
        let Some((_, tags)) = Self::split(path) else {
            return Tags::new();
        };
        tags.split(PAIR_SEPARATOR)
            .filter_map(|pair| PAIR_REGEX.captures(pair))
            .map(|captures| (captures[1].to_string(), captures[2].to_string()))
            .collect()
    }

    fn encode(&self, logical_id: &Path, tags: &Tags) -> PathBuf {
        if tags.is_empty() {
            return logical_id.to_path_buf();
        }
        let pairs: Vec<String> = tags.iter().map(|(key, value)| format!("{key}-{value}")).collect();
        let mut name = logical_id.file_name().map(OsStr::to_os_string).unwrap_or_default();
        name.push(TAG_DELIMITER);
        name.push(pairs.join(PAIR_SEPARATOR));
        logical_id.with_file_name(name)
    }

    fn validate_tag(&self, key: &str, value: &str) -> Result<()> {
        if !KEY_REGEX.is_match(key) {
            exn::bail!(ErrorKind::InvalidTag(format!("key {key:?}")));
        }
        let bad_value = value.is_empty()
            || value.contains(TAG_DELIMITER)
            || value.contains(PAIR_SEPARATOR)
            || value.starts_with('_')
            || value.ends_with('_')
            || value.contains(std::path::MAIN_SEPARATOR)
            || value.contains('/');
        if bad_value {
            exn::bail!(ErrorKind::InvalidTag(format!("value {value:?}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivetest_storage::backend::MockVolume;
    use rstest::rstest;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[rstest]
    #[case::untagged("a/b/Xk2m", "a/b/Xk2m", &[])]
    #[case::one_tag("a/Xk2m--cs-abc123", "a/Xk2m", &[("cs", "abc123")])]
    #[case::two_tags("Xk2m--cs-abc__gen-2", "Xk2m", &[("cs", "abc"), ("gen", "2")])]
    #[case::dash_in_value("Xk2m--note-a-b", "Xk2m", &[("note", "a-b")])]
    #[case::malformed_pair_ignored("Xk2m--cs-abc__junk", "Xk2m", &[("cs", "abc")])]
    #[case::empty_stem("--cs-abc", "--cs-abc", &[])]
    fn decode(#[case] path: &str, #[case] logical: &str, #[case] expected: &[(&str, &str)]) {
        let path = Path::new(path);
        assert_eq!(FilenameTags.logical_id(path), PathBuf::from(logical));
        assert_eq!(FilenameTags.decode_tags(path), tags(expected));
    }

    #[test]
    fn encode_then_decode() {
        let logical = Path::new("0/1/Xk2m");
        let expected = tags(&[("cs", "f00d"), ("gen", "1")]);
        let path = FilenameTags.encode(logical, &expected);
        assert_eq!(path, PathBuf::from("0/1/Xk2m--cs-f00d__gen-1"));
        assert_eq!(FilenameTags.logical_id(&path), logical);
        assert_eq!(FilenameTags.decode_tags(&path), expected);
    }

    #[test]
    fn encode_without_tags_is_logical_id() {
        assert_eq!(FilenameTags.encode(Path::new("a/Xk2m"), &Tags::new()), PathBuf::from("a/Xk2m"));
    }

    #[test]
    fn tagged_replaces_existing_value() {
        let path = FilenameTags.tagged(Path::new("Xk2m--cs-old"), CHECKSUM_TAG, "new").unwrap();
        assert_eq!(path, PathBuf::from("Xk2m--cs-new"));
        assert_eq!(FilenameTags.tag(&path, CHECKSUM_TAG).as_deref(), Some("new"));
    }

    #[rstest]
    #[case::empty_key("", "v")]
    #[case::dash_in_key("a-b", "v")]
    #[case::empty_value("cs", "")]
    #[case::delimiter_in_value("cs", "a--b")]
    #[case::separator_in_value("cs", "a__b")]
    #[case::trailing_underscore("cs", "ab_")]
    #[case::slash_in_value("cs", "a/b")]
    fn invalid_tags(#[case] key: &str, #[case] value: &str) {
        let err = FilenameTags.tagged(Path::new("Xk2m"), key, value).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidTag(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_name_is_never_renamed() {
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new("0").join(OsStr::from_bytes(b"Xk\xff2m"));
        let volume = MockVolume::with_files([(path.clone(), b"data".as_slice())]);
        let err = FilenameTags.with_tag(&volume, &path, CHECKSUM_TAG, "abc").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidName(_)));
        assert_eq!(volume.renames(), 0);
        assert_eq!(volume.paths(), vec![path]);
    }

    #[tokio::test]
    async fn with_tag_renames_once() {
        let volume = MockVolume::with_files([("0/Xk2m", b"data")]);
        let first = FilenameTags.with_tag(&volume, Path::new("0/Xk2m"), "cs", "abc").await.unwrap();
        assert_eq!(first, PathBuf::from("0/Xk2m--cs-abc"));
        let second = FilenameTags.with_tag(&volume, &first, "cs", "abc").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(volume.renames(), 1);
        assert_eq!(volume.paths(), vec![first]);
    }

    #[tokio::test]
    async fn with_tag_on_missing_file_fails() {
        let volume = MockVolume::default();
        let err = FilenameTags.with_tag(&volume, Path::new("gone"), "cs", "abc").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Rename));
    }
}
