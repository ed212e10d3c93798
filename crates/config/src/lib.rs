//! Layered configuration for drivetest.
//!
//! Values are merged, lowest priority first, from:
//! 1. built-in defaults ([`Settings::default`]),
//! 2. a TOML file (explicit path, or `drivetest.toml` in the platform
//!    config directory if it exists),
//! 3. `DRIVETEST_*` environment variables (`DRIVETEST_MAX_SIZE=2e6`),
//! 4. command-line [`Overrides`].
//!
//! The merged result is validated before anything touches the disk.

mod bytes;
pub mod error;

pub use crate::bytes::{ByteSize, GIB, KIB, MIB, TIB};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the directory created below `root` that holds every test file.
pub const TEST_DIR: &str = "drivetest";
const ENV_PREFIX: &str = "DRIVETEST_";
const CONFIG_FILE: &str = "drivetest.toml";
/// Smallest file the generator ever writes.
pub const MIN_FILE_SIZE: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory the test directory is created in.
    pub root: PathBuf,
    /// Upper bound (exclusive) on generated file size.
    pub max_size: ByteSize,
    /// Maximum nested-directory depth for generated paths.
    pub max_depth: u32,
    /// Free space the engine must leave on the volume.
    pub min_free: ByteSize,
    /// Number of concurrent workers.
    pub threads: usize,
    /// Wait between the two modification-time samples of the stability check.
    pub settle_secs: u64,
    /// Read size used while checksumming.
    pub read_chunk: ByteSize,
    /// Number of random buffers generated at startup.
    pub block_count: usize,
    /// Size of each random buffer.
    pub block_size: ByteSize,
    /// Stress mode: re-verify a file once its last verification is this old.
    pub reverify_secs: u64,
    /// Stress mode: idle wait between loop iterations.
    pub poll_ms: u64,
    /// Seed for every random choice; entropy from the OS when absent.
    pub seed: Option<u64>,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            max_size: ByteSize(2048),
            max_depth: 4,
            min_free: ByteSize(GIB),
            threads: 1,
            settle_secs: 10,
            read_chunk: ByteSize(256 * MIB),
            block_count: 100,
            block_size: ByteSize(512 * KIB),
            reverify_secs: 3600,
            poll_ms: 250,
            seed: None,
        }
    }
}

impl Settings {
    /// Directory every test file lives under: `<root>/drivetest`, absolute.
    pub fn test_root(&self) -> Result<PathBuf> {
        let root = std::path::absolute(&self.root).or_raise(|| ErrorKind::invalid("root", "cannot be made absolute"))?;
        Ok(root.join(TEST_DIR))
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn reverify_interval(&self) -> Duration {
        Duration::from_secs(self.reverify_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    /// Check bounds. Called by [`load`], public for settings built by hand.
    pub fn validate(&self) -> Result<()> {
        if self.max_size.get() < MIN_FILE_SIZE {
            exn::bail!(ErrorKind::invalid("max_size", format!("must be at least {MIN_FILE_SIZE}")));
        }
        if self.threads == 0 {
            exn::bail!(ErrorKind::invalid("threads", "must be at least 1"));
        }
        if self.read_chunk.get() == 0 {
            exn::bail!(ErrorKind::invalid("read_chunk", "must be at least 1"));
        }
        if usize::try_from(self.read_chunk.get()).is_err() {
            exn::bail!(ErrorKind::invalid("read_chunk", "does not fit in memory"));
        }
        if self.block_count == 0 {
            exn::bail!(ErrorKind::invalid("block_count", "must be at least 1"));
        }
        if self.block_size.get() == 0 || usize::try_from(self.block_size.get()).is_err() {
            exn::bail!(ErrorKind::invalid("block_size", "must be at least 1 and fit in memory"));
        }
        Ok(())
    }
}

/// Values given on the command line. `None` leaves lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<ByteSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_free: Option<ByteSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Default configuration file location, if the platform has one.
pub fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "drivetest").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Merge every configuration layer and validate the result.
///
/// An explicit `file` must exist; the default location is optional.
pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Settings> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));
    match file {
        Some(path) => {
            if !path.is_file() {
                exn::bail!(ErrorKind::FileNotFound(path.to_path_buf()));
            }
            figment = figment.merge(Toml::file(path));
        },
        None => {
            if let Some(path) = default_config_file().filter(|p| p.is_file()) {
                tracing::debug!(path = %path.display(), "Using configuration file");
                figment = figment.merge(Toml::file(path));
            }
        },
    }
    let settings: Settings = figment
        .merge(Env::prefixed(ENV_PREFIX))
        .merge(Serialized::defaults(overrides))
        .extract()
        .or_raise(|| ErrorKind::Load)?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.max_size, ByteSize(2048));
        assert_eq!(settings.min_free, ByteSize(GIB));
        assert_eq!(settings.max_depth, 4);
        assert_eq!(settings.threads, 1);
        assert_eq!(settings.settle_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_root_is_absolute() {
        let settings = Settings::default();
        let root = settings.test_root().unwrap();
        assert!(root.is_absolute());
        assert!(root.ends_with(TEST_DIR));
    }

    #[rstest]
    #[case::tiny_files(Settings { max_size: ByteSize(1023), ..Settings::default() }, "max_size")]
    #[case::no_threads(Settings { threads: 0, ..Settings::default() }, "threads")]
    #[case::no_chunk(Settings { read_chunk: ByteSize(0), ..Settings::default() }, "read_chunk")]
    #[case::no_blocks(Settings { block_count: 0, ..Settings::default() }, "block_count")]
    #[case::empty_blocks(Settings { block_size: ByteSize(0), ..Settings::default() }, "block_size")]
    fn invalid_settings(#[case] settings: Settings, #[case] expected: &str) {
        let err = settings.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid { field, .. } if *field == expected));
    }

    #[test]
    fn max_size_of_exactly_1024_is_allowed() {
        let settings = Settings { max_size: ByteSize(1024), ..Settings::default() };
        settings.validate().unwrap();
    }

    #[test]
    fn layers_merge_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "max_size = \"1e6\"\nthreads = 2\nmin_free = 4096\n")?;
            jail.set_env("DRIVETEST_THREADS", "3");
            jail.set_env("DRIVETEST_MAX_DEPTH", "7");
            let overrides = Overrides { max_depth: Some(1), ..Overrides::default() };
            let settings = load(Some(Path::new("custom.toml")), &overrides).map_err(|e| e.to_string())?;
            assert_eq!(settings.max_size, ByteSize(1_000_000));
            assert_eq!(settings.min_free, ByteSize(4096));
            assert_eq!(settings.threads, 3);
            assert_eq!(settings.max_depth, 1);
            Ok(())
        });
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let err = load(Some(Path::new("nope.toml")), &Overrides::default()).unwrap_err();
            assert!(matches!(&*err, ErrorKind::FileNotFound(_)));
            Ok(())
        });
    }

    #[test]
    fn invalid_merged_value_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("DRIVETEST_MAX_SIZE", "100");
            let err = load(None, &Overrides::default()).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid { field: "max_size", .. }));
            Ok(())
        });
    }
}
