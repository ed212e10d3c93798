use clap::{Parser, Subcommand};
use drivetest_config::{ByteSize, Overrides};
use std::path::PathBuf;

/// Stress-test a drive or network share by filling it with random files,
/// recording their checksums, and checking them again later.
#[derive(Debug, Parser)]
#[command(name = "drivetest", version, about)]
pub struct Cli {
    /// Directory to create the `drivetest` test directory in
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,
    /// Maximum file size in bytes; accepts `2e6`, `512k`, `1.5GiB`
    #[arg(long, alias = "max_size", global = true, value_parser = parse_bytes)]
    pub max_size: Option<ByteSize>,
    /// Maximum depth of the generated directory tree
    #[arg(long, alias = "max_depth", global = true)]
    pub max_depth: Option<u32>,
    /// Free space to leave on the volume
    #[arg(long, alias = "min_free", global = true, value_parser = parse_bytes)]
    pub min_free: Option<ByteSize>,
    /// Number of concurrent workers
    #[arg(long, global = true)]
    pub threads: Option<usize>,
    /// Seconds a file must stay unmodified before it is checksummed
    #[arg(long, global = true)]
    pub settle_secs: Option<u64>,
    /// Seed for every random choice, for reproducible runs
    #[arg(long, global = true)]
    pub seed: Option<u64>,
    /// Configuration file (TOML)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,
    /// Log debug output
    #[arg(long, short, global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Write, checksum, verify and delete files until interrupted
    Stress,
    /// Write files until the free space limit is reached
    #[command(name = "createfiles", alias = "create-files")]
    CreateFiles,
    /// Record a checksum for every file that does not have one
    #[command(name = "createchecksums", alias = "create-checksums")]
    CreateChecksums,
    /// Verify every recorded checksum
    #[command(name = "checkchecksums", alias = "check-checksums")]
    CheckChecksums,
    /// Remove directories left empty by deleted files
    #[command(name = "deleteemptydirs", alias = "delete-empty-dirs")]
    DeleteEmptyDirs,
}

impl Cli {
    /// Command-line values as the top configuration layer.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            root: self.root.clone(),
            max_size: self.max_size,
            max_depth: self.max_depth,
            min_free: self.min_free,
            threads: self.threads,
            settle_secs: self.settle_secs,
            seed: self.seed,
        }
    }
}

fn parse_bytes(value: &str) -> Result<ByteSize, String> {
    value.parse::<ByteSize>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case("stress", Command::Stress)]
    #[case("createfiles", Command::CreateFiles)]
    #[case("create-files", Command::CreateFiles)]
    #[case("createchecksums", Command::CreateChecksums)]
    #[case("checkchecksums", Command::CheckChecksums)]
    #[case("deleteemptydirs", Command::DeleteEmptyDirs)]
    fn commands(#[case] name: &str, #[case] expected: Command) {
        let cli = Cli::try_parse_from(["drivetest", name]).unwrap();
        assert_eq!(cli.command, expected);
    }

    #[test]
    fn options_become_overrides() {
        let cli = Cli::try_parse_from([
            "drivetest",
            "--root",
            "/mnt/disk",
            "--max_size",
            "1e6",
            "createfiles",
            "--min-free",
            "2g",
            "--threads",
            "4",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.root, Some(PathBuf::from("/mnt/disk")));
        assert_eq!(overrides.max_size, Some(ByteSize(1_000_000)));
        assert_eq!(overrides.min_free, Some(ByteSize(2 << 30)));
        assert_eq!(overrides.threads, Some(4));
        assert_eq!(overrides.max_depth, None);
    }

    #[test]
    fn bad_size_is_a_usage_error() {
        assert!(Cli::try_parse_from(["drivetest", "--max-size", "lots", "stress"]).is_err());
    }

    #[test]
    fn command_is_required() {
        assert!(Cli::try_parse_from(["drivetest"]).is_err());
    }
}
