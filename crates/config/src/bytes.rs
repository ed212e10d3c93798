//! Byte sizes as humans type them.

use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// A number of bytes.
///
/// Accepts integers, floats and scientific notation (`2048`, `1.5e6`), with
/// an optional 1024-based suffix (`512K`, `1GiB`, `2.5tb`). Fractions are
/// truncated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawByteSize", into = "u64")]
pub struct ByteSize(pub u64);

impl ByteSize {
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}
impl From<ByteSize> for u64 {
    fn from(value: ByteSize) -> Self {
        value.0
    }
}
impl From<u64> for ByteSize {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
impl Display for ByteSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        let (number, multiplier) = [("tib", TIB), ("tb", TIB), ("t", TIB), ("gib", GIB), ("gb", GIB), ("g", GIB)]
            .into_iter()
            .chain([("mib", MIB), ("mb", MIB), ("m", MIB), ("kib", KIB), ("kb", KIB), ("k", KIB)])
            .find_map(|(suffix, mult)| lower.strip_suffix(suffix).map(|n| (n.trim_end().to_string(), mult)))
            .unwrap_or_else(|| (lower.clone(), 1));
        // Plain integers keep full u64 precision; f64 would round above 2^53.
        if let Ok(value) = number.parse::<u64>() {
            return value
                .checked_mul(multiplier)
                .map(Self)
                .ok_or_else(|| ErrorKind::ByteSize(s.to_string()).into());
        }
        match number.parse::<f64>() {
            Ok(value) => from_float(value * multiplier as f64).ok_or_else(|| ErrorKind::ByteSize(s.to_string()).into()),
            Err(_) => exn::bail!(ErrorKind::ByteSize(s.to_string())),
        }
    }
}

fn from_float(value: f64) -> Option<ByteSize> {
    (value.is_finite() && value >= 0.0 && value < u64::MAX as f64).then(|| ByteSize(value as u64))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawByteSize {
    Int(u64),
    Float(f64),
    Text(String),
}
impl TryFrom<RawByteSize> for ByteSize {
    type Error = String;
    fn try_from(raw: RawByteSize) -> Result<Self, Self::Error> {
        match raw {
            RawByteSize::Int(value) => Ok(ByteSize(value)),
            RawByteSize::Float(value) => from_float(value).ok_or_else(|| format!("invalid byte size: {value}")),
            RawByteSize::Text(text) => text.parse().map_err(|e: Error| e.to_string()),
        }
    }
}
