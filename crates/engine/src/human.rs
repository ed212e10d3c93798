use std::fmt::{self, Display, Formatter};

const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

/// Formats a byte count (or a byte rate) for log lines: `1.50 MiB`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct HumanBytes(pub f64);

impl From<u64> for HumanBytes {
    fn from(bytes: u64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        Self(bytes as f64)
    }
}

impl Display for HumanBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut value = self.0;
        if value < 1024.0 {
            return write!(f, "{value:.0} B");
        }
        let mut unit = UNITS[0];
        for next in UNITS {
            value /= 1024.0;
            unit = next;
            if value < 1024.0 {
                break;
            }
        }
        write!(f, "{value:.2} {unit}")
    }
}
