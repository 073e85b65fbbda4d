//! Decoded weight readings.

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;

/// A decoded weight in the local mass unit.
///
/// Stored as tenths so that the one-decimal display never drifts.
/// Readings are ephemeral: each one supersedes the previous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeightReading {
    /// Scaled weight in tenths of the local unit.
    pub tenths: i64,
    /// When the frame was extracted.
    pub observed_at: SystemTime,
}

impl WeightReading {
    /// Create a reading observed now.
    pub fn new(tenths: i64) -> Self {
        Self::observed_at(tenths, SystemTime::now())
    }

    /// Create a reading with an explicit observation time.
    pub fn observed_at(tenths: i64, observed_at: SystemTime) -> Self {
        Self {
            tenths,
            observed_at,
        }
    }

    /// Weight as a floating point number, one decimal place.
    #[inline]
    pub fn value(&self) -> f64 {
        self.tenths as f64 / 10.0
    }

    /// Fixed-point display string, zero padded to five characters (`"012.4"`).
    pub fn display(&self) -> String {
        format!("{:05.1}", self.value())
    }
}

impl fmt::Display for WeightReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}
