use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Target SPIR-V version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpirvVersion {
    #[default]
    V1_0,
    V1_1,
    V1_2,
    V1_3,
    V1_4,
    V1_5,
    V1_6,
}

impl SpirvVersion {
    pub const ALL: [SpirvVersion; 7] = [
        SpirvVersion::V1_0,
        SpirvVersion::V1_1,
        SpirvVersion::V1_2,
        SpirvVersion::V1_3,
        SpirvVersion::V1_4,
        SpirvVersion::V1_5,
        SpirvVersion::V1_6,
    ];

    /// Accepts `13` or `3` for 1.3. Anything else falls back to 1.0.
    pub fn from_config(value: u32) -> Self {
        let minor = match value {
            10..=16 => value - 10,
            0..=6 => value,
            other => {
                warn!(value = other, "unrecognized SPIR-V version, using 1.0");
                0
            }
        };
        Self::ALL[minor as usize]
    }

    pub fn minor(self) -> u8 {
        self as u8
    }

    /// `(major, minor)` as naga expects it.
    pub fn lang_version(self) -> (u8, u8) {
        (1, self.minor())
    }
}

impl fmt::Display for SpirvVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1.{}", self.minor())
    }
}
