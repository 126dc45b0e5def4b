// Runtime numeric checks
//
// Shape checks are always on. NaN/Inf checks cost a pass over every
// intermediate tensor, so they are gated by a check level:
//
//   WREN_CHECK=off      skip
//   WREN_CHECK=finite   fail with Error::NonFinite on the first NaN/Inf
//
// Without the variable, debug builds check and release builds do not.

use crate::error::{Error, Pass, Result};
use crate::tensor::Tensor;

/// Name of the environment variable that overrides the default level.
pub const CHECK_ENV: &str = "WREN_CHECK";

/// Which numeric assertions run during forward and backward sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckLevel {
    Off,
    Finite,
}

impl CheckLevel {
    /// The build default, overridden by `WREN_CHECK` when set to a known value.
    pub fn from_env() -> Self {
        std::env::var(CHECK_ENV)
            .ok()
            .and_then(|v| Self::parse(&v))
            .unwrap_or_else(Self::build_default)
    }

    pub fn build_default() -> Self {
        if cfg!(debug_assertions) {
            CheckLevel::Finite
        } else {
            CheckLevel::Off
        }
    }

    /// Parse `off` / `finite` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" | "none" => Some(CheckLevel::Off),
            "finite" | "1" | "on" => Some(CheckLevel::Finite),
            _ => None,
        }
    }

    /// Fail if `t` holds NaN or Inf and checks are enabled.
    pub fn ensure_finite(self, t: &Tensor, op: &str, pass: Pass) -> Result<()> {
        if self == CheckLevel::Finite && t.has_non_finite() {
            return Err(Error::NonFinite {
                op: op.to_string(),
                pass,
            });
        }
        Ok(())
    }
}

impl Default for CheckLevel {
    fn default() -> Self {
        Self::from_env()
    }
}
