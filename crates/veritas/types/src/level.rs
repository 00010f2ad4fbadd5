//! Permission levels and their total order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Permission level granted on an evidence file.
///
/// Levels form a total order `Read < Write < Admin`: holding a higher level
/// implies every lower capability for that resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }

    /// All levels, lowest first.
    pub fn all() -> [PermissionLevel; 3] {
        [Self::Read, Self::Write, Self::Admin]
    }

    /// Whether this level satisfies a required level.
    pub fn satisfies(&self, required: PermissionLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognized permission level names at parse boundaries.
#[derive(Debug, Error)]
#[error("invalid permission level: {0}")]
pub struct ParseLevelError(pub String);

impl FromStr for PermissionLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            other => Err(ParseLevelError(other.to_string())),
        }
    }
}
