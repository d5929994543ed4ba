//! # Caller Roles
//!
//! The identity/session context supplies a `(role, user_id)` pair for every
//! gateway call. The orchestrator trusts the pair's authenticity but
//! re-validates it against ride ownership inside the state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identity::UserId;

/// The role a caller acts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The passenger who requested the ride.
    Rider,
    /// A driver (assigned or prospective).
    Driver,
    /// Platform automation: matching, sweeps, operations staff tooling.
    System,
}

impl Role {
    /// Stable lowercase name, used in headers, logs, and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rider => "rider",
            Self::Driver => "driver",
            Self::System => "system",
        }
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rider" => Ok(Self::Rider),
            "driver" => Ok(Self::Driver),
            "system" => Ok(Self::System),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated caller: who is asking, and in which role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller {
    /// Role the caller acts in.
    pub role: Role,
    /// The caller's principal id.
    pub user_id: UserId,
}

impl Caller {
    pub fn new(role: Role, user_id: UserId) -> Self {
        Self { role, user_id }
    }

    pub fn rider(user_id: UserId) -> Self {
        Self::new(Role::Rider, user_id)
    }

    pub fn driver(user_id: UserId) -> Self {
        Self::new(Role::Driver, user_id)
    }

    pub fn system(user_id: UserId) -> Self {
        Self::new(Role::System, user_id)
    }
}

impl std::fmt::Display for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.role, self.user_id)
    }
}
