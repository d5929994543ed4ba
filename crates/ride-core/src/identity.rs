//! # Identity Newtypes
//!
//! Newtype wrappers for every identifier in the orchestrator. These prevent
//! accidental identifier confusion: a `CommandId` (client idempotency key)
//! can never be mistaken for an `EventId` (dispatcher deduplication key).

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Access the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| CoreError::InvalidIdentifier(format!("{s:?}: {e}")))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

uuid_newtype!(
    /// Unique identifier for a ride (the aggregate root).
    RideId,
    "ride"
);

uuid_newtype!(
    /// Identifier of a rider, driver, or system principal.
    UserId,
    "user"
);

uuid_newtype!(
    /// Client-supplied idempotency key for a gateway command.
    ///
    /// Replaying a command with an id that was already applied to the same
    /// ride returns the current projection without re-applying anything.
    CommandId,
    "command"
);

uuid_newtype!(
    /// Unique id of an outbound transition event. Consumers deduplicate on it.
    EventId,
    "event"
);
