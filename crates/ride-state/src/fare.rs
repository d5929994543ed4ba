//! # Fare Data
//!
//! The orchestrator never prices a ride. It carries the request-time estimate,
//! tells the fare collaborator which basis to compute on, and records the
//! collaborator's result once.

use ride_core::{Location, Timestamp};
use serde::{Deserialize, Serialize};

/// Quote attached to the request. Amounts are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareEstimate {
    pub amount_minor: i64,
    pub currency: String,
}

/// What the final fare was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FareBasis {
    /// The original pickup-to-dropoff quote.
    QuotedRoute,
    /// Distance actually driven (early end).
    ActualDistance,
}

/// Final-leg override passed to the fare collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FareOverride {
    /// Price the quoted route.
    None,
    /// The driver ended early; price actual distance up to `position`.
    EarlyEnd { position: Option<Location> },
}

impl FareOverride {
    pub fn basis(&self) -> FareBasis {
        match self {
            Self::None => FareBasis::QuotedRoute,
            Self::EarlyEnd { .. } => FareBasis::ActualDistance,
        }
    }

    pub fn is_early_end(&self) -> bool {
        matches!(self, Self::EarlyEnd { .. })
    }
}

/// Final fare as returned by the fare collaborator. Opaque to the
/// orchestrator beyond being stored and projected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareResult {
    pub amount_minor: i64,
    pub currency: String,
    pub basis: FareBasis,
    pub computed_at: Timestamp,
    /// Collaborator-side reference (invoice or quote id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Fare block on the ride.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fare {
    pub estimate: Option<FareEstimate>,
    pub final_fare: Option<FareResult>,
}

impl Fare {
    pub fn is_finalized(&self) -> bool {
        self.final_fare.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_basis() {
        assert_eq!(FareOverride::None.basis(), FareBasis::QuotedRoute);
        let early = FareOverride::EarlyEnd { position: None };
        assert_eq!(early.basis(), FareBasis::ActualDistance);
        assert!(early.is_early_end());
    }

    #[test]
    fn override_serializes_tagged() {
        let json = serde_json::to_value(FareOverride::EarlyEnd {
            position: Some(Location::address("Main St & 3rd")),
        })
        .unwrap();
        assert_eq!(json["kind"], "early_end");
        assert_eq!(json["position"]["address"], "Main St & 3rd");
    }
}
