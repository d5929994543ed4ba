//! # Safety Escalation Protocol
//!
//! A side-channel state machine owned by the ride, independent of its status:
//!
//! ```text
//!          trigger            respond(safe)
//! IDLE ───────────▶ PENDING ───────────────▶ RESOLVED_SAFE ──┐
//!                     ▲  │                                   │
//!                     │  └──── respond(need_help) ─▶ ESCALATED ┤
//!                     └──────────── trigger ─────────────────┘
//! ```
//!
//! Either party may trigger a check (manual safety button) and the
//! orchestrator's sweep may raise one when a moving ride stalls. The check
//! lives on the ride, not in a client dialog, so dismissing or reloading a
//! client never loses an escalation.
//!
//! An `escalated` state does not block ride-status transitions. It fans out
//! an out-of-band alert through the notification collaborator instead.

use ride_core::{Role, Timestamp};
use serde::{Deserialize, Serialize};

use crate::ride::RideStatus;

/// Protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyState {
    /// No check has been raised.
    Idle,
    /// A check is waiting for a response.
    Pending,
    /// The last check was answered `safe`.
    ResolvedSafe,
    /// The last check was answered `need_help`; an alert was dispatched.
    Escalated,
}

impl SafetyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::ResolvedSafe => "resolved_safe",
            Self::Escalated => "escalated",
        }
    }
}

impl std::fmt::Display for SafetyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a pending check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyResponse {
    Safe,
    NeedHelp,
}

/// What raised a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTrigger {
    /// A party pressed the safety button.
    Manual,
    /// No driver movement for the idle threshold while in progress.
    StallDetected,
}

/// Safety protocol state for one ride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub state: SafetyState,
    /// When the last check was raised or answered.
    pub last_check_at: Option<Timestamp>,
    /// The last response, if the last check was answered.
    pub response: Option<SafetyResponse>,
    /// Role that raised the current/last check.
    pub triggered_by: Option<Role>,
    /// What raised the current/last check.
    pub trigger: Option<SafetyTrigger>,
    /// Role that answered the last check.
    pub responded_by: Option<Role>,
    /// When the last stall-detected check was raised.
    pub idle_alert_at: Option<Timestamp>,
    /// Number of escalations over the ride's life.
    pub escalation_count: u32,
}

impl Default for SafetyCheck {
    fn default() -> Self {
        Self {
            state: SafetyState::Idle,
            last_check_at: None,
            response: None,
            triggered_by: None,
            trigger: None,
            responded_by: None,
            idle_alert_at: None,
            escalation_count: 0,
        }
    }
}

/// Outcome of a safety operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyTransition {
    pub from: SafetyState,
    pub to: SafetyState,
    /// The role that acted.
    pub by: Role,
    pub at: Timestamp,
    /// `false` when a trigger landed on an already-pending check.
    pub changed: bool,
    /// `true` exactly when this operation moved the check to `escalated`.
    pub escalated: bool,
}

/// A response arrived with no pending check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotPending(pub SafetyState);

impl SafetyCheck {
    /// Raise a check. Re-enterable from any resolved state; a trigger while
    /// already pending is a no-op reported with `changed = false`.
    pub fn trigger(&mut self, by: Role, trigger: SafetyTrigger, now: Timestamp) -> SafetyTransition {
        let from = self.state;
        if from == SafetyState::Pending {
            return SafetyTransition {
                from,
                to: from,
                by,
                at: now,
                changed: false,
                escalated: false,
            };
        }
        self.state = SafetyState::Pending;
        self.last_check_at = Some(now);
        self.response = None;
        self.responded_by = None;
        self.triggered_by = Some(by);
        self.trigger = Some(trigger);
        if trigger == SafetyTrigger::StallDetected {
            self.idle_alert_at = Some(now);
        }
        SafetyTransition {
            from,
            to: SafetyState::Pending,
            by,
            at: now,
            changed: true,
            escalated: false,
        }
    }

    /// Answer the pending check.
    pub fn respond(
        &mut self,
        by: Role,
        response: SafetyResponse,
        now: Timestamp,
    ) -> Result<SafetyTransition, NotPending> {
        if self.state != SafetyState::Pending {
            return Err(NotPending(self.state));
        }
        let to = match response {
            SafetyResponse::Safe => SafetyState::ResolvedSafe,
            SafetyResponse::NeedHelp => SafetyState::Escalated,
        };
        self.state = to;
        self.response = Some(response);
        self.responded_by = Some(by);
        self.last_check_at = Some(now);
        let escalated = to == SafetyState::Escalated;
        if escalated {
            self.escalation_count += 1;
        }
        Ok(SafetyTransition {
            from: SafetyState::Pending,
            to,
            by,
            at: now,
            changed: true,
            escalated,
        })
    }

    /// Whether the check is waiting for an answer.
    pub fn is_pending(&self) -> bool {
        self.state == SafetyState::Pending
    }
}

/// Stall heuristic: should a `stall_detected` check be raised now?
///
/// Only `in_progress` rides are checked. Movement is measured from the last
/// reported position, or from trip start if the driver never reported one.
/// A stretch of inactivity raises at most one check: once an idle alert is
/// newer than the last movement, nothing fires until the driver moves again.
pub fn stall_detected(
    status: RideStatus,
    last_movement_at: Option<Timestamp>,
    check: &SafetyCheck,
    now: Timestamp,
    idle_alert_secs: u64,
) -> bool {
    if status != RideStatus::InProgress || check.is_pending() {
        return false;
    }
    let Some(baseline) = last_movement_at else {
        return false;
    };
    if check.idle_alert_at.is_some_and(|alert| alert >= baseline) {
        return false;
    }
    let idle = now.seconds_since(baseline);
    idle >= 0 && idle as u64 >= idle_alert_secs
}
