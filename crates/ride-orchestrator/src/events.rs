//! # Ride Events
//!
//! Side effects of a committed command, queued for asynchronous delivery.
//! Each event carries a unique [`EventId`]; the dispatcher skips ids it has
//! already delivered, so re-enqueueing an event is always safe.

use ride_core::{EventId, RideId, Role, Timestamp, UserId};
use ride_state::{FareOverride, RideStatus, RideTransition, SafetyResponse, SafetyTrigger};
use serde::{Deserialize, Serialize};

/// Where a notification goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Rider,
    Driver,
    /// The rider's registered emergency contact.
    EmergencyContact,
    /// Platform operations desk.
    Operations,
    /// Prompt the driver's client to call emergency services.
    EmergencyServicesPrompt,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rider => "rider",
            Self::Driver => "driver",
            Self::EmergencyContact => "emergency_contact",
            Self::Operations => "operations",
            Self::EmergencyServicesPrompt => "emergency_services_prompt",
        }
    }
}

/// What a notification announces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum NotificationTopic {
    StatusChanged { from: RideStatus, to: RideStatus },
    SafetyCheckRaised { trigger: SafetyTrigger, by: Role },
    SafetyEscalated { by: Role, response: SafetyResponse },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: NotificationChannel,
    /// The user behind the channel, when there is one.
    pub recipient: Option<UserId>,
    #[serde(flatten)]
    pub topic: NotificationTopic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RideEventKind {
    Notify(Notification),
    /// Ask the fare collaborator for the final fare, then write it back.
    FinalizeFare { fare_override: FareOverride },
    /// Hand the terminal snapshot to trip history.
    Archive,
}

impl RideEventKind {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Notify(_) => "notify",
            Self::FinalizeFare { .. } => "finalize_fare",
            Self::Archive => "archive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideEvent {
    pub event_id: EventId,
    pub ride_id: RideId,
    pub occurred_at: Timestamp,
    pub kind: RideEventKind,
}

impl RideEvent {
    pub fn new(ride_id: RideId, occurred_at: Timestamp, kind: RideEventKind) -> Self {
        Self {
            event_id: EventId::new(),
            ride_id,
            occurred_at,
            kind,
        }
    }

    fn notify(ride_id: RideId, at: Timestamp, channel: NotificationChannel, recipient: Option<UserId>, topic: NotificationTopic) -> Self {
        Self::new(
            ride_id,
            at,
            RideEventKind::Notify(Notification {
                channel,
                recipient,
                topic,
            }),
        )
    }
}

/// Parties of a ride at the time of an event.
#[derive(Debug, Clone, Copy)]
pub struct Parties {
    pub rider: UserId,
    pub driver: Option<UserId>,
}

impl Parties {
    /// Rider and driver channels, minus whoever acted.
    fn counterparts(&self, actor: Role) -> Vec<(NotificationChannel, UserId)> {
        let mut out = Vec::with_capacity(2);
        if actor != Role::Rider {
            out.push((NotificationChannel::Rider, self.rider));
        }
        if actor != Role::Driver {
            if let Some(driver) = self.driver {
                out.push((NotificationChannel::Driver, driver));
            }
        }
        out
    }
}

/// Events for a committed status transition.
pub fn for_transition(t: &RideTransition, parties: Parties, fare_override: Option<FareOverride>) -> Vec<RideEvent> {
    let topic = NotificationTopic::StatusChanged { from: t.from, to: t.to };
    let mut events: Vec<RideEvent> = parties
        .counterparts(t.actor.role)
        .into_iter()
        .map(|(channel, user)| RideEvent::notify(t.ride_id, t.at, channel, Some(user), topic.clone()))
        .collect();
    match t.to {
        RideStatus::Completed => events.push(RideEvent::new(
            t.ride_id,
            t.at,
            RideEventKind::FinalizeFare {
                fare_override: fare_override.unwrap_or(FareOverride::None),
            },
        )),
        RideStatus::Cancelled => events.push(RideEvent::new(t.ride_id, t.at, RideEventKind::Archive)),
        _ => {}
    }
    events
}

/// Events for a newly raised safety check. A stall check prompts both
/// parties; a manual one prompts the other party.
pub fn for_safety_check(
    ride_id: RideId,
    at: Timestamp,
    by: Role,
    trigger: SafetyTrigger,
    parties: Parties,
) -> Vec<RideEvent> {
    let topic = NotificationTopic::SafetyCheckRaised { trigger, by };
    let actor = if trigger == SafetyTrigger::StallDetected { Role::System } else { by };
    parties
        .counterparts(actor)
        .into_iter()
        .map(|(channel, user)| RideEvent::notify(ride_id, at, channel, Some(user), topic.clone()))
        .collect()
}

/// Out-of-band alerts for an escalation, by responding role: a rider's
/// emergency contact and operations; for a driver, operations and an
/// emergency-services prompt.
pub fn for_escalation(ride_id: RideId, at: Timestamp, by: Role, parties: Parties) -> Vec<RideEvent> {
    let topic = NotificationTopic::SafetyEscalated {
        by,
        response: SafetyResponse::NeedHelp,
    };
    let targets = match by {
        Role::Rider => vec![
            (NotificationChannel::EmergencyContact, Some(parties.rider)),
            (NotificationChannel::Operations, None),
        ],
        Role::Driver => vec![
            (NotificationChannel::Operations, None),
            (NotificationChannel::EmergencyServicesPrompt, parties.driver),
        ],
        Role::System => vec![(NotificationChannel::Operations, None)],
    };
    targets
        .into_iter()
        .map(|(channel, user)| RideEvent::notify(ride_id, at, channel, user, topic.clone()))
        .collect()
}
