//! In-process fan-out of booking events over a `tokio::sync::broadcast` channel.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::membership::MembershipSummary;
use crate::models::ticket::{PaymentStatus, TicketStatus};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum BookingEvent {
    #[serde(rename = "ticket.updated", rename_all = "camelCase")]
    TicketUpdated {
        ticket_id: Uuid,
        user_id: Uuid,
        status: TicketStatus,
        payment_status: PaymentStatus,
    },
    #[serde(rename = "membership.updated")]
    MembershipUpdated(MembershipSummary),
}

impl BookingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BookingEvent::TicketUpdated { .. } => "ticket.updated",
            BookingEvent::MembershipUpdated(_) => "membership.updated",
        }
    }
}

pub struct EventBus {
    sender: broadcast::Sender<BookingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Events published with no subscribers are dropped.
    pub fn publish(&self, event: BookingEvent) {
        tracing::debug!(event = event.name(), "Publishing booking event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Background consumer that writes every booking event to the log as one
/// JSON payload, for shipping to an external audit pipeline. Returns the number of events journaled once
/// the bus is dropped.
pub async fn run_event_journal(mut receiver: broadcast::Receiver<BookingEvent>) -> u64 {
    let mut journaled = 0;
    loop {
        match receiver.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(payload) => {
                    tracing::info!(event = event.name(), %payload, "Booking event");
                    journaled += 1;
                }
                Err(e) => {
                    tracing::error!(event = event.name(), error = %e, "Failed to encode booking event");
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event journal lagged, some events were not recorded");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!(journaled, "Event bus closed, journal shutting down");
                break;
            }
        }
    }
    journaled
}
