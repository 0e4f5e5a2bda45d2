use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ServiceContext;
use crate::booking::lifecycle::{ensure_access, ensure_status, Mutation};
use crate::models::schedule::Schedule;
use crate::models::ticket::Ticket;
use crate::models::user::Actor;
use crate::signing::{CheckInQr, QrPayload};
use crate::store::StoreError;
use crate::utils::error::{AppError, AppResult};

/// Doors open this long before the show.
pub const EARLY_ENTRY_MINUTES: i64 = 30;
/// Used when a schedule carries no usable end time.
pub const DEFAULT_SHOW_HOURS: i64 = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInPass {
    pub ticket_id: Uuid,
    pub qr_content: String,
    pub payload: CheckInQr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(alias = "qrData")]
    pub qr_content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResult {
    pub ticket: Ticket,
    pub already_checked_in: bool,
    pub check_in_time: DateTime<Utc>,
}

pub fn check_in_window(schedule: &Schedule) -> (DateTime<Utc>, DateTime<Utc>) {
    let opens = schedule.start_time - Duration::minutes(EARLY_ENTRY_MINUTES);
    let closes = if schedule.end_time > schedule.start_time {
        schedule.end_time
    } else {
        schedule.start_time + Duration::hours(DEFAULT_SHOW_HOURS)
    };
    (opens, closes)
}

pub struct CheckInService {
    ctx: Arc<ServiceContext>,
}

impl CheckInService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Signs an entry pass for a paid ticket.
    pub async fn issue(&self, actor: &Actor, ticket_id: Uuid) -> AppResult<CheckInPass> {
        let ticket = self.ctx.load_ticket(ticket_id).await?;
        ensure_access(actor, &ticket)?;
        ensure_status(&ticket, Mutation::IssueCheckInQr)?;

        let payload = CheckInQr {
            kind: CheckInQr::KIND.to_string(),
            ver: self.ctx.signer.current_version(),
            ticket_id: ticket.id,
            schedule_id: ticket.schedule_id,
            seats: ticket.seat_codes(),
            ts: self.ctx.clock.now().timestamp(),
        };
        let signed = self.ctx.signer.sign(&payload)?;
        Ok(CheckInPass {
            ticket_id: ticket.id,
            qr_content: signed.content(),
            payload,
        })
    }

    /// Admits the holder of a scanned pass. Scanning an admitted ticket
    /// again reports the original admission instead of failing.
    pub async fn verify(&self, actor: &Actor, content: &str) -> AppResult<CheckInResult> {
        if !actor.is_staff() {
            return Err(AppError::Forbidden(
                "Only staff can verify tickets".to_string(),
            ));
        }
        let (_, payload) = self.ctx.signer.verify::<CheckInQr>(content)?;
        let mut ticket = self.ctx.load_ticket(payload.ticket_id).await?;
        if ticket.schedule_id != payload.schedule_id || ticket.seat_codes() != payload.seats {
            return Err(AppError::Conflict(
                "QR code does not match this ticket, request a new pass".to_string(),
            ));
        }
        ensure_status(&ticket, Mutation::CheckIn)?;

        if let Some(at) = ticket.check_in_time {
            return Ok(CheckInResult {
                ticket,
                already_checked_in: true,
                check_in_time: at,
            });
        }

        let schedule = self.ctx.load_schedule(ticket.schedule_id).await?;
        let now = self.ctx.clock.now();
        let (opens, closes) = check_in_window(&schedule);
        if now < opens {
            return Err(AppError::InvalidState(format!(
                "Check-in opens {EARLY_ENTRY_MINUTES} minutes before showtime"
            )));
        }
        if now > closes {
            return Err(AppError::Expired("This showtime has ended".to_string()));
        }

        ticket.check_in_time = Some(now);
        ticket.checked_in_by = Some(actor.user_id);
        ticket.updated_at = now;
        match self.ctx.store.save_ticket(&ticket).await {
            Ok(ticket) => {
                tracing::info!(ticket_id = %ticket.id, staff_id = %actor.user_id, "Ticket checked in");
                self.ctx.ticket_updated(&ticket);
                Ok(CheckInResult {
                    ticket,
                    already_checked_in: false,
                    check_in_time: now,
                })
            }
            // Lost a race with another scanner.
            Err(StoreError::StaleTicket(id)) => {
                let current = self.ctx.load_ticket(id).await?;
                match current.check_in_time {
                    Some(at) => Ok(CheckInResult {
                        ticket: current,
                        already_checked_in: true,
                        check_in_time: at,
                    }),
                    None => Err(StoreError::StaleTicket(id).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}
