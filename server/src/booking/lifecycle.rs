//! Status preconditions for ticket mutations and the pre-show cutoff rule.
//!
//! Seat changes are only allowed on confirmed tickets while voucher and combo
//! edits are only allowed on pending ones. The two sets are disjoint.

use chrono::{DateTime, Duration, Utc};

use crate::models::ticket::{Ticket, TicketStatus};
use crate::models::user::Actor;
use crate::utils::error::{AppError, AppResult};

/// No user cancellations or refunds this close to showtime.
pub const CUTOFF_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    ChangeSeats,
    ApplyVoucher,
    AddCombo,
    Settle,
    CreateIntent,
    CheckIn,
    IssueCheckInQr,
}

impl Mutation {
    fn required_status(self) -> TicketStatus {
        match self {
            Mutation::ChangeSeats | Mutation::CheckIn | Mutation::IssueCheckInQr => {
                TicketStatus::Confirmed
            }
            Mutation::ApplyVoucher
            | Mutation::AddCombo
            | Mutation::Settle
            | Mutation::CreateIntent => TicketStatus::Pending,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Mutation::ChangeSeats => "Only confirmed tickets can change seats",
            Mutation::ApplyVoucher => "Vouchers can only be applied to pending tickets",
            Mutation::AddCombo => "Combos can only be added to pending tickets",
            Mutation::Settle => "Only pending tickets can be paid",
            Mutation::CreateIntent => "Payment can only be started for pending tickets",
            Mutation::CheckIn => "Ticket is not valid for check-in",
            Mutation::IssueCheckInQr => "Check-in QR is only available for paid tickets",
        }
    }
}

pub fn ensure_status(ticket: &Ticket, mutation: Mutation) -> AppResult<()> {
    if ticket.status == mutation.required_status() {
        Ok(())
    } else {
        Err(AppError::InvalidState(format!(
            "{} (ticket is {})",
            mutation.describe(),
            ticket.status
        )))
    }
}

pub fn ensure_access(actor: &Actor, ticket: &Ticket) -> AppResult<()> {
    if actor.can_access(ticket.user_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "You do not have permission to access this ticket".to_string(),
        ))
    }
}

pub fn within_cutoff(start_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    start_time - now < Duration::hours(CUTOFF_HOURS)
}

/// Cancellation guard. Ordinary users cannot cancel a confirmed ticket
/// within the cutoff; staff and admins bypass the window.
pub fn ensure_cancellable(
    actor: &Actor,
    ticket: &Ticket,
    show_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AppResult<()> {
    ensure_access(actor, ticket)?;
    if !ticket.status.holds_seats() {
        return Err(AppError::InvalidState(format!(
            "Only pending or confirmed tickets can be cancelled (ticket is {})",
            ticket.status
        )));
    }
    if ticket.status == TicketStatus::Confirmed
        && !actor.is_staff()
        && within_cutoff(show_start, now)
    {
        return Err(AppError::InvalidState(format!(
            "Cannot cancel within {CUTOFF_HOURS} hours of showtime"
        )));
    }
    Ok(())
}

/// Refund guard: admin only, confirmed ticket, outside the cutoff.
pub fn ensure_refundable(
    actor: &Actor,
    ticket: &Ticket,
    show_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if !actor.is_admin() {
        return Err(AppError::Forbidden(
            "Only administrators can issue refunds".to_string(),
        ));
    }
    if ticket.status != TicketStatus::Confirmed {
        return Err(AppError::InvalidState(format!(
            "Only confirmed tickets can be refunded (ticket is {})",
            ticket.status
        )));
    }
    if within_cutoff(show_start, now) {
        return Err(AppError::InvalidState(format!(
            "Cannot refund within {CUTOFF_HOURS} hours of showtime"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ticket::{PaymentInfo, PaymentMethod, PaymentStatus};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn ticket(owner: Uuid, status: TicketStatus) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: Uuid::new_v4(),
            user_id: owner,
            schedule_id: Uuid::new_v4(),
            movie_id: Uuid::new_v4(),
            cinema_id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            seats: vec![],
            combos: vec![],
            voucher: None,
            subtotal: Decimal::ZERO,
            discount: Decimal::ZERO,
            tax: Decimal::ZERO,
            service_fee: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            status,
            payment_status: PaymentStatus::Pending,
            payment: PaymentInfo::pending(PaymentMethod::App),
            payment_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            check_in_time: None,
            checked_in_by: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_seat_change_and_voucher_preconditions_are_disjoint() {
        let owner = Uuid::new_v4();
        let pending = ticket(owner, TicketStatus::Pending);
        let confirmed = ticket(owner, TicketStatus::Confirmed);

        assert!(ensure_status(&pending, Mutation::ApplyVoucher).is_ok());
        assert!(ensure_status(&pending, Mutation::ChangeSeats).is_err());
        assert!(ensure_status(&confirmed, Mutation::ChangeSeats).is_ok());
        assert!(ensure_status(&confirmed, Mutation::AddCombo).is_err());
    }

    #[test]
    fn test_cancellation_cutoff_for_users_only() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let in_one_hour = now + Duration::hours(1);
        let confirmed = ticket(owner, TicketStatus::Confirmed);

        let err = ensure_cancellable(&Actor::user(owner), &confirmed, in_one_hour, now).unwrap_err();
        assert!(err.to_string().contains("within 2 hours"));
        assert!(ensure_cancellable(&Actor::staff(Uuid::new_v4()), &confirmed, in_one_hour, now).is_ok());
        assert!(ensure_cancellable(&Actor::admin(Uuid::new_v4()), &confirmed, in_one_hour, now).is_ok());

        // Pending reservations can be dropped by their owner at any time.
        let pending = ticket(owner, TicketStatus::Pending);
        assert!(ensure_cancellable(&Actor::user(owner), &pending, in_one_hour, now).is_ok());
    }

    #[test]
    fn test_cancel_requires_live_ticket_and_ownership() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let later = now + Duration::days(1);
        let expired = ticket(owner, TicketStatus::Expired);
        assert!(matches!(
            ensure_cancellable(&Actor::user(owner), &expired, later, now),
            Err(AppError::InvalidState(_))
        ));
        let live = ticket(owner, TicketStatus::Pending);
        assert!(matches!(
            ensure_cancellable(&Actor::user(Uuid::new_v4()), &live, later, now),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_refund_rules() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let confirmed = ticket(owner, TicketStatus::Confirmed);
        let admin = Actor::admin(Uuid::new_v4());

        assert!(ensure_refundable(&admin, &confirmed, now + Duration::hours(3), now).is_ok());
        assert!(ensure_refundable(&admin, &confirmed, now + Duration::minutes(90), now).is_err());
        assert!(matches!(
            ensure_refundable(&Actor::staff(owner), &confirmed, now + Duration::hours(3), now),
            Err(AppError::Forbidden(_))
        ));
    }
}
