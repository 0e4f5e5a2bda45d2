use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payments::IntentView;
use super::schedules::normalize_seats;
use super::{PaymentService, ServiceContext};
use crate::booking::availability::find_conflicts;
use crate::booking::lifecycle::{
    ensure_access, ensure_cancellable, ensure_refundable, ensure_status, Mutation,
};
use crate::booking::pricing::{self, Charges};
use crate::booking::voucher::{self, VoucherPreview};
use crate::models::catalog::UsageLimit;
use crate::models::ticket::{
    ComboLine, PaymentInfo, PaymentMethod, PaymentStatus, Ticket, TicketFilter, TicketStatus,
};
use crate::models::user::Actor;
use crate::utils::error::{AppError, AppResult};
use crate::utils::response::{Page, Paginated};

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComboItem {
    #[serde(alias = "combo")]
    pub combo_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub schedule_id: Uuid,
    #[serde(alias = "seatNumbers")]
    pub seats: Vec<String>,
    #[serde(default, alias = "comboItems")]
    pub combos: Vec<ComboItem>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub ticket: Ticket,
    pub payment_intent: Option<IntentView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatChange {
    pub ticket: Ticket,
    /// Positive when the new seats cost more.
    pub price_difference: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherPreviewQuery {
    pub user_id: Option<Uuid>,
    pub movie_id: Option<Uuid>,
    pub amount: Option<Decimal>,
}

pub struct TicketService {
    ctx: Arc<ServiceContext>,
    payments: Arc<PaymentService>,
}

impl TicketService {
    pub fn new(ctx: Arc<ServiceContext>, payments: Arc<PaymentService>) -> Self {
        Self { ctx, payments }
    }

    /// Reserves seats on a schedule as a pending ticket.
    pub async fn book(&self, actor: &Actor, request: BookingRequest) -> AppResult<Booking> {
        let now = self.ctx.clock.now();
        let schedule = self.ctx.load_schedule(request.schedule_id).await?;
        if schedule.start_time <= now {
            return Err(AppError::ValidationError(
                "This showtime has already started".to_string(),
            ));
        }
        let room = self.ctx.load_room(schedule.room_id).await?;

        let codes = normalize_seats(&request.seats);
        let seats = pricing::price_seats(&room, &schedule, &codes, now)?;

        let mut combos: Vec<ComboLine> = Vec::with_capacity(request.combos.len());
        for item in &request.combos {
            let combo = self
                .ctx
                .store
                .combo(item.combo_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Combo {} not found", item.combo_id)))?;
            pricing::merge_combo(&mut combos, pricing::combo_line(&combo, item.quantity)?)?;
        }

        let method = request.payment_method.unwrap_or(if actor.is_staff() {
            PaymentMethod::Cash
        } else {
            PaymentMethod::App
        });
        let charges = Charges::from_subtotal(pricing::subtotal(&seats, &combos));

        let mut ticket = Ticket {
            id: Uuid::new_v4(),
            user_id: actor.user_id,
            schedule_id: schedule.id,
            movie_id: schedule.movie_id,
            cinema_id: schedule.cinema_id,
            room_id: schedule.room_id,
            seats,
            combos,
            voucher: None,
            subtotal: Decimal::ZERO,
            discount: Decimal::ZERO,
            tax: Decimal::ZERO,
            service_fee: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            status: TicketStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment: PaymentInfo::pending(method),
            payment_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            check_in_time: None,
            checked_in_by: None,
            expires_at: Some(now + self.ctx.settings.reservation_ttl),
        };
        ticket.set_charges(charges);

        let ticket = self.ctx.store.insert_ticket(&ticket).await?;
        tracing::info!(
            ticket_id = %ticket.id,
            schedule_id = %ticket.schedule_id,
            user_id = %ticket.user_id,
            seats = ?ticket.seat_codes(),
            total = %ticket.total_amount,
            "Ticket booked"
        );
        self.ctx.ticket_updated(&ticket);

        // The reservation stands even if the intent cannot be issued; the
        // client can request one again through the payment intent endpoint.
        let payment_intent = if method.uses_qr() {
            match self.payments.issue_intent(&ticket, method).await {
                Ok(intent) => Some(IntentView::from(&intent)),
                Err(e) => {
                    tracing::warn!(ticket_id = %ticket.id, error = %e, "Failed to issue payment intent");
                    None
                }
            }
        } else {
            None
        };

        Ok(Booking {
            ticket,
            payment_intent,
        })
    }

    pub async fn get(&self, actor: &Actor, id: Uuid) -> AppResult<Ticket> {
        let ticket = self.ctx.load_ticket(id).await?;
        ensure_access(actor, &ticket)?;
        Ok(ticket)
    }

    pub async fn my_tickets(
        &self,
        actor: &Actor,
        status: Option<TicketStatus>,
        page: Page,
    ) -> AppResult<Paginated<Ticket>> {
        let page = page.clamped();
        let filter = TicketFilter::for_user(actor.user_id, status);
        let (items, total) = self.ctx.store.list_tickets(&filter, page).await?;
        Ok(Paginated::new(items, total, page))
    }

    pub async fn list(
        &self,
        actor: &Actor,
        filter: TicketFilter,
        page: Page,
    ) -> AppResult<Paginated<Ticket>> {
        if !actor.is_staff() {
            return Err(AppError::Forbidden(
                "Only staff can list all tickets".to_string(),
            ));
        }
        let page = page.clamped();
        let (items, total) = self.ctx.store.list_tickets(&filter, page).await?;
        Ok(Paginated::new(items, total, page))
    }

    /// Moves a confirmed ticket to other seats of the same schedule. The
    /// payment is left untouched; the difference is reported to the caller.
    pub async fn change_seats(
        &self,
        actor: &Actor,
        id: Uuid,
        seats: &[String],
    ) -> AppResult<SeatChange> {
        let mut ticket = self.ctx.load_ticket(id).await?;
        ensure_access(actor, &ticket)?;
        ensure_status(&ticket, Mutation::ChangeSeats)?;

        let now = self.ctx.clock.now();
        let schedule = self.ctx.load_schedule(ticket.schedule_id).await?;
        let room = self.ctx.load_room(ticket.room_id).await?;
        let codes = normalize_seats(seats);
        let lines = pricing::keep_booked_prices(
            &ticket.seats,
            pricing::price_seats(&room, &schedule, &codes, now)?,
        );

        let held = self.ctx.store.held_seats(ticket.schedule_id, Some(ticket.id)).await?;
        let conflicts = find_conflicts(&codes, held);
        if !conflicts.is_empty() {
            return Err(AppError::SeatConflict(conflicts));
        }

        let previous_total = ticket.total_amount;
        ticket.seats = lines;
        ticket.reprice();
        ticket.updated_at = now;
        let ticket = self.ctx.store.save_ticket(&ticket).await?;
        let price_difference = ticket.total_amount - previous_total;

        tracing::info!(
            ticket_id = %ticket.id,
            seats = ?ticket.seat_codes(),
            %price_difference,
            "Seats changed"
        );
        self.ctx.ticket_updated(&ticket);
        Ok(SeatChange {
            ticket,
            price_difference,
        })
    }

    pub async fn apply_voucher(&self, actor: &Actor, id: Uuid, code: &str) -> AppResult<Ticket> {
        let mut ticket = self.ctx.load_ticket(id).await?;
        ensure_access(actor, &ticket)?;
        ensure_status(&ticket, Mutation::ApplyVoucher)?;
        let now = self.ctx.clock.now();
        if ticket.reservation_lapsed(now) {
            return Err(AppError::Expired(
                "Seat reservation has expired, please book again".to_string(),
            ));
        }

        let code = voucher::normalize_code(code);
        if code.is_empty() {
            return Err(AppError::ValidationError("Voucher code is required".to_string()));
        }
        let promotion = self
            .ctx
            .store
            .promotion(&code)
            .await?
            .filter(|p| p.is_live(now))
            .ok_or_else(|| AppError::ValidationError(format!("Voucher {code} is invalid or expired")))?;

        voucher::check_eligibility(&promotion, Some(ticket.movie_id), Some(ticket.subtotal))?;
        let snapshot = voucher::snapshot(&promotion);
        if snapshot.single_use
            && self
                .ctx
                .store
                .voucher_redeemed(ticket.user_id, &promotion.code, Some(ticket.id))
                .await?
        {
            return Err(AppError::Conflict(format!(
                "Voucher {} has already been used",
                promotion.code
            )));
        }

        let discount = voucher::compute_discount(&promotion, ticket.subtotal);
        ticket.voucher = Some(snapshot);
        ticket.set_charges(ticket.charges().with_discount(discount));
        ticket.updated_at = now;
        let ticket = self.ctx.store.save_ticket(&ticket).await?;

        tracing::info!(
            ticket_id = %ticket.id,
            code = %promotion.code,
            discount = %ticket.discount,
            "Voucher applied"
        );
        self.ctx.ticket_updated(&ticket);
        Ok(ticket)
    }

    pub async fn add_combo(
        &self,
        actor: &Actor,
        id: Uuid,
        combo_id: Uuid,
        quantity: u32,
    ) -> AppResult<Ticket> {
        let mut ticket = self.ctx.load_ticket(id).await?;
        ensure_access(actor, &ticket)?;
        ensure_status(&ticket, Mutation::AddCombo)?;
        let now = self.ctx.clock.now();
        if ticket.reservation_lapsed(now) {
            return Err(AppError::Expired(
                "Seat reservation has expired, please book again".to_string(),
            ));
        }

        let combo = self
            .ctx
            .store
            .combo(combo_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Combo {combo_id} not found")))?;
        pricing::merge_combo(&mut ticket.combos, pricing::combo_line(&combo, quantity)?)?;
        ticket.reprice();
        ticket.updated_at = now;
        let ticket = self.ctx.store.save_ticket(&ticket).await?;

        tracing::info!(ticket_id = %ticket.id, combo = %combo.name, quantity, "Combo added");
        self.ctx.ticket_updated(&ticket);
        Ok(ticket)
    }

    /// Cancels a live ticket and releases its seats. Money is not returned
    /// here; that is what refunds are for.
    pub async fn cancel(&self, actor: &Actor, id: Uuid) -> AppResult<Ticket> {
        let mut ticket = self.ctx.load_ticket(id).await?;
        let schedule = self.ctx.load_schedule(ticket.schedule_id).await?;
        let now = self.ctx.clock.now();
        ensure_cancellable(actor, &ticket, schedule.start_time, now)?;

        ticket.cancel(actor.user_id, now)?;
        let ticket = self.ctx.store.save_ticket(&ticket).await?;
        tracing::info!(ticket_id = %ticket.id, cancelled_by = %actor.user_id, "Ticket cancelled");
        self.ctx.ticket_updated(&ticket);
        Ok(ticket)
    }

    pub async fn refund(&self, actor: &Actor, id: Uuid, reason: Option<String>) -> AppResult<Ticket> {
        let mut ticket = self.ctx.load_ticket(id).await?;
        let schedule = self.ctx.load_schedule(ticket.schedule_id).await?;
        let now = self.ctx.clock.now();
        ensure_refundable(actor, &ticket, schedule.start_time, now)?;

        let mut payment = self
            .ctx
            .store
            .payment_for_ticket(ticket.id)
            .await?
            .filter(|p| p.status == PaymentStatus::Completed)
            .ok_or_else(|| {
                AppError::InvalidState("Ticket has no completed payment to refund".to_string())
            })?;

        ticket.refund(actor.user_id, now)?;
        payment.status = PaymentStatus::Refunded;
        payment.refunded_at = Some(now);
        payment.refunded_by = Some(actor.user_id);
        payment.refund_reason = reason.filter(|r| !r.trim().is_empty());

        let (ticket, payment) = self.ctx.store.refund(&ticket, &payment).await?;
        tracing::info!(
            ticket_id = %ticket.id,
            payment_id = %payment.id,
            amount = %payment.amount,
            "Ticket refunded"
        );
        self.ctx.ticket_updated(&ticket);
        Ok(ticket)
    }

    /// Moves lapsed pending reservations to expired. Safe to run repeatedly.
    pub async fn expire_stale(&self) -> AppResult<Vec<Uuid>> {
        let expired = self.ctx.store.expire_stale(self.ctx.clock.now()).await?;
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired stale reservations");
        }
        Ok(expired)
    }

    pub async fn cleanup(&self, actor: &Actor) -> AppResult<Vec<Uuid>> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden(
                "Only administrators can run the expiry sweep".to_string(),
            ));
        }
        self.expire_stale().await
    }

    /// Periodic expiry sweep. Runs until the task is dropped.
    pub async fn run_expiry_sweep(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.expire_stale().await {
                tracing::error!(error = %e, "Expiry sweep failed");
            }
        }
    }

    /// Validates a code without attaching it. Unknown or inactive codes are
    /// `NotFound`; a spent single-use code is a validation failure.
    pub async fn preview_voucher(
        &self,
        code: &str,
        query: VoucherPreviewQuery,
    ) -> AppResult<VoucherPreview> {
        let code = voucher::normalize_code(code);
        let now = self.ctx.clock.now();
        let promotion = self
            .ctx
            .store
            .promotion(&code)
            .await?
            .filter(|p| p.is_live(now))
            .ok_or_else(|| AppError::NotFound(format!("Voucher {code} not found or inactive")))?;

        voucher::check_eligibility(&promotion, query.movie_id, query.amount)?;
        if let Some(user_id) = query.user_id {
            if promotion.usage_limit == UsageLimit::Single
                && self
                    .ctx
                    .store
                    .voucher_redeemed(user_id, &promotion.code, None)
                    .await?
            {
                return Err(AppError::ValidationError(format!(
                    "Voucher {} has already been used",
                    promotion.code
                )));
            }
        }
        Ok(voucher::preview(promotion, query.amount))
    }
}
