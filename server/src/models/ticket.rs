use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::pricing::Charges;
use crate::booking::voucher::snapshot_discount;
use crate::models::catalog::DiscountType;
use crate::models::room::SeatType;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Confirmed,
    Cancelled,
    Refunded,
    Expired,
}

impl TicketStatus {
    pub const LIVE: [TicketStatus; 2] = [TicketStatus::Pending, TicketStatus::Confirmed];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Confirmed => "confirmed",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Refunded => "refunded",
            TicketStatus::Expired => "expired",
        }
    }

    /// Pending and confirmed tickets hold their seats.
    pub fn holds_seats(self) -> bool {
        matches!(self, TicketStatus::Pending | TicketStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        !self.holds_seats()
    }

    /// Edges of the ticket state machine. Terminal states have none.
    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Confirmed, Cancelled)
                | (Confirmed, Refunded)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TicketStatus::Pending),
            "confirmed" => Ok(TicketStatus::Confirmed),
            "cancelled" => Ok(TicketStatus::Cancelled),
            "refunded" => Ok(TicketStatus::Refunded),
            "expired" => Ok(TicketStatus::Expired),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Vietqr,
    Manual,
    Momo,
    Zalopay,
    Card,
    Cash,
    App,
    Pos,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Vietqr => "vietqr",
            PaymentMethod::Manual => "manual",
            PaymentMethod::Momo => "momo",
            PaymentMethod::Zalopay => "zalopay",
            PaymentMethod::Card => "card",
            PaymentMethod::Cash => "cash",
            PaymentMethod::App => "app",
            PaymentMethod::Pos => "pos",
        }
    }

    /// Bank-transfer methods settle through a signed QR intent.
    pub fn uses_qr(self) -> bool {
        matches!(self, PaymentMethod::Vietqr | PaymentMethod::Manual)
    }

    pub fn channel(self) -> PaymentChannel {
        match self {
            PaymentMethod::Cash | PaymentMethod::Card | PaymentMethod::Pos => PaymentChannel::Counter,
            _ => PaymentChannel::App,
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vietqr" => Ok(PaymentMethod::Vietqr),
            "manual" => Ok(PaymentMethod::Manual),
            "momo" => Ok(PaymentMethod::Momo),
            "zalopay" => Ok(PaymentMethod::Zalopay),
            "card" => Ok(PaymentMethod::Card),
            "cash" => Ok(PaymentMethod::Cash),
            "app" => Ok(PaymentMethod::App),
            "pos" => Ok(PaymentMethod::Pos),
            other => Err(format!("unknown payment method '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentChannel {
    App,
    Counter,
}

/// Seat snapshot frozen at booking time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatLine {
    pub code: String,
    #[serde(rename = "type")]
    pub seat_type: SeatType,
    pub price: Decimal,
    pub row: String,
    pub column: i32,
}

/// Combo snapshot; name and price are copied from the catalog when added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComboLine {
    pub combo_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub price: Decimal,
}

impl ComboLine {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherSnapshot {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    #[serde(default)]
    pub min_order_value: Option<Decimal>,
    /// Single-use vouchers hold a per-user redemption while the ticket is live.
    pub single_use: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub channel: Option<PaymentChannel>,
}

impl PaymentInfo {
    pub fn pending(method: PaymentMethod) -> Self {
        Self {
            method,
            status: PaymentStatus::Pending,
            paid_at: None,
            channel: Some(method.channel()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub schedule_id: Uuid,
    pub movie_id: Uuid,
    pub cinema_id: Uuid,
    pub room_id: Uuid,
    pub seats: Vec<SeatLine>,
    pub combos: Vec<ComboLine>,
    pub voucher: Option<VoucherSnapshot>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub service_fee: Decimal,
    pub total_amount: Decimal,
    pub status: TicketStatus,
    pub payment_status: PaymentStatus,
    pub payment: PaymentInfo,
    pub payment_id: Option<Uuid>,
    /// Optimistic concurrency token, bumped on every successful write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub check_in_time: Option<DateTime<Utc>>,
    pub checked_in_by: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn seat_codes(&self) -> Vec<String> {
        self.seats.iter().map(|s| s.code.clone()).collect()
    }

    pub fn seats_total(&self) -> Decimal {
        self.seats.iter().map(|s| s.price).sum()
    }

    pub fn combos_total(&self) -> Decimal {
        self.combos.iter().map(ComboLine::line_total).sum()
    }

    pub fn charges(&self) -> Charges {
        Charges {
            subtotal: self.subtotal,
            discount: self.discount,
            tax: self.tax,
            service_fee: self.service_fee,
            total: self.total_amount,
        }
    }

    pub fn set_charges(&mut self, charges: Charges) {
        self.subtotal = charges.subtotal;
        self.discount = charges.discount;
        self.tax = charges.tax;
        self.service_fee = charges.service_fee;
        self.total_amount = charges.total;
    }

    /// Recomputes the subtotal from the current seat and combo lines and
    /// re-evaluates an attached voucher against it.
    pub fn reprice(&mut self) {
        let subtotal = self.seats_total() + self.combos_total();
        let discount = match &self.voucher {
            Some(voucher) => snapshot_discount(voucher, subtotal),
            None => self.discount,
        };
        let charges = self.charges().with_subtotal(subtotal).with_discount(discount);
        self.set_charges(charges);
    }

    /// A pending reservation past its deadline. It still holds its seats
    /// until the expiry sweep moves it to `expired`.
    pub fn reservation_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == TicketStatus::Pending && self.expires_at.is_some_and(|at| at < now)
    }

    pub fn transition(&mut self, next: TicketStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidState(format!(
                "Ticket is {} and cannot become {}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn confirm(
        &mut self,
        method: PaymentMethod,
        channel: PaymentChannel,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.transition(TicketStatus::Confirmed, now)?;
        self.payment_status = PaymentStatus::Completed;
        self.confirmed_at = Some(now);
        self.payment = PaymentInfo {
            method,
            status: PaymentStatus::Completed,
            paid_at: Some(now),
            channel: Some(channel),
        };
        Ok(())
    }

    pub fn cancel(&mut self, by: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(TicketStatus::Cancelled, now)?;
        self.cancelled_at = Some(now);
        self.cancelled_by = Some(by);
        Ok(())
    }

    pub fn refund(&mut self, by: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(TicketStatus::Refunded, now)?;
        self.payment_status = PaymentStatus::Refunded;
        self.payment.status = PaymentStatus::Refunded;
        self.cancelled_at = Some(now);
        self.cancelled_by = Some(by);
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(TicketStatus::Expired, now)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub user_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

impl TicketFilter {
    pub fn for_user(user_id: Uuid, status: Option<TicketStatus>) -> Self {
        Self {
            status,
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, ticket: &Ticket) -> bool {
        self.status.map_or(true, |s| ticket.status == s)
            && self.user_id.map_or(true, |u| ticket.user_id == u)
            && self.schedule_id.map_or(true, |s| ticket.schedule_id == s)
            && self.from_date.map_or(true, |from| ticket.created_at >= from)
            && self.to_date.map_or(true, |to| ticket.created_at <= to)
    }
}
