use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ticket::{PaymentMethod, PaymentStatus};

pub const DEFAULT_CURRENCY: &str = "VND";

/// Settled money movement for a ticket. At most one per ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub paid_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub refunded_by: Option<Uuid>,
}

impl Payment {
    pub fn completed(
        ticket_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
        currency: &str,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            user_id,
            amount,
            currency: currency.to_string(),
            method,
            status: PaymentStatus::Completed,
            paid_at: now,
            refunded_at: None,
            refund_reason: None,
            refunded_by: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFilter {
    pub user_id: Option<Uuid>,
    pub ticket_id: Option<Uuid>,
    pub status: Option<PaymentStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.user_id.map_or(true, |u| payment.user_id == u)
            && self.ticket_id.map_or(true, |t| payment.ticket_id == t)
            && self.status.map_or(true, |s| payment.status == s)
            && self.start_date.map_or(true, |from| payment.paid_at >= from)
            && self.end_date.map_or(true, |to| payment.paid_at <= to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Paid,
    Expired,
    Cancelled,
}

impl IntentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Paid => "paid",
            IntentStatus::Expired => "expired",
            IntentStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IntentStatus::Pending),
            "paid" => Ok(IntentStatus::Paid),
            "expired" => Ok(IntentStatus::Expired),
            "cancelled" => Ok(IntentStatus::Cancelled),
            other => Err(format!("unknown intent status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankInfo {
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
    pub branch: Option<String>,
}

/// One attempt to pay a ticket through an externally confirmed channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    pub status: IntentStatus,
    pub expires_at: DateTime<Utc>,
    pub qr_payload: Option<String>,
    pub signature: Option<String>,
    pub bank_info: Option<BankInfo>,
    pub created_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn qr_content(&self) -> Option<String> {
        match (&self.qr_payload, &self.signature) {
            (Some(payload), Some(sig)) => Some(format!("{payload}.{sig}")),
            _ => None,
        }
    }
}
