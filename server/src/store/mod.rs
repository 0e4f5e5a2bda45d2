//! Persistence boundary for the booking core.
//!
//! Every method that touches more than one entity is atomic: the Postgres
//! backend wraps it in a transaction, the in-memory backend runs it under a
//! single lock. Callers never see a half-applied write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::catalog::{Combo, Movie, Promotion};
use crate::models::membership::{Membership, PointEntry, PointLog, PointLogSum};
use crate::models::payment::{Payment, PaymentFilter, PaymentIntent};
use crate::models::room::Room;
use crate::models::schedule::Schedule;
use crate::models::ticket::{Ticket, TicketFilter};
use crate::utils::response::Page;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("seats already held: {}", .0.join(", "))]
    SeatConflict(Vec<String>),

    #[error("voucher {0} already redeemed by this user")]
    VoucherRedeemed(String),

    /// The ticket's version moved since it was read.
    #[error("ticket {0} was modified concurrently")]
    StaleTicket(Uuid),

    #[error("payment {0} is not refundable")]
    PaymentNotRefundable(Uuid),

    #[error("payment intent {0} is not pending")]
    IntentNotPending(Uuid),

    #[error("room already scheduled by {0}")]
    ScheduleOverlap(Uuid),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait BookingStore: Send + Sync {
    // Catalog

    async fn movie(&self, id: Uuid) -> StoreResult<Option<Movie>>;

    async fn room(&self, id: Uuid) -> StoreResult<Option<Room>>;

    async fn schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>>;

    /// Inserts the schedule unless it overlaps another one in the same room.
    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()>;

    async fn combo(&self, id: Uuid) -> StoreResult<Option<Combo>>;

    /// Looks up a promotion by its normalized code, live or not.
    async fn promotion(&self, code: &str) -> StoreResult<Option<Promotion>>;

    /// Whether `user_id` holds a live redemption of `code`, ignoring `exclude`.
    async fn voucher_redeemed(
        &self,
        user_id: Uuid,
        code: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<bool>;

    // Tickets

    /// Seat codes held by live tickets of the schedule, except `exclude`.
    async fn held_seats(&self, schedule_id: Uuid, exclude: Option<Uuid>)
        -> StoreResult<Vec<String>>;

    /// Inserts a new ticket and its seat holds. Fails with `SeatConflict`
    /// listing every requested code that is already held.
    async fn insert_ticket(&self, ticket: &Ticket) -> StoreResult<Ticket>;

    async fn ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>>;

    /// Newest first, with the total match count.
    async fn list_tickets(&self, filter: &TicketFilter, page: Page)
        -> StoreResult<(Vec<Ticket>, i64)>;

    /// Compare-and-set write keyed on `ticket.version`. Seat holds and
    /// voucher redemptions are resynchronised with the ticket in the same
    /// write: terminal tickets release both.
    async fn save_ticket(&self, ticket: &Ticket) -> StoreResult<Ticket>;

    /// Confirms a pending ticket, records its payment (or returns the one
    /// already recorded) and consumes the intent, all or nothing.
    async fn settle(
        &self,
        ticket: &Ticket,
        payment: &Payment,
        intent_id: Option<Uuid>,
    ) -> StoreResult<(Ticket, Payment)>;

    /// Moves a confirmed ticket and its completed payment to refunded.
    async fn refund(&self, ticket: &Ticket, payment: &Payment) -> StoreResult<(Ticket, Payment)>;

    /// Expires pending tickets whose reservation ended before `now`,
    /// releasing their seats. Returns the expired ids.
    async fn expire_stale(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>>;

    // Payment intents

    /// Stores a new intent, cancelling older pending intents of the ticket.
    async fn insert_intent(&self, intent: &PaymentIntent) -> StoreResult<()>;

    async fn intent(&self, id: Uuid) -> StoreResult<Option<PaymentIntent>>;

    async fn latest_pending_intent(&self, ticket_id: Uuid) -> StoreResult<Option<PaymentIntent>>;

    /// Marks a pending intent expired. A no-op for any other status.
    async fn expire_intent(&self, id: Uuid) -> StoreResult<()>;

    // Payments

    async fn payment(&self, id: Uuid) -> StoreResult<Option<Payment>>;

    async fn payment_for_ticket(&self, ticket_id: Uuid) -> StoreResult<Option<Payment>>;

    async fn list_payments(&self, filter: &PaymentFilter, page: Page)
        -> StoreResult<(Vec<Payment>, i64)>;

    // Membership

    async fn membership(&self, user_id: Uuid) -> StoreResult<Option<Membership>>;

    /// Returns the user's membership, creating a Bronze row when missing.
    async fn ensure_membership(&self, user_id: Uuid, now: DateTime<Utc>)
        -> StoreResult<Membership>;

    /// Applies the entry to the running totals and appends it to the log.
    async fn apply_points(&self, entry: PointEntry, now: DateTime<Utc>)
        -> StoreResult<Membership>;

    /// Newest first, with the total row count.
    async fn point_logs(&self, user_id: Uuid, page: Page) -> StoreResult<(Vec<PointLog>, i64)>;

    async fn memberships(&self) -> StoreResult<Vec<Membership>>;

    async fn point_log_sums(&self) -> StoreResult<Vec<PointLogSum>>;
}
