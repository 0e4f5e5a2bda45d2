use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{BookingStore, StoreError, StoreResult};
use crate::booking::availability::find_conflicts;
use crate::models::catalog::{Combo, DiscountType, Movie, Promotion, UsageLimit};
use crate::models::membership::{Membership, PointEntry, PointLog, PointLogSum};
use crate::models::payment::{BankInfo, Payment, PaymentFilter, PaymentIntent};
use crate::models::room::{Room, Seat};
use crate::models::schedule::{PriceTable, Schedule};
use crate::models::ticket::{
    ComboLine, PaymentInfo, SeatLine, Ticket, TicketFilter, TicketStatus, VoucherSnapshot,
};
use crate::utils::response::Page;

const TICKET_COLUMNS: &str = "\
    id, user_id, schedule_id, movie_id, cinema_id, room_id, \
    seats, combos, voucher, subtotal, discount, tax, service_fee, total_amount, \
    status, payment_status, payment, payment_id, version, \
    created_at, updated_at, confirmed_at, cancelled_at, cancelled_by, \
    check_in_time, checked_in_by, expires_at";

const SCHEDULE_COLUMNS: &str = "\
    id, movie_id, room_id, cinema_id, start_time, end_time, price_table, \
    is_3d, has_subtitles, is_dubbed, created_at";

const PROMOTION_COLUMNS: &str = "\
    id, code, name, discount_type, discount_value, max_discount, min_order_value, \
    usage_limit, applicable_movies, start_date, end_date, is_active";

const PAYMENT_COLUMNS: &str = "\
    id, ticket_id, user_id, amount, currency, method, status, paid_at, \
    refunded_at, refund_reason, refunded_by";

const INTENT_COLUMNS: &str = "\
    id, ticket_id, user_id, method, amount, currency, status, expires_at, \
    qr_payload, signature, bank_info, created_at";

const MEMBERSHIP_COLUMNS: &str = "user_id, tier, points, total_spent, created_at, updated_at";

const POINT_LOG_COLUMNS: &str = "\
    id, user_id, ticket_id, type AS kind, points, amount, note, created_by, created_at";

/// Postgres unique violation.
const UNIQUE_VIOLATION: &str = "23505";

fn corrupt(what: &str) -> impl FnOnce(String) -> StoreError + '_ {
    move |msg| StoreError::Corrupt(format!("{what}: {msg}"))
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some(UNIQUE_VIOLATION) && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}

#[derive(FromRow)]
struct ScheduleRow {
    id: Uuid,
    movie_id: Uuid,
    room_id: Uuid,
    cinema_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    price_table: Json<PriceTable>,
    is_3d: bool,
    has_subtitles: bool,
    is_dubbed: bool,
    created_at: DateTime<Utc>,
}

impl From<ScheduleRow> for Schedule {
    fn from(row: ScheduleRow) -> Self {
        Self {
            id: row.id,
            movie_id: row.movie_id,
            room_id: row.room_id,
            cinema_id: row.cinema_id,
            start_time: row.start_time,
            end_time: row.end_time,
            price_table: row.price_table.0,
            is_3d: row.is_3d,
            has_subtitles: row.has_subtitles,
            is_dubbed: row.is_dubbed,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct RoomRow {
    id: Uuid,
    cinema_id: Uuid,
    name: String,
    seats: Json<Vec<Seat>>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct PromotionRow {
    id: Uuid,
    code: String,
    name: String,
    discount_type: String,
    discount_value: Decimal,
    max_discount: Option<Decimal>,
    min_order_value: Option<Decimal>,
    usage_limit: String,
    applicable_movies: Vec<Uuid>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    is_active: bool,
}

impl TryFrom<PromotionRow> for Promotion {
    type Error = StoreError;

    fn try_from(row: PromotionRow) -> StoreResult<Self> {
        let discount_type = DiscountType::parse(&row.discount_type).ok_or_else(|| {
            StoreError::Corrupt(format!("promotion discount type '{}'", row.discount_type))
        })?;
        let usage_limit = UsageLimit::parse(&row.usage_limit).ok_or_else(|| {
            StoreError::Corrupt(format!("promotion usage limit '{}'", row.usage_limit))
        })?;
        Ok(Self {
            id: row.id,
            code: row.code,
            name: row.name,
            discount_type,
            discount_value: row.discount_value,
            max_discount: row.max_discount,
            min_order_value: row.min_order_value,
            usage_limit,
            applicable_movies: row.applicable_movies,
            start_date: row.start_date,
            end_date: row.end_date,
            is_active: row.is_active,
        })
    }
}

#[derive(FromRow)]
struct TicketRow {
    id: Uuid,
    user_id: Uuid,
    schedule_id: Uuid,
    movie_id: Uuid,
    cinema_id: Uuid,
    room_id: Uuid,
    seats: Json<Vec<SeatLine>>,
    combos: Json<Vec<ComboLine>>,
    voucher: Option<Json<VoucherSnapshot>>,
    subtotal: Decimal,
    discount: Decimal,
    tax: Decimal,
    service_fee: Decimal,
    total_amount: Decimal,
    status: String,
    payment_status: String,
    payment: Json<PaymentInfo>,
    payment_id: Option<Uuid>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_by: Option<Uuid>,
    check_in_time: Option<DateTime<Utc>>,
    checked_in_by: Option<Uuid>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            schedule_id: row.schedule_id,
            movie_id: row.movie_id,
            cinema_id: row.cinema_id,
            room_id: row.room_id,
            seats: row.seats.0,
            combos: row.combos.0,
            voucher: row.voucher.map(|v| v.0),
            subtotal: row.subtotal,
            discount: row.discount,
            tax: row.tax,
            service_fee: row.service_fee,
            total_amount: row.total_amount,
            status: row.status.parse().map_err(corrupt("ticket status"))?,
            payment_status: row
                .payment_status
                .parse()
                .map_err(corrupt("ticket payment status"))?,
            payment: row.payment.0,
            payment_id: row.payment_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            confirmed_at: row.confirmed_at,
            cancelled_at: row.cancelled_at,
            cancelled_by: row.cancelled_by,
            check_in_time: row.check_in_time,
            checked_in_by: row.checked_in_by,
            expires_at: row.expires_at,
        })
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    ticket_id: Uuid,
    user_id: Uuid,
    amount: Decimal,
    currency: String,
    method: String,
    status: String,
    paid_at: DateTime<Utc>,
    refunded_at: Option<DateTime<Utc>>,
    refund_reason: Option<String>,
    refunded_by: Option<Uuid>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            ticket_id: row.ticket_id,
            user_id: row.user_id,
            amount: row.amount,
            currency: row.currency,
            method: row.method.parse().map_err(corrupt("payment method"))?,
            status: row.status.parse().map_err(corrupt("payment status"))?,
            paid_at: row.paid_at,
            refunded_at: row.refunded_at,
            refund_reason: row.refund_reason,
            refunded_by: row.refunded_by,
        })
    }
}

#[derive(FromRow)]
struct IntentRow {
    id: Uuid,
    ticket_id: Uuid,
    user_id: Uuid,
    method: String,
    amount: Decimal,
    currency: String,
    status: String,
    expires_at: DateTime<Utc>,
    qr_payload: Option<String>,
    signature: Option<String>,
    bank_info: Option<Json<BankInfo>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<IntentRow> for PaymentIntent {
    type Error = StoreError;

    fn try_from(row: IntentRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            ticket_id: row.ticket_id,
            user_id: row.user_id,
            method: row.method.parse().map_err(corrupt("intent method"))?,
            amount: row.amount,
            currency: row.currency,
            status: row.status.parse().map_err(corrupt("intent status"))?,
            expires_at: row.expires_at,
            qr_payload: row.qr_payload,
            signature: row.signature,
            bank_info: row.bank_info.map(|b| b.0),
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct MembershipRow {
    user_id: Uuid,
    tier: String,
    points: i64,
    total_spent: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MembershipRow> for Membership {
    type Error = StoreError;

    fn try_from(row: MembershipRow) -> StoreResult<Self> {
        Ok(Self {
            user_id: row.user_id,
            tier: row.tier.parse().map_err(corrupt("membership tier"))?,
            points: row.points,
            total_spent: row.total_spent,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct PointLogRow {
    id: Uuid,
    user_id: Uuid,
    ticket_id: Option<Uuid>,
    kind: String,
    points: i64,
    amount: Decimal,
    note: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PointLogRow> for PointLog {
    type Error = StoreError;

    fn try_from(row: PointLogRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            ticket_id: row.ticket_id,
            kind: row.kind.parse().map_err(corrupt("point log type"))?,
            points: row.points,
            amount: row.amount,
            note: row.note,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct PointLogSumRow {
    user_id: Uuid,
    kind: String,
    points: i64,
    amount: Decimal,
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn push_ticket_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &TicketFilter) {
    qb.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(user_id) = filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(schedule_id) = filter.schedule_id {
        qb.push(" AND schedule_id = ").push_bind(schedule_id);
    }
    if let Some(from) = filter.from_date {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to_date {
        qb.push(" AND created_at <= ").push_bind(to);
    }
}

fn push_payment_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &PaymentFilter) {
    qb.push(" WHERE TRUE");
    if let Some(user_id) = filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(ticket_id) = filter.ticket_id {
        qb.push(" AND ticket_id = ").push_bind(ticket_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(start) = filter.start_date {
        qb.push(" AND paid_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end_date {
        qb.push(" AND paid_at <= ").push_bind(end);
    }
}

/// Serialises writers per key (schedule or room) until the transaction ends.
async fn lock_key(tx: &mut Transaction<'_, Postgres>, key: Uuid) -> StoreResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Full-row compare-and-set on `version`, optionally also on the stored status.
async fn write_ticket(
    tx: &mut Transaction<'_, Postgres>,
    ticket: &Ticket,
    expect_status: Option<TicketStatus>,
) -> StoreResult<Ticket> {
    let result = sqlx::query(
        "UPDATE tickets SET \
            seats = $3, combos = $4, voucher = $5, subtotal = $6, discount = $7, tax = $8, \
            service_fee = $9, total_amount = $10, status = $11, payment_status = $12, \
            payment = $13, payment_id = $14, updated_at = $15, confirmed_at = $16, \
            cancelled_at = $17, cancelled_by = $18, check_in_time = $19, checked_in_by = $20, \
            expires_at = $21, version = version + 1 \
         WHERE id = $1 AND version = $2 AND ($22::text IS NULL OR status = $22)",
    )
    .bind(ticket.id)
    .bind(ticket.version)
    .bind(Json(&ticket.seats))
    .bind(Json(&ticket.combos))
    .bind(ticket.voucher.as_ref().map(Json))
    .bind(ticket.subtotal)
    .bind(ticket.discount)
    .bind(ticket.tax)
    .bind(ticket.service_fee)
    .bind(ticket.total_amount)
    .bind(ticket.status.as_str())
    .bind(ticket.payment_status.as_str())
    .bind(Json(&ticket.payment))
    .bind(ticket.payment_id)
    .bind(ticket.updated_at)
    .bind(ticket.confirmed_at)
    .bind(ticket.cancelled_at)
    .bind(ticket.cancelled_by)
    .bind(ticket.check_in_time)
    .bind(ticket.checked_in_by)
    .bind(ticket.expires_at)
    .bind(expect_status.map(TicketStatus::as_str))
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::StaleTicket(ticket.id));
    }
    sync_claims(tx, ticket).await?;

    let mut saved = ticket.clone();
    saved.version += 1;
    Ok(saved)
}

/// Replaces the seat holds and voucher redemption owned by `ticket`.
/// Callers must hold the schedule lock.
async fn sync_claims(tx: &mut Transaction<'_, Postgres>, ticket: &Ticket) -> StoreResult<()> {
    sqlx::query("DELETE FROM ticket_seat_holds WHERE ticket_id = $1")
        .bind(ticket.id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM voucher_redemptions WHERE ticket_id = $1")
        .bind(ticket.id)
        .execute(&mut **tx)
        .await?;
    if !ticket.status.holds_seats() {
        return Ok(());
    }

    let codes = ticket.seat_codes();
    let held: Vec<String> = sqlx::query_scalar(
        "SELECT seat_code FROM ticket_seat_holds WHERE schedule_id = $1 AND seat_code = ANY($2)",
    )
    .bind(ticket.schedule_id)
    .bind(&codes)
    .fetch_all(&mut **tx)
    .await?;
    if !held.is_empty() {
        return Err(StoreError::SeatConflict(find_conflicts(&codes, held)));
    }

    sqlx::query(
        "INSERT INTO ticket_seat_holds (schedule_id, seat_code, ticket_id) \
         SELECT $1, code, $3 FROM UNNEST($2::text[]) AS code",
    )
    .bind(ticket.schedule_id)
    .bind(&codes)
    .bind(ticket.id)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e, "ticket_seat_holds_pkey") {
            StoreError::SeatConflict(codes.clone())
        } else {
            StoreError::Database(e)
        }
    })?;

    if let Some(voucher) = ticket.voucher.as_ref().filter(|v| v.single_use) {
        let inserted = sqlx::query(
            "INSERT INTO voucher_redemptions (user_id, voucher_code, ticket_id) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(ticket.user_id)
        .bind(&voucher.code)
        .bind(ticket.id)
        .execute(&mut **tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::VoucherRedeemed(voucher.code.clone()));
        }
    }
    Ok(())
}

async fn ensure_membership_row(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> StoreResult<Membership> {
    let seed = Membership::new(user_id, now);
    sqlx::query(
        "INSERT INTO memberships (user_id, tier, points, total_spent, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $5) ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(seed.user_id)
    .bind(seed.tier.as_str())
    .bind(seed.points)
    .bind(seed.total_spent)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    let query = format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE user_id = $1 FOR UPDATE");
    sqlx::query_as::<_, MembershipRow>(&query)
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?
        .try_into()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn movie(&self, id: Uuid) -> StoreResult<Option<Movie>> {
        let row: Option<(Uuid, String, i32, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, title, duration_minutes, created_at FROM movies WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, title, duration_minutes, created_at)| Movie {
            id,
            title,
            duration_minutes,
            created_at,
        }))
    }

    async fn room(&self, id: Uuid) -> StoreResult<Option<Room>> {
        let row = sqlx::query_as::<_, RoomRow>(
            "SELECT id, cinema_id, name, seats, created_at FROM rooms WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Room {
            id: r.id,
            cinema_id: r.cinema_id,
            name: r.name,
            seats: r.seats.0,
            created_at: r.created_at,
        }))
    }

    async fn schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        let query = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1");
        let row = sqlx::query_as::<_, ScheduleRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Schedule::from))
    }

    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        lock_key(&mut tx, schedule.room_id).await?;

        let clash: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM schedules \
             WHERE room_id = $1 AND start_time < $3 AND $2 < end_time \
             ORDER BY start_time LIMIT 1",
        )
        .bind(schedule.room_id)
        .bind(schedule.start_time)
        .bind(schedule.end_time)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(existing) = clash {
            return Err(StoreError::ScheduleOverlap(existing));
        }

        let query = format!(
            "INSERT INTO schedules ({SCHEDULE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        );
        sqlx::query(&query)
            .bind(schedule.id)
            .bind(schedule.movie_id)
            .bind(schedule.room_id)
            .bind(schedule.cinema_id)
            .bind(schedule.start_time)
            .bind(schedule.end_time)
            .bind(Json(&schedule.price_table))
            .bind(schedule.is_3d)
            .bind(schedule.has_subtitles)
            .bind(schedule.is_dubbed)
            .bind(schedule.created_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn combo(&self, id: Uuid) -> StoreResult<Option<Combo>> {
        let row: Option<(Uuid, String, Decimal, bool)> =
            sqlx::query_as("SELECT id, name, price, is_active FROM combos WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, price, is_active)| Combo {
            id,
            name,
            price,
            is_active,
        }))
    }

    async fn promotion(&self, code: &str) -> StoreResult<Option<Promotion>> {
        let query = format!("SELECT {PROMOTION_COLUMNS} FROM promotions WHERE UPPER(code) = $1");
        sqlx::query_as::<_, PromotionRow>(&query)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .map(Promotion::try_from)
            .transpose()
    }

    async fn voucher_redeemed(
        &self,
        user_id: Uuid,
        code: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<bool> {
        let redeemed: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM voucher_redemptions \
             WHERE user_id = $1 AND voucher_code = $2 \
             AND ($3::uuid IS NULL OR ticket_id <> $3))",
        )
        .bind(user_id)
        .bind(code)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await?;
        Ok(redeemed)
    }

    async fn held_seats(
        &self,
        schedule_id: Uuid,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<String>> {
        let codes = sqlx::query_scalar(
            "SELECT seat_code FROM ticket_seat_holds \
             WHERE schedule_id = $1 AND ($2::uuid IS NULL OR ticket_id <> $2) \
             ORDER BY seat_code",
        )
        .bind(schedule_id)
        .bind(exclude)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }

    async fn insert_ticket(&self, ticket: &Ticket) -> StoreResult<Ticket> {
        let mut tx = self.pool.begin().await?;
        lock_key(&mut tx, ticket.schedule_id).await?;

        let query = format!(
            "INSERT INTO tickets ({TICKET_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, \
              $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)"
        );
        sqlx::query(&query)
            .bind(ticket.id)
            .bind(ticket.user_id)
            .bind(ticket.schedule_id)
            .bind(ticket.movie_id)
            .bind(ticket.cinema_id)
            .bind(ticket.room_id)
            .bind(Json(&ticket.seats))
            .bind(Json(&ticket.combos))
            .bind(ticket.voucher.as_ref().map(Json))
            .bind(ticket.subtotal)
            .bind(ticket.discount)
            .bind(ticket.tax)
            .bind(ticket.service_fee)
            .bind(ticket.total_amount)
            .bind(ticket.status.as_str())
            .bind(ticket.payment_status.as_str())
            .bind(Json(&ticket.payment))
            .bind(ticket.payment_id)
            .bind(ticket.version)
            .bind(ticket.created_at)
            .bind(ticket.updated_at)
            .bind(ticket.confirmed_at)
            .bind(ticket.cancelled_at)
            .bind(ticket.cancelled_by)
            .bind(ticket.check_in_time)
            .bind(ticket.checked_in_by)
            .bind(ticket.expires_at)
            .execute(&mut *tx)
            .await?;

        sync_claims(&mut tx, ticket).await?;
        tx.commit().await?;
        Ok(ticket.clone())
    }

    async fn ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let query = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
        sqlx::query_as::<_, TicketRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Ticket::try_from)
            .transpose()
    }

    async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: Page,
    ) -> StoreResult<(Vec<Ticket>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tickets");
        push_ticket_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {TICKET_COLUMNS} FROM tickets"));
        push_ticket_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select
            .build_query_as::<TicketRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok((convert_all(rows)?, total))
    }

    async fn save_ticket(&self, ticket: &Ticket) -> StoreResult<Ticket> {
        let mut tx = self.pool.begin().await?;
        lock_key(&mut tx, ticket.schedule_id).await?;
        let saved = write_ticket(&mut tx, ticket, None).await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn settle(
        &self,
        ticket: &Ticket,
        payment: &Payment,
        intent_id: Option<Uuid>,
    ) -> StoreResult<(Ticket, Payment)> {
        let mut tx = self.pool.begin().await?;
        lock_key(&mut tx, ticket.schedule_id).await?;

        if let Some(intent_id) = intent_id {
            let consumed = sqlx::query(
                "UPDATE payment_intents SET status = 'paid' WHERE id = $1 AND status = 'pending'",
            )
            .bind(intent_id)
            .execute(&mut *tx)
            .await?;
            if consumed.rows_affected() == 0 {
                return Err(StoreError::IntentNotPending(intent_id));
            }
        }

        let insert = format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (ticket_id) DO NOTHING RETURNING {PAYMENT_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, PaymentRow>(&insert)
            .bind(payment.id)
            .bind(payment.ticket_id)
            .bind(payment.user_id)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(payment.method.as_str())
            .bind(payment.status.as_str())
            .bind(payment.paid_at)
            .bind(payment.refunded_at)
            .bind(&payment.refund_reason)
            .bind(payment.refunded_by)
            .fetch_optional(&mut *tx)
            .await?;
        let row = match inserted {
            Some(row) => row,
            None => {
                let existing = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE ticket_id = $1");
                sqlx::query_as::<_, PaymentRow>(&existing)
                    .bind(ticket.id)
                    .fetch_one(&mut *tx)
                    .await?
            }
        };
        let recorded = Payment::try_from(row)?;

        let mut confirmed = ticket.clone();
        confirmed.payment_id = Some(recorded.id);
        let saved = write_ticket(&mut tx, &confirmed, Some(TicketStatus::Pending)).await?;
        tx.commit().await?;
        Ok((saved, recorded))
    }

    async fn refund(&self, ticket: &Ticket, payment: &Payment) -> StoreResult<(Ticket, Payment)> {
        let mut tx = self.pool.begin().await?;
        lock_key(&mut tx, ticket.schedule_id).await?;

        let updated = sqlx::query(
            "UPDATE payments SET status = $2, refunded_at = $3, refund_reason = $4, refunded_by = $5 \
             WHERE id = $1 AND status = 'completed'",
        )
        .bind(payment.id)
        .bind(payment.status.as_str())
        .bind(payment.refunded_at)
        .bind(&payment.refund_reason)
        .bind(payment.refunded_by)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::PaymentNotRefundable(payment.id));
        }

        let saved = write_ticket(&mut tx, ticket, None).await?;
        tx.commit().await?;
        Ok((saved, payment.clone()))
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE tickets SET status = 'expired', updated_at = $1, version = version + 1 \
             WHERE id IN ( \
                 SELECT id FROM tickets \
                 WHERE status = 'pending' AND expires_at < $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        if !ids.is_empty() {
            sqlx::query("DELETE FROM ticket_seat_holds WHERE ticket_id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM voucher_redemptions WHERE ticket_id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "UPDATE payment_intents SET status = 'expired' \
                 WHERE ticket_id = ANY($1) AND status = 'pending'",
            )
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn insert_intent(&self, intent: &PaymentIntent) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE payment_intents SET status = 'cancelled' \
             WHERE ticket_id = $1 AND status = 'pending'",
        )
        .bind(intent.ticket_id)
        .execute(&mut *tx)
        .await?;

        let query = format!(
            "INSERT INTO payment_intents ({INTENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        );
        sqlx::query(&query)
            .bind(intent.id)
            .bind(intent.ticket_id)
            .bind(intent.user_id)
            .bind(intent.method.as_str())
            .bind(intent.amount)
            .bind(&intent.currency)
            .bind(intent.status.as_str())
            .bind(intent.expires_at)
            .bind(&intent.qr_payload)
            .bind(&intent.signature)
            .bind(intent.bank_info.as_ref().map(Json))
            .bind(intent.created_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn intent(&self, id: Uuid) -> StoreResult<Option<PaymentIntent>> {
        let query = format!("SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1");
        sqlx::query_as::<_, IntentRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(PaymentIntent::try_from)
            .transpose()
    }

    async fn latest_pending_intent(&self, ticket_id: Uuid) -> StoreResult<Option<PaymentIntent>> {
        let query = format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE ticket_id = $1 AND status = 'pending' \
             ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, IntentRow>(&query)
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?
            .map(PaymentIntent::try_from)
            .transpose()
    }

    async fn expire_intent(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE payment_intents SET status = 'expired' WHERE id = $1 AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn payment(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        sqlx::query_as::<_, PaymentRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn payment_for_ticket(&self, ticket_id: Uuid) -> StoreResult<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE ticket_id = $1");
        sqlx::query_as::<_, PaymentRow>(&query)
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn list_payments(
        &self,
        filter: &PaymentFilter,
        page: Page,
    ) -> StoreResult<(Vec<Payment>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM payments");
        push_payment_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {PAYMENT_COLUMNS} FROM payments"));
        push_payment_filter(&mut select, filter);
        select
            .push(" ORDER BY paid_at DESC, id LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select
            .build_query_as::<PaymentRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok((convert_all(rows)?, total))
    }

    async fn membership(&self, user_id: Uuid) -> StoreResult<Option<Membership>> {
        let query = format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE user_id = $1");
        sqlx::query_as::<_, MembershipRow>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Membership::try_from)
            .transpose()
    }

    async fn ensure_membership(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Membership> {
        let mut tx = self.pool.begin().await?;
        let membership = ensure_membership_row(&mut tx, user_id, now).await?;
        tx.commit().await?;
        Ok(membership)
    }

    async fn apply_points(
        &self,
        entry: PointEntry,
        now: DateTime<Utc>,
    ) -> StoreResult<Membership> {
        let mut tx = self.pool.begin().await?;
        let mut membership = ensure_membership_row(&mut tx, entry.user_id, now).await?;
        membership.apply(&entry, now);

        sqlx::query(
            "UPDATE memberships SET tier = $2, points = $3, total_spent = $4, updated_at = $5 \
             WHERE user_id = $1",
        )
        .bind(membership.user_id)
        .bind(membership.tier.as_str())
        .bind(membership.points)
        .bind(membership.total_spent)
        .bind(membership.updated_at)
        .execute(&mut *tx)
        .await?;

        let log = entry.into_log(now);
        sqlx::query(
            "INSERT INTO membership_point_logs \
             (id, user_id, ticket_id, type, points, amount, note, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(log.id)
        .bind(log.user_id)
        .bind(log.ticket_id)
        .bind(log.kind.as_str())
        .bind(log.points)
        .bind(log.amount)
        .bind(&log.note)
        .bind(log.created_by)
        .bind(log.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(membership)
    }

    async fn point_logs(&self, user_id: Uuid, page: Page) -> StoreResult<(Vec<PointLog>, i64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM membership_point_logs WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        let query = format!(
            "SELECT {POINT_LOG_COLUMNS} FROM membership_point_logs \
             WHERE user_id = $1 ORDER BY created_at DESC, id LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, PointLogRow>(&query)
            .bind(user_id)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;
        Ok((convert_all(rows)?, total))
    }

    async fn memberships(&self) -> StoreResult<Vec<Membership>> {
        let query = format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships ORDER BY user_id");
        let rows = sqlx::query_as::<_, MembershipRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn point_log_sums(&self) -> StoreResult<Vec<PointLogSum>> {
        let rows = sqlx::query_as::<_, PointLogSumRow>(
            "SELECT user_id, type AS kind, \
                    COALESCE(SUM(points), 0)::BIGINT AS points, \
                    COALESCE(SUM(amount), 0) AS amount \
             FROM membership_point_logs GROUP BY user_id, type",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(PointLogSum {
                    user_id: row.user_id,
                    kind: row.kind.parse().map_err(corrupt("point log type"))?,
                    points: row.points,
                    amount: row.amount,
                })
            })
            .collect()
    }
}
