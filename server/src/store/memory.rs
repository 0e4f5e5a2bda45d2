use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{BookingStore, StoreError, StoreResult};
use crate::booking::availability::find_conflicts;
use crate::models::catalog::{Combo, DiscountType, Movie, Promotion, UsageLimit};
use crate::models::membership::{Membership, PointEntry, PointLog, PointLogKind, PointLogSum};
use crate::models::payment::{IntentStatus, Payment, PaymentFilter, PaymentIntent};
use crate::models::room::{grid_layout, Room};
use crate::models::schedule::{default_end_time, PriceTable, Schedule};
use crate::models::ticket::{PaymentStatus, Ticket, TicketFilter, TicketStatus};
use crate::utils::response::Page;

#[derive(Default)]
struct State {
    movies: HashMap<Uuid, Movie>,
    rooms: HashMap<Uuid, Room>,
    schedules: HashMap<Uuid, Schedule>,
    combos: HashMap<Uuid, Combo>,
    promotions: HashMap<String, Promotion>,
    tickets: HashMap<Uuid, Ticket>,
    /// (schedule, seat code) -> holding ticket
    holds: HashMap<(Uuid, String), Uuid>,
    /// (user, voucher code) -> redeeming ticket
    redemptions: HashMap<(Uuid, String), Uuid>,
    intents: HashMap<Uuid, PaymentIntent>,
    payments: HashMap<Uuid, Payment>,
    memberships: HashMap<Uuid, Membership>,
    point_logs: Vec<PointLog>,
}

impl State {
    fn seat_conflicts(&self, ticket: &Ticket) -> Vec<String> {
        if !ticket.status.holds_seats() {
            return Vec::new();
        }
        let held = self
            .holds
            .iter()
            .filter(|((schedule_id, _), holder)| {
                *schedule_id == ticket.schedule_id && **holder != ticket.id
            })
            .map(|((_, code), _)| code.as_str());
        find_conflicts(&ticket.seat_codes(), held)
    }

    fn redemption_conflict(&self, ticket: &Ticket) -> Option<String> {
        let voucher = ticket.voucher.as_ref().filter(|v| v.single_use)?;
        if !ticket.status.holds_seats() {
            return None;
        }
        match self.redemptions.get(&(ticket.user_id, voucher.code.clone())) {
            Some(holder) if *holder != ticket.id => Some(voucher.code.clone()),
            _ => None,
        }
    }

    fn check_claims(&self, ticket: &Ticket) -> StoreResult<()> {
        let conflicts = self.seat_conflicts(ticket);
        if !conflicts.is_empty() {
            return Err(StoreError::SeatConflict(conflicts));
        }
        if let Some(code) = self.redemption_conflict(ticket) {
            return Err(StoreError::VoucherRedeemed(code));
        }
        Ok(())
    }

    /// Rewrites the holds and redemptions owned by `ticket` to match it.
    fn sync_claims(&mut self, ticket: &Ticket) {
        self.holds.retain(|_, holder| *holder != ticket.id);
        self.redemptions.retain(|_, holder| *holder != ticket.id);
        if !ticket.status.holds_seats() {
            return;
        }
        for code in ticket.seat_codes() {
            self.holds.insert((ticket.schedule_id, code), ticket.id);
        }
        if let Some(voucher) = ticket.voucher.as_ref().filter(|v| v.single_use) {
            self.redemptions
                .insert((ticket.user_id, voucher.code.clone()), ticket.id);
        }
    }

    fn check_version(&self, ticket: &Ticket) -> StoreResult<&Ticket> {
        self.tickets
            .get(&ticket.id)
            .filter(|current| current.version == ticket.version)
            .ok_or(StoreError::StaleTicket(ticket.id))
    }

    fn write_ticket(&mut self, ticket: &Ticket) -> Ticket {
        let mut saved = ticket.clone();
        saved.version += 1;
        self.sync_claims(&saved);
        self.tickets.insert(saved.id, saved.clone());
        saved
    }
}

/// Process-local store used by tests and by the server when no database is
/// configured. Every operation runs under one lock.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn paginate<T: Clone>(items: &[T], page: Page) -> Vec<T> {
    items
        .iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .cloned()
        .collect()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_movie(&self, movie: Movie) {
        self.lock().movies.insert(movie.id, movie);
    }

    pub fn add_room(&self, room: Room) {
        self.lock().rooms.insert(room.id, room);
    }

    /// Inserts without the overlap check, for fixtures.
    pub fn add_schedule(&self, schedule: Schedule) {
        self.lock().schedules.insert(schedule.id, schedule);
    }

    pub fn add_combo(&self, combo: Combo) {
        self.lock().combos.insert(combo.id, combo);
    }

    pub fn add_promotion(&self, promotion: Promotion) {
        self.lock()
            .promotions
            .insert(promotion.code.to_uppercase(), promotion);
    }

    /// Loads a small catalog for local development: one room, two movies,
    /// a few screenings, two combos and two vouchers.
    pub fn seed_demo(&self, now: DateTime<Utc>) -> Vec<Schedule> {
        let cinema_id = Uuid::new_v4();
        let room = Room {
            id: Uuid::new_v4(),
            cinema_id,
            name: "Room 1".to_string(),
            seats: grid_layout(&["A", "B", "C", "D", "E", "F"], 10, &["E", "F"]),
            created_at: now,
        };
        let movies = [("The Long Night", 125), ("Paper Boats", 98)].map(|(title, minutes)| Movie {
            id: Uuid::new_v4(),
            title: title.to_string(),
            duration_minutes: minutes,
            created_at: now,
        });

        let mut schedules = Vec::new();
        let mut start = now + Duration::hours(4);
        for movie in movies.iter().cycle().take(4) {
            let end = default_end_time(start, movie.duration_minutes);
            schedules.push(Schedule {
                id: Uuid::new_v4(),
                movie_id: movie.id,
                room_id: room.id,
                cinema_id,
                start_time: start,
                end_time: end,
                price_table: PriceTable::flat(Decimal::from(100_000), Decimal::from(150_000)),
                is_3d: false,
                has_subtitles: true,
                is_dubbed: false,
                created_at: now,
            });
            start = end + Duration::minutes(15);
        }

        for (name, price) in [("Popcorn + Coke", 50_000), ("Couple Combo", 85_000)] {
            self.add_combo(Combo {
                id: Uuid::new_v4(),
                name: name.to_string(),
                price: Decimal::from(price),
                is_active: true,
            });
        }
        for (code, discount_type, value, cap, usage) in [
            ("SAVE10", DiscountType::Percentage, 10, Some(20_000), UsageLimit::Single),
            ("FLAT30K", DiscountType::Fixed, 30_000, None, UsageLimit::Unlimited),
        ] {
            self.add_promotion(Promotion {
                id: Uuid::new_v4(),
                code: code.to_string(),
                name: code.to_string(),
                discount_type,
                discount_value: Decimal::from(value),
                max_discount: cap.map(Decimal::from),
                min_order_value: None,
                usage_limit: usage,
                applicable_movies: Vec::new(),
                start_date: now - Duration::days(1),
                end_date: now + Duration::days(30),
                is_active: true,
            });
        }

        for movie in movies {
            self.add_movie(movie);
        }
        self.add_room(room);
        for schedule in &schedules {
            self.add_schedule(schedule.clone());
        }
        schedules
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn movie(&self, id: Uuid) -> StoreResult<Option<Movie>> {
        Ok(self.lock().movies.get(&id).cloned())
    }

    async fn room(&self, id: Uuid) -> StoreResult<Option<Room>> {
        Ok(self.lock().rooms.get(&id).cloned())
    }

    async fn schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        Ok(self.lock().schedules.get(&id).cloned())
    }

    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
        let mut state = self.lock();
        if let Some(existing) = state.schedules.values().find(|s| {
            s.room_id == schedule.room_id && s.overlaps(schedule.start_time, schedule.end_time)
        }) {
            return Err(StoreError::ScheduleOverlap(existing.id));
        }
        state.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn combo(&self, id: Uuid) -> StoreResult<Option<Combo>> {
        Ok(self.lock().combos.get(&id).cloned())
    }

    async fn promotion(&self, code: &str) -> StoreResult<Option<Promotion>> {
        Ok(self.lock().promotions.get(code).cloned())
    }

    async fn voucher_redeemed(
        &self,
        user_id: Uuid,
        code: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<bool> {
        Ok(self
            .lock()
            .redemptions
            .get(&(user_id, code.to_string()))
            .is_some_and(|holder| Some(*holder) != exclude))
    }

    async fn held_seats(
        &self,
        schedule_id: Uuid,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<String>> {
        let state = self.lock();
        let mut codes: Vec<String> = state
            .holds
            .iter()
            .filter(|((sid, _), holder)| *sid == schedule_id && Some(**holder) != exclude)
            .map(|((_, code), _)| code.clone())
            .collect();
        codes.sort();
        Ok(codes)
    }

    async fn insert_ticket(&self, ticket: &Ticket) -> StoreResult<Ticket> {
        let mut state = self.lock();
        state.check_claims(ticket)?;
        state.sync_claims(ticket);
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket.clone())
    }

    async fn ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(self.lock().tickets.get(&id).cloned())
    }

    async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: Page,
    ) -> StoreResult<(Vec<Ticket>, i64)> {
        let state = self.lock();
        let mut matches: Vec<&Ticket> =
            state.tickets.values().filter(|t| filter.matches(t)).collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let total = matches.len() as i64;
        let items: Vec<Ticket> = matches.into_iter().cloned().collect();
        Ok((paginate(&items, page), total))
    }

    async fn save_ticket(&self, ticket: &Ticket) -> StoreResult<Ticket> {
        let mut state = self.lock();
        state.check_version(ticket)?;
        state.check_claims(ticket)?;
        Ok(state.write_ticket(ticket))
    }

    async fn settle(
        &self,
        ticket: &Ticket,
        payment: &Payment,
        intent_id: Option<Uuid>,
    ) -> StoreResult<(Ticket, Payment)> {
        let mut state = self.lock();
        let current = state.check_version(ticket)?;
        if current.status != TicketStatus::Pending {
            return Err(StoreError::StaleTicket(ticket.id));
        }
        if let Some(intent_id) = intent_id {
            match state.intents.get(&intent_id) {
                Some(intent) if intent.status == IntentStatus::Pending => {}
                _ => return Err(StoreError::IntentNotPending(intent_id)),
            }
        }

        let existing = state
            .payments
            .values()
            .find(|p| p.ticket_id == ticket.id)
            .cloned();
        let payment = match existing {
            Some(existing) => existing,
            None => {
                state.payments.insert(payment.id, payment.clone());
                payment.clone()
            }
        };
        if let Some(intent) = intent_id.and_then(|id| state.intents.get_mut(&id)) {
            intent.status = IntentStatus::Paid;
        }

        let mut confirmed = ticket.clone();
        confirmed.payment_id = Some(payment.id);
        let saved = state.write_ticket(&confirmed);
        Ok((saved, payment))
    }

    async fn refund(&self, ticket: &Ticket, payment: &Payment) -> StoreResult<(Ticket, Payment)> {
        let mut state = self.lock();
        state.check_version(ticket)?;
        match state.payments.get(&payment.id) {
            Some(current) if current.status == PaymentStatus::Completed => {}
            _ => return Err(StoreError::PaymentNotRefundable(payment.id)),
        }
        state.payments.insert(payment.id, payment.clone());
        let saved = state.write_ticket(ticket);
        Ok((saved, payment.clone()))
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let mut state = self.lock();
        let lapsed: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.reservation_lapsed(now))
            .cloned()
            .collect();

        let mut expired = Vec::with_capacity(lapsed.len());
        for mut ticket in lapsed {
            ticket.status = TicketStatus::Expired;
            ticket.updated_at = now;
            state.write_ticket(&ticket);
            for intent in state.intents.values_mut() {
                if intent.ticket_id == ticket.id && intent.status == IntentStatus::Pending {
                    intent.status = IntentStatus::Expired;
                }
            }
            expired.push(ticket.id);
        }
        Ok(expired)
    }

    async fn insert_intent(&self, intent: &PaymentIntent) -> StoreResult<()> {
        let mut state = self.lock();
        for existing in state.intents.values_mut() {
            if existing.ticket_id == intent.ticket_id && existing.status == IntentStatus::Pending {
                existing.status = IntentStatus::Cancelled;
            }
        }
        state.intents.insert(intent.id, intent.clone());
        Ok(())
    }

    async fn intent(&self, id: Uuid) -> StoreResult<Option<PaymentIntent>> {
        Ok(self.lock().intents.get(&id).cloned())
    }

    async fn latest_pending_intent(&self, ticket_id: Uuid) -> StoreResult<Option<PaymentIntent>> {
        Ok(self
            .lock()
            .intents
            .values()
            .filter(|i| i.ticket_id == ticket_id && i.status == IntentStatus::Pending)
            .max_by_key(|i| i.created_at)
            .cloned())
    }

    async fn expire_intent(&self, id: Uuid) -> StoreResult<()> {
        if let Some(intent) = self.lock().intents.get_mut(&id) {
            if intent.status == IntentStatus::Pending {
                intent.status = IntentStatus::Expired;
            }
        }
        Ok(())
    }

    async fn payment(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.lock().payments.get(&id).cloned())
    }

    async fn payment_for_ticket(&self, ticket_id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| p.ticket_id == ticket_id)
            .cloned())
    }

    async fn list_payments(
        &self,
        filter: &PaymentFilter,
        page: Page,
    ) -> StoreResult<(Vec<Payment>, i64)> {
        let state = self.lock();
        let mut matches: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.paid_at.cmp(&a.paid_at).then(a.id.cmp(&b.id)));
        let total = matches.len() as i64;
        Ok((paginate(&matches, page), total))
    }

    async fn membership(&self, user_id: Uuid) -> StoreResult<Option<Membership>> {
        Ok(self.lock().memberships.get(&user_id).cloned())
    }

    async fn ensure_membership(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Membership> {
        Ok(self
            .lock()
            .memberships
            .entry(user_id)
            .or_insert_with(|| Membership::new(user_id, now))
            .clone())
    }

    async fn apply_points(
        &self,
        entry: PointEntry,
        now: DateTime<Utc>,
    ) -> StoreResult<Membership> {
        let mut state = self.lock();
        let membership = state
            .memberships
            .entry(entry.user_id)
            .or_insert_with(|| Membership::new(entry.user_id, now));
        membership.apply(&entry, now);
        let updated = membership.clone();
        state.point_logs.push(entry.into_log(now));
        Ok(updated)
    }

    async fn point_logs(&self, user_id: Uuid, page: Page) -> StoreResult<(Vec<PointLog>, i64)> {
        let state = self.lock();
        // Appended in time order, so reversing gives newest first.
        let logs: Vec<PointLog> = state
            .point_logs
            .iter()
            .rev()
            .filter(|log| log.user_id == user_id)
            .cloned()
            .collect();
        let total = logs.len() as i64;
        Ok((paginate(&logs, page), total))
    }

    async fn memberships(&self) -> StoreResult<Vec<Membership>> {
        let mut all: Vec<Membership> = self.lock().memberships.values().cloned().collect();
        all.sort_by_key(|m| m.user_id);
        Ok(all)
    }

    async fn point_log_sums(&self) -> StoreResult<Vec<PointLogSum>> {
        let state = self.lock();
        let mut sums: HashMap<(Uuid, PointLogKind), PointLogSum> = HashMap::new();
        for log in &state.point_logs {
            let sum = sums
                .entry((log.user_id, log.kind))
                .or_insert_with(|| PointLogSum {
                    user_id: log.user_id,
                    kind: log.kind,
                    points: 0,
                    amount: Decimal::ZERO,
                });
            sum.points += log.points;
            sum.amount += log.amount;
        }
        Ok(sums.into_values().collect())
    }
}
