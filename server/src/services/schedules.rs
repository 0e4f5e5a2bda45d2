use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ServiceContext;
use crate::booking::availability::{find_conflicts, Availability};
use crate::models::room::{Room, Seat};
use crate::models::schedule::{default_end_time, NewSchedule, Schedule};
use crate::models::user::Actor;
use crate::utils::error::{AppError, AppResult};

/// Seat codes are matched trimmed and upper-cased.
pub fn normalize_seats(codes: &[String]) -> Vec<String> {
    codes.iter().map(|c| c.trim().to_uppercase()).collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    #[serde(flatten)]
    pub seat: Seat,
    pub occupied: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatMap {
    pub schedule_id: Uuid,
    pub room_id: Uuid,
    pub room_name: String,
    pub seats: Vec<SeatView>,
    pub available_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    #[serde(alias = "seatNumbers")]
    pub seats: Vec<String>,
}

pub struct ScheduleService {
    ctx: Arc<ServiceContext>,
}

impl ScheduleService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, actor: &Actor, input: NewSchedule) -> AppResult<Schedule> {
        if !actor.is_staff() {
            return Err(AppError::Forbidden(
                "Only staff can create schedules".to_string(),
            ));
        }
        let movie = self
            .ctx
            .store
            .movie(input.movie_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", input.movie_id)))?;
        let room = self.ctx.load_room(input.room_id).await?;

        let end_time = input
            .end_time
            .unwrap_or_else(|| default_end_time(input.start_time, movie.duration_minutes));
        if end_time <= input.start_time {
            return Err(AppError::ValidationError(
                "End time must be after start time".to_string(),
            ));
        }
        let prices = &input.price_table;
        if prices.standard < Decimal::ZERO
            || prices.vip < Decimal::ZERO
            || prices.early_bird_discount.is_some_and(|d| d < Decimal::ZERO)
        {
            return Err(AppError::ValidationError(
                "Prices cannot be negative".to_string(),
            ));
        }

        let schedule = Schedule {
            id: Uuid::new_v4(),
            movie_id: movie.id,
            room_id: room.id,
            cinema_id: room.cinema_id,
            start_time: input.start_time,
            end_time,
            price_table: input.price_table,
            is_3d: input.is_3d,
            has_subtitles: input.has_subtitles,
            is_dubbed: input.is_dubbed,
            created_at: self.ctx.clock.now(),
        };
        self.ctx.store.insert_schedule(&schedule).await?;

        tracing::info!(
            schedule_id = %schedule.id,
            room_id = %schedule.room_id,
            start = %schedule.start_time,
            "Schedule created"
        );
        Ok(schedule)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<(Schedule, Room)> {
        let schedule = self.ctx.load_schedule(id).await?;
        let room = self.ctx.load_room(schedule.room_id).await?;
        Ok((schedule, room))
    }

    /// The room layout with occupancy derived from live tickets.
    pub async fn seat_map(&self, schedule_id: Uuid) -> AppResult<SeatMap> {
        let (schedule, room) = self.get(schedule_id).await?;
        let held: HashSet<String> = self
            .ctx
            .store
            .held_seats(schedule.id, None)
            .await?
            .into_iter()
            .collect();

        let seats: Vec<SeatView> = room
            .seats
            .into_iter()
            .map(|seat| SeatView {
                occupied: held.contains(&seat.code),
                seat,
            })
            .collect();
        let available_count = seats.iter().filter(|s| !s.occupied).count();
        Ok(SeatMap {
            schedule_id: schedule.id,
            room_id: room.id,
            room_name: room.name,
            seats,
            available_count,
        })
    }

    /// Advisory pre-check; booking repeats it atomically.
    pub async fn availability(&self, schedule_id: Uuid, seats: &[String]) -> AppResult<Availability> {
        if seats.is_empty() {
            return Err(AppError::ValidationError(
                "At least one seat must be selected".to_string(),
            ));
        }
        let schedule = self.ctx.load_schedule(schedule_id).await?;
        let held = self.ctx.store.held_seats(schedule.id, None).await?;
        Ok(Availability::from_conflicts(find_conflicts(
            &normalize_seats(seats),
            held,
        )))
    }
}
