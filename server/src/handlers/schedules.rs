use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::models::room::Room;
use crate::models::schedule::{NewSchedule, Schedule};
use crate::models::user::Actor;
use crate::services::schedules::AvailabilityRequest;
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{created, success};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleDetail {
    #[serde(flatten)]
    schedule: Schedule,
    room: Room,
}

pub async fn create_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<NewSchedule>,
) -> AppResult<Response> {
    let schedule = state.services.schedules.create(&actor, input).await?;
    Ok(created(schedule, "Schedule created").into_response())
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let (schedule, room) = state.services.schedules.get(id).await?;
    Ok(success(ScheduleDetail { schedule, room }, "Schedule retrieved").into_response())
}

pub async fn seat_map(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Response> {
    let map = state.services.schedules.seat_map(id).await?;
    Ok(success(map, "Seat map retrieved").into_response())
}

pub async fn check_availability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AvailabilityRequest>,
) -> AppResult<Response> {
    let availability = state.services.schedules.availability(id, &body.seats).await?;
    let message = if availability.available {
        "Seats are available"
    } else {
        "Some seats are already taken"
    };
    Ok(success(availability, message).into_response())
}
