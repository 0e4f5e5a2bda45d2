use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ticket::{PaymentMethod, TicketFilter, TicketStatus};
use crate::models::user::Actor;
use crate::services::checkin::VerifyRequest;
use crate::services::tickets::{BookingRequest, VoucherPreviewQuery};
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{created, success, Page};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<TicketStatus>,
    pub user_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

impl TicketListQuery {
    fn page(&self) -> Page {
        let default = Page::default();
        Page::new(
            self.page.unwrap_or(default.page),
            self.limit.unwrap_or(default.limit),
        )
    }

    fn into_filter(self) -> TicketFilter {
        TicketFilter {
            status: self.status,
            user_id: self.user_id,
            schedule_id: self.schedule_id,
            from_date: self.from_date,
            to_date: self.to_date,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSeatsRequest {
    #[serde(alias = "seatNumbers", alias = "newSeats")]
    pub seats: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyVoucherRequest {
    #[serde(alias = "voucherCode")]
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddComboRequest {
    pub combo_id: Uuid,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkPaidRequest {
    #[serde(default)]
    pub method: Option<PaymentMethod>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanupResult {
    expired_count: usize,
    ticket_ids: Vec<Uuid>,
}

pub async fn book(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<BookingRequest>,
) -> AppResult<Response> {
    let booking = state.services.tickets.book(&actor, body).await?;
    Ok(created(booking, "Ticket booked").into_response())
}

pub async fn list_tickets(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<TicketListQuery>,
) -> AppResult<Response> {
    let page = query.page();
    let tickets = state
        .services
        .tickets
        .list(&actor, query.into_filter(), page)
        .await?;
    Ok(success(tickets, "Tickets retrieved").into_response())
}

pub async fn my_tickets(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<TicketListQuery>,
) -> AppResult<Response> {
    let page = query.page();
    let tickets = state
        .services
        .tickets
        .my_tickets(&actor, query.status, page)
        .await?;
    Ok(success(tickets, "Tickets retrieved").into_response())
}

pub async fn get_ticket(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let ticket = state.services.tickets.get(&actor, id).await?;
    Ok(success(ticket, "Ticket retrieved").into_response())
}

pub async fn cancel_ticket(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let ticket = state.services.tickets.cancel(&actor, id).await?;
    Ok(success(ticket, "Ticket cancelled").into_response())
}

pub async fn change_seats(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<ChangeSeatsRequest>,
) -> AppResult<Response> {
    let change = state
        .services
        .tickets
        .change_seats(&actor, id, &body.seats)
        .await?;
    Ok(success(change, "Seats changed").into_response())
}

pub async fn apply_voucher(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<ApplyVoucherRequest>,
) -> AppResult<Response> {
    let ticket = state
        .services
        .tickets
        .apply_voucher(&actor, id, &body.code)
        .await?;
    Ok(success(ticket, "Voucher applied").into_response())
}

pub async fn apply_combo(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<AddComboRequest>,
) -> AppResult<Response> {
    let ticket = state
        .services
        .tickets
        .add_combo(&actor, id, body.combo_id, body.quantity)
        .await?;
    Ok(success(ticket, "Combo added").into_response())
}

pub async fn mark_paid(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    body: Option<Json<MarkPaidRequest>>,
) -> AppResult<Response> {
    let method = body.and_then(|Json(b)| b.method);
    let settlement = state.services.payments.mark_paid(&actor, id, method).await?;
    Ok(success(settlement, "Ticket marked as paid").into_response())
}

pub async fn refund_ticket(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    body: Option<Json<RefundRequest>>,
) -> AppResult<Response> {
    let reason = body.and_then(|Json(b)| b.reason);
    let ticket = state.services.tickets.refund(&actor, id, reason).await?;
    Ok(success(ticket, "Ticket refunded").into_response())
}

pub async fn check_in_qr(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let pass = state.services.check_in.issue(&actor, id).await?;
    Ok(success(pass, "Check-in QR generated").into_response())
}

pub async fn verify_qr(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<VerifyRequest>,
) -> AppResult<Response> {
    let result = state
        .services
        .check_in
        .verify(&actor, &body.qr_content)
        .await?;
    let message = if result.already_checked_in {
        "Ticket was already checked in"
    } else {
        "Check-in successful"
    };
    Ok(success(result, message).into_response())
}

pub async fn cleanup(State(state): State<AppState>, actor: Actor) -> AppResult<Response> {
    let ticket_ids = state.services.tickets.cleanup(&actor).await?;
    let result = CleanupResult {
        expired_count: ticket_ids.len(),
        ticket_ids,
    };
    Ok(success(result, "Expired reservations cleaned up").into_response())
}

pub async fn validate_promotion(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<VoucherPreviewQuery>,
) -> AppResult<Response> {
    let preview = state.services.tickets.preview_voucher(&code, query).await?;
    Ok(success(preview, "Voucher is valid").into_response())
}
