use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::payment::PaymentFilter;
use crate::models::ticket::PaymentStatus;
use crate::models::user::Actor;
use crate::services::payments::{ConfirmQrRequest, CreateIntentRequest, IntentView};
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{created, success, Page};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub user_id: Option<Uuid>,
    pub ticket_id: Option<Uuid>,
    pub status: Option<PaymentStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl PaymentListQuery {
    fn into_parts(self) -> (PaymentFilter, Page) {
        let default = Page::default();
        let page = Page::new(
            self.page.unwrap_or(default.page),
            self.limit.unwrap_or(default.limit),
        );
        let filter = PaymentFilter {
            user_id: self.user_id,
            ticket_id: self.ticket_id,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
        };
        (filter, page)
    }
}

pub async fn create_intent(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateIntentRequest>,
) -> AppResult<Response> {
    let intent = state.services.payments.create_intent(&actor, body).await?;
    Ok(created(IntentView::from(&intent), "Payment intent created").into_response())
}

pub async fn confirm_qr(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<ConfirmQrRequest>,
) -> AppResult<Response> {
    let settlement = state.services.payments.confirm_qr(&actor, body).await?;
    Ok(success(settlement, "Payment confirmed").into_response())
}

pub async fn list_payments(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<PaymentListQuery>,
) -> AppResult<Response> {
    let (filter, page) = query.into_parts();
    let payments = state
        .services
        .payments
        .list_payments(&actor, filter, page)
        .await?;
    Ok(success(payments, "Payments retrieved").into_response())
}

pub async fn get_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let payment = state.services.payments.get_payment(&actor, id).await?;
    Ok(success(payment, "Payment retrieved").into_response())
}
