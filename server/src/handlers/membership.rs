use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};

use crate::models::user::Actor;
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{success, Page};

pub async fn my_membership(State(state): State<AppState>, actor: Actor) -> AppResult<Response> {
    let summary = state.services.membership.summary(&actor, actor.user_id).await?;
    Ok(success(summary, "Membership retrieved").into_response())
}

pub async fn my_point_history(
    State(state): State<AppState>,
    actor: Actor,
    Query(page): Query<Page>,
) -> AppResult<Response> {
    let history = state
        .services
        .membership
        .history(&actor, actor.user_id, page)
        .await?;
    Ok(success(history, "Point history retrieved").into_response())
}

pub async fn reconcile(State(state): State<AppState>, actor: Actor) -> AppResult<Response> {
    let report = state.services.membership.reconcile(&actor).await?;
    let message = if report.drifted.is_empty() {
        "Memberships match the ledger"
    } else {
        "Membership drift detected"
    };
    Ok(success(report, message).into_response())
}
