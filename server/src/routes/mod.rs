use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, Environment};
use crate::handlers::{health_check, membership, payments, schedules, tickets};
use crate::state::AppState;

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/schedules", post(schedules::create_schedule))
        .route("/schedules/:id", get(schedules::get_schedule))
        .route("/schedules/:id/seats", get(schedules::seat_map))
        .route(
            "/schedules/:id/availability",
            post(schedules::check_availability),
        )
        .route(
            "/promotions/:code/validate",
            get(tickets::validate_promotion),
        )
        .route("/bookings", post(tickets::book))
        .route("/tickets", get(tickets::list_tickets))
        .route("/tickets/me", get(tickets::my_tickets))
        .route("/tickets/verify-qr", post(tickets::verify_qr))
        .route("/tickets/cleanup", post(tickets::cleanup))
        .route("/tickets/:id", get(tickets::get_ticket))
        .route("/tickets/:id/cancel", put(tickets::cancel_ticket))
        .route("/tickets/:id/change-seats", put(tickets::change_seats))
        .route("/tickets/:id/apply-voucher", put(tickets::apply_voucher))
        .route("/tickets/:id/apply-combo", put(tickets::apply_combo))
        .route("/tickets/:id/mark-paid", put(tickets::mark_paid))
        .route("/tickets/:id/refund", put(tickets::refund_ticket))
        .route("/tickets/:id/qr", get(tickets::check_in_qr))
        .route("/payment-intents", post(payments::create_intent))
        .route("/payment-intents/confirm", post(payments::confirm_qr))
        .route("/payments", get(payments::list_payments))
        .route("/payments/:id", get(payments::get_payment))
        .route("/membership/me", get(membership::my_membership))
        .route("/membership/me/history", get(membership::my_point_history))
        .route("/membership/reconcile", post(membership::reconcile))
}

pub fn create_routes(
    state: AppState,
    environment: Environment,
    cors_allowed_origins: Option<&str>,
) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer(environment))
        .layer(create_cors_layer(cors_allowed_origins))
}
