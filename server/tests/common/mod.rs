//! Shared fixtures: an in-memory store with one room, one movie, one
//! schedule a day out, a combo and two vouchers, driven by a manual clock.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use cinema_server::clock::ManualClock;
use cinema_server::config::{BookingSettings, Environment};
use cinema_server::events::EventBus;
use cinema_server::models::catalog::{Combo, DiscountType, Movie, Promotion, UsageLimit};
use cinema_server::models::room::{grid_layout, Room};
use cinema_server::models::schedule::{PriceTable, Schedule};
use cinema_server::models::user::Actor;
use cinema_server::routes::create_routes;
use cinema_server::services::tickets::{BookingRequest, ComboItem};
use cinema_server::services::{ServiceContext, Services};
use cinema_server::signing::{KeyRing, QrSigner};
use cinema_server::state::AppState;
use cinema_server::store::MemoryStore;

pub const SECRET: &str = "test-qr-secret";

pub fn d(v: i64) -> Decimal {
    Decimal::from(v)
}

pub fn start_of_test() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<EventBus>,
    pub services: Services,
    pub movie: Movie,
    pub room: Room,
    pub schedule: Schedule,
    pub popcorn: Combo,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_show_in(Duration::days(1))
    }

    /// A harness whose schedule starts `lead` after the clock's start time.
    pub fn with_show_in(lead: Duration) -> Self {
        let now = start_of_test();
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let events = Arc::new(EventBus::default());

        let cinema_id = Uuid::new_v4();
        let movie = Movie {
            id: Uuid::new_v4(),
            title: "Harbour Lights".into(),
            duration_minutes: 110,
            created_at: now,
        };
        let room = Room {
            id: Uuid::new_v4(),
            cinema_id,
            name: "Room 1".into(),
            seats: grid_layout(&["A", "B", "C"], 8, &["C"]),
            created_at: now,
        };
        let start = now + lead;
        let schedule = Schedule {
            id: Uuid::new_v4(),
            movie_id: movie.id,
            room_id: room.id,
            cinema_id,
            start_time: start,
            end_time: start + Duration::minutes(140),
            price_table: PriceTable::flat(d(100_000), d(150_000)),
            is_3d: false,
            has_subtitles: true,
            is_dubbed: false,
            created_at: now,
        };
        let popcorn = Combo {
            id: Uuid::new_v4(),
            name: "Popcorn + Coke".into(),
            price: d(50_000),
            is_active: true,
        };

        store.add_movie(movie.clone());
        store.add_room(room.clone());
        store.add_schedule(schedule.clone());
        store.add_combo(popcorn.clone());
        store.add_promotion(promotion("SAVE10", DiscountType::Percentage, 10, Some(20_000), UsageLimit::Single, now));
        store.add_promotion(promotion("FLAT30K", DiscountType::Fixed, 30_000, None, UsageLimit::Unlimited, now));

        let services = Services::new(ServiceContext {
            store: store.clone(),
            clock: clock.clone(),
            events: events.clone(),
            signer: signer(),
            settings: BookingSettings::default(),
            bank: None,
        });

        Self {
            store,
            clock,
            events,
            services,
            movie,
            room,
            schedule,
            popcorn,
        }
    }

    pub fn request(&self, seats: &[&str]) -> BookingRequest {
        BookingRequest {
            schedule_id: self.schedule.id,
            seats: seats.iter().map(|s| s.to_string()).collect(),
            combos: Vec::new(),
            payment_method: None,
        }
    }

    /// Two standard seats plus one popcorn combo: 250,000 before discount.
    pub fn happy_path_request(&self) -> BookingRequest {
        BookingRequest {
            combos: vec![ComboItem {
                combo_id: self.popcorn.id,
                quantity: 1,
            }],
            ..self.request(&["A1", "A2"])
        }
    }

    pub fn router(&self) -> Router {
        create_routes(
            AppState::new(self.services.clone()),
            Environment::Development,
            None,
        )
    }
}

pub fn signer() -> QrSigner {
    QrSigner::new(Arc::new(KeyRing::new(1, SECRET)))
}

pub fn promotion(
    code: &str,
    discount_type: DiscountType,
    value: i64,
    cap: Option<i64>,
    usage_limit: UsageLimit,
    now: DateTime<Utc>,
) -> Promotion {
    Promotion {
        id: Uuid::new_v4(),
        code: code.into(),
        name: code.into(),
        discount_type,
        discount_value: d(value),
        max_discount: cap.map(d),
        min_order_value: None,
        usage_limit,
        applicable_movies: Vec::new(),
        start_date: now - Duration::days(7),
        end_date: now + Duration::days(30),
        is_active: true,
    }
}

pub fn user() -> Actor {
    Actor::user(Uuid::new_v4())
}

pub fn staff() -> Actor {
    Actor::staff(Uuid::new_v4())
}

pub fn admin() -> Actor {
    Actor::admin(Uuid::new_v4())
}

pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    actor: Option<&Actor>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        builder = builder
            .header("x-user-id", actor.user_id.to_string())
            .header("x-user-role", actor.role.as_str());
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
