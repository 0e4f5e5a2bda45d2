use std::sync::Arc;

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use cinema_server::clock::{Clock, SystemClock};
use cinema_server::config::Config;
use cinema_server::events::{run_event_journal, EventBus};
use cinema_server::routes::create_routes;
use cinema_server::services::{ServiceContext, Services};
use cinema_server::signing::QrSigner;
use cinema_server::state::AppState;
use cinema_server::store::{BookingStore, MemoryStore, PgStore};

const DEFAULT_LOG_FILTER: &str = "cinema_server=debug,tower_http=info";
const MAX_DB_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn BookingStore> = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(MAX_DB_CONNECTIONS)
                .connect(database_url)
                .await?;
            tracing::info!("Successfully connected to database");

            sqlx::migrate!().run(&pool).await?;
            tracing::info!("Migrations run successfully");

            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store with demo data");
            let store = MemoryStore::new();
            for schedule in store.seed_demo(clock.now()) {
                tracing::info!(schedule_id = %schedule.id, start = %schedule.start_time, "Demo schedule");
            }
            Arc::new(store)
        }
    };

    let events = Arc::new(EventBus::default());
    tokio::spawn(run_event_journal(events.subscribe()));

    let services = Services::new(ServiceContext {
        store,
        clock,
        events,
        signer: QrSigner::new(Arc::new(config.qr_keys.clone())),
        settings: config.booking.clone(),
        bank: config.bank.clone(),
    });

    if let Some(every) = config.expiry_sweep {
        tracing::info!(interval_secs = every.as_secs(), "Expiry sweep enabled");
        tokio::spawn(services.tickets.clone().run_expiry_sweep(every));
    }

    let app = create_routes(
        AppState::new(services),
        config.environment,
        config.cors_allowed_origins.as_deref(),
    );

    let addr = config.socket_addr();
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
