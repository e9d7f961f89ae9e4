//! Booking demo.
//!
//! Wires the ledger, the reservation engine and the payment engine together,
//! books and pays for one reservation, then keeps the sweeper running until
//! Ctrl+C.
//!
//! Collaborators are in-process unless `EVENT_SERVICE_URL` or
//! `RESERVATION_SERVICE_URL` point at remote services. With the `postgres`
//! feature and `DATABASE_URL` set, rows are stored in `PostgreSQL`.

use booking::capabilities::{
    EventCapability, HttpEventCapability, HttpReservationCapability, LocalEventCapability,
    LocalReservationCapability, ReservationCapability,
};
use booking::catalog::InMemoryEventCatalog;
use booking::metrics::MetricsServer;
use booking::processor::SimulatedProcessor;
use booking::stores::{
    CapacityStore, InMemoryCapacityStore, InMemoryPaymentStore, InMemoryReservationStore,
    PaymentStore, ReservationStore,
};
use booking::types::{EventId, EventStatus, Money, UserId};
use booking::{
    CapacityLedger, Config, CreateIntentRequest, CreateReservationRequest, PaymentEngine,
    ReservationEngine, Sweeper,
};
use booking_core::environment::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_EVENT: EventId = EventId::new(1);
const DEMO_USER: UserId = UserId::new(42);

struct Stores {
    capacity: Arc<dyn CapacityStore>,
    reservations: Arc<dyn ReservationStore>,
    payments: Arc<dyn PaymentStore>,
}

impl Stores {
    fn in_memory() -> Self {
        Self {
            capacity: Arc::new(InMemoryCapacityStore::new()),
            reservations: Arc::new(InMemoryReservationStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
        }
    }

    #[cfg(feature = "postgres")]
    async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        use booking::stores::postgres::{
            self, PostgresCapacityStore, PostgresPaymentStore, PostgresReservationStore,
        };

        let Some(url) = config.database.url.as_deref() else {
            return Ok(Self::in_memory());
        };
        info!("Connecting to database...");
        let pool = postgres::connect(url, config.database.max_connections).await?;
        postgres::migrate(&pool).await?;
        info!("Database connected and migrated");

        Ok(Self {
            capacity: Arc::new(PostgresCapacityStore::new(pool.clone())),
            reservations: Arc::new(PostgresReservationStore::new(pool.clone())),
            payments: Arc::new(PostgresPaymentStore::new(pool)),
        })
    }

    #[cfg(not(feature = "postgres"))]
    #[allow(clippy::unused_async)]
    async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        if config.database.url.is_some() {
            warn!(
                "DATABASE_URL is set but the postgres feature is disabled; using in-memory stores"
            );
        }
        Ok(Self::in_memory())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "booking=info,booking_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting booking demo");

    let config = Config::from_env();
    config.validate()?;
    info!(
        max_tickets = config.reservations.max_tickets_per_user_per_event,
        intent_ttl_secs = config.payments.intent_ttl_secs,
        capture_failure_policy = ?config.payments.capture_failure_policy,
        "Configuration loaded"
    );

    let metrics_addr = format!("{}:{}", config.metrics.host, config.metrics.port).parse()?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stores = Stores::from_config(&config).await?;

    // Event side
    let events: Arc<dyn EventCapability> = match &config.capabilities.event_service_url {
        Some(url) => {
            info!(url = %url, "Using remote event service");
            Arc::new(HttpEventCapability::new(url, &config.capabilities)?)
        }
        None => {
            let ledger = CapacityLedger::new(stores.capacity, Arc::clone(&clock));
            if let Err(e) = ledger.create(DEMO_EVENT, 100).await {
                warn!(event_id = %DEMO_EVENT, error = %e, "Demo event capacity not created");
            }
            let catalog = Arc::new(InMemoryEventCatalog::new());
            catalog
                .upsert(DEMO_EVENT, EventStatus::Published, Money::from_cents(2999))
                .await;
            Arc::new(LocalEventCapability::new(catalog, ledger))
        }
    };

    let reservation_engine = Arc::new(ReservationEngine::new(
        &config.reservations,
        stores.reservations,
        events,
        Arc::clone(&clock),
    ));

    // Payment side
    let reservations: Arc<dyn ReservationCapability> =
        match &config.capabilities.reservation_service_url {
            Some(url) => {
                info!(url = %url, "Using remote reservation service");
                Arc::new(HttpReservationCapability::new(url, &config.capabilities)?)
            }
            None => Arc::new(LocalReservationCapability::new(Arc::clone(&reservation_engine))),
        };
    let payment_engine = Arc::new(PaymentEngine::new(
        &config.payments,
        stores.payments,
        reservations,
        SimulatedProcessor::shared(&config.processor),
        Arc::clone(&clock),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let sweeper = Sweeper::new(Arc::clone(&payment_engine), config.sweeper.interval())
        .spawn(shutdown_tx.subscribe());

    if let Err(e) = run_demo(&reservation_engine, &payment_engine).await {
        warn!(error = %e, "Demo booking did not complete");
    }

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(Duration::from_secs(10), sweeper).await {
        Ok(Ok(())) => info!("Sweeper stopped gracefully"),
        Ok(Err(e)) => warn!(error = %e, "Sweeper task failed"),
        Err(_) => warn!("Sweeper shutdown timed out"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Reserve two tickets and pay for them, retrying each step safely by key.
async fn run_demo(
    reservations: &ReservationEngine,
    payments: &PaymentEngine,
) -> booking::Result<()> {
    let request_key = uuid::Uuid::new_v4().to_string();

    let reservation = reservations
        .create(
            CreateReservationRequest::new(DEMO_USER, DEMO_EVENT, 2)
                .with_idempotency_key(request_key.clone()),
        )
        .await?;
    info!(
        reservation_id = %reservation.id,
        total_price = %reservation.total_price,
        "Demo reservation created"
    );

    // A client retry with the same key changes nothing
    let replayed = reservations
        .create(
            CreateReservationRequest::new(DEMO_USER, DEMO_EVENT, 2)
                .with_idempotency_key(request_key.clone()),
        )
        .await?;
    info!(same = replayed.id == reservation.id, "Demo reservation replayed");

    let intent = payments
        .create_intent(
            CreateIntentRequest::new(reservation.id.clone(), DEMO_USER, reservation.total_price)
                .with_idempotency_key(request_key.clone()),
        )
        .await?;
    info!(intent_id = %intent.id, expires_at = %intent.expires_at, "Demo payment intent created");

    let payment = payments.capture(&intent.id, Some(&request_key)).await?;
    info!(
        payment_id = %payment.id,
        status = %payment.status,
        confirmation = ?payment.confirmation,
        "Demo capture finished"
    );

    let reservation = reservations.get(&reservation.id).await?;
    info!(
        reservation_id = %reservation.id,
        status = %reservation.status,
        "Demo reservation final status"
    );
    Ok(())
}
