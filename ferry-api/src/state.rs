use ferry_catalog::{FareTable, ScheduleService, SeatLedger};
use ferry_core::events::EventSink;
use ferry_core::payment::PaymentGateway;
use ferry_order::{BookingOrchestrator, ManifestService, RandomReferences, Reconciler, TicketingEngine};
use ferry_store::{Config, EventBus, RedisClient, Repositories};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct RateLimit {
    pub redis: Option<Arc<RedisClient>>,
    pub per_minute: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub schedules: Arc<ScheduleService>,
    pub orchestrator: Arc<BookingOrchestrator>,
    pub manifests: Arc<ManifestService>,
    pub reconciler: Arc<Reconciler>,
    pub events: Arc<EventBus>,
    pub rate_limit: RateLimit,
    pub auth: AuthConfig,
}

impl AppState {
    /// Wires the services over whichever repositories the storage backend
    /// provides.
    pub fn new(
        config: &Config,
        repos: Repositories,
        gateway: Arc<dyn PaymentGateway>,
        redis: Option<Arc<RedisClient>>,
    ) -> Self {
        let rules = &config.business_rules;
        let events = Arc::new(EventBus::default());
        let sink: Arc<dyn EventSink> = events.clone();

        let ledger = Arc::new(
            SeatLedger::new(repos.schedules.clone(), sink.clone())
                .with_max_attempts(rules.max_reserve_attempts),
        );
        let fares = FareTable::from_percentages(
            config.fares.adult,
            config.fares.child,
            config.fares.infant,
            config.fares.senior,
        );
        let references = Arc::new(RandomReferences);

        let orchestrator = Arc::new(
            BookingOrchestrator::new(
                repos.schedules.clone(),
                repos.bookings.clone(),
                ledger,
                TicketingEngine::new(fares, references.clone()),
                references,
                gateway,
                sink.clone(),
            )
            .with_deadline(Duration::from_millis(rules.booking_deadline_ms)),
        );

        let reconciler = Arc::new(Reconciler::new(
            orchestrator.clone(),
            repos.bookings.clone(),
            repos.schedules.clone(),
            chrono::Duration::from_std(Duration::from_secs(rules.pending_booking_ttl_secs))
                .unwrap_or_else(|_| chrono::Duration::weeks(1)),
        ));

        Self {
            schedules: Arc::new(ScheduleService::new(
                repos.schedules.clone(),
                repos.catalog.clone(),
                repos.bookings.clone(),
                &rules.currency,
            )),
            manifests: Arc::new(ManifestService::new(
                repos.schedules,
                repos.bookings,
                repos.customers,
                sink,
            )),
            orchestrator,
            reconciler,
            events,
            rate_limit: RateLimit {
                redis,
                per_minute: rules.rate_limit_per_minute,
            },
            auth: AuthConfig {
                secret: config.auth.jwt_secret.clone(),
                expiration: config.auth.jwt_expiration_seconds,
            },
        }
    }
}
