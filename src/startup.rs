//! Application startup and lifecycle management.

use crate::config::Config;
use crate::error::AppError;
use crate::handlers;
use crate::services::ledger::LedgerService;
use crate::services::metrics::init_metrics;
use crate::services::notifier::{Notifier, StoreNotifier};
use crate::services::payments::PaymentRecorder;
use crate::services::razorpay::{PaymentGateway, RazorpayClient};
use crate::services::store::{FeeStore, MongoStore};
use crate::services::subscriptions::SubscriptionEngine;
use crate::services::upgrades::UpgradeCoordinator;
use axum::{
    routing::{get, patch, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn FeeStore>,
    pub ledgers: Arc<LedgerService>,
    pub payments: Arc<PaymentRecorder>,
    pub subscriptions: Arc<SubscriptionEngine>,
    pub upgrades: Arc<UpgradeCoordinator>,
}

impl AppState {
    /// Wire the service graph on top of a store and gateway pair.
    ///
    /// Tests call this with `MemoryStore` and `StubGateway`; production
    /// passes `MongoStore` and `RazorpayClient`.
    pub fn assemble(
        config: Config,
        store: Arc<dyn FeeStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let notifier: Arc<dyn Notifier> = Arc::new(StoreNotifier::new(store.clone()));
        let ledgers = Arc::new(LedgerService::new(store.clone(), notifier.clone()));
        let payments = Arc::new(PaymentRecorder::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            config.reconciliation.receipt_prefix.clone(),
            config.razorpay.key_id.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionEngine::new(
            store.clone(),
            gateway,
            payments.clone(),
            notifier.clone(),
            config.reconciliation.clone(),
        ));
        let upgrades = Arc::new(UpgradeCoordinator::new(store.clone(), notifier));
        Self {
            config,
            store,
            ledgers,
            payments,
            subscriptions,
            upgrades,
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        init_metrics();

        let mut client_options = ClientOptions::parse(config.database.url.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!("Failed to parse MongoDB connection string: {}", e);
                AppError::DatabaseError(e.into())
            })?;
        client_options.app_name = Some(config.service_name.clone());

        let client = Client::with_options(client_options).map_err(|e| {
            tracing::error!("Failed to create MongoDB client: {}", e);
            AppError::DatabaseError(e.into())
        })?;
        let db = client.database(&config.database.db_name);

        let store = MongoStore::new(&db);
        store.init_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            e
        })?;

        let gateway = RazorpayClient::new(config.razorpay.clone());
        let state = AppState::assemble(config.clone(), Arc::new(store), Arc::new(gateway));

        // Bind listener (port 0 = random port for testing)
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Fee service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);
        axum::serve(self.listener, router).await
    }
}

/// The full HTTP surface. Static segments are registered before their
/// parameterized siblings.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        // Template catalog
        .route(
            "/templates",
            post(handlers::templates::create_template).get(handlers::templates::list_templates),
        )
        .route("/templates/:id", get(handlers::templates::get_template))
        .route(
            "/templates/:id/assign",
            post(handlers::templates::assign_template),
        )
        // Students
        .route("/students", post(handlers::students::create_student))
        .route("/students/:id", get(handlers::students::get_student))
        .route(
            "/students/:id/ledgers",
            get(handlers::students::list_student_ledgers),
        )
        .route(
            "/students/:id/fee-summary",
            get(handlers::students::fee_summary),
        )
        // Ledgers
        .route("/ledgers", post(handlers::ledgers::create_ledger))
        .route("/ledgers/overdue", get(handlers::ledgers::list_overdue))
        .route("/ledgers/:id", get(handlers::ledgers::get_ledger))
        .route("/ledgers/:id/items", post(handlers::ledgers::add_item))
        .route(
            "/ledgers/:id/items/:item_id",
            patch(handlers::ledgers::set_item_inclusion),
        )
        .route("/ledgers/:id/fines", post(handlers::ledgers::add_fine))
        .route(
            "/ledgers/:id/fines/:fine_id/settle",
            post(handlers::ledgers::settle_fine),
        )
        .route(
            "/ledgers/:id/discounts",
            post(handlers::ledgers::add_discount),
        )
        .route(
            "/ledgers/:id/payments",
            get(handlers::payments::list_ledger_payments),
        )
        // Payments
        .route("/payments", post(handlers::payments::record_payment))
        .route("/payments/orders", post(handlers::payments::create_order))
        .route(
            "/payments/verify-online",
            post(handlers::payments::verify_online),
        )
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route(
            "/payments/:id/verify",
            post(handlers::payments::verify_payment),
        )
        .route(
            "/payments/:id/refund",
            post(handlers::payments::refund_payment),
        )
        // Subscriptions
        .route(
            "/subscriptions",
            post(handlers::subscriptions::create_subscription),
        )
        .route(
            "/subscriptions/due",
            get(handlers::subscriptions::list_due_subscriptions),
        )
        .route(
            "/subscriptions/verify",
            post(handlers::subscriptions::verify_subscription),
        )
        .route(
            "/subscriptions/:id",
            get(handlers::subscriptions::get_subscription),
        )
        .route(
            "/subscriptions/:id/cancel",
            post(handlers::subscriptions::cancel_subscription),
        )
        // Webhooks
        .route(
            "/webhooks/razorpay",
            post(handlers::webhooks::razorpay_webhook),
        )
        // Semester upgrades
        .route(
            "/upgrades/students/:id",
            post(handlers::upgrades::upgrade_student),
        )
        .route("/upgrades/bulk", post(handlers::upgrades::bulk_upgrade))
        .route(
            "/upgrades/logs",
            get(handlers::upgrades::list_upgrade_logs),
        )
        .route(
            "/upgrades/logs/:id/rollback",
            post(handlers::upgrades::rollback_upgrade),
        )
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
