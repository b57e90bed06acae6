//! Application startup and lifecycle management.

use crate::config::Config;
use crate::handlers;
use crate::services::{Database, init_metrics};
use axum::middleware::from_fn;
use axum::{
    Router,
    routing::{delete, get, post},
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;

        db.run_migrations().await?;

        let state = AppState {
            db,
            config: config.clone(),
        };

        let router = build_router(state);

        // port 0 = random port for testing
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Procurement service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router).await
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        // Invoice lifecycle
        .route("/invoices", post(handlers::invoices::create_invoice))
        .route("/invoices/:id", get(handlers::invoices::get_invoice))
        .route(
            "/invoices/:id/cost-summary",
            get(handlers::invoices::get_cost_summary),
        )
        .route(
            "/invoices/:id/allocations",
            get(handlers::invoices::get_allocations),
        )
        .route("/invoices/:id/submit", post(handlers::invoices::submit_invoice))
        .route("/invoices/:id/approve", post(handlers::invoices::approve_invoice))
        .route("/invoices/:id/reject", post(handlers::invoices::reject_invoice))
        .route(
            "/invoices/:id/recalculate",
            post(handlers::invoices::recalculate_allocations),
        )
        .route(
            "/invoices/:id/attest/:kind",
            post(handlers::invoices::attest_checklist),
        )
        .route("/invoices/:id/close", post(handlers::invoices::close_invoice))
        // Line items
        .route(
            "/invoices/:id/line-items",
            post(handlers::line_items::add_line_item),
        )
        .route(
            "/invoices/:id/line-items/:line_item_id",
            delete(handlers::line_items::void_line_item),
        )
        // Cost inputs
        .route("/invoices/:id/costs", post(handlers::costs::add_cost))
        .route(
            "/invoices/:id/costs/:cost_id",
            delete(handlers::costs::remove_cost),
        )
        .route(
            "/invoices/:id/freight-links",
            post(handlers::costs::add_freight_link),
        )
        .route(
            "/invoices/:id/freight-links/:link_id",
            delete(handlers::costs::remove_freight_link),
        )
        // Purchase order line ledger
        .route(
            "/po-lines/invoiceable",
            get(handlers::po_lines::list_invoiceable),
        )
        .route(
            "/po-lines/:id/remaining",
            get(handlers::po_lines::get_remaining),
        )
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
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
                    version = ?request.version(),
                    tenant_id = tracing::field::Empty,
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}
