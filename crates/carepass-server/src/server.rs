use std::{net::SocketAddr, sync::Arc};

use axum::{Json, Router, routing::get};
use carepass_auth::http::CORRELATION_ID_HEADER;
use carepass_auth::{AuthOrchestrator, AuthStorage, SystemClock, TracingAuditSink, auth_router};
use carepass_auth_postgres::PostgresAuthStorage;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::config::{AppConfig, StorageBackend, StorageConfig};

pub struct CarepassServer {
    addr: SocketAddr,
    app: Router,
}

/// Connects the configured storage backend and builds the router.
pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let storage = build_storage(&cfg.storage).await?;
    build_router(cfg, storage)
}

pub async fn build_storage(cfg: &StorageConfig) -> anyhow::Result<AuthStorage> {
    match cfg.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; accounts are lost on restart");
            Ok(AuthStorage::in_memory())
        }
        StorageBackend::Postgres => {
            let storage = PostgresAuthStorage::connect_with(
                &cfg.postgres.connection_url(),
                cfg.postgres.pool_size,
            )
            .await?;
            Ok(AuthStorage::from_backend(Arc::new(storage)))
        }
    }
}

pub fn build_router(cfg: &AppConfig, storage: AuthStorage) -> anyhow::Result<Router> {
    let orchestrator = AuthOrchestrator::from_config(
        &cfg.auth,
        storage,
        Arc::new(SystemClock),
        Arc::new(TracingAuditSink),
    )?;

    Ok(Router::new()
        .route("/health", get(health))
        .merge(auth_router(Arc::new(orchestrator)))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let correlation_id = req
                        .headers()
                        .get(CORRELATION_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        correlation_id = %correlation_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(
            cfg.server.body_limit_bytes,
        )))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl ServerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn build(self) -> anyhow::Result<CarepassServer> {
        let app = build_app(&self.config).await?;
        Ok(CarepassServer {
            addr: self.config.addr(),
            app,
        })
    }
}

impl CarepassServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
