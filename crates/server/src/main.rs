mod api;
mod auth;
mod config;
mod cors;
mod db;
mod error;
mod store;
mod validation;
mod ws;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    auth::jwt::JwtAccessTokenService,
    config::{BackplaneKind, LogFormat, ServerConfig},
    error::{
        attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
        ErrorCode, ServerError,
    },
    store::ChatStore,
    validation::MAX_REST_BODY_BYTES,
    ws::{
        backplane::{Backplane, LocalBackplane, PostgresBackplane},
        fanout::ChatFanout,
        registry::RoomRegistry,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    init_tracing(&config);

    if config.is_dev_jwt_secret() {
        warn!("HUDDLE_JWT_SECRET is not set, using the development secret");
    }

    let jwt_service = Arc::new(
        JwtAccessTokenService::new(&config.jwt_secret)
            .context("invalid JWT secret")?
            .with_ttl_seconds(config.access_token_ttl_secs),
    );

    let (store, backplane) = open_storage(&config).await?;
    let registry = Arc::new(RoomRegistry::new(backplane));
    let _backplane_pump = registry.spawn_backplane_pump();

    let app = build_router(
        jwt_service,
        registry,
        store,
        config.handshake_timeout,
        config.cors_origins.as_deref(),
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting chat server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("chat server exited unexpectedly")
}

fn init_tracing(config: &ServerConfig) {
    let subscriber = tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&config.log_filter));
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

async fn open_storage(config: &ServerConfig) -> anyhow::Result<(ChatStore, Arc<dyn Backplane>)> {
    let Some(database_url) = config.database_url.as_deref() else {
        if config.backplane == BackplaneKind::Postgres {
            bail!("HUDDLE_BACKPLANE=postgres requires HUDDLE_DATABASE_URL");
        }
        warn!("HUDDLE_DATABASE_URL is not set, keeping all state in memory");
        return Ok((ChatStore::in_memory(), Arc::new(LocalBackplane::default())));
    };

    let pool = db::pool::create_pg_pool(database_url, &config.pool).await?;
    db::pool::check_pool_health(&pool).await?;
    db::migrations::run_migrations(&pool).await?;
    info!("database ready");

    let backplane: Arc<dyn Backplane> = match config.backplane {
        BackplaneKind::Local => Arc::new(LocalBackplane::default()),
        BackplaneKind::Postgres => Arc::new(PostgresBackplane::connect(pool.clone()).await?),
    };

    Ok((ChatStore::Postgres(pool), backplane))
}

fn build_router(
    jwt_service: Arc<JwtAccessTokenService>,
    registry: Arc<RoomRegistry>,
    store: ChatStore,
    handshake_timeout: Duration,
    cors_origins: Option<&str>,
) -> Router {
    let fanout = ChatFanout::new(Arc::clone(&registry));

    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(Arc::clone(&jwt_service), registry, store.clone(), handshake_timeout))
            .merge(api::router(store, jwt_service, fanout))
            .fallback(route_not_found),
    )
    .layer(cors::cors_layer(cors_origins))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn route_not_found() -> ServerError {
    ServerError::from_code(ErrorCode::NotFound)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(?error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(?error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            ServerError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
