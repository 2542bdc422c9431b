use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, Request, StatusCode},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower::util::ServiceExt;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod routes;
pub mod services;

use config::Config;
use db::Database;
use middleware::rate_limit::RateLimiter;
use services::{identity::IdentityProvider, mailer::Mailer, storage::MediaStore};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub mailer: Arc<dyn Mailer>,
    pub identity: Arc<dyn IdentityProvider>,
    pub media: Arc<MediaStore>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// State wired to the production mailer and identity provider.
    pub fn new(db: Database, config: Config) -> anyhow::Result<Self> {
        let mailer = services::mailer::from_config(&config)?;
        let identity = services::identity::from_config(&config)?;
        Ok(Self::with_services(db, config, mailer, identity))
    }

    pub fn with_services(
        db: Database,
        config: Config,
        mailer: Arc<dyn Mailer>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let media = Arc::new(MediaStore::new(&config.storage_path, &config.public_url));
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max,
            Duration::from_secs(config.rate_limit_window_secs),
        ));

        Self {
            db,
            config,
            mailer,
            identity,
            media,
            limiter,
        }
    }
}

pub fn app(state: AppState) -> Router {
    let api_router = Router::new()
        .nest("/auth", routes::auth::router(state.clone()))
        .nest("/courses", routes::courses::router(state.clone()))
        .nest("/chapters", routes::chapters::router(state.clone()))
        .nest(
            "/attachments",
            routes::courses::attachments_router(state.clone()),
        )
        .nest("/media", routes::media::router(state.clone()))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_router)
        .nest_service("/media", ServeDir::new(state.media.base_path()))
        .fallback(serve_spa)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit_middleware,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health_check() -> &'static str {
    "OK"
}

async fn serve_spa(State(state): State<AppState>, req: Request<Body>) -> Response {
    let static_dir = std::path::Path::new(&state.config.static_dir);
    let path = req.uri().path().trim_start_matches('/');

    // Try to serve static file first
    if !path.is_empty() && static_dir.join(path).is_file() {
        return match ServeDir::new(static_dir).oneshot(req).await {
            Ok(res) => res.into_response(),
            Err(never) => match never {},
        };
    }

    // For SPA routes, serve index.html
    match tokio::fs::read(static_dir.join("index.html")).await {
        Ok(contents) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html")],
            contents,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}
