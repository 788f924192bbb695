//! Timewalk Gateway — voice guide WebSocket and world generation API.
//! Serves `/ws/voice` (one guided conversation per socket) and the REST world job routes.

mod config;
mod voice;
mod worlds;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderValue, Method, Request},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use config::{Credentials, GatewayConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use timewalk_core::{WorldJobs, WorldLabsClient};
use timewalk_voice::{GeminiModel, GradiumStt, GradiumTts, SessionServices, WorldTracking};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub struct AppState {
    pub config: GatewayConfig,
    pub services: SessionServices,
    pub worlds: WorldLabsClient,
    pub world_tracking: WorldTracking,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[timewalk-gateway] No .env loaded: {}", e);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::load()?;
    let credentials = Credentials::from_env()?;

    let worlds = WorldLabsClient::new(credentials.world_labs_api_key.as_str())?;
    let world_jobs: Arc<dyn WorldJobs> = Arc::new(worlds.clone());
    let services = SessionServices {
        stt: Arc::new(GradiumStt::new(credentials.gradium_api_key.as_str())),
        tts: Arc::new(GradiumTts::new(credentials.gradium_api_key.as_str())),
        model: Arc::new(GeminiModel::new(credentials.gemini_api_key.as_str())?),
        world_jobs: Some(world_jobs),
    };
    let world_tracking = WorldTracking {
        poll_interval: Duration::from_secs(config.world_poll_interval_secs),
        max_attempts: config.world_poll_attempts,
    };

    let cors = CorsLayer::new()
        .allow_origin(config.frontend_origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    let bind_addr = config.bind_addr();

    let state = Arc::new(AppState {
        config,
        services,
        worlds,
        world_tracking,
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws/voice", get(voice::voice_ws))
        .route("/api/worlds/generate", post(worlds::generate_world))
        .route("/api/worlds/status/:operation_id", get(worlds::world_status))
        .with_state(state)
        .layer(cors)
        .layer(axum::middleware::from_fn(log_request));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(target: "timewalk::gateway", "🌍 Timewalk gateway listening on http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn log_request(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    tracing::debug!(target: "timewalk::gateway", "{} {} from {}", request.method(), request.uri().path(), addr);
    next.run(request).await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
