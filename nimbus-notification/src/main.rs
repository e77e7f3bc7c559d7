use axum::routing::{get, post};
use axum::Router;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod config;
mod events;
mod models;
mod routes;
mod schema;
mod services;

use config::AppConfig;
use nimbus_shared::clients::fcm::FcmClient;
use nimbus_shared::clients::push::PushClient;
use nimbus_shared::clients::rabbitmq::RabbitMQClient;
use nimbus_shared::middleware::JwtSecret;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub rabbitmq: RabbitMQClient,
    pub push: Arc<dyn PushClient>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nimbus_shared::middleware::init_tracing("nimbus-notification");

    let config = AppConfig::load()?;
    let port = config.port;
    let jwt_secret = JwtSecret::new(&config.jwt_secret);

    let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
    let db = Pool::builder().max_size(10).build(manager)?;

    let rabbitmq = RabbitMQClient::connect(&config.rabbitmq_url).await?;

    let push: Arc<dyn PushClient> = Arc::new(FcmClient::new(
        &config.google_project_id,
        &config.google_client_email,
        &config.google_private_key,
        &config.google_token_uri,
    ));

    let metrics_handle = nimbus_shared::middleware::init_metrics();

    let state = Arc::new(AppState { db, config, rabbitmq, push, metrics_handle });

    // Spawn queued dispatch subscriber
    let send_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = events::subscriber::listen_send_requests(send_state).await {
            tracing::error!(error = %e, "send request subscriber failed");
        }
    });

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/notifications", get(routes::notifications::list_notifications))
        .route("/notifications/send", post(routes::notifications::send_notification))
        .layer(axum::Extension(jwt_secret))
        .layer(axum::middleware::from_fn(nimbus_shared::middleware::metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "nimbus-notification starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
