use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use dotenvy::dotenv;
use teloxide::Bot;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stratus_db::repositories::{
    payment_repo::PaymentRepository, plan_repo::PlanRepository, promo_repo::PromoRepository,
    user_repo::UserRepository, vps_repo::VpsRepository,
};

mod bot;
mod handlers;
mod services;

use crate::bot::utils::MessageLog;
use crate::services::vps_service::VpsService;

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub bot_username: Option<String>,
    pub database_url: String,
    pub webhook_secret: Option<String>,
    pub admin_secret: Option<String>,
    pub bind_addr: String,
    pub trial_days: u64,
    pub ssh_host: Option<String>,
    pub ssh_user: String,
    pub howto_image_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bot_token: std::env::var("BOT_TOKEN").context("BOT_TOKEN is not set")?,
            bot_username: std::env::var("BOT_USERNAME").ok().filter(|s| !s.is_empty()),
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?,
            webhook_secret: std::env::var("TELEGRAM_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            admin_secret: std::env::var("ADMIN_SECRET").ok().filter(|s| !s.is_empty()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            trial_days: std::env::var("TRIAL_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            ssh_host: std::env::var("VPS_SSH_HOST").ok().filter(|s| !s.is_empty()),
            ssh_user: std::env::var("VPS_SSH_USER").unwrap_or_else(|_| "root".to_string()),
            howto_image_url: std::env::var("HOWTO_IMAGE_URL").ok().filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub bot: Bot,
    pub config: Arc<Config>,
    pub ledger: UserRepository,
    pub plans: PlanRepository,
    pub vps: VpsRepository,
    pub promos: PromoRepository,
    pub payments: PaymentRepository,
    pub vps_service: Arc<VpsService>,
    pub message_log: Arc<MessageLog>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info,sqlx=warn")
        }))
        .init();

    let config = Arc::new(Config::from_env()?);
    info!("Starting stratus-bot...");

    let pool = stratus_db::connect(&config.database_url).await?;
    let bot = Bot::new(&config.bot_token);

    let vps_repo = VpsRepository::new(pool.clone());
    let state = AppState {
        bot,
        config: config.clone(),
        ledger: UserRepository::new(pool.clone(), config.trial_days),
        plans: PlanRepository::new(pool.clone()),
        vps: vps_repo.clone(),
        promos: PromoRepository::new(pool.clone()),
        payments: PaymentRepository::new(pool.clone()),
        vps_service: Arc::new(VpsService::new(
            vps_repo,
            UserRepository::new(pool, config.trial_days),
            config.ssh_host.clone(),
            config.ssh_user.clone(),
        )),
        message_log: Arc::new(MessageLog::new(MessageLog::DEFAULT_CAP)),
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/telegram/menu",
            get(handlers::telegram::menu_preview).post(handlers::telegram::webhook),
        )
        .route("/api/vps/ssh/test", get(handlers::vps::ssh_test))
        .route("/api/vps/sync", post(handlers::vps::sync))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server exited")?;
    Ok(())
}
