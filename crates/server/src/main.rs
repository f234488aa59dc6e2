mod auth;
mod error;
mod routes;

use std::{str::FromStr, sync::Arc};

use db::DBService;
use services::services::{
    billing::{AiBillingService, DEFAULT_AI_ACTION_FEE},
    completion::{CompletionClient, CompletionError, CompletionProvider},
    task_lifecycle::CancellationPolicy,
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub billing: Option<Arc<AiBillingService>>,
    pub cancellation_policy: CancellationPolicy,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    utils::logging::init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://codehive.db".to_string());
    let db = DBService::new(&database_url).await?;

    let fee = std::env::var("CODEHIVE_AI_FEE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_AI_ACTION_FEE);

    let cancellation_policy = std::env::var("CODEHIVE_CANCELLATION_POLICY")
        .ok()
        .and_then(|v| CancellationPolicy::from_str(&v).ok())
        .unwrap_or_default();

    let billing = match CompletionClient::from_env() {
        Ok(client) => {
            let provider: Arc<dyn CompletionProvider> = Arc::new(client);
            Some(Arc::new(AiBillingService::new(provider, fee)))
        }
        Err(CompletionError::MissingApiKey) => {
            warn!("ANTHROPIC_API_KEY not set - AI actions are disabled");
            None
        }
        Err(e) => return Err(e.into()),
    };

    let state = AppState {
        db,
        billing,
        cancellation_policy,
    };

    let app = axum::Router::new()
        .nest("/api", routes::router())
        .with_state(state);

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, cancellation_policy = %cancellation_policy, ai_fee = fee, "codehive server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
