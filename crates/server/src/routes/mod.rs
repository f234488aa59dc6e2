pub mod ai;
pub mod credits;
pub mod health;
pub mod tasks;

use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(tasks::router())
        .merge(credits::router())
        .merge(ai::router())
}
