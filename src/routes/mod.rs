use axum::{routing::get, Router};

use crate::state::AppState;

pub mod allocations;
pub mod debtors;
pub mod health;
pub mod identity;
pub mod payments;
pub mod ptps;
pub mod reports;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/me", get(identity::me))
        .merge(debtors::router())
        .merge(payments::router())
        .merge(ptps::router())
        .merge(allocations::router())
        .merge(reports::router())
}
