mod health;
mod ledger;
mod rollout;
mod state;

pub use ledger::summary_response;
pub use state::AdminState;

use axum::{
    Router, middleware,
    routing::{delete, get},
};

use super::middleware::{log_responses, set_request_context};

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/admin/rollout",
            get(rollout::admin_rollout).put(rollout::admin_rollout_update),
        )
        .route(
            "/admin/rollout/sessions/{session_id}",
            delete(rollout::admin_session_end),
        )
        .route("/admin/ledger/summary", get(ledger::admin_ledger_summary))
        .route("/_health/db", get(health::admin_health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}
