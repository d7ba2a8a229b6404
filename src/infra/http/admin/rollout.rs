use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use placecache_api_types::RolloutConfigView;

use crate::{application::error::HttpError, domain::rollout::RolloutConfig};

use super::AdminState;

const SOURCE: &str = "infra::http::admin_rollout";

fn view(config: RolloutConfig) -> RolloutConfigView {
    RolloutConfigView {
        enabled: config.enabled(),
        rollout_percentage: config.percentage(),
    }
}

pub(super) async fn admin_rollout(State(state): State<AdminState>) -> Json<RolloutConfigView> {
    Json(view(state.rollout.config()))
}

pub(super) async fn admin_rollout_update(
    State(state): State<AdminState>,
    payload: Result<Json<RolloutConfigView>, JsonRejection>,
) -> Response {
    let Json(requested) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Malformed rollout configuration",
                rejection.body_text(),
            )
            .into_response();
        }
    };

    match RolloutConfig::new(requested.enabled, requested.rollout_percentage) {
        Ok(next) => {
            state.rollout.replace_config(next);
            Json(view(next)).into_response()
        }
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Invalid rollout configuration",
            &err,
        )
        .into_response(),
    }
}

pub(super) async fn admin_session_end(
    State(state): State<AdminState>,
    Path(session_id): Path<String>,
) -> Response {
    if state.rollout.end_session(&session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Session not found",
            format!("no rollout session `{session_id}`"),
        )
        .into_response()
    }
}
