use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use stallplass_core::types::Horse;
use stallplass_core::{validation, ValidationError};
use tracing::{error, info};

use crate::auth::Caller;
use crate::extract::ApiJson;
use crate::problem::{internal_error, not_found, ProblemResponse};
use crate::router::AppState;

const MAX_NAME_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateHorse {
    name: String,
}

impl CreateHorse {
    fn validate(self) -> Result<String, ValidationError> {
        validation::required_text("name", &self.name, MAX_NAME_CHARS)
    }
}

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(body): ApiJson<CreateHorse>,
) -> Result<(StatusCode, Json<Horse>), ProblemResponse> {
    let name = body.validate()?;
    let horse = state
        .storage()
        .horses()
        .create(&caller.user_id, &name, state.now())
        .await
        .map_err(|err| {
            error!(stage = "horses", error = %err, "failed to create horse");
            internal_error("failed to create horse")
        })?;

    counter!("budget_writes_total", "entity" => "horse", "op" => "create").increment(1);
    info!(stage = "horses", horse_id = %horse.id, "horse registered");
    Ok((StatusCode::CREATED, Json(horse)))
}

pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<Horse>>, ProblemResponse> {
    let horses = state
        .storage()
        .horses()
        .list_for_owner(&caller.user_id)
        .await
        .map_err(|err| {
            error!(stage = "horses", error = %err, "failed to list horses");
            internal_error("failed to list horses")
        })?;
    Ok(Json(horses))
}

pub async fn fetch(
    State(state): State<AppState>,
    caller: Caller,
    Path(horse_id): Path<String>,
) -> Result<Json<Horse>, ProblemResponse> {
    ensure_owned_horse(&state, &caller, &horse_id).await.map(Json)
}

/// Loads the horse when the caller owns it.
///
/// Missing and foreign horses produce the same 404.
pub async fn ensure_owned_horse(
    state: &AppState,
    caller: &Caller,
    horse_id: &str,
) -> Result<Horse, ProblemResponse> {
    state
        .storage()
        .horses()
        .fetch_owned(horse_id, &caller.user_id)
        .await
        .map_err(|err| {
            error!(stage = "horses", %horse_id, error = %err, "failed to load horse");
            internal_error("failed to load horse")
        })?
        .ok_or_else(|| not_found("horse_not_found", "horse not found or access denied"))
}
