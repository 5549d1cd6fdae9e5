// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Administrative routes (balance corrections).

use crate::error::{AppError, Result};
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::put,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// Admin routes. The admin middleware is applied in routes/mod.rs.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/admin/accounts/{user_id}/credits", put(set_credits))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetCreditsRequest {
    #[validate(range(min = 0))]
    pub credits: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCreditsResponse {
    pub user_id: String,
    pub credits: i64,
}

/// Overwrite a user's balance.
async fn set_credits(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<SetCreditsRequest>,
) -> Result<Json<SetCreditsResponse>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let user_id = user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(AppError::BadRequest("user id is empty".to_string()));
    }

    let previous = state.store.read(&user_id).await?;
    state.store.set(&user_id, body.credits).await?;

    tracing::info!(
        user_id = %user_id,
        previous,
        credits = body.credits,
        "Balance set by administrator"
    );

    Ok(Json(SetCreditsResponse {
        user_id,
        credits: body.credits,
    }))
}
