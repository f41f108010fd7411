//! Dealer profile routes

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::{
    dealers::Dealer,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct DealersResponse {
    pub dealers: Vec<Dealer>,
}

#[derive(Debug, Serialize)]
pub struct DealersHealth {
    pub status: &'static str,
    pub service: &'static str,
    pub store_available: bool,
    pub backend: &'static str,
}

pub async fn list_dealers(State(state): State<AppState>) -> ApiResult<Json<DealersResponse>> {
    let dealers = state.dealers.list_dealers().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to fetch dealers");
        e
    })?;
    tracing::debug!(count = dealers.len(), "Fetched dealers");

    Ok(Json(DealersResponse { dealers }))
}

pub async fn get_dealer(
    State(state): State<AppState>,
    Path(dealer_id): Path<String>,
) -> ApiResult<Json<Dealer>> {
    state
        .dealers
        .get_dealer(&dealer_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Dealer with id '{}' not found", dealer_id)))
}

/// Always 200; `store_available` reports whether the dealer store answers
pub async fn health(State(state): State<AppState>) -> Json<DealersHealth> {
    let store_available = match state.dealers.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Dealer store unavailable");
            false
        }
    };

    Json(DealersHealth {
        status: if store_available { "healthy" } else { "degraded" },
        service: "dealers-api",
        store_available,
        backend: state.dealers.backend_name(),
    })
}
