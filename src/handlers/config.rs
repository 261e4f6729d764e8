//! # Configuration Handlers
//!
//! Read and update the running configuration over HTTP. Updates are partial:
//! only the fields present in the request body change, and the merged result
//! is validated before it replaces the active configuration.

use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};

/// GET /config: the active configuration.
pub async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.get_config())
}

/// PUT /config: partial runtime update.
pub async fn update_config(
    state: web::Data<AppState>,
    body: String,
) -> Result<HttpResponse, AppError> {
    let mut config = state.get_config();
    config
        .update_from_json(&body)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state.update_config(config)?;
    Ok(HttpResponse::Ok().json(state.get_config()))
}
