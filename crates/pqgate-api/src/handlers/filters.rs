//! Filter configuration handlers.
//!
//! `PUT /api/filters/:name/config` takes the JSON configuration document
//! as the request body and replaces the stage's configuration. A rejected
//! document leaves the active one in place.

use axum::extract::{Path, State};
use axum::Json;
use pqgate_filters::{FilterError, FilterStages};
use serde::Serialize;
use serde_json::Value;

use super::ServerState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct FilterConfigResponse {
    pub filter: &'static str,
    pub config: Value,
}

#[derive(Debug, Serialize)]
pub struct FilterList {
    pub filters: Vec<&'static str>,
}

pub async fn list_filters_handler() -> Json<FilterList> {
    Json(FilterList {
        filters: FilterStages::names().to_vec(),
    })
}

pub async fn get_filter_config_handler(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> ApiResult<Json<FilterConfigResponse>> {
    let stage = state
        .stages
        .get(&name)
        .ok_or_else(|| ApiError::from(FilterError::UnknownFilter(name.clone())))?;

    Ok(Json(FilterConfigResponse {
        filter: stage.stage_name(),
        config: stage.active_config(),
    }))
}

pub async fn put_filter_config_handler(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    body: String,
) -> ApiResult<Json<FilterConfigResponse>> {
    if body.trim().is_empty() {
        return Err(ApiError::bad_request("Configuration body is empty"));
    }
    let stage = state
        .stages
        .get(&name)
        .ok_or_else(|| ApiError::from(FilterError::UnknownFilter(name.clone())))?;
    stage.reconfigure(&body)?;

    Ok(Json(FilterConfigResponse {
        filter: stage.stage_name(),
        config: stage.active_config(),
    }))
}
