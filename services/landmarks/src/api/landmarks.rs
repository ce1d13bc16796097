//! Landmarks query handler.
use crate::api::error::{ApiError, api_internal, api_validation_fields};
use crate::api::types::LandmarksQueryResponse;
use crate::app::AppState;
use crate::query::{self, QueryError};
use axum::Json;
use axum::extract::{Query, State};
use std::collections::{BTreeMap, HashMap};

#[utoipa::path(
    get,
    path = "/landmarks",
    tag = "landmarks",
    params(
        ("lat" = f64, Query, description = "Latitude"),
        ("lng" = f64, Query, description = "Longitude")
    ),
    responses(
        (status = 200, description = "Landmarks for the canonicalized key", body = LandmarksQueryResponse),
        (status = 400, description = "Missing or invalid parameters", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn query_landmarks(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Result<Json<LandmarksQueryResponse>, ApiError> {
    // Check both parameters before answering so the envelope names every
    // offending field, the same aggregation the coordinate validation does.
    let mut field_errors = BTreeMap::new();
    let lat = parse_coordinate(&params, "lat", &mut field_errors);
    let lng = parse_coordinate(&params, "lng", &mut field_errors);
    let (Some(lat), Some(lng)) = (lat, lng) else {
        return Err(api_validation_fields(field_errors));
    };

    match query::by_coordinates(&state.context, lat, lng).await {
        Ok(response) => Ok(Json(response)),
        Err(QueryError::InvalidInput(err)) => Err(api_validation_fields(err.field_errors)),
        Err(QueryError::Store(err)) => Err(api_internal("failed to query landmarks", &err)),
    }
}

fn parse_coordinate(
    params: &HashMap<String, String>,
    name: &str,
    field_errors: &mut BTreeMap<String, String>,
) -> Option<f64> {
    let Some(raw) = params.get(name) else {
        field_errors.insert(name.to_string(), "parameter is required".to_string());
        return None;
    };
    match raw.parse::<f64>() {
        Ok(value) => Some(value),
        Err(_) => {
            field_errors.insert(name.to_string(), "must be a decimal number".to_string());
            None
        }
    }
}
