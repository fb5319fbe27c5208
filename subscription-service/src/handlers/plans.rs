use crate::dtos::PlansResponse;
use crate::startup::AppState;
use axum::{extract::State, Json};

pub async fn list_plans(State(state): State<AppState>) -> Json<PlansResponse> {
    let catalog = state.engine.catalog();
    Json(PlansResponse {
        version: catalog.version().to_string(),
        currency: catalog.currency().to_string(),
        plans: catalog.list_plans().to_vec(),
    })
}
