use crate::domain::money::GatewayFees;
use crate::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct GatewayView {
    pub name: String,
    pub active: bool,
    pub fees: GatewayFees,
}

pub async fn list_gateways(State(state): State<AppState>) -> impl IntoResponse {
    let active = state.registry.active_name();
    let resp: Vec<GatewayView> = state
        .registry
        .names()
        .into_iter()
        .filter_map(|name| {
            let gateway = state.registry.get(&name).ok()?;
            Some(GatewayView {
                active: active == Some(name.as_str()),
                fees: gateway.fees(),
                name,
            })
        })
        .collect();
    (axum::http::StatusCode::OK, Json(resp)).into_response()
}
