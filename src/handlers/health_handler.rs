// src/handlers/health_handler.rs
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing;

use crate::{errors::SparrowError, state::AppState};

pub const SERVICE_NAME: &str = "Sparrow Notifier - Trip Notification Backend";

pub async fn root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let firebase = if state.lifecycle.is_ready() {
        "connected"
    } else {
        "waiting for credentials"
    };

    Json(json!({
        "status": "running",
        "service": SERVICE_NAME,
        "firebase": firebase,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "firebase": state.lifecycle.is_ready(),
        "listeners": state.lifecycle.listeners_running().await,
        "uptime": state.uptime().as_secs_f64(),
    }))
}

/// Manual re-initialization, for when credentials arrive after boot.
pub async fn init_firebase(State(state): State<Arc<AppState>>) -> Result<Json<Value>, SparrowError> {
    let started = state.lifecycle.initialize().await?;
    if started {
        tracing::info!("Initialized through /init-firebase");
    }
    Ok(Json(json!({ "success": true, "firebase": state.lifecycle.is_ready() })))
}
