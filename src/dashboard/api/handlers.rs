use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use log::{info, debug};
use crate::credentials::CredentialUsage;
use crate::dashboard::api::errors::ApiError;
use crate::dashboard::DashboardState;
use crate::filter::FilterConfig;
use crate::watcher::ConnectionState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub watcher: ConnectionState,
    pub ai_enabled: bool,
    pub timestamp: String,
}

/// Partial update for `PUT /api/filter`; absent fields stay unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct FilterUpdate {
    pub filter: Option<FilterConfig>,
    pub ai_enabled: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub total: usize,
    pub available: usize,
    pub credentials: Vec<CredentialUsage>,
}

// Handler for the liveness/health probe
pub async fn health(
    state: web::Data<DashboardState>,
) -> Result<impl Responder, ApiError> {
    debug!("Handling GET /api/health");

    let watcher = *state.watcher_state.borrow();
    let status = if watcher == ConnectionState::IdleWatching { "ok" } else { "degraded" };

    Ok(HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        watcher,
        ai_enabled: state.filter.ai_enabled().await,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn get_filter(
    state: web::Data<DashboardState>,
) -> Result<impl Responder, ApiError> {
    debug!("Handling GET /api/filter");
    Ok(HttpResponse::Ok().json(state.filter.view().await))
}

pub async fn update_filter(
    body: web::Json<FilterUpdate>,
    state: web::Data<DashboardState>,
) -> Result<impl Responder, ApiError> {
    debug!("Handling PUT /api/filter");
    let update = body.into_inner();

    if let Some(filter) = update.filter {
        filter.validate().map_err(ApiError::BadRequest)?;
        info!(
            "Filter updated: enabled={} min_confidence={}",
            filter.enabled, filter.min_confidence
        );
        state.filter.update_filter(filter).await;
    }
    if let Some(enabled) = update.ai_enabled {
        info!("AI analysis switched {}", if enabled { "on" } else { "off" });
        state.filter.set_ai_enabled(enabled).await;
    }

    Ok(HttpResponse::Ok().json(state.filter.view().await))
}

pub async fn get_credentials(
    state: web::Data<DashboardState>,
) -> Result<impl Responder, ApiError> {
    debug!("Handling GET /api/credentials");
    let credentials = state.pool.usage().await;
    let available = credentials.iter().filter(|c| !c.exhausted).count();
    Ok(HttpResponse::Ok().json(CredentialsResponse {
        total: credentials.len(),
        available,
        credentials,
    }))
}

pub async fn reset_credentials(
    state: web::Data<DashboardState>,
) -> Result<impl Responder, ApiError> {
    info!("Handling POST /api/credentials/reset");
    state.pool.reset_all().await;
    let credentials = state.pool.usage().await;
    Ok(HttpResponse::Ok().json(CredentialsResponse {
        total: credentials.len(),
        available: credentials.len(),
        credentials,
    }))
}

pub async fn send_test_notification(
    state: web::Data<DashboardState>,
) -> Result<impl Responder, ApiError> {
    info!("Handling POST /api/notifications/test");
    state
        .notifier
        .send_admin_text("✅ Test notification from alertmail")
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "sent": true })))
}
