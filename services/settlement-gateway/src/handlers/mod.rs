pub mod health;
pub mod settlement;
pub mod transfers;
pub mod webhooks;

use crate::errors::ApiError;
use crate::extractors::{IdempotencyGuard, Idempotent, TenantContext};
use crate::state::AppState;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;

/// Result of a mutating operation before it becomes a response
pub type Outcome = Result<(StatusCode, Value), ApiError>;

/// Run a mutating operation through the idempotency flow
///
/// A replayed key returns the recorded response without running
/// `operation`; otherwise its outcome (errors included) is recorded.
pub async fn idempotent<F, Fut>(
    state: &AppState,
    req: &HttpRequest,
    tenant: &TenantContext,
    body: &[u8],
    operation: F,
) -> Result<HttpResponse, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Outcome>,
{
    match IdempotencyGuard::begin(state, req, tenant, body).await? {
        Idempotent::Replay(response) => Ok(response),
        Idempotent::Proceed(guard) => Ok(guard.finish(operation().await).await),
    }
}

pub fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    Ok(serde_json::from_slice(body)?)
}

pub fn reply<T: Serialize>(status: StatusCode, value: &T) -> Outcome {
    serde_json::to_value(value)
        .map(|v| (status, v))
        .map_err(|e| ApiError::Internal(format!("Failed to encode response: {}", e)))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health_check))
        .route("/metrics", web::get().to(health::metrics))
        .service(
            web::scope("/transfers")
                .route("", web::post().to(transfers::create_transfer))
                .route("/{id}", web::get().to(transfers::get_transfer)),
        )
        .service(
            web::scope("/settlement")
                .route("/route", web::post().to(settlement::route))
                .route("/execute", web::post().to(settlement::execute))
                .route("/batch", web::post().to(settlement::batch))
                .route("/rails", web::get().to(settlement::rails))
                .route("/queue", web::get().to(settlement::queue))
                .route("/windows", web::put().to(settlement::set_window))
                .route("/windows/logs", web::get().to(settlement::window_logs))
                .route("/transfers/{id}/attempts", web::get().to(settlement::attempts)),
        )
        .service(
            web::scope("/webhooks")
                .route("", web::post().to(webhooks::create_endpoint))
                .route("", web::get().to(webhooks::list_endpoints))
                .route("/stats", web::get().to(webhooks::stats))
                .route("/replay", web::post().to(webhooks::replay))
                .route("/deliveries/dlq", web::get().to(webhooks::dlq))
                .route("/deliveries/{id}/retry", web::post().to(webhooks::retry_delivery))
                .route("/{id}", web::get().to(webhooks::get_endpoint))
                .route("/{id}", web::patch().to(webhooks::update_endpoint))
                .route("/{id}", web::delete().to(webhooks::delete_endpoint))
                .route("/{id}/test", web::post().to(webhooks::test_endpoint)),
        );
}
