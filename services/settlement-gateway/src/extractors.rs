//! Request context: tenant identity and the idempotency flow

use crate::errors::ApiError;
use crate::state::AppState;
use actix_web::dev::Payload;
use actix_web::http::StatusCode;
use actix_web::{FromRequest, HttpRequest, HttpResponse};
use idempotency::{
    fingerprint, is_mutating, CachedResponse, IdempotencyService, LookupResult, RequestKey,
    IDEMPOTENCY_KEY_HEADERS, REPLAYED_HEADER,
};
use ledger_core::TenantId;
use serde_json::Value;
use std::future::{ready, Ready};
use std::sync::Arc;
use tracing::{debug, warn};

pub const TENANT_HEADER: &str = "X-Tenant-Id";
pub const ACTOR_TYPE_HEADER: &str = "X-Actor-Type";
pub const ACTOR_ID_HEADER: &str = "X-Actor-Id";

/// Authenticated caller, as attached by the upstream auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub actor_type: Option<String>,
    pub actor_id: Option<String>,
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl TenantContext {
    pub fn from_request_headers(req: &HttpRequest) -> Result<Self, ApiError> {
        let raw = header(req, TENANT_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", TENANT_HEADER)))?;
        let tenant_id = raw
            .parse()
            .map_err(|_| ApiError::Unauthorized(format!("Invalid {} header", TENANT_HEADER)))?;

        Ok(Self {
            tenant_id,
            actor_type: header(req, ACTOR_TYPE_HEADER).map(str::to_string),
            actor_id: header(req, ACTOR_ID_HEADER).map(str::to_string),
        })
    }
}

impl FromRequest for TenantContext {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Self::from_request_headers(req))
    }
}

/// Client key from the first idempotency header present
pub fn idempotency_key(req: &HttpRequest) -> Option<String> {
    IDEMPOTENCY_KEY_HEADERS
        .iter()
        .find_map(|name| header(req, name))
        .map(str::to_string)
}

struct Reservation {
    service: Arc<IdempotencyService>,
    tenant_id: String,
    key: String,
    method: String,
    path: String,
    request_hash: String,
}

impl Reservation {
    fn request_key(&self) -> RequestKey<'_> {
        RequestKey {
            tenant_id: &self.tenant_id,
            key: &self.key,
            method: &self.method,
            path: &self.path,
            request_hash: &self.request_hash,
        }
    }
}

/// Outcome of starting a mutating request
pub enum Idempotent {
    /// Run the operation, then hand its result to the guard
    Proceed(IdempotencyGuard),
    /// Recorded response; return it as is
    Replay(HttpResponse),
}

/// Records the operation's response against the reserved key
pub struct IdempotencyGuard {
    reservation: Option<Reservation>,
}

impl IdempotencyGuard {
    /// Look the request up; a miss reserves the key for this request
    pub async fn begin(
        state: &AppState,
        req: &HttpRequest,
        tenant: &TenantContext,
        body: &[u8],
    ) -> Result<Idempotent, ApiError> {
        let key = match idempotency_key(req) {
            Some(key) if is_mutating(req.method().as_str()) => key,
            _ => return Ok(Idempotent::Proceed(Self { reservation: None })),
        };

        let method = req.method().as_str().to_string();
        let path = req.path().to_string();
        let reservation = Reservation {
            service: state.idempotency.clone(),
            tenant_id: tenant.tenant_id.to_string(),
            request_hash: fingerprint(&method, &path, body),
            key,
            method,
            path,
        };

        let lookup = reservation.service.check_or_reserve(&reservation.request_key()).await;
        match lookup {
            LookupResult::Miss => Ok(Idempotent::Proceed(Self {
                reservation: Some(reservation),
            })),
            LookupResult::Hit(cached) => {
                debug!(key = %reservation.key, path = %reservation.path, "Replaying recorded response");
                Ok(Idempotent::Replay(replay(cached)))
            }
            LookupResult::InProgress => Err(ApiError::RequestInProgress),
            LookupResult::Conflict {
                original_method,
                original_path,
            } => Err(ApiError::IdempotencyConflict {
                original_method,
                original_path,
                current_path: reservation.path,
            }),
        }
    }

    /// Turn the operation result into a response, recording it when keyed
    pub async fn finish(self, result: Result<(StatusCode, Value), ApiError>) -> HttpResponse {
        let (status, body) = match result {
            Ok(ok) => ok,
            Err(e) => (actix_web::ResponseError::status_code(&e), e.body()),
        };

        if let Some(reservation) = &self.reservation {
            match serde_json::to_vec(&body) {
                Ok(bytes) => {
                    reservation
                        .service
                        .store(&reservation.request_key(), CachedResponse::json(status.as_u16(), bytes))
                        .await
                }
                Err(e) => {
                    warn!(key = %reservation.key, "Failed to encode response for replay: {}", e);
                    reservation
                        .service
                        .release(&reservation.tenant_id, &reservation.key)
                        .await;
                }
            }
        }

        HttpResponse::build(status).json(body)
    }
}

fn replay(cached: CachedResponse) -> HttpResponse {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let mut response = HttpResponse::build(status);
    for (name, value) in &cached.headers {
        response.insert_header((name.as_str(), value.as_str()));
    }
    response.insert_header((REPLAYED_HEADER, "true"));
    response.body(cached.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_tenant_context_from_headers() {
        let tenant = TenantId::new();
        let req = TestRequest::default()
            .insert_header((TENANT_HEADER, tenant.to_string()))
            .insert_header((ACTOR_TYPE_HEADER, "agent"))
            .to_http_request();

        let ctx = TenantContext::from_request_headers(&req).unwrap();
        assert_eq!(ctx.tenant_id, tenant);
        assert_eq!(ctx.actor_type.as_deref(), Some("agent"));
        assert_eq!(ctx.actor_id, None);
    }

    #[test]
    fn test_missing_or_bad_tenant_is_unauthorized() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(
            TenantContext::from_request_headers(&req),
            Err(ApiError::Unauthorized(_))
        ));

        let req = TestRequest::default()
            .insert_header((TENANT_HEADER, "not-a-uuid"))
            .to_http_request();
        assert!(matches!(
            TenantContext::from_request_headers(&req),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_first_idempotency_header_wins() {
        let req = TestRequest::default()
            .insert_header(("X-Idempotency-Key", "second"))
            .insert_header(("Idempotency-Key", "first"))
            .to_http_request();
        assert_eq!(idempotency_key(&req).as_deref(), Some("first"));

        let req = TestRequest::default()
            .insert_header(("X-Idempotency-Key", "only"))
            .to_http_request();
        assert_eq!(idempotency_key(&req).as_deref(), Some("only"));
    }
}
