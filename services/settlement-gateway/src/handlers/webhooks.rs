use super::{idempotent, parse, reply, Outcome};
use crate::errors::ApiError;
use crate::extractors::TenantContext;
use crate::models::ReplayRequest;
use crate::state::AppState;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use uuid::Uuid;
use webhooks::{EndpointUpdate, NewEndpoint};

fn tenant_uuid(tenant: &TenantContext) -> Uuid {
    *tenant.tenant_id.as_uuid()
}

pub async fn create_endpoint(
    state: web::Data<AppState>,
    tenant: TenantContext,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    idempotent(&state, &req, &tenant, &body, || register(&state, &tenant, &body)).await
}

async fn register(state: &AppState, tenant: &TenantContext, body: &[u8]) -> Outcome {
    let input: NewEndpoint = parse(body)?;
    let endpoint = state.webhooks.create_endpoint(tenant_uuid(tenant), input)?;
    reply(StatusCode::CREATED, &endpoint)
}

pub async fn list_endpoints(state: web::Data<AppState>, tenant: TenantContext) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.webhooks.list_endpoints(tenant_uuid(&tenant))?))
}

pub async fn get_endpoint(
    state: web::Data<AppState>,
    tenant: TenantContext,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.webhooks.get_endpoint(tenant_uuid(&tenant), id.into_inner())?))
}

pub async fn update_endpoint(
    state: web::Data<AppState>,
    tenant: TenantContext,
    req: HttpRequest,
    id: web::Path<Uuid>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    idempotent(&state, &req, &tenant, &body, || modify(&state, &tenant, id, &body)).await
}

async fn modify(state: &AppState, tenant: &TenantContext, id: Uuid, body: &[u8]) -> Outcome {
    let update: EndpointUpdate = parse(body)?;
    let endpoint = state.webhooks.update_endpoint(tenant_uuid(tenant), id, update)?;
    reply(StatusCode::OK, &endpoint)
}

pub async fn delete_endpoint(
    state: web::Data<AppState>,
    tenant: TenantContext,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    idempotent(&state, &req, &tenant, &[], || remove(&state, &tenant, id)).await
}

async fn remove(state: &AppState, tenant: &TenantContext, id: Uuid) -> Outcome {
    state.webhooks.delete_endpoint(tenant_uuid(tenant), id)?;
    reply(StatusCode::OK, &json!({ "id": id, "deleted": true }))
}

pub async fn test_endpoint(
    state: web::Data<AppState>,
    tenant: TenantContext,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    idempotent(&state, &req, &tenant, &[], || ping(&state, &tenant, id)).await
}

async fn ping(state: &AppState, tenant: &TenantContext, id: Uuid) -> Outcome {
    let delivery = state.webhooks.test_endpoint(tenant_uuid(tenant), id).await?;
    reply(StatusCode::OK, &delivery)
}

pub async fn stats(state: web::Data<AppState>, tenant: TenantContext) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.webhooks.stats(tenant_uuid(&tenant))?))
}

pub async fn dlq(state: web::Data<AppState>, tenant: TenantContext) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.webhooks.dlq(tenant_uuid(&tenant))?))
}

pub async fn replay(
    state: web::Data<AppState>,
    tenant: TenantContext,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    idempotent(&state, &req, &tenant, &body, || requeue(&state, &tenant, &body)).await
}

async fn requeue(state: &AppState, tenant: &TenantContext, body: &[u8]) -> Outcome {
    let input: ReplayRequest = parse(body)?;
    let deliveries = state.webhooks.replay(tenant_uuid(tenant), &input.delivery_ids)?;
    reply(
        StatusCode::ACCEPTED,
        &json!({ "replayed": deliveries.len(), "deliveries": deliveries }),
    )
}

pub async fn retry_delivery(
    state: web::Data<AppState>,
    tenant: TenantContext,
    req: HttpRequest,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    idempotent(&state, &req, &tenant, &[], || reschedule(&state, &tenant, id)).await
}

async fn reschedule(state: &AppState, tenant: &TenantContext, id: Uuid) -> Outcome {
    let delivery = state.webhooks.retry(tenant_uuid(tenant), id)?;
    reply(StatusCode::ACCEPTED, &delivery)
}
