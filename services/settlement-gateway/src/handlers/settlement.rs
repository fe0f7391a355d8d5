use super::transfers::owned_transfer;
use super::{idempotent, parse, reply, Outcome};
use crate::errors::ApiError;
use crate::extractors::TenantContext;
use crate::models::{BatchRequest, BatchResponse, RouteQuoteRequest, WindowRequest};
use crate::state::AppState;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use ledger_core::TransferId;
use settlement::{ExecuteRequest, RouteRequest, SettlementResult, SettlementWindowConfig};

pub async fn route(
    state: web::Data<AppState>,
    tenant: TenantContext,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    idempotent(&state, &req, &tenant, &body, || quote(&state, &tenant, &body)).await
}

async fn quote(state: &AppState, tenant: &TenantContext, body: &[u8]) -> Outcome {
    let input: RouteQuoteRequest = parse(body)?;
    let transfer_id = match input.transfer_id {
        Some(id) => owned_transfer(state, tenant, id)?.id,
        None => TransferId::new(),
    };

    let destination_amount = match input.destination_currency {
        Some(to) if to != input.currency => {
            let rate = state.fx.rate(input.currency, to).ok_or_else(|| {
                ApiError::Validation(format!("No FX rate configured for {} -> {}", input.currency, to))
            })?;
            Some((input.amount * rate).round_dp(2))
        }
        _ => None,
    };

    let decision = state.router.route(&RouteRequest {
        transfer_id,
        tenant_id: tenant.tenant_id,
        protocol: input.protocol,
        amount: input.amount,
        currency: input.currency,
        destination_amount,
        destination_currency: input.destination_currency,
        destination_country: input.destination_country,
    })?;
    reply(StatusCode::OK, &decision)
}

/// Settled: 200. Queued for a window: 202. Rail failure: 502.
fn settlement_outcome(result: SettlementResult) -> Outcome {
    if result.success {
        return reply(StatusCode::OK, &result);
    }
    if result.queued {
        return reply(StatusCode::ACCEPTED, &result);
    }

    let message = result
        .error
        .clone()
        .unwrap_or_else(|| "Settlement failed".to_string());
    match result.rail {
        Some(rail) => Err(ApiError::RailFailure {
            rail: rail.to_string(),
            message,
            retryable: result.retryable,
        }),
        None => Err(ApiError::Validation(message)),
    }
}

pub async fn execute(
    state: web::Data<AppState>,
    tenant: TenantContext,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    idempotent(&state, &req, &tenant, &body, || settle_one(&state, &tenant, &body)).await
}

async fn settle_one(state: &AppState, tenant: &TenantContext, body: &[u8]) -> Outcome {
    let input: ExecuteRequest = parse(body)?;
    owned_transfer(state, tenant, input.transfer_id)?;
    let result = state.router.execute(&input).await?;
    settlement_outcome(result)
}

pub async fn batch(
    state: web::Data<AppState>,
    tenant: TenantContext,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    idempotent(&state, &req, &tenant, &body, || settle_many(&state, &tenant, &body)).await
}

async fn settle_many(state: &AppState, tenant: &TenantContext, body: &[u8]) -> Outcome {
    let input: BatchRequest = parse(body)?;
    if input.items.is_empty() {
        return Err(ApiError::Validation("items must not be empty".to_string()));
    }

    // Another tenant's transfer is rejected in place and never reaches the router
    let (owned, foreign): (Vec<_>, Vec<_>) = input
        .items
        .into_iter()
        .enumerate()
        .partition(|(_, item)| owned_transfer(state, tenant, item.transfer_id).is_ok());

    let requests: Vec<ExecuteRequest> = owned.iter().map(|(_, item)| item.clone()).collect();
    let settled = state.router.settle_batch(&requests).await;

    let mut results: Vec<(usize, SettlementResult)> = owned
        .into_iter()
        .map(|(index, _)| index)
        .zip(settled)
        .chain(foreign.into_iter().map(|(index, item)| {
            let error = format!("Transfer not found: {}", item.transfer_id);
            (index, SettlementResult::rejected(item.transfer_id, None, error))
        }))
        .collect();
    results.sort_by_key(|(index, _)| *index);

    reply(
        StatusCode::OK,
        &BatchResponse::new(results.into_iter().map(|(_, r)| r).collect()),
    )
}

pub async fn rails(state: web::Data<AppState>, _tenant: TenantContext) -> HttpResponse {
    HttpResponse::Ok().json(state.router.catalog().profiles())
}

pub async fn attempts(
    state: web::Data<AppState>,
    tenant: TenantContext,
    id: web::Path<TransferId>,
) -> Result<HttpResponse, ApiError> {
    let transfer = owned_transfer(&state, &tenant, id.into_inner())?;
    Ok(HttpResponse::Ok().json(state.router.attempts(transfer.id)?))
}

pub async fn queue(state: web::Data<AppState>, tenant: TenantContext) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.scheduler.queue(tenant.tenant_id)?))
}

pub async fn window_logs(state: web::Data<AppState>, tenant: TenantContext) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.scheduler.logs(tenant.tenant_id)?))
}

pub async fn set_window(
    state: web::Data<AppState>,
    tenant: TenantContext,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    idempotent(&state, &req, &tenant, &body, || configure_window(&state, &tenant, &body)).await
}

async fn configure_window(state: &AppState, tenant: &TenantContext, body: &[u8]) -> Outcome {
    let input: WindowRequest = parse(body)?;
    let config = SettlementWindowConfig {
        tenant_id: tenant.tenant_id,
        rail: input.rail,
        open_time: input.open_time,
        close_time: input.close_time,
        utc_offset_minutes: input.utc_offset_minutes,
        holiday_calendar: input.holiday_calendar,
        weekends_open: input.weekends_open,
    };

    state
        .scheduler
        .windows()
        .set_window(config.clone())
        .map_err(|e| match e {
            settlement::Error::Config(msg) => ApiError::Validation(msg),
            other => ApiError::from(other),
        })?;
    reply(StatusCode::OK, &config)
}
