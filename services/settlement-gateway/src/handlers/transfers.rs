use super::{idempotent, parse, reply, Outcome};
use crate::errors::ApiError;
use crate::extractors::{idempotency_key, TenantContext};
use crate::models::{CreateTransferRequest, TransferResponse};
use crate::state::AppState;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use ledger_core::{NewTransfer, Transfer, TransferId, TransferType};
use rust_decimal::Decimal;
use settlement::ExecuteRequest;
use tracing::info;

/// Transfer owned by the caller's tenant; anyone else's reads as missing
pub fn owned_transfer(state: &AppState, tenant: &TenantContext, id: TransferId) -> Result<Transfer, ApiError> {
    let transfer = state.ledger.transfer_record(id)?;
    if transfer.tenant_id != tenant.tenant_id {
        return Err(ApiError::NotFound(format!("Transfer not found: {}", id)));
    }
    Ok(transfer)
}

pub async fn create_transfer(
    state: web::Data<AppState>,
    tenant: TenantContext,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let key = idempotency_key(&req);
    idempotent(&state, &req, &tenant, &body, || create(&state, &tenant, &body, key)).await
}

async fn create(state: &AppState, tenant: &TenantContext, body: &[u8], key: Option<String>) -> Outcome {
    let input: CreateTransferRequest = parse(body)?;
    if input.amount <= Decimal::ZERO {
        return Err(ApiError::Validation("Amount must be positive".to_string()));
    }

    if input.is_internal() {
        let transfer = state
            .ledger
            .execute_transfer(
                tenant.tenant_id,
                NewTransfer {
                    transfer_type: TransferType::Internal,
                    from_account_id: input.from_account_id,
                    to_account_id: input.to_account_id,
                    amount: input.amount,
                    fee_amount: Decimal::ZERO,
                    destination_amount: None,
                    destination_currency: None,
                    fx_rate: None,
                    rail: None,
                    idempotency_key: key,
                    description: input.description,
                },
            )
            .await?;
        return reply(
            StatusCode::CREATED,
            &TransferResponse {
                transfer,
                settlement: None,
            },
        );
    }

    let source = state.ledger.account(input.from_account_id)?;
    if source.tenant_id != tenant.tenant_id {
        return Err(ApiError::NotFound(format!("Account not found: {}", input.from_account_id)));
    }

    let destination_currency = input.destination_currency.unwrap_or(source.currency);
    let fx_rate = state.fx.rate(source.currency, destination_currency).ok_or_else(|| {
        ApiError::Validation(format!(
            "No FX rate configured for {} -> {}",
            source.currency, destination_currency
        ))
    })?;

    // Rails quote in the currency they deliver; the fee is captured in the
    // source currency alongside the amount
    let destination_amount = (input.amount * fx_rate).round_dp(2);
    let quote = state
        .router
        .catalog()
        .quotes(destination_currency, input.destination_country.as_deref(), destination_amount)
        .into_iter()
        .next()
        .ok_or_else(|| {
            ApiError::from(settlement::Error::NoRoute {
                amount: destination_amount,
                currency: destination_currency,
                country: input.destination_country.clone().unwrap_or_else(|| "any".to_string()),
            })
        })?;
    let fee = quote.fee_in_source(fx_rate).ok_or_else(|| {
        ApiError::Validation(format!(
            "Invalid FX rate {} for {} -> {}",
            fx_rate, source.currency, destination_currency
        ))
    })?;

    let transfer = state
        .ledger
        .execute_transfer(
            tenant.tenant_id,
            NewTransfer {
                transfer_type: TransferType::CrossBorder,
                from_account_id: input.from_account_id,
                to_account_id: None,
                amount: input.amount,
                fee_amount: fee,
                destination_amount: Some(destination_amount),
                destination_currency: Some(destination_currency),
                fx_rate: Some(fx_rate),
                rail: Some(quote.rail.to_string()),
                idempotency_key: key,
                description: input.description,
            },
        )
        .await?;

    let result = state
        .router
        .execute(&ExecuteRequest {
            transfer_id: transfer.id,
            protocol: input.protocol,
            destination_country: input.destination_country,
            recipient: input.recipient,
            priority: input.priority,
        })
        .await?;

    info!(
        transfer_id = %transfer.id,
        rail = ?result.rail,
        success = result.success,
        queued = result.queued,
        "Cross-border transfer submitted"
    );

    let transfer = state.ledger.transfer_record(transfer.id)?;
    reply(
        StatusCode::CREATED,
        &TransferResponse {
            transfer,
            settlement: Some(result),
        },
    )
}

pub async fn get_transfer(
    state: web::Data<AppState>,
    tenant: TenantContext,
    id: web::Path<TransferId>,
) -> Result<HttpResponse, ApiError> {
    let transfer = owned_transfer(&state, &tenant, id.into_inner())?;
    Ok(HttpResponse::Ok().json(transfer))
}
