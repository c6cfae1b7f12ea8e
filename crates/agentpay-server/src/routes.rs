use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use agentpay::{LedgerOracle, Wallet};

use crate::error::ServerError;
use crate::metrics::REQUESTS;
use crate::middleware::require_payment;
use crate::settlement::spawn_settlement;
use crate::state::AppState;

/// Register every route for an `AppState<O, W>` held in `web::Data`.
///
/// Handlers are generic, so they are wired here instead of through the
/// attribute macros.
pub fn configure<O, W>(cfg: &mut web::ServiceConfig)
where
    O: LedgerOracle + 'static,
    W: Wallet + 'static,
{
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_endpoint::<O, W>))
        .route("/resources", web::get().to(list_resources::<O, W>))
        .service(
            web::resource("/resources/{resource_id}")
                .route(web::get().to(gated_resource::<O, W>))
                .route(web::post().to(gated_resource::<O, W>)),
        );
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "agentpay-server",
    }))
}

pub async fn metrics_endpoint<O, W>(
    req: HttpRequest,
    state: web::Data<AppState<O, W>>,
) -> HttpResponse
where
    O: LedgerOracle + 'static,
    W: Wallet + 'static,
{
    match &state.metrics_token {
        Some(expected) => {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|token| agentpay::crypto::constant_time_eq(token.as_bytes(), expected))
                .unwrap_or(false);

            if !authorized {
                return ServerError::Unauthorized(
                    "Valid Bearer token required for /metrics".to_string(),
                )
                .error_response();
            }
        }
        None => {
            // No token configured: metrics are protected by default.
            if !state.public_metrics {
                return ServerError::Forbidden(
                    "Set METRICS_TOKEN or AGENTPAY_PUBLIC_METRICS=true to access /metrics"
                        .to_string(),
                )
                .error_response();
            }
        }
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(crate::metrics::metrics_output())
}

pub async fn list_resources<O, W>(state: web::Data<AppState<O, W>>) -> HttpResponse
where
    O: LedgerOracle + 'static,
    W: Wallet + 'static,
{
    let decimals = state.network.asset_decimals;
    let resources: Vec<serde_json::Value> = state
        .catalog
        .entries()
        .map(|entry| {
            serde_json::json!({
                "id": entry.id,
                "category": entry.category,
                "price": entry.price.to_decimal_string(decimals),
                "asset": state.network.asset,
                "network": state.network.network,
                "description": entry.description,
            })
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({ "resources": resources }))
}

pub async fn gated_resource<O, W>(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState<O, W>>,
) -> Result<HttpResponse, ServerError>
where
    O: LedgerOracle + 'static,
    W: Wallet + 'static,
{
    let resource_id = path.into_inner();
    let Some(resource) = state.catalog.get(&resource_id) else {
        REQUESTS.with_label_values(&["unknown", "404"]).inc();
        return Err(ServerError::ResourceNotFound(resource_id));
    };

    let payment = match require_payment(&req, &state, resource).await {
        Ok(p) => p,
        Err(resp) => return Ok(resp),
    };

    if let Some(wallet) = &state.payout_wallet {
        spawn_settlement(
            wallet.clone(),
            state.splitter.clone(),
            state.verifier.replay_store().clone(),
            resource.clone(),
            state.recipient.clone(),
            payment.clone(),
        );
    }

    let decimals = state.network.asset_decimals;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "resourceId": resource.id,
        "payer": payment.payer,
        "txRef": payment.tx_ref,
        "amount": payment.proof.amount.to_decimal_string(decimals),
        "asset": payment.challenge.asset,
        "network": payment.challenge.network,
        "data": resource.content.clone().unwrap_or_else(|| serde_json::json!({})),
    })))
}
