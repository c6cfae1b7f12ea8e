use actix_web::{HttpRequest, HttpResponse};
use agentpay::wire::{self, PaymentRequiredBody};
use agentpay::{Decision, LedgerOracle, PaymentChallenge, PaymentProof, RejectReason};

use crate::config::CatalogEntry;
use crate::error::ServerError;
use crate::metrics::{REQUESTS, VERIFICATIONS, VERIFY_SECONDS};
use crate::state::AppState;

/// A verified payment for one request.
#[derive(Debug, Clone)]
pub struct GrantedPayment {
    pub payer: String,
    pub tx_ref: String,
    pub proof: PaymentProof,
    pub challenge: PaymentChallenge,
}

/// Build a 402 carrying `challenge` in both headers and body.
pub fn payment_required_response(
    challenge: &PaymentChallenge,
    decimals: u32,
    reason: Option<RejectReason>,
) -> HttpResponse {
    let mut resp = HttpResponse::PaymentRequired();
    for (name, value) in wire::challenge_headers(challenge, decimals, reason) {
        resp.insert_header((name, value));
    }
    resp.json(PaymentRequiredBody::new(challenge.clone(), reason))
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Gate one request to `resource` behind payment.
///
/// Returns the verified payment, or the response to send instead: a 402
/// with a challenge (fresh, or re-issued with the rejection reason), or a
/// 400 for malformed payment headers.
pub async fn require_payment<O: LedgerOracle, W>(
    req: &HttpRequest,
    state: &AppState<O, W>,
    resource: &CatalogEntry,
) -> Result<GrantedPayment, HttpResponse> {
    let decimals = state.network.asset_decimals;
    let issue = || {
        state
            .issuer
            .issue(&resource.id, resource.price, &state.recipient, &state.network.network)
            .map(|mut c| {
                c.category = Some(resource.category.clone());
                c
            })
            .map_err(|e| actix_web::ResponseError::error_response(&ServerError::from(e)))
    };

    if !wire::has_payment_headers(|name| header(req, name)) {
        REQUESTS
            .with_label_values(&[resource.id.as_str(), "402"])
            .inc();
        let challenge = issue()?;
        tracing::debug!(resource = %resource.id, memo = %challenge.memo, "issued payment challenge");
        return Err(payment_required_response(&challenge, decimals, None));
    }

    // The echoed memo rebuilds the challenge without server state. A proof
    // without one is refused like a memo for other terms.
    let rebuilt = wire::memo_from_headers(|name| header(req, name)).and_then(|memo| {
        state.issuer.reconstruct(
            &memo,
            &resource.id,
            resource.price,
            &state.recipient,
            &state.network.network,
        )
    });
    let challenge = match rebuilt {
        Some(mut c) => {
            c.category = Some(resource.category.clone());
            c
        }
        None => {
            tracing::warn!(resource = %resource.id, "memo missing or does not match resource terms");
            VERIFICATIONS.with_label_values(&["terms_mismatch"]).inc();
            REQUESTS
                .with_label_values(&[resource.id.as_str(), "402"])
                .inc();
            let fresh = issue()?;
            return Err(payment_required_response(
                &fresh,
                decimals,
                Some(RejectReason::TermsMismatch),
            ));
        }
    };

    let Some(presented) = wire::proof_from_headers(|name| header(req, name), &challenge) else {
        REQUESTS
            .with_label_values(&[resource.id.as_str(), "400"])
            .inc();
        return Err(actix_web::ResponseError::error_response(
            &ServerError::InvalidPaymentHeaders(format!(
                "{} and {} are required and must agree with {}",
                wire::HEADER_TX,
                wire::HEADER_PAYER,
                wire::HEADER_PROOF
            )),
        ));
    };
    let proof = presented.proof;

    tracing::info!(
        payer = %proof.payer,
        tx_ref = %proof.tx_ref,
        resource = %resource.id,
        "payment attempt"
    );

    let timer = VERIFY_SECONDS.start_timer();
    let decision = state.verifier.verify(&proof, &challenge).await;
    timer.observe_duration();

    match decision {
        Decision::Granted { payer, tx_ref } => {
            VERIFICATIONS.with_label_values(&["granted"]).inc();
            REQUESTS
                .with_label_values(&[resource.id.as_str(), "200"])
                .inc();
            Ok(GrantedPayment {
                payer,
                tx_ref,
                proof,
                challenge,
            })
        }
        Decision::Rejected { reason } => {
            VERIFICATIONS.with_label_values(&[reason.code()]).inc();
            REQUESTS
                .with_label_values(&[resource.id.as_str(), "402"])
                .inc();
            tracing::warn!(
                payer = %proof.payer,
                tx_ref = %proof.tx_ref,
                reason = %reason,
                "payment rejected"
            );
            // A pending payment keeps its challenge so the client can
            // present the same proof against the same memo.
            let next = if reason.is_retryable() && challenge.is_fresh_at(agentpay::unix_now()) {
                challenge
            } else {
                issue()?
            };
            Err(payment_required_response(&next, decimals, Some(reason)))
        }
    }
}
