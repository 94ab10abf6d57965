// src/api/webhooks_paystack.rs

use actix_web::{HttpRequest, HttpResponse, post, web};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha512;

use crate::api::paystack_client;
use crate::{AppState, db};

type HmacSha512 = Hmac<Sha512>;

/// Byte comparison that does not short-circuit on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Paystack signs the raw request body with HMAC-SHA512 under the account
/// secret and sends the hex digest in `x-paystack-signature`.
pub fn verify_signature(secret_key: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(mut mac) = HmacSha512::new_from_slice(secret_key.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    let calculated = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(calculated.as_bytes(), signature.trim().as_bytes())
}

#[utoipa::path(
    post,
    path = "/verify-webhook-payload/webhookpaystack",
    tag = "webhooks",
    request_body = String,
    responses(
        (status = 200, description = "Event processed or acknowledged"),
        (status = 400, description = "Missing/invalid signature or malformed payload"),
        (status = 404, description = "No transaction matches the charge id")
    )
)]
#[post("/verify-webhook-payload/webhookpaystack")]
pub async fn paystack_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(signature) = req
        .headers()
        .get("x-paystack-signature")
        .and_then(|v| v.to_str().ok())
    else {
        return HttpResponse::BadRequest().json(json!({ "error": "Missing Paystack signature" }));
    };

    if !verify_signature(&state.paystack_secret_key, &body, signature) {
        log::warn!("paystack webhook signature mismatch");
        return HttpResponse::BadRequest().json(json!({ "error": "Invalid webhook signature" }));
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("paystack webhook parse error: {e}");
            return HttpResponse::BadRequest().json(json!({ "error": "Malformed webhook payload" }));
        }
    };

    let event = payload.get("event").and_then(Value::as_str).unwrap_or("");
    let Some(data) = payload.get("data").filter(|d| d.is_object()) else {
        return HttpResponse::BadRequest().json(json!({
            "error": "Invalid payload received from Paystack"
        }));
    };
    if event.is_empty() {
        return HttpResponse::BadRequest().json(json!({
            "error": "Invalid payload received from Paystack"
        }));
    }

    log::info!("paystack webhook event={event}");

    // Идемпотентность: повторная доставка того же события не применяется.
    if let Some(charge_id) = data.get("id").and_then(Value::as_i64) {
        let event_key = format!("{event}:{charge_id}");
        match db::record_webhook_event(&state.pool, "paystack", &event_key).await {
            Ok(true) => {}
            Ok(false) => {
                return HttpResponse::Ok().json(json!({ "status": "success", "duplicate": true }));
            }
            Err(e) => log::error!("webhook_events insert error: {e}"),
        }
    }

    let payment_status = match event {
        "charge.success" => "success",
        "charge.failed" => "failed",
        other => {
            log::info!("ignoring paystack event {other}");
            return HttpResponse::Ok().json(json!({ "status": "success", "ignored": true }));
        }
    };

    let Some(reference) = data.get("reference").and_then(Value::as_str) else {
        return HttpResponse::BadRequest().json(json!({
            "error": "Invalid payload received from Paystack"
        }));
    };

    // Повторная проверка через API — не доверяем одному только вебхуку.
    let (paystack_status, paystack_response) =
        match paystack_client::verify_transaction(&state.paystack_secret_key, reference).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("paystack re-verification error for {reference}: {e}");
                return HttpResponse::InternalServerError().json(json!({
                    "error": "Error processing Paystack webhook"
                }));
            }
        };

    let Some(charge_id) = data.get("id").and_then(Value::as_i64) else {
        return HttpResponse::BadRequest().json(json!({
            "error": "Invalid payload received from Paystack"
        }));
    };

    let transaction = match db::transaction_by_external_id(&state.pool, charge_id).await {
        Ok(Some(t)) => t,
        Ok(None) => {
            log::error!("transaction not found for transaction_id={charge_id}");
            return HttpResponse::NotFound().json(json!({ "error": "Transaction not found" }));
        }
        Err(e) => {
            eprintln!("paystack webhook select tx error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if let Err(e) = db::update_payment_outcome(
        &state.pool,
        transaction.id,
        payment_status,
        &paystack_status,
        paystack_response,
    )
    .await
    {
        eprintln!("paystack webhook update tx error: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    log::info!("updated transaction {} to {payment_status}", transaction.id);
    HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Webhook handled successfully."
    }))
}
