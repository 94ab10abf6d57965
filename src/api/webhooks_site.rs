// src/api/webhooks_site.rs
//
// Inbound callbacks from the provisioning backend. Both handlers answer 200
// with a structured body even on processing problems: the sender retries
// forever on 5xx and a permanently broken payload must not hammer us.

use actix_web::{HttpRequest, HttpResponse, post, web};
use serde::Deserialize;
use serde_json::{Value, json};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::frappe_client;
use crate::api::webhooks_paystack::constant_time_eq;
use crate::models::Transaction;
use crate::{AppState, db};

fn sender_authorized(req: &HttpRequest, token: &Option<String>) -> bool {
    let Some(expected) = token else {
        // Legacy mode: the provisioner predates the shared secret.
        log::warn!("site webhook accepted without sender authentication");
        return true;
    };

    req.headers()
        .get("x-webhook-token")
        .and_then(|v| v.to_str().ok())
        .map(|got| constant_time_eq(got.as_bytes(), expected.as_bytes()))
        .unwrap_or(false)
}

/// Pulls a tenant hostname out of a free-text failure message.
pub fn extract_site_name_from_message(message: &str, domain: &str) -> Option<String> {
    message
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '(' | ')' | '[' | ']'))
        .map(|tok| tok.trim_matches(|c: char| matches!(c, '.' | ':' | '\'' | '"' | '!')))
        .find(|tok| tok.len() > domain.len() && tok.ends_with(domain))
        .map(str::to_string)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SiteCreationPayload {
    pub status: String,
    #[serde(default)]
    pub site_name: Option<String>,
    /// Echo of the job id returned by the creation call. Preferred
    /// correlation key; site_name + recency is the legacy fallback.
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[utoipa::path(
    post,
    path = "/webhook/site-creation",
    tag = "webhooks",
    request_body = SiteCreationPayload,
    responses(
        (status = 200, description = "Callback processed (body carries the outcome)"),
        (status = 401, description = "Bad webhook token")
    )
)]
#[post("/webhook/site-creation")]
pub async fn site_creation_webhook(
    req: HttpRequest,
    payload: web::Json<SiteCreationPayload>,
    state: web::Data<AppState>,
) -> HttpResponse {
    if !sender_authorized(&req, &state.site_webhook_token) {
        return HttpResponse::Unauthorized().json(json!({ "error": "invalid webhook token" }));
    }

    let payload = payload.into_inner();

    match payload.status.as_str() {
        "success" => handle_creation_success(&state, &payload).await,
        "failed" => handle_creation_failure(&state, &payload).await,
        other => {
            log::info!("ignoring site-creation webhook status {other}");
            HttpResponse::Ok().json(json!({ "status": "success", "ignored": true }))
        }
    }
}

async fn handle_creation_success(
    state: &web::Data<AppState>,
    payload: &SiteCreationPayload,
) -> HttpResponse {
    let Some(site_name) = payload.site_name.as_deref() else {
        log::error!("site-creation webhook without site_name");
        return HttpResponse::Ok().json(json!({
            "status": "error",
            "message": "site_name missing"
        }));
    };

    if let Some(job_id) = payload.job_id.as_deref() {
        match db::record_webhook_event(&state.pool, "site-creation", job_id).await {
            Ok(true) => {}
            Ok(false) => {
                return HttpResponse::Ok().json(json!({ "status": "success", "duplicate": true }));
            }
            Err(e) => log::error!("webhook_events insert error: {e}"),
        }
    }

    let Some(transaction) = find_transaction(state, payload.job_id.as_deref(), site_name).await
    else {
        log::warn!("no transaction matches site-creation webhook for {site_name}");
        return HttpResponse::Ok().json(json!({
            "status": "error",
            "message": format!("no matching transaction for {site_name}")
        }));
    };

    let site_record = json!({
        "first_name": transaction.first_name,
        "last_name": transaction.last_name,
        "email": transaction.email,
        "phone": transaction.phone,
        "country": transaction.country,
        "company_name": transaction.company_name,
        "organization": transaction.organization,
        "site_name": transaction.site_name,
        "valid_from": transaction.valid_from.format("%Y-%m-%d").to_string(),
        "valid_upto": transaction.valid_upto.format("%Y-%m-%d").to_string(),
        "status": transaction.payment_status,
        "product": transaction.plan,
    });

    match frappe_client::save_site(&state.frappe_base_url, &site_record).await {
        Ok(resp) => {
            if let Err(e) = db::record_frappe_forwarding(
                &state.pool,
                transaction.id,
                "success",
                Some(resp),
                Some("complete"),
            )
            .await
            {
                eprintln!("record_frappe_forwarding error: {e}");
            }
            log::info!("site creation complete for {site_name}");
            HttpResponse::Ok().json(json!({
                "status": "success",
                "message": format!("site data forwarded for {site_name}")
            }))
        }
        Err(e) => {
            log::error!("save_site failed for {site_name}: {e}");
            if let Err(db_err) = db::record_frappe_forwarding(
                &state.pool,
                transaction.id,
                "failed",
                Some(json!({ "error": e.to_string() })),
                None,
            )
            .await
            {
                eprintln!("record_frappe_forwarding error: {db_err}");
            }
            HttpResponse::Ok().json(json!({
                "status": "error",
                "message": format!("failed to forward site data: {e}")
            }))
        }
    }
}

async fn find_transaction(
    state: &web::Data<AppState>,
    job_id: Option<&str>,
    site_name: &str,
) -> Option<Transaction> {
    if let Some(job_id) = job_id {
        match db::transaction_by_job_id(&state.pool, job_id).await {
            Ok(Some(t)) => return Some(t),
            Ok(None) => {}
            Err(e) => log::error!("transaction_by_job_id error: {e}"),
        }
    }

    match db::latest_transaction_by_site_name(&state.pool, site_name).await {
        Ok(t) => t,
        Err(e) => {
            log::error!("latest_transaction_by_site_name error: {e}");
            None
        }
    }
}

async fn handle_creation_failure(
    state: &web::Data<AppState>,
    payload: &SiteCreationPayload,
) -> HttpResponse {
    let message = payload.message.clone().unwrap_or_default();

    // Имя сайта приходит только внутри текста ошибки.
    let site = payload
        .site_name
        .clone()
        .or_else(|| extract_site_name_from_message(&message, &state.site_domain));

    let Some(site) = site else {
        log::warn!("could not extract site name from failure message: {message}");
        return HttpResponse::Ok().json(json!({
            "status": "error",
            "message": "could not extract site name from failure message"
        }));
    };

    match db::mark_latest_site_creation_failed(&state.pool, &site, &message).await {
        Ok(0) => HttpResponse::Ok().json(json!({
            "status": "error",
            "message": format!("no matching transaction for {site}")
        })),
        Ok(_) => {
            log::info!("marked site creation failed for {site}");
            HttpResponse::Ok().json(json!({
                "status": "success",
                "message": format!("marked site creation failed for {site}")
            }))
        }
        Err(e) => {
            eprintln!("mark_latest_site_creation_failed error: {e}");
            HttpResponse::Ok().json(json!({
                "status": "error",
                "message": "database error while recording failure"
            }))
        }
    }
}

fn site_status_flag(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.as_str(), "active" | "Active" | "true"),
        _ => false,
    }
}

pub(crate) fn snapshot_from_entry(site: &Value) -> Option<db::SiteSnapshot> {
    let info = site.get("site_info")?;
    let site_name = info.get("site_name").and_then(Value::as_str)?.to_string();
    let stats = site.get("stats").cloned().unwrap_or(Value::Null);

    let count = |key: &str| stats.get(key).and_then(Value::as_i64).unwrap_or(0) as i32;

    Some(db::SiteSnapshot {
        site_name,
        active: site_status_flag(info.get("site_status").unwrap_or(&Value::Null)),
        location: info
            .get("country")
            .and_then(Value::as_str)
            .map(str::to_string),
        total_users_count: count("total_users"),
        active_users_count: count("active_users"),
        active_modules_count: count("active_modules"),
        total_users: stats.get("users").cloned().unwrap_or_else(|| json!([])),
        active_users: stats
            .get("active_users_list")
            .cloned()
            .unwrap_or_else(|| json!([])),
        active_modules: stats.get("modules").cloned().unwrap_or_else(|| json!([])),
        sites_data: site.clone(),
    })
}

/// Consolidated snapshot ingestion. The payload is authoritative for the
/// user's whole fleet: sites missing from it are deleted, the rest upserted
/// by global site_name, one commit for the lot.
#[utoipa::path(
    post,
    path = "/webhook/site-data",
    tag = "webhooks",
    responses(
        (status = 200, description = "Snapshot applied (body carries updated/deleted counts)"),
        (status = 401, description = "Bad webhook token")
    )
)]
#[post("/webhook/site-data")]
pub async fn site_data_webhook(
    req: HttpRequest,
    payload: web::Json<Value>,
    state: web::Data<AppState>,
) -> HttpResponse {
    if !sender_authorized(&req, &state.site_webhook_token) {
        return HttpResponse::Unauthorized().json(json!({ "error": "invalid webhook token" }));
    }

    let data = payload.into_inner();

    if data.get("status").and_then(Value::as_str) != Some("success") {
        let msg = data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        log::error!("error in site-data webhook: {msg}");
        return HttpResponse::Ok().json(json!({
            "status": "error",
            "message": format!("Received error data: {msg}")
        }));
    }

    if let Some(event_id) = data.get("event_id").and_then(Value::as_str) {
        match db::record_webhook_event(&state.pool, "site-data", event_id).await {
            Ok(true) => {}
            Ok(false) => {
                return HttpResponse::Ok().json(json!({ "status": "success", "duplicate": true }));
            }
            Err(e) => log::error!("webhook_events insert error: {e}"),
        }
    }

    let sites = data
        .pointer("/data/sites_data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // Владелец определяется по email в первой записи.
    let Some(email) = sites
        .first()
        .and_then(|s| s.pointer("/site_info/email"))
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        log::error!("email not found in site-data webhook");
        return HttpResponse::Ok().json(json!({
            "status": "error",
            "message": "Email not found in data"
        }));
    };

    let user = match db::get_user_by_email(&state.pool, &email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            log::warn!("no user found for email: {email}");
            return HttpResponse::Ok().json(json!({
                "status": "error",
                "message": format!("No user found for email: {email}")
            }));
        }
        Err(e) => {
            eprintln!("site-data webhook user lookup error: {e}");
            return HttpResponse::Ok().json(json!({
                "status": "error",
                "message": "database error"
            }));
        }
    };

    match apply_snapshot(&state, user.id, &sites).await {
        Ok((updated, deleted)) => {
            log::info!(
                "site data summary email={email} updated={updated} deleted={deleted}"
            );
            HttpResponse::Ok().json(json!({
                "status": "success",
                "message": format!(
                    "Updated {updated} sites, deleted {deleted} sites for user {email}"
                ),
                "updated_sites": updated,
                "deleted_sites": deleted,
            }))
        }
        Err(e) => {
            log::error!("site-data webhook db error: {e}");
            HttpResponse::Ok().json(json!({ "status": "error", "message": e.to_string() }))
        }
    }
}

async fn apply_snapshot(
    state: &web::Data<AppState>,
    user_id: Uuid,
    sites: &[Value],
) -> Result<(u64, u64), sqlx::Error> {
    let incoming: Vec<String> = sites
        .iter()
        .filter_map(|s| s.pointer("/site_info/site_name").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    let mut tx = state.pool.begin().await?;

    let deleted = db::delete_stale_sites(&mut *tx, user_id, &incoming).await?;

    let mut updated = 0u64;
    for site in sites {
        let Some(snapshot) = snapshot_from_entry(site) else {
            log::error!("site name missing in site data entry");
            continue;
        };
        db::upsert_site_snapshot(&mut *tx, user_id, &snapshot).await?;
        updated += 1;
    }

    tx.commit().await?;
    Ok((updated, deleted))
}
