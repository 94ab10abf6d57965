// src/api/dashboard.rs
//
// Polling half of the site-state reconciler plus the destructured dashboard
// reads. site_data rows are a last-known-good cache: the poll refreshes them
// from the tenant sites' own reporting endpoints, falling back per site to
// the persisted values when a site is unreachable.

use actix_web::{HttpResponse, get, web};
use futures_util::future::join3;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use uuid::Uuid;

use crate::api::frappe_client::{self, FrappeError, SiteReport};
use crate::api::webhooks_site::snapshot_from_entry;
use crate::models::SiteData;
use crate::{AppState, db};

const REPORT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ModulesQuery {
    pub id: String,
    #[serde(default)]
    pub search: Option<String>,
}

fn parse_user_id(raw: &str) -> Result<Uuid, HttpResponse> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        HttpResponse::BadRequest().json(json!({ "error": "Invalid UUID format for id" }))
    })
}

#[get("/sites-data")]
pub async fn sites_data(state: web::Data<AppState>, query: web::Query<IdQuery>) -> HttpResponse {
    let user_id = match parse_user_id(&query.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let sites = match db::list_site_data_for_user(&state.pool, user_id).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sites-data select error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    // Нет снапшотов — значит, пользователю ещё нечего обновлять: холодный
    // старт тянет консолидированные данные с бэкенда провижининга.
    if sites.is_empty() {
        return cold_start(&state, user_id).await;
    }

    match refresh_sites(&state, &sites).await {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => {
            log::error!("sites-data refresh failed: {e}");
            HttpResponse::InternalServerError().json(json!({
                "error": format!("An error occurred: {e}")
            }))
        }
    }
}

struct FreshReports {
    total_users: SiteReport,
    active_users: SiteReport,
    active_modules: SiteReport,
}

async fn poll_site(client: &reqwest::Client, site_name: &str) -> Result<FreshReports, FrappeError> {
    let urls = frappe_client::site_report_urls(site_name);
    let (total_users_report, active_users_report, active_modules_report) = join3(
        frappe_client::fetch_site_report(client, &urls.total_users, "users"),
        frappe_client::fetch_site_report(client, &urls.active_users, "users"),
        frappe_client::fetch_site_report(client, &urls.active_modules, "modules"),
    )
    .await;

    Ok(FreshReports {
        total_users: total_users_report?,
        active_users: active_users_report?,
        active_modules: active_modules_report?,
    })
}

struct SiteEntry {
    body: Value,
    total_users: i64,
    active_users: i64,
    active_modules: i64,
    active: bool,
}

fn site_entry(
    site: &SiteData,
    total_users: (i64, Value),
    active_users_val: (i64, Value),
    active_modules_val: (i64, Value),
) -> SiteEntry {
    SiteEntry {
        body: json!({
            "site_name": site.site_name,
            "active": site.active_sites,
            "creation_date": site.created_at,
            "country": site.location,
            "total_users": { "count": total_users.0, "users": total_users.1 },
            "active_users": { "count": active_users_val.0, "users": active_users_val.1 },
            "active_modules": { "count": active_modules_val.0, "modules": active_modules_val.1 },
        }),
        total_users: total_users.0,
        active_users: active_users_val.0,
        active_modules: active_modules_val.0,
        active: site.active_sites,
    }
}

/// Refresh every site of the user inside one outer transaction. Per-site
/// fetch failures degrade to the stored values; only unexpected database
/// errors abort (and roll the transaction back).
async fn refresh_sites(state: &web::Data<AppState>, sites: &[SiteData]) -> Result<Value, String> {
    let client = reqwest::Client::builder()
        .timeout(REPORT_TIMEOUT)
        .build()
        .map_err(|e| e.to_string())?;

    let mut tx = state.pool.begin().await.map_err(|e| e.to_string())?;

    let mut sites_payload = Vec::with_capacity(sites.len());
    let mut total_users = 0i64;
    let mut active_users_sum = 0i64;
    let mut active_modules_sum = 0i64;
    let mut active_sites = 0i64;

    for site in sites {
        let entry = match poll_site(&client, &site.site_name).await {
            Ok(fresh) => {
                let changed = i64::from(site.total_users_count.unwrap_or(0))
                    != fresh.total_users.count
                    || i64::from(site.active_users_count.unwrap_or(0)) != fresh.active_users.count
                    || i64::from(site.active_modules_count.unwrap_or(0))
                        != fresh.active_modules.count;

                // Пишем только при реальном изменении счётчиков.
                if changed {
                    log::info!("updating counts for site {}", site.site_name);
                    db::update_site_counts(
                        &mut *tx,
                        site.id,
                        &db::SiteCounts {
                            total_users_count: fresh.total_users.count as i32,
                            active_users_count: fresh.active_users.count as i32,
                            active_modules_count: fresh.active_modules.count as i32,
                            total_users: Value::Array(fresh.total_users.items.clone()),
                            active_users: Value::Array(fresh.active_users.items.clone()),
                            active_modules: Value::Array(fresh.active_modules.items.clone()),
                        },
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                }

                site_entry(
                    site,
                    (fresh.total_users.count, Value::Array(fresh.total_users.items)),
                    (fresh.active_users.count, Value::Array(fresh.active_users.items)),
                    (
                        fresh.active_modules.count,
                        Value::Array(fresh.active_modules.items),
                    ),
                )
            }
            Err(e) => {
                log::error!("error processing site {}: {e}", site.site_name);
                site_entry(
                    site,
                    (
                        i64::from(site.total_users_count.unwrap_or(0)),
                        site.total_users.clone().unwrap_or_else(|| json!([])),
                    ),
                    (
                        i64::from(site.active_users_count.unwrap_or(0)),
                        site.active_users.clone().unwrap_or_else(|| json!([])),
                    ),
                    (
                        i64::from(site.active_modules_count.unwrap_or(0)),
                        site.active_modules.clone().unwrap_or_else(|| json!([])),
                    ),
                )
            }
        };

        total_users += entry.total_users;
        active_users_sum += entry.active_users;
        active_modules_sum += entry.active_modules;
        if entry.active {
            active_sites += 1;
        }
        sites_payload.push(entry.body);
    }

    tx.commit().await.map_err(|e| e.to_string())?;

    Ok(json!({
        "totals": {
            "total_sites": sites.len(),
            "active_sites": active_sites,
            "total_users": total_users,
            "active_users": active_users_sum,
            "total_active_modules": active_modules_sum,
        },
        "sites_data": sites_payload,
    }))
}

/// First request for a user with no snapshots: fetch the consolidated data
/// from the provisioning backend and populate site_data from it.
async fn cold_start(state: &web::Data<AppState>, user_id: Uuid) -> HttpResponse {
    let user = match db::get_user_by_id(&state.pool, user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({ "error": "User not found" }));
        }
        Err(e) => {
            eprintln!("cold start user lookup error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let raw = match frappe_client::fetch_consolidated_site_data(&state.frappe_base_url, &user.email)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            log::error!("consolidated fetch failed for {}: {e}", user.email);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Failed to fetch data from provisioning backend"
            }));
        }
    };

    let message = raw.get("message").cloned().unwrap_or(Value::Null);
    if message.get("status").and_then(Value::as_str) != Some("success") {
        log::warn!("no consolidated data for email: {}", user.email);
        return HttpResponse::Ok().json(json!({
            "sites_data": [],
            "totals": {
                "total_sites": 0,
                "total_users": 0,
                "active_users": 0,
                "active_modules": 0,
            }
        }));
    }

    let totals = message
        .pointer("/data/totals")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let sites = message
        .pointer("/data/sites_data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    match populate_from_snapshot(state, user_id, &sites).await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "totals": totals,
            "sites_data": sites,
        })),
        Err(e) => {
            eprintln!("cold start populate error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn populate_from_snapshot(
    state: &web::Data<AppState>,
    user_id: Uuid,
    sites: &[Value],
) -> Result<(), sqlx::Error> {
    let mut tx = state.pool.begin().await?;
    for site in sites {
        let Some(snapshot) = snapshot_from_entry(site) else {
            log::error!("site name missing in consolidated data entry");
            continue;
        };
        db::upsert_site_snapshot(&mut *tx, user_id, &snapshot).await?;
    }
    tx.commit().await?;
    Ok(())
}

#[get("/active-modules")]
pub async fn active_modules(
    state: web::Data<AppState>,
    query: web::Query<ModulesQuery>,
) -> HttpResponse {
    let user_id = match parse_user_id(&query.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let sites = match db::list_site_data_for_user(&state.pool, user_id).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("active-modules select error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let mut total_active_modules = 0i64;
    let mut modules_by_site = Vec::new();

    for site in &sites {
        total_active_modules += i64::from(site.active_modules_count.unwrap_or(0));

        let modules: Vec<Value> = site
            .active_modules
            .as_ref()
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let (filtered, site_matches) = match &query.search {
            None => (modules, false),
            Some(term) => {
                let term = term.to_lowercase();
                let site_matches = site.site_name.to_lowercase().contains(&term);
                let matches_module = |m: &Value| {
                    ["module_name", "app_name"].iter().any(|key| {
                        m.get(key)
                            .and_then(Value::as_str)
                            .map(|s| s.to_lowercase().contains(&term))
                            .unwrap_or(false)
                    })
                };
                let filtered = modules
                    .into_iter()
                    .filter(|m| site_matches || matches_module(m))
                    .collect();
                (filtered, site_matches)
            }
        };

        if query.search.is_none() || !filtered.is_empty() || site_matches {
            modules_by_site.push(json!({
                "site_name": site.site_name,
                "active_modules": {
                    "count": filtered.len(),
                    "modules": filtered,
                }
            }));
        }
    }

    HttpResponse::Ok().json(json!({
        "total_active_modules": total_active_modules,
        "modules_by_site": modules_by_site,
    }))
}

#[get("/active-users")]
pub async fn active_users(state: web::Data<AppState>, query: web::Query<IdQuery>) -> HttpResponse {
    let user_id = match parse_user_id(&query.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let sites = match db::list_site_data_for_user(&state.pool, user_id).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("active-users select error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let mut total_active_users = 0i64;
    let users_by_site: Vec<Value> = sites
        .iter()
        .map(|site| {
            let count = i64::from(site.active_users_count.unwrap_or(0));
            total_active_users += count;
            json!({
                "site_name": site.site_name,
                "active_users": {
                    "count": count,
                    "users": site.active_users.clone().unwrap_or_else(|| json!([])),
                }
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "total_active_users": total_active_users,
        "users_by_site": users_by_site,
    }))
}

#[get("/active-sites-count")]
pub async fn active_sites_count(
    state: web::Data<AppState>,
    query: web::Query<IdQuery>,
) -> HttpResponse {
    let user_id = match parse_user_id(&query.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match db::user_site_summary(&state.pool, user_id).await {
        Ok(summary) => HttpResponse::Ok().json(json!({
            "active_sites_count": summary.active_sites
        })),
        Err(e) => {
            eprintln!("active-sites-count error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/total-sites-count")]
pub async fn total_sites_count(
    state: web::Data<AppState>,
    query: web::Query<IdQuery>,
) -> HttpResponse {
    let user_id = match parse_user_id(&query.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match db::user_site_summary(&state.pool, user_id).await {
        Ok(summary) => HttpResponse::Ok().json(json!({
            "total_sites_count": summary.total_sites
        })),
        Err(e) => {
            eprintln!("total-sites-count error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
