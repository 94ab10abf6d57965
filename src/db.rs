// src/db.rs
//
// Runtime queries with row mapping, so the build does not depend on a live
// schema.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::models::{SiteData, SiteSummary, Transaction, TransactionWithSite, User};

pub async fn get_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query("SELECT id, username, email FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(map_user))
}

pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query("SELECT id, username, email FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(map_user))
}

fn map_user(r: PgRow) -> User {
    User {
        id: r.get("id"),
        username: r.get("username"),
        email: r.get("email"),
    }
}

/// Creation-time fields of a transaction row. Payment outcome is already
/// known at insert time because failed payments are never persisted.
#[derive(Debug)]
pub struct NewTransaction {
    pub user_id: Uuid,
    pub plan: String,
    pub payment_status: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub country: String,
    pub company_name: String,
    pub organization: String,
    pub site_name: String,
    pub original_site_name: String,
    pub quantity: i32,
    pub amount: f64,
    pub training_and_setup: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_upto: DateTime<Utc>,
    pub payment_reference: String,
    pub transaction_id: i64,
    pub message: String,
    pub paystack_status: String,
    pub paystack_response: serde_json::Value,
}

pub async fn insert_transaction(pool: &PgPool, tx: &NewTransaction) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO transactions
               (user_id, plan, payment_status, first_name, last_name, email, phone, country,
                company_name, organization, site_name, original_site_name, quantity, amount,
                training_and_setup, valid_from, valid_upto, payment_reference, transaction_id,
                message, paystack_status, paystack_response)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                   $18, $19, $20, $21, $22)
           RETURNING id"#,
    )
    .bind(tx.user_id)
    .bind(&tx.plan)
    .bind(&tx.payment_status)
    .bind(&tx.first_name)
    .bind(&tx.last_name)
    .bind(&tx.email)
    .bind(&tx.phone)
    .bind(&tx.country)
    .bind(&tx.company_name)
    .bind(&tx.organization)
    .bind(&tx.site_name)
    .bind(&tx.original_site_name)
    .bind(tx.quantity)
    .bind(tx.amount)
    .bind(tx.training_and_setup)
    .bind(tx.valid_from)
    .bind(tx.valid_upto)
    .bind(&tx.payment_reference)
    .bind(tx.transaction_id)
    .bind(&tx.message)
    .bind(&tx.paystack_status)
    .bind(tx.paystack_response.clone())
    .fetch_one(pool)
    .await?;

    Ok(row.get("id"))
}

pub async fn mark_site_creation_initiated(
    pool: &PgPool,
    id: Uuid,
    job_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE transactions
           SET site_creation_status = 'initiated', site_creation_job_id = $2, updated_at = now()
           WHERE id = $1"#,
    )
    .bind(id)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_site_creation_failed(
    pool: &PgPool,
    id: Uuid,
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE transactions
           SET site_creation_status = 'failed', site_creation_error = $2, updated_at = now()
           WHERE id = $1"#,
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(())
}

/// Marks the most recent transaction for a site name as failed. Used by the
/// failure branch of the site-creation webhook, which only carries a message.
pub async fn mark_latest_site_creation_failed(
    pool: &PgPool,
    site_name: &str,
    error: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE transactions
           SET site_creation_status = 'failed', site_creation_error = $2, updated_at = now()
           WHERE id = (SELECT id FROM transactions
                       WHERE site_name = $1
                       ORDER BY created_at DESC
                       LIMIT 1)"#,
    )
    .bind(site_name)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn transaction_by_job_id(
    pool: &PgPool,
    job_id: &str,
) -> Result<Option<Transaction>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM transactions WHERE site_creation_job_id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(map_transaction))
}

/// Best-effort correlation by site name + recency. Can mis-attach when two
/// transactions share a normalized site name; callers prefer job-id lookup.
pub async fn latest_transaction_by_site_name(
    pool: &PgPool,
    site_name: &str,
) -> Result<Option<Transaction>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT * FROM transactions
           WHERE site_name = $1
           ORDER BY created_at DESC
           LIMIT 1"#,
    )
    .bind(site_name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(map_transaction))
}

pub async fn transaction_by_external_id(
    pool: &PgPool,
    external_id: i64,
) -> Result<Option<Transaction>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM transactions WHERE transaction_id = $1")
        .bind(external_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(map_transaction))
}

pub async fn update_payment_outcome(
    pool: &PgPool,
    id: Uuid,
    payment_status: &str,
    paystack_status: &str,
    paystack_response: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE transactions
           SET payment_status = $2, paystack_status = $3, paystack_response = $4,
               updated_at = now()
           WHERE id = $1"#,
    )
    .bind(id)
    .bind(payment_status)
    .bind(paystack_status)
    .bind(paystack_response)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn record_frappe_forwarding(
    pool: &PgPool,
    id: Uuid,
    frappe_status: &str,
    frappe_response: Option<serde_json::Value>,
    site_creation_status: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE transactions
           SET frappe_status = $2,
               frappe_response = COALESCE($3, frappe_response),
               site_creation_status = COALESCE($4, site_creation_status),
               updated_at = now()
           WHERE id = $1"#,
    )
    .bind(id)
    .bind(frappe_status)
    .bind(frappe_response)
    .bind(site_creation_status)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn transactions_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<TransactionWithSite>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT t.*, s.active_sites AS site_active
           FROM transactions t
           LEFT JOIN site_data s ON s.site_name = t.site_name
           WHERE t.user_id = $1
           ORDER BY t.created_at DESC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(map_transaction_with_site).collect())
}

pub async fn transaction_with_site(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<TransactionWithSite>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT t.*, s.active_sites AS site_active
           FROM transactions t
           LEFT JOIN site_data s ON s.site_name = t.site_name
           WHERE t.id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(map_transaction_with_site))
}

fn map_transaction_with_site(r: PgRow) -> TransactionWithSite {
    let site_active: Option<bool> = r.get("site_active");
    TransactionWithSite {
        transaction: map_transaction(r),
        site_active,
    }
}

fn map_transaction(r: PgRow) -> Transaction {
    Transaction {
        id: r.get("id"),
        user_id: r.get("user_id"),
        plan: r.get("plan"),
        payment_status: r.get("payment_status"),
        first_name: r.get("first_name"),
        last_name: r.get("last_name"),
        email: r.get("email"),
        phone: r.get("phone"),
        country: r.get("country"),
        company_name: r.get("company_name"),
        organization: r.get("organization"),
        site_name: r.get("site_name"),
        original_site_name: r.get("original_site_name"),
        quantity: r.get("quantity"),
        amount: r.get("amount"),
        training_and_setup: r.get("training_and_setup"),
        valid_from: r.get("valid_from"),
        valid_upto: r.get("valid_upto"),
        payment_reference: r.get("payment_reference"),
        transaction_id: r.get("transaction_id"),
        message: r.get("message"),
        paystack_status: r.get("paystack_status"),
        paystack_response: r.get("paystack_response"),
        site_creation_status: r.get("site_creation_status"),
        site_creation_job_id: r.get("site_creation_job_id"),
        site_creation_error: r.get("site_creation_error"),
        frappe_status: r.get("frappe_status"),
        frappe_response: r.get("frappe_response"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

pub async fn list_site_data_for_user<'e, E>(db: E, user_id: Uuid) -> Result<Vec<SiteData>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query("SELECT * FROM site_data WHERE user_id = $1 ORDER BY site_name")
        .bind(user_id)
        .fetch_all(db)
        .await?;

    Ok(rows.into_iter().map(map_site_data).collect())
}

fn map_site_data(r: PgRow) -> SiteData {
    SiteData {
        id: r.get("id"),
        site_name: r.get("site_name"),
        user_id: r.get("user_id"),
        total_users_count: r.get("total_users_count"),
        active_users_count: r.get("active_users_count"),
        active_modules_count: r.get("active_modules_count"),
        active_sites: r.get("active_sites"),
        location: r.get("location"),
        total_users: r.get("total_users"),
        active_users: r.get("active_users"),
        active_modules: r.get("active_modules"),
        sites_data: r.get("sites_data"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

/// One site entry from a consolidated snapshot (webhook or cold-start fetch).
#[derive(Debug)]
pub struct SiteSnapshot {
    pub site_name: String,
    pub active: bool,
    pub location: Option<String>,
    pub total_users_count: i32,
    pub active_users_count: i32,
    pub active_modules_count: i32,
    pub total_users: serde_json::Value,
    pub active_users: serde_json::Value,
    pub active_modules: serde_json::Value,
    pub sites_data: serde_json::Value,
}

/// Upsert keyed on the global site_name. The owner of an existing row is kept
/// as-is; only first sighting records ownership.
pub async fn upsert_site_snapshot<'e, E>(
    db: E,
    user_id: Uuid,
    snapshot: &SiteSnapshot,
) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"INSERT INTO site_data
               (site_name, user_id, total_users_count, active_users_count, active_modules_count,
                active_sites, location, total_users, active_users, active_modules, sites_data)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
           ON CONFLICT (site_name) DO UPDATE SET
               total_users_count = EXCLUDED.total_users_count,
               active_users_count = EXCLUDED.active_users_count,
               active_modules_count = EXCLUDED.active_modules_count,
               active_sites = EXCLUDED.active_sites,
               location = EXCLUDED.location,
               total_users = EXCLUDED.total_users,
               active_users = EXCLUDED.active_users,
               active_modules = EXCLUDED.active_modules,
               sites_data = EXCLUDED.sites_data,
               updated_at = now()"#,
    )
    .bind(&snapshot.site_name)
    .bind(user_id)
    .bind(snapshot.total_users_count)
    .bind(snapshot.active_users_count)
    .bind(snapshot.active_modules_count)
    .bind(snapshot.active)
    .bind(&snapshot.location)
    .bind(snapshot.total_users.clone())
    .bind(snapshot.active_users.clone())
    .bind(snapshot.active_modules.clone())
    .bind(snapshot.sites_data.clone())
    .execute(db)
    .await?;

    Ok(())
}

/// Deletes every snapshot of this user whose site name is not in `keep`.
/// A consolidated payload is authoritative: omission means the site is gone.
pub async fn delete_stale_sites<'e, E>(
    db: E,
    user_id: Uuid,
    keep: &[String],
) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM site_data WHERE user_id = $1 AND site_name <> ALL($2)")
        .bind(user_id)
        .bind(keep)
        .execute(db)
        .await?;

    Ok(result.rows_affected())
}

#[derive(Debug)]
pub struct SiteCounts {
    pub total_users_count: i32,
    pub active_users_count: i32,
    pub active_modules_count: i32,
    pub total_users: serde_json::Value,
    pub active_users: serde_json::Value,
    pub active_modules: serde_json::Value,
}

pub async fn update_site_counts<'e, E>(
    db: E,
    id: Uuid,
    counts: &SiteCounts,
) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"UPDATE site_data
           SET total_users_count = $2, active_users_count = $3, active_modules_count = $4,
               total_users = $5, active_users = $6, active_modules = $7, updated_at = now()
           WHERE id = $1"#,
    )
    .bind(id)
    .bind(counts.total_users_count)
    .bind(counts.active_users_count)
    .bind(counts.active_modules_count)
    .bind(counts.total_users.clone())
    .bind(counts.active_users.clone())
    .bind(counts.active_modules.clone())
    .execute(db)
    .await?;

    Ok(())
}

/// Per-user totals computed from the snapshot rows. The legacy schema
/// duplicated these onto every row; here they are derived on read.
pub async fn user_site_summary(pool: &PgPool, user_id: Uuid) -> Result<SiteSummary, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT COUNT(*) AS total_sites,
                  COUNT(*) FILTER (WHERE active_sites) AS active_sites,
                  COALESCE(SUM(total_users_count), 0) AS total_users,
                  COALESCE(SUM(active_users_count), 0) AS active_users,
                  COALESCE(SUM(active_modules_count), 0) AS total_active_modules
           FROM site_data
           WHERE user_id = $1"#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(SiteSummary {
        total_sites: row.get("total_sites"),
        active_sites: row.get("active_sites"),
        total_users: row.get("total_users"),
        active_users: row.get("active_users"),
        total_active_modules: row.get("total_active_modules"),
    })
}

/// Records a webhook delivery. Returns false when the (source, event_id) pair
/// was already seen, i.e. the delivery is a duplicate.
pub async fn record_webhook_event(
    pool: &PgPool,
    source: &str,
    event_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO webhook_events (source, event_id)
           VALUES ($1, $2)
           ON CONFLICT (source, event_id) DO NOTHING"#,
    )
    .bind(source)
    .bind(event_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
