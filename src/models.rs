// src/models.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: Option<String>,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
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
    /// Numeric transaction id assigned by the payment gateway.
    pub transaction_id: i64,
    pub message: String,
    pub paystack_status: Option<String>,
    pub paystack_response: Option<serde_json::Value>,
    pub site_creation_status: Option<String>, // initiated | complete | failed
    pub site_creation_job_id: Option<String>,
    pub site_creation_error: Option<String>,
    pub frappe_status: Option<String>,
    pub frappe_response: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SiteData {
    pub id: Uuid,
    pub site_name: String,
    pub user_id: Uuid,
    pub total_users_count: Option<i32>,
    pub active_users_count: Option<i32>,
    pub active_modules_count: Option<i32>,
    pub active_sites: bool,
    pub location: Option<String>,
    pub total_users: Option<serde_json::Value>,
    pub active_users: Option<serde_json::Value>,
    pub active_modules: Option<serde_json::Value>,
    pub sites_data: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-user aggregate computed on read from `site_data` rows.
#[derive(Debug, Serialize)]
pub struct SiteSummary {
    pub total_sites: i64,
    pub active_sites: i64,
    pub total_users: i64,
    pub active_users: i64,
    pub total_active_modules: i64,
}

/// Transaction joined with the live flag of the matching site snapshot.
#[derive(Debug, Serialize)]
pub struct TransactionWithSite {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub site_active: Option<bool>,
}
