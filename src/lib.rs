pub mod api;
pub mod billing;
pub mod db;
pub mod docs;
pub mod models;
pub mod site_name;

use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub paystack_secret_key: String,
    pub frappe_base_url: String,
    pub site_domain: String,
    /// Shared secret for the provisioner-facing webhooks. When unset the
    /// endpoints run in legacy unauthenticated mode and log a warning.
    pub site_webhook_token: Option<String>,
}
