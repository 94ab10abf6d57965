// src/api/frappe_client.rs
//
// Client for the Frappe provisioning backend and the per-site reporting
// endpoints exposed by provisioned tenant sites.

use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;

const PROVISION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum FrappeError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    InvalidResponse(String),
}

impl fmt::Display for FrappeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrappeError::Http(e) => write!(f, "http error: {e}"),
            FrappeError::Api { status, body } => {
                write!(f, "frappe api error status={status} body={body}")
            }
            FrappeError::InvalidResponse(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl From<reqwest::Error> for FrappeError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

#[derive(Debug)]
pub struct CreateSiteResponse {
    /// Present when the backend queued the creation asynchronously.
    pub job_id: Option<String>,
    pub raw: Value,
}

/// Fire-and-forget site creation request. One POST, bounded timeout, no
/// retries; every failure is raised to the caller, which records it on the
/// transaction instead of propagating.
pub async fn create_site(
    base_url: &str,
    site_name: &str,
    plan: &str,
    quantity: i32,
) -> Result<CreateSiteResponse, FrappeError> {
    let client = reqwest::Client::builder()
        .timeout(PROVISION_TIMEOUT)
        .build()?;

    let body = json!({
        "site_name": site_name,
        "plan": plan,
        "quantity": quantity,
    });

    let resp = client
        .post(format!(
            "{base_url}/api/method/clientportalapp_admin.sites.create_new_site"
        ))
        .json(&body)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(FrappeError::Api {
            status: status.as_u16(),
            body: text,
        });
    }

    let raw: Value = serde_json::from_str(&text)
        .map_err(|e| FrappeError::InvalidResponse(format!("{e}; body={text}")))?;

    if raw.get("status").and_then(Value::as_str) == Some("error") {
        return Err(FrappeError::Api {
            status: status.as_u16(),
            body: text,
        });
    }

    // Frappe wraps method responses in "message".
    let payload = raw.get("message").cloned().unwrap_or_else(|| raw.clone());
    let job_id = payload
        .get("job_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(CreateSiteResponse { job_id, raw })
}

/// Forwards a completed site's billing/contact record to the provisioning
/// backend. Called from the site-creation webhook.
pub async fn save_site(base_url: &str, site_data: &Value) -> Result<Value, FrappeError> {
    let client = reqwest::Client::builder()
        .timeout(PROVISION_TIMEOUT)
        .build()?;

    let resp = client
        .post(format!(
            "{base_url}/api/method/clientportalapp_admin.sites.save_site"
        ))
        .json(site_data)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(FrappeError::Api {
            status: status.as_u16(),
            body: text,
        });
    }

    serde_json::from_str(&text)
        .map_err(|e| FrappeError::InvalidResponse(format!("{e}; body={text}")))
}

/// Consolidated usage snapshot for all sites of one user, used by the
/// cold-start path of the polling reconciler.
pub async fn fetch_consolidated_site_data(
    base_url: &str,
    email: &str,
) -> Result<Value, FrappeError> {
    let client = reqwest::Client::builder()
        .timeout(PROVISION_TIMEOUT)
        .build()?;

    let resp = client
        .get(format!(
            "{base_url}/api/method/admin_clientportalapp.site_data.get_consolidated_site_data"
        ))
        .query(&[("email", email)])
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(FrappeError::Api {
            status: status.as_u16(),
            body: text,
        });
    }

    serde_json::from_str(&text)
        .map_err(|e| FrappeError::InvalidResponse(format!("{e}; body={text}")))
}

/// Reporting endpoints served by the tenant site itself.
pub struct SiteReportUrls {
    pub total_users: String,
    pub active_users: String,
    pub active_modules: String,
}

pub fn site_report_urls(site_name: &str) -> SiteReportUrls {
    let scheme = std::env::var("SITE_API_SCHEME").unwrap_or_else(|_| "https".to_string());
    SiteReportUrls {
        total_users: format!(
            "{scheme}://{site_name}/api/method/admin_clientportalapp.users.get_users"
        ),
        active_users: format!(
            "{scheme}://{site_name}/api/method/admin_clientportalapp.users.get_active_users"
        ),
        active_modules: format!(
            "{scheme}://{site_name}/api/method/admin_clientportalapp.modules.get_modules"
        ),
    }
}

#[derive(Debug)]
pub struct SiteReport {
    pub count: i64,
    pub items: Vec<Value>,
}

pub async fn fetch_site_report(
    client: &reqwest::Client,
    url: &str,
    list_key: &str,
) -> Result<SiteReport, FrappeError> {
    let resp = client.get(url).send().await?;

    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(FrappeError::Api {
            status: status.as_u16(),
            body: text,
        });
    }

    let raw: Value = serde_json::from_str(&text)
        .map_err(|e| FrappeError::InvalidResponse(format!("{e}; body={text}")))?;

    let message = raw.get("message").cloned().unwrap_or(Value::Null);
    let count = message.get("count").and_then(Value::as_i64).unwrap_or(0);
    let items = message
        .get(list_key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    Ok(SiteReport { count, items })
}
