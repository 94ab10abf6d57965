// src/api/paystack_client.rs
//
// Минимальный клиент для Paystack (https://api.paystack.co)
// Авторизация: заголовок Authorization: Bearer <secret key>

use serde_json::Value;
use std::fmt;
use std::time::Duration;

const PAYSTACK_API_BASE: &str = "https://api.paystack.co";
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

fn api_base() -> String {
    std::env::var("PAYSTACK_API_BASE_URL").unwrap_or_else(|_| PAYSTACK_API_BASE.to_string())
}

#[derive(Debug)]
pub enum PaystackError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    Unauthorized,
    /// The gateway answered 200 but the envelope did not carry a boolean
    /// `status`. Never mapped to a payment outcome.
    Unexpected(String),
}

impl fmt::Display for PaystackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaystackError::Http(e) => write!(f, "http error: {e}"),
            PaystackError::Api { status, body } => {
                write!(f, "paystack api error status={status} body={body}")
            }
            PaystackError::Unauthorized => write!(f, "unauthorized: invalid payment credentials"),
            PaystackError::Unexpected(e) => write!(f, "unexpected paystack response: {e}"),
        }
    }
}

impl From<reqwest::Error> for PaystackError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

/// Verifies a payment reference against the gateway. Only a gateway-confirmed
/// boolean maps to an outcome ("success" | "failed"); every other shape is an
/// error that aborts the caller's operation. No retries, the caller resubmits.
pub async fn verify_transaction(
    secret_key: &str,
    payment_reference: &str,
) -> Result<(String, Value), PaystackError> {
    let client = reqwest::Client::builder().timeout(VERIFY_TIMEOUT).build()?;

    let resp = client
        .get(format!(
            "{}/transaction/verify/{payment_reference}",
            api_base()
        ))
        .header("Authorization", format!("Bearer {secret_key}"))
        .send()
        .await?;

    let status = resp.status();
    if status.as_u16() == 401 {
        return Err(PaystackError::Unauthorized);
    }

    let body = resp.text().await?;
    if !status.is_success() {
        return Err(PaystackError::Api {
            status: status.as_u16(),
            body,
        });
    }

    let envelope: Value = serde_json::from_str(&body)
        .map_err(|e| PaystackError::Unexpected(format!("{e}; body={body}")))?;

    let data = envelope.get("data").cloned().unwrap_or(Value::Null);
    match envelope.get("status").and_then(Value::as_bool) {
        Some(true) => Ok(("success".to_string(), data)),
        Some(false) => Ok(("failed".to_string(), data)),
        None => Err(PaystackError::Unexpected(format!(
            "non-boolean status; body={body}"
        ))),
    }
}
