// src/api/transactions.rs

use actix_web::{HttpResponse, get, post, web};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::{frappe_client, paystack_client};
use crate::api::paystack_client::PaystackError;
use crate::db::NewTransaction;
use crate::{AppState, billing, db, site_name};

/// Typed view of the flat transaction payload submitted by the frontend.
#[derive(Debug)]
pub struct TransactionInput {
    pub user_id: String,
    pub payment_reference: String,
    pub plan: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub payment_status: String,
    pub phone: String,
    pub country: String,
    pub company_name: String,
    pub organization: String,
    pub site_name: String,
    pub quantity: i32,
    pub amount: f64,
    pub training_and_setup: bool,
    pub transaction_id: i64,
    pub message: String,
}

impl TransactionInput {
    /// Extracts and coerces every required field; the first problem aborts
    /// with a message naming the field.
    pub fn from_value(data: &Value) -> Result<Self, String> {
        let input = TransactionInput {
            user_id: str_field(data, "user_id")?,
            payment_reference: str_field(data, "payment_reference")?,
            plan: str_field(data, "plan")?,
            first_name: str_field(data, "first_name")?,
            last_name: str_field(data, "last_name")?,
            email: str_field(data, "email")?,
            payment_status: str_field(data, "payment_status")?,
            phone: str_field(data, "phone")?,
            country: str_field(data, "country")?,
            company_name: str_field(data, "company_name")?,
            organization: str_field(data, "organization")?,
            site_name: str_field(data, "site_name")?,
            quantity: int_field(data, "quantity")?
                .try_into()
                .map_err(|_| invalid_type("quantity", "int"))?,
            amount: float_field(data, "amount")?,
            training_and_setup: bool_field(data, "training_and_setup")?,
            transaction_id: int_field(data, "transaction_id")?,
            message: str_field(data, "message")?,
        };

        // valid_from / valid_upto are still sent by older frontends. They are
        // accepted and ignored: billing validity is computed server-side.
        Ok(input)
    }
}

fn missing(name: &str) -> String {
    format!("Missing required field: {name}")
}

fn invalid_type(name: &str, expected: &str) -> String {
    format!("Invalid type for {name}. Expected {expected}")
}

fn str_field(data: &Value, name: &str) -> Result<String, String> {
    match data.get(name) {
        None | Some(Value::Null) => Err(missing(name)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(_) => Err(invalid_type(name, "str")),
    }
}

fn int_field(data: &Value, name: &str) -> Result<i64, String> {
    match data.get(name) {
        None | Some(Value::Null) => Err(missing(name)),
        Some(v) => {
            if let Some(n) = v.as_i64() {
                return Ok(n);
            }
            if let Some(s) = v.as_str() {
                if let Ok(n) = s.trim().parse::<i64>() {
                    return Ok(n);
                }
            }
            Err(invalid_type(name, "int"))
        }
    }
}

fn float_field(data: &Value, name: &str) -> Result<f64, String> {
    match data.get(name) {
        None | Some(Value::Null) => Err(missing(name)),
        Some(v) => {
            if let Some(n) = v.as_f64() {
                return Ok(n);
            }
            if let Some(s) = v.as_str() {
                if let Ok(n) = s.trim().parse::<f64>() {
                    return Ok(n);
                }
            }
            Err(invalid_type(name, "float"))
        }
    }
}

fn bool_field(data: &Value, name: &str) -> Result<bool, String> {
    match data.get(name) {
        None | Some(Value::Null) => Err(missing(name)),
        Some(v) => {
            if let Some(b) = v.as_bool() {
                return Ok(b);
            }
            match v.as_str().map(|s| s.trim().to_lowercase()).as_deref() {
                Some("true") => Ok(true),
                Some("false") => Ok(false),
                _ => Err(invalid_type(name, "bool")),
            }
        }
    }
}

/// Core write path: validate the payload, confirm the payment with Paystack,
/// persist the transaction, then kick off site provisioning best-effort.
#[utoipa::path(
    post,
    path = "/store-transaction",
    tag = "transaction",
    responses(
        (status = 200, description = "Payment verified and transaction stored"),
        (status = 400, description = "Invalid payload or failed payment"),
        (status = 404, description = "Unknown user"),
        (status = 500, description = "Gateway or database error")
    )
)]
#[post("/store-transaction")]
pub async fn store_transaction(
    state: web::Data<AppState>,
    payload: web::Json<Value>,
) -> HttpResponse {
    let data = payload.into_inner();

    // 1) извлечение и типизация полей
    let input = match TransactionInput::from_value(&data) {
        Ok(i) => i,
        Err(msg) => return HttpResponse::BadRequest().json(json!({ "error": msg })),
    };

    // 2) нормализация имени сайта
    let original_site_name = input.site_name.clone();
    let site_name = site_name::normalize(&original_site_name, &state.site_domain);
    if !site_name::validate(&site_name, &state.site_domain) {
        return HttpResponse::BadRequest().json(json!({
            "error": format!("Invalid site name after normalization: {site_name}")
        }));
    }

    // 3) покупатель должен существовать
    let user_id = match Uuid::parse_str(input.user_id.trim()) {
        Ok(id) => id,
        Err(_) => {
            return HttpResponse::BadRequest().json(json!({
                "error": "Invalid UUID format for user_id"
            }));
        }
    };

    match db::get_user_by_id(&state.pool, user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({ "error": "User not found" }));
        }
        Err(e) => {
            eprintln!("store_transaction user lookup error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    // 4) верификация оплаты в Paystack
    let (paystack_status, paystack_response) =
        match paystack_client::verify_transaction(&state.paystack_secret_key, &input.payment_reference)
            .await
        {
            Ok(outcome) => outcome,
            Err(PaystackError::Unauthorized) => {
                return HttpResponse::Unauthorized().json(json!({
                    "error": "Unauthorized: Invalid Payment"
                }));
            }
            Err(PaystackError::Unexpected(e)) => {
                log::error!("unexpected paystack response for {}: {e}", input.payment_reference);
                return HttpResponse::BadRequest().json(json!({
                    "error": "Invalid Paystack transaction status. Please verify your payment reference."
                }));
            }
            Err(PaystackError::Api { status, body }) => {
                log::error!("paystack verify error status={status} body={body}");
                return HttpResponse::InternalServerError().json(json!({
                    "error": "Paystack API returned an error"
                }));
            }
            Err(PaystackError::Http(e)) => {
                log::error!("paystack connection error: {e}");
                return HttpResponse::InternalServerError().json(json!({
                    "error": "Error connecting to Paystack. Please try again later."
                }));
            }
        };

    log::info!(
        "paystack verify reference={} status={paystack_status}",
        input.payment_reference
    );

    // Неуспешная оплата не оставляет следа в БД, только отказ.
    if paystack_status == "failed" {
        return HttpResponse::BadRequest().json(json!({
            "error": "Payment verification failed"
        }));
    }

    // 5) сохраняем транзакцию; срок действия считаем сами от плана
    let (valid_from, valid_upto) = billing::validity_window(&input.plan, Utc::now());

    let new_tx = NewTransaction {
        user_id,
        plan: input.plan.clone(),
        payment_status: input.payment_status.clone(),
        first_name: input.first_name,
        last_name: input.last_name,
        email: input.email,
        phone: input.phone,
        country: input.country,
        company_name: input.company_name,
        organization: input.organization,
        site_name: site_name.clone(),
        original_site_name: original_site_name.clone(),
        quantity: input.quantity,
        amount: input.amount,
        training_and_setup: input.training_and_setup,
        valid_from,
        valid_upto,
        payment_reference: input.payment_reference,
        transaction_id: input.transaction_id,
        message: input.message,
        paystack_status: paystack_status.clone(),
        paystack_response,
    };

    let tx_id = match db::insert_transaction(&state.pool, &new_tx).await {
        Ok(id) => id,
        Err(e) => {
            eprintln!("store_transaction insert error: {e}");
            return HttpResponse::InternalServerError().json(json!({
                "error": "Error storing transaction"
            }));
        }
    };

    // 6) запуск создания сайта. Ошибка провижининга НЕ откатывает оплату и
    // не превращается в ошибку запроса: статус пишем в транзакцию и отдаём 200.
    let mut site_creation_status = "initiated".to_string();
    let mut site_creation_job_id: Option<String> = None;
    let mut site_creation_response: Option<Value> = None;

    match frappe_client::create_site(&state.frappe_base_url, &site_name, &input.plan, input.quantity)
        .await
    {
        Ok(resp) => {
            site_creation_job_id = resp.job_id.clone();
            if let Err(e) =
                db::mark_site_creation_initiated(&state.pool, tx_id, resp.job_id.as_deref()).await
            {
                eprintln!("mark_site_creation_initiated error: {e}");
            }
            log::info!("site creation initiated for {site_name}");
            site_creation_response = Some(resp.raw);
        }
        Err(e) => {
            let error_msg = format!("Error in site creation process: {e}");
            log::error!("{error_msg}");
            site_creation_status = "failed".to_string();
            if let Err(db_err) = db::mark_site_creation_failed(&state.pool, tx_id, &error_msg).await
            {
                eprintln!("mark_site_creation_failed error: {db_err}");
            }
        }
    }

    HttpResponse::Ok().json(json!({
        "message": "Transaction stored successfully",
        "transaction": {
            "id": tx_id,
            "user_id": user_id,
            "plan": new_tx.plan,
            "payment_status": new_tx.payment_status,
            "paystack_status": paystack_status,
            "site_name": site_name,
            "original_site_name": original_site_name,
            "site_creation_status": site_creation_status,
            "site_creation_job_id": site_creation_job_id,
            "valid_from": valid_from,
            "valid_upto": valid_upto,
        },
        "site_creation": site_creation_response,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: String,
}

#[get("/transactions")]
pub async fn list_transactions(
    state: web::Data<AppState>,
    query: web::Query<UserQuery>,
) -> HttpResponse {
    let user_id = match Uuid::parse_str(query.user_id.trim()) {
        Ok(id) => id,
        Err(_) => {
            return HttpResponse::BadRequest().json(json!({
                "error": "Invalid UUID format for user_id"
            }));
        }
    };

    match db::transactions_for_user(&state.pool, user_id).await {
        Ok(transactions) if transactions.is_empty() => HttpResponse::NotFound().json(json!({
            "error": "No transactions found for this user"
        })),
        Ok(transactions) => HttpResponse::Ok().json(transactions),
        Err(e) => {
            eprintln!("list_transactions db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/transactions/{id}")]
pub async fn get_transaction(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = match Uuid::parse_str(path.trim()) {
        Ok(id) => id,
        Err(_) => {
            return HttpResponse::BadRequest().json(json!({
                "error": "Invalid UUID format for transaction id"
            }));
        }
    };

    match db::transaction_with_site(&state.pool, id).await {
        Ok(Some(transaction)) => HttpResponse::Ok().json(transaction),
        Ok(None) => HttpResponse::NotFound().json(json!({
            "error": format!("Transaction with ID {id} not found")
        })),
        Err(e) => {
            eprintln!("get_transaction db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
