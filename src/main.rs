// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, Responder, web};
use dotenvy::dotenv;
use sqlx::PgPool;
use std::env;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use clientportal_backend::{AppState, api, docs};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let paystack_secret_key = env::var("PAYSTACK_SECRET_KEY").expect("PAYSTACK_SECRET_KEY required");
    let frappe_base_url = env::var("FRAPPE_BASE_URL").expect("FRAPPE_BASE_URL required");
    let site_domain = env::var("SITE_DOMAIN").unwrap_or_else(|_| ".purpledove.net".to_string());
    let site_webhook_token = env::var("SITE_WEBHOOK_TOKEN").ok();

    if site_webhook_token.is_none() {
        log::warn!("SITE_WEBHOOK_TOKEN not set, provisioner webhooks accept unauthenticated senders");
    }

    let state = web::Data::new(AppState {
        pool,
        paystack_secret_key,
        frappe_base_url,
        site_domain,
        site_webhook_token,
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            // Транзакции
            .service(api::transactions::store_transaction)
            .service(api::transactions::list_transactions)
            .service(api::transactions::get_transaction)
            // Дашборд / реконсиляция
            .service(api::dashboard::sites_data)
            .service(api::dashboard::active_modules)
            .service(api::dashboard::active_users)
            .service(api::dashboard::active_sites_count)
            .service(api::dashboard::total_sites_count)
            // Вебхуки (публичные)
            .service(api::webhooks_site::site_creation_webhook)
            .service(api::webhooks_site::site_data_webhook)
            .service(api::webhooks_paystack::paystack_webhook)
    })
    .bind(("0.0.0.0", 8000))?
    .run()
    .await
}
