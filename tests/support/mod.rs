use sqlx::{PgPool, Row};
use std::env;
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use clientportal_backend::AppState;

/// Derives the admin url, database name and database url for an isolated
/// per-suite test database (`<name>_<suffix>`), so test binaries running in
/// parallel do not clobber each other's schema.
fn split_db_url(url: &str, suffix: &str) -> Result<(String, String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = format!("{}_{suffix}", &base[db_start + 1..]);
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    let mut db_url = format!("{}{db_name}", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
        db_url = format!("{db_url}?{query}");
    }

    Ok((admin_url, db_name, db_url))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

/// Recreates the suite's database and runs migrations. Returns None (and the
/// test is expected to bail out) when TEST_DATABASE_URL is not configured.
pub async fn try_init_test_db(suffix: &str) -> Option<TestDb> {
    dotenvy::dotenv().ok();
    let Ok(test_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping db-backed test");
        return None;
    };
    let (admin_url, db_name, db_url) =
        split_db_url(&test_url, suffix).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url).await.expect("connect admin db");

    let _ = sqlx::query("SELECT pg_advisory_lock(424242)")
        .execute(&admin_pool)
        .await;

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    let create_result = sqlx::query(&create_sql).execute(&admin_pool).await;
    if let Err(e) = create_result {
        eprintln!("create test db error: {e}");
        let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
        sqlx::query(&create_sql)
            .execute(&admin_pool)
            .await
            .expect("create test db retry");
    }

    let _ = sqlx::query("SELECT pg_advisory_unlock(424242)")
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;

    let pool = PgPool::connect(&db_url).await.expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    Some(TestDb {
        pool,
        _guard: guard,
    })
}

pub fn build_state(pool: PgPool, frappe_base_url: &str) -> AppState {
    AppState {
        pool,
        paystack_secret_key: "sk_test_secret".to_string(),
        frappe_base_url: frappe_base_url.to_string(),
        site_domain: ".purpledove.net".to_string(),
        site_webhook_token: None,
    }
}

pub async fn insert_user(pool: &PgPool, email: &str) -> Uuid {
    sqlx::query(
        r#"INSERT INTO users (username, email, password_hash)
           VALUES ($1, $2, 'test-hash')
           RETURNING id"#,
    )
    .bind(email.split('@').next().unwrap_or("user"))
    .bind(email)
    .fetch_one(pool)
    .await
    .expect("insert user")
    .get("id")
}

pub async fn insert_site(
    pool: &PgPool,
    user_id: Uuid,
    site_name: &str,
    total_users: i32,
    active_users: i32,
    active_modules: i32,
    active: bool,
) -> Uuid {
    sqlx::query(
        r#"INSERT INTO site_data
               (site_name, user_id, total_users_count, active_users_count, active_modules_count,
                active_sites, total_users, active_users, active_modules)
           VALUES ($1, $2, $3, $4, $5, $6, '[]'::jsonb, '[]'::jsonb, '[]'::jsonb)
           RETURNING id"#,
    )
    .bind(site_name)
    .bind(user_id)
    .bind(total_users)
    .bind(active_users)
    .bind(active_modules)
    .bind(active)
    .fetch_one(pool)
    .await
    .expect("insert site")
    .get("id")
}

pub async fn insert_transaction(
    pool: &PgPool,
    user_id: Uuid,
    site_name: &str,
    external_id: i64,
    job_id: Option<&str>,
) -> Uuid {
    sqlx::query(
        r#"INSERT INTO transactions
               (user_id, plan, payment_status, first_name, last_name, email, phone, country,
                company_name, organization, site_name, original_site_name, quantity, amount,
                training_and_setup, valid_from, valid_upto, payment_reference, transaction_id,
                message, paystack_status, paystack_response, site_creation_status,
                site_creation_job_id)
           VALUES ($1, 'standard', 'paid', 'Ada', 'Obi', 'ada@example.com', '+2348000000000',
                   'NG', 'Acme', 'Acme Corp', $2, $2, 5, 499.0, true, now(),
                   now() + interval '365 days', 'ref-seed', $3, 'seed', 'success',
                   '{}'::jsonb, 'initiated', $4)
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(site_name)
    .bind(external_id)
    .bind(job_id)
    .fetch_one(pool)
    .await
    .expect("insert transaction")
    .get("id")
}
