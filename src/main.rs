use actix_cors::Cors;
use actix_session::{config::PersistentSession, storage::CookieSessionStore, SessionMiddleware};
use actix_web::{
    cookie::{self, Key},
    middleware::{DefaultHeaders, Logger},
    web, App, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use newsdesk_backend::{config::Config, helper::clock::SystemClock, routes, AppState};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use redb::Database;
use std::convert::TryFrom;
use std::path::PathBuf;
use std::sync::Arc;

/// A simple handler for the root URL.
async fn root_handler() -> impl Responder {
    HttpResponse::Ok().content_type("text/plain").body("OK")
}

#[derive(Parser, Debug)]
#[command(name = "newsdesk_server", author, version, about = "Starts the newsroom API server.")]
struct Cli {
    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file).expect("FATAL: Failed to load or parse configuration.");

    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    let articles_db = Arc::new(
        Database::open(config.articles_db_path())
            .expect("FATAL: articles.db not found. Run 'cargo run --bin setup_cli -- --env-file <path> db setup'"),
    );

    let users_db_path = config.users_db_path();
    if !users_db_path.exists() {
        panic!(
            "FATAL: users.db not found at '{}'. Run 'cargo run --bin setup_cli -- --env-file <path> db setup'",
            users_db_path.display()
        );
    }
    let pool = Pool::builder()
        .build(SqliteConnectionManager::file(users_db_path))
        .expect("FATAL: Failed to create Rusqlite connection pool.");

    let app_state = web::Data::new(AppState::new(
        pool,
        articles_db,
        config.rate_limit(),
        config.session_policy(),
        Arc::new(SystemClock),
    ));

    let session_key_bytes =
        hex::decode(&config.session_secret_key).expect("FATAL: SESSION_SECRET_KEY in .env is not a valid hex string.");
    let session_key = Key::try_from(session_key_bytes.as_slice())
        .expect("FATAL: The decoded SESSION_SECRET_KEY is not long enough (minimum 64 bytes required).");

    let server_address = format!("{}:{}", config.web.host, config.web.port);
    log::info!("Server starting at http://{}", server_address);

    HttpServer::new(move || {
        // Cookie lives for the remember period; shorter sessions expire in SessionManager.
        let session_mw = SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
            .cookie_secure(config.use_secure_cookies)
            .cookie_http_only(true)
            .cookie_same_site(cookie::SameSite::Lax)
            .session_lifecycle(
                PersistentSession::default().session_ttl(cookie::time::Duration::days(config.remember_ttl_days)),
            )
            .build();

        let cors = {
            let allowed_origins_str = &config.allowed_origins;
            let base = if allowed_origins_str.trim() == "*" {
                Cors::default().allow_any_origin()
            } else {
                allowed_origins_str
                    .split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            };
            base.allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
                .allowed_headers(vec![
                    actix_web::http::header::AUTHORIZATION,
                    actix_web::http::header::ACCEPT,
                    actix_web::http::header::CONTENT_TYPE,
                ])
                .supports_credentials()
                .max_age(3600)
        };

        App::new()
            .wrap(session_mw)
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY")),
            )
            .app_data(web::Data::new(config.clone()))
            .app_data(app_state.clone())
            .route("/", web::get().to(root_handler))
            .configure(routes::auth::config)
            .configure(routes::articles::config)
            .configure(routes::activity::config)
            .configure(routes::users::config)
    })
    .bind(server_address)?
    .run()
    .await
}
