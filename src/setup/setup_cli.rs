use clap::{Parser, Subcommand};
use newsdesk_backend::config::Config;
use newsdesk_backend::models::db_operations::users_db_operations;
use newsdesk_backend::models::{Role, UserStatus};
use newsdesk_backend::setup::db_setup;
use rand::RngCore;
use redb::Database;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "setup_cli", author, version, about = "A CLI for initial newsroom setup.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the .env configuration file. Not needed for `key generate`.
    #[arg(long, value_name = "FILE")]
    env_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// Creates the `users` and/or `articles` database. Both when no type is given.
    Setup { db_type: Option<String> },
}

#[derive(Subcommand, Debug)]
enum AdminAction {
    /// Creates an active admin account.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    ChangePassword {
        #[arg(long)]
        email: String,
        #[arg(long)]
        new_password: String,
    },
}

#[derive(Subcommand, Debug)]
enum UsersAction {
    List,
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Prints a fresh SESSION_SECRET_KEY.
    Generate,
}

fn main() {
    let cli = Cli::parse();

    if let Commands::Key { action: KeyAction::Generate } = &cli.command {
        generate_session_key();
        return;
    }

    let Some(env_file) = cli.env_file.as_ref() else {
        eprintln!("❌ Error: --env-file is required for this command.");
        std::process::exit(2);
    };
    let config = Config::from_env(env_file).expect("FATAL: Failed to load or parse configuration.");

    match &cli.command {
        Commands::Db { action } => match action {
            DbAction::Setup { db_type } => match db_type.as_deref() {
                Some("users") => setup_users_database(&config),
                Some("articles") => setup_articles_database(&config),
                Some(other) => eprintln!("❌ Error: Unknown database type '{}'. Use 'users' or 'articles'.", other),
                None => {
                    setup_users_database(&config);
                    setup_articles_database(&config);
                }
            },
        },
        Commands::Admin { action } => match action {
            AdminAction::Create { name, email, password } => create_admin_user(&config, name, email, password),
            AdminAction::ChangePassword { email, new_password } => change_password(&config, email, new_password),
        },
        Commands::Users { action } => match action {
            UsersAction::List => list_users(&config),
        },
        Commands::Key { .. } => {}
    }
}

fn generate_session_key() {
    let mut key = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut key);
    println!("{}", hex::encode(key));
}

fn setup_users_database(config: &Config) {
    let db_path = config.users_db_path();
    if db_path.exists() {
        println!("ℹ️ Users database already exists at '{}'. Skipping creation.", db_path.display());
        return;
    }
    println!("\nSetting up users database at '{}'...", db_path.display());

    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).expect("Could not create database directory.");
    }

    let mut conn = Connection::open(&db_path).expect("Could not create users database file.");
    match db_setup::setup_users_db(&mut conn) {
        Ok(_) => println!("✅ Users database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up users database: {}", e),
    }
}

fn setup_articles_database(config: &Config) {
    let db_path = config.articles_db_path();
    if db_path.exists() {
        println!("ℹ️ Articles database already exists at '{}'. Skipping creation.", db_path.display());
        return;
    }
    println!("\nSetting up articles database at '{}'...", db_path.display());

    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).expect("Could not create database directory.");
    }

    let db = Database::create(&db_path).expect("Failed to create articles database file.");
    match db_setup::setup_articles_db(&db) {
        Ok(_) => println!("✅ Articles database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up articles database: {}", e),
    }
}

fn open_users_db(config: &Config) -> Option<Connection> {
    let db_path = config.users_db_path();
    if !db_path.exists() {
        eprintln!(
            "❌ Error: Users database not found at '{}'. Please run `setup_cli db setup` first.",
            db_path.display()
        );
        return None;
    }
    match Connection::open(&db_path) {
        Ok(conn) => Some(conn),
        Err(e) => {
            eprintln!("❌ Error opening users database: {}", e);
            None
        }
    }
}

fn create_admin_user(config: &Config, name: &str, email: &str, password: &str) {
    let Some(conn) = open_users_db(config) else { return };
    match users_db_operations::create_user(&conn, name, email, password, Role::Admin, UserStatus::Active) {
        Ok(user) => println!("✅ Admin user '{}' <{}> created successfully.", user.name, user.email),
        Err(e) => eprintln!("❌ Error creating admin user: {}", e),
    }
}

fn change_password(config: &Config, email: &str, new_password: &str) {
    let Some(conn) = open_users_db(config) else { return };
    match users_db_operations::update_password(&conn, email, new_password) {
        Ok(0) => eprintln!("❌ Error: No user with email '{}' found.", email),
        Ok(_) => println!("✅ Password for '{}' changed successfully.", email),
        Err(e) => eprintln!("❌ Error updating password: {}", e),
    }
}

fn list_users(config: &Config) {
    let Some(conn) = open_users_db(config) else { return };
    match users_db_operations::read_all_users(&conn) {
        Ok(users) => {
            println!("Listing Users:");
            for user in users {
                println!("- {} <{}> [{}, {}]", user.name, user.email, user.role, user.status);
            }
        }
        Err(e) => eprintln!("❌ Error fetching users: {}", e),
    }
}
