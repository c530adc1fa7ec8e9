use std::collections::BTreeSet;
use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use backoffice_api::auth::principal::{NewPrincipal, Role};
use backoffice_api::auth::PasswordService;
use backoffice_api::store::{PgStore, PrincipalStore, StoreError};

#[derive(Parser, Debug)]
#[command(
    name = "create_user",
    about = "Create a backoffice account, e.g. the first admin"
)]
struct Args {
    /// Username for the account (matched exactly at login).
    #[arg(long)]
    username: String,

    /// Plaintext password to hash and store for this user.
    #[arg(long)]
    password: String,

    /// Role to assign (`admin` or `moderator`). Repeat for several.
    #[arg(long = "role", required = true)]
    roles: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let username = args.username.trim().to_string();

    if username.is_empty() || args.password.is_empty() {
        writeln!(io::stderr(), "error: username and password must not be empty")?;
        std::process::exit(1);
    }

    let mut roles = BTreeSet::new();
    for raw in &args.roles {
        match raw.parse::<Role>() {
            Ok(role) => {
                roles.insert(role);
            }
            Err(err) => {
                writeln!(io::stderr(), "error: {err}. Use 'admin' or 'moderator'.")?;
                std::process::exit(1);
            }
        }
    }

    // Same cost knobs as the server; the signing secrets are not needed here.
    let memory_kib = std::env::var("BACKOFFICE_PASSWORD_MEMORY_KIB")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(19 * 1024);
    let time_cost = std::env::var("BACKOFFICE_PASSWORD_TIME_COST")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(2);
    let password_service = PasswordService::with_cost(memory_kib, time_cost)
        .map_err(|err| io::Error::other(format!("argon2 init failed: {err}")))?;

    let password_hash = password_service
        .hash_password(&args.password)
        .map_err(|err| io::Error::other(format!("password hash failed: {err}")))?;

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let store = PgStore::new(pool);
    store.run_migrations().await?;

    match store
        .create_principal(NewPrincipal {
            username: username.clone(),
            password_hash,
            roles,
        })
        .await
    {
        Ok(principal) => {
            let roles: Vec<&str> = principal.roles().iter().map(Role::as_str).collect();
            println!(
                "Created user '{}' with roles [{}] and id {}",
                principal.username,
                roles.join(", "),
                principal.id
            );
            Ok(())
        }
        Err(StoreError::Conflict(_)) => {
            writeln!(io::stderr(), "error: a user named '{username}' already exists.")?;
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}
