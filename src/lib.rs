#[macro_use]
extern crate rocket;

pub mod auth;
pub mod db;
pub mod error;
pub mod request_logger;
pub mod routes;
pub mod store;

use crate::auth::{AuthConfig, AuthState};
use crate::db::BackofficeDb;
use crate::request_logger::RequestLogger;
use crate::store::PgStore;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket, Route};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Every API route, mounted under `/api/v1`.
pub fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        // Health routes
        routes::health::health_check,
        // Auth routes
        auth::routes::login,
        auth::routes::refresh,
        auth::routes::logout,
        auth::routes::register,
        auth::routes::me,
        // User management routes
        routes::users::list_users,
        routes::users::get_user,
        routes::users::update_user,
        routes::users::suspend_user,
        routes::users::delete_user,
    ]
}

/// Mounts the API, the JSON catcher, and the documentation UIs.
pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/api/v1", api_routes())
        .register("/", catchers![error::default_catcher])
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Backoffice API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

/// CORS for a comma-separated `BACKOFFICE_CORS_ORIGINS`, or any origin when unset.
fn cors_options(origins: Option<&str>) -> CorsOptions {
    let allowed_origins = match origins {
        Some(origins) => {
            let origins: Vec<&str> = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .collect();
            AllowedOrigins::some_exact(&origins)
        }
        None => AllowedOrigins::all(),
    };

    CorsOptions::default()
        .allowed_origins(allowed_origins)
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Put, Method::Delete]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
}

pub fn rocket() -> Rocket<Build> {
    init_logger();
    log::info!("Starting Backoffice API Server");

    let rocket = rocket::build()
        .attach(RequestLogger)
        .attach(BackofficeDb::init())
        // Migrate, then wire the auth core and CORS around the Postgres store
        .attach(AdHoc::try_on_ignite("Auth State", |rocket| async move {
            let origins = std::env::var("BACKOFFICE_CORS_ORIGINS").ok();
            let cors = match cors_options(origins.as_deref()).to_cors() {
                Ok(cors) => cors,
                Err(err) => {
                    log::error!("invalid CORS configuration: {}", err);
                    return Err(rocket);
                }
            };

            let config = match AuthConfig::from_env() {
                Ok(config) => config,
                Err(err) => {
                    log::error!("auth configuration invalid: {}", err);
                    return Err(rocket);
                }
            };
            log::info!("auth configuration loaded: {:?}", config);

            let pool = match BackofficeDb::fetch(&rocket) {
                Some(db) => (**db).clone(),
                None => {
                    log::error!("database pool not available for auth state");
                    return Err(rocket);
                }
            };

            let store = PgStore::new(pool);
            match store.run_migrations().await {
                Ok(_) => log::info!("database migrations successful"),
                Err(e) => {
                    log::error!("database migrations failed: {}", e);
                    return Err(rocket);
                }
            }

            match AuthState::new(config, Arc::new(store)) {
                Ok(state) => Ok(rocket.manage(state).attach(cors)),
                Err(err) => {
                    log::error!("failed to initialise auth state: {}", err);
                    Err(rocket)
                }
            }
        }));

    mount_api(rocket)
}


#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Arc;

    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::{Build, Rocket};

    use crate::auth::principal::{NewPrincipal, Principal, Role};
    use crate::auth::{AuthConfig, AuthState, PasswordService};
    use crate::request_logger::RequestLogger;
    use crate::store::{MemoryStore, PrincipalStore};

    pub use database::{TestDatabase, TestDatabaseError};

    /// Auth configuration with fixed secrets and cheap Argon2 parameters.
    pub fn test_auth_config() -> AuthConfig {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("BACKOFFICE_JWT_SECRET", "test-access-secret-0123456789abcdef"),
            ("BACKOFFICE_JWT_REFRESH_SECRET", "test-refresh-secret-fedcba9876543210"),
            ("BACKOFFICE_JWT_ISSUER", "backoffice-test"),
            ("BACKOFFICE_JWT_AUDIENCE", "backoffice-test-clients"),
            ("BACKOFFICE_PASSWORD_MEMORY_KIB", "64"),
            ("BACKOFFICE_PASSWORD_TIME_COST", "1"),
        ]);
        AuthConfig::from_lookup(|key| vars.get(key).map(|value| value.to_string()))
            .expect("test auth config is valid")
    }

    /// Seeds principals with real password hashes.
    pub struct TestFixtures {
        store: Arc<dyn PrincipalStore>,
        passwords: Arc<PasswordService>,
    }

    impl TestFixtures {
        pub fn new(state: &AuthState) -> Self {
            Self {
                store: state.store.clone(),
                passwords: state.password_service.clone(),
            }
        }

        /// Insert a principal with the given plaintext password and roles.
        pub async fn insert_user(&self, username: &str, password: &str, roles: &[Role]) -> Principal {
            let password_hash = self
                .passwords
                .hash_password(password)
                .expect("hash fixture password");
            self.store
                .create_principal(NewPrincipal {
                    username: username.to_string(),
                    password_hash,
                    roles: roles.iter().copied().collect::<BTreeSet<_>>(),
                })
                .await
                .expect("insert fixture principal")
        }
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use testcontainers_modules::postgres::Postgres;
        use thiserror::Error;
        use uuid::Uuid;

        use crate::store::postgres::MIGRATOR;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("neither TEST_DATABASE_URL nor BACKOFFICE_TEST_CONTAINERS is set")]
            NotConfigured,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral, migrated database for integration tests.
        ///
        /// Uses `TEST_DATABASE_URL` when set; otherwise starts a disposable
        /// Postgres container if `BACKOFFICE_TEST_CONTAINERS=1`.
        pub struct TestDatabase {
            pool: PgPool,
            admin_options: PgConnectOptions,
            database_name: String,
            _container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                if let Ok(url) = std::env::var("TEST_DATABASE_URL") {
                    return Self::provision(&url, None).await;
                }
                if std::env::var("BACKOFFICE_TEST_CONTAINERS").as_deref() == Ok("1") {
                    let container = Postgres::default().start().await?;
                    let host = container.get_host().await?.to_string();
                    let port = container.get_host_port_ipv4(5432).await?;
                    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
                    return Self::provision(&url, Some(container)).await;
                }
                Err(TestDatabaseError::NotConfigured)
            }

            async fn provision(
                url: &str,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions = url.parse()?;
                let base_options = base_options.log_statements(LevelFilter::Off);
                let admin_options = base_options.clone().database("postgres");

                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;
                let database_name = format!("backoffice_test_{}", Uuid::new_v4().simple());
                sqlx::query(&format!("CREATE DATABASE \"{}\"", database_name))
                    .execute(&admin_pool)
                    .await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.database(&database_name))
                    .await?;
                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool,
                    admin_options,
                    database_name,
                    _container: container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                &self.pool
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(self) -> Result<(), TestDatabaseError> {
                self.pool.close().await;
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(self.admin_options.clone())
                    .await?;
                sqlx::query(&format!(
                    "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
                    self.database_name
                ))
                .execute(&admin_pool)
                .await?;
                Ok(())
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    ///
    /// Serves the full API over an in-memory store unless another store is supplied.
    pub struct TestRocketBuilder {
        figment: Figment,
        config: AuthConfig,
        store: Arc<dyn PrincipalStore>,
    }

    impl Default for TestRocketBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                config: test_auth_config(),
                store: Arc::new(MemoryStore::new()),
            }
        }

        pub fn with_config(mut self, config: AuthConfig) -> Self {
            self.config = config;
            self
        }

        pub fn with_store(mut self, store: Arc<dyn PrincipalStore>) -> Self {
            self.store = store;
            self
        }

        /// The auth state the built Rocket will manage.
        pub fn auth_state(&self) -> AuthState {
            AuthState::new(self.config.clone(), self.store.clone()).expect("valid test auth state")
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let state = self.auth_state();
            let rocket = rocket::custom(self.figment)
                .attach(RequestLogger)
                .manage(state);
            crate::mount_api(rocket)
        }

        /// Build and return an async client plus the state it serves, for seeding.
        pub async fn async_client(self) -> (AsyncClient, AuthState) {
            let state = self.auth_state();
            let rocket = rocket::custom(self.figment.clone())
                .attach(RequestLogger)
                .manage(state.clone());
            let client = AsyncClient::tracked(crate::mount_api(rocket))
                .await
                .expect("valid Rocket instance");
            (client, state)
        }
    }
}
