use rocket_db_pools::{Database, sqlx};

#[derive(Database)]
#[database("backoffice_db")]
pub struct BackofficeDb(sqlx::PgPool);
