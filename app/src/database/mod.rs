use sqlx::postgres::PgPoolOptions;
use url::Url;

pub type Database = sqlx::Pool<sqlx::Postgres>;
pub type Transaction = sqlx::Transaction<'static, sqlx::Postgres>;

pub async fn connect(url: &Url) -> Database {
    PgPoolOptions::new().connect(url.as_str()).await.unwrap()
}

/// Runs the embedded migrations against the database. The migrator itself is an external
/// collaborator; this just invokes it against the `migrations/` directory at the workspace root.
pub async fn run_migrations(db: &Database) {
    sqlx::migrate!("./migrations").run(db).await.unwrap();
}
