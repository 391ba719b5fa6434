use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{
    EmbeddedMigrations, MigrationHarness, embed_migrations,
};

use crate::error::HubError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Build the connection pool for `database_url` and run embedded migrations.
pub fn init(database_url: &str) -> DbPool {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .build(manager)
        .expect("db pool should build");

    let mut conn = pool.get().expect("db connect should work");
    tracing::info!(
        pending = conn
            .has_pending_migration(MIGRATIONS)
            .unwrap_or_default(),
        "checking migrations"
    );
    conn.run_pending_migrations(MIGRATIONS)
        .expect("migrations should run");

    pool
}

pub fn get(pool: &DbPool) -> Result<DbConn, HubError> {
    pool.get().map_err(HubError::from)
}

#[cfg(test)]
pub fn init_test_pool() -> DbPool {
    let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
    // A single physical connection is shared for the pool's lifetime so
    // that SQLite's `:memory:` database isn't dropped between checkouts.
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("in-memory db pool should build");
    pool.get()
        .expect("in-memory db connect should work")
        .run_pending_migrations(MIGRATIONS)
        .expect("migrations should run");
    pool
}
