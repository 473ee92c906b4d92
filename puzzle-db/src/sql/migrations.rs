use log::trace;
use sqlx::{query, sqlite::SqliteRow, Error, Row, SqliteConnection};

pub const MIGRATION_VERSION_NUMBER: i64 = 1;

pub async fn create_migrations_tables(connection: &mut SqliteConnection) -> Result<(), Error> {
    trace!("Creating migrations tables");

    query(
        "CREATE TABLE IF NOT EXISTS migrations (
          id INTEGER PRIMARY KEY,
          version INTEGER NOT NULL
        )",
    )
    .execute(connection)
    .await?;

    Ok(())
}

/// `None` for a database that has never been set up.
pub async fn get_db_version(connection: &mut SqliteConnection) -> Result<Option<i64>, Error> {
    create_migrations_tables(&mut *connection).await?;

    query("SELECT version FROM migrations LIMIT 1")
        .map(|row: SqliteRow| row.get::<i64, _>(0))
        .fetch_optional(connection)
        .await
}

pub async fn set_db_version(connection: &mut SqliteConnection) -> Result<(), Error> {
    query("INSERT OR REPLACE INTO migrations (id, version) VALUES (0, ?)")
        .bind(MIGRATION_VERSION_NUMBER)
        .execute(connection)
        .await?;

    Ok(())
}
