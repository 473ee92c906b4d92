use log::trace;
use sqlx::{query, sqlite::SqliteRow, Error, Row, SqliteConnection};

pub async fn create_accounts_tables(connection: &mut SqliteConnection) -> Result<(), Error> {
    trace!("Creating accounts tables");

    query(
        "
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL
        )
        ",
    )
    .execute(connection)
    .await?;

    Ok(())
}

/// Returns `false` if the email is already registered.
pub async fn insert_account(
    connection: &mut SqliteConnection,
    id: &str,
    email: &str,
    password_hash: &str,
) -> Result<bool, Error> {
    trace!("insert account {}", id);
    let result =
        query("INSERT OR IGNORE INTO accounts (id, email, password_hash) VALUES (?, ?, ?)")
            .bind(id)
            .bind(email)
            .bind(password_hash)
            .execute(connection)
            .await?;

    Ok(result.rows_affected() == 1)
}

/// `(id, password_hash)` for the account registered under `email`.
pub async fn select_account_by_email(
    connection: &mut SqliteConnection,
    email: &str,
) -> Result<Option<(String, String)>, Error> {
    query("SELECT id, password_hash FROM accounts WHERE email = ?")
        .bind(email)
        .map(|row: SqliteRow| (row.get::<String, _>(0), row.get::<String, _>(1)))
        .fetch_optional(connection)
        .await
}
