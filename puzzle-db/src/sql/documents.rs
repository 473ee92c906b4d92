use log::trace;
use sqlx::{query, sqlite::SqliteRow, Error, Row, SqliteConnection};

pub async fn create_documents_tables(connection: &mut SqliteConnection) -> Result<(), Error> {
    trace!("Creating documents tables");

    query(
        "
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            fields TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        )
        ",
    )
    .execute(connection)
    .await?;

    Ok(())
}

/// Returns `false` if a document with that id already exists.
pub async fn insert_document(
    connection: &mut SqliteConnection,
    collection: &str,
    id: &str,
    fields: &str,
) -> Result<bool, Error> {
    trace!("insert document {}/{}", collection, id);
    let result = query("INSERT OR IGNORE INTO documents (collection, id, fields) VALUES (?, ?, ?)")
        .bind(collection)
        .bind(id)
        .bind(fields)
        .execute(connection)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn upsert_document(
    connection: &mut SqliteConnection,
    collection: &str,
    id: &str,
    fields: &str,
) -> Result<(), Error> {
    trace!("upsert document {}/{}", collection, id);
    query(
        "
        INSERT INTO documents (collection, id, fields) VALUES (?, ?, ?)
        ON CONFLICT (collection, id) DO UPDATE SET fields = excluded.fields
        ",
    )
    .bind(collection)
    .bind(id)
    .bind(fields)
    .execute(connection)
    .await?;

    Ok(())
}

pub async fn update_document(
    connection: &mut SqliteConnection,
    collection: &str,
    id: &str,
    fields: &str,
) -> Result<bool, Error> {
    trace!("update document {}/{}", collection, id);
    let result = query("UPDATE documents SET fields = ? WHERE collection = ? AND id = ?")
        .bind(fields)
        .bind(collection)
        .bind(id)
        .execute(connection)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn select_document(
    connection: &mut SqliteConnection,
    collection: &str,
    id: &str,
) -> Result<Option<String>, Error> {
    query("SELECT fields FROM documents WHERE collection = ? AND id = ?")
        .bind(collection)
        .bind(id)
        .map(|row: SqliteRow| row.get::<String, _>(0))
        .fetch_optional(connection)
        .await
}

pub async fn select_collection(
    connection: &mut SqliteConnection,
    collection: &str,
) -> Result<Vec<(String, String)>, Error> {
    query("SELECT id, fields FROM documents WHERE collection = ?")
        .bind(collection)
        .map(|row: SqliteRow| (row.get::<String, _>(0), row.get::<String, _>(1)))
        .fetch_all(connection)
        .await
}
