use anyhow::{Context, Result};
use tokio_postgres::{Client, NoTls};
use tracing::error;

/// Connect to PostgreSQL and drive the connection on a background task.
pub async fn new_postgresql_client(connection_string: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
        .await
        .context("Failed to connect to PostgreSQL")?;

    // Spawn connection handler
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {e}");
        }
    });

    Ok(client)
}
