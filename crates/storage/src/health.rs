//! ClickHouse health checks and schema setup.

use crate::client::ClickHouseClient;
use crate::schema::all_tables;
use engine_core::{Error, Result};
use telemetry::health;
use tracing::{debug, error, info};

/// Check ClickHouse connection health and update the registry.
pub async fn check_connection(client: &ClickHouseClient) -> bool {
    match client.inner().query("SELECT 1").fetch_one::<u8>().await {
        Ok(_) => {
            debug!("ClickHouse connection healthy");
            health().storage.mark_up();
            true
        }
        Err(e) => {
            error!("ClickHouse health check failed: {}", e);
            health().storage.mark_down(e.to_string());
            false
        }
    }
}

/// Applies all DDL statements once.
pub async fn init_schema(client: &ClickHouseClient) -> Result<()> {
    let statements = all_tables(client.database());
    for ddl in &statements {
        client
            .inner()
            .query(ddl)
            .execute()
            .await
            .map_err(|e| Error::storage(format!("failed to execute DDL: {}", e)))?;
    }

    info!(
        database = client.database(),
        statements = statements.len(),
        "ClickHouse schema initialized"
    );
    Ok(())
}
