use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use herald::config::Config;
use herald::pg::schema::{NullSchemaReader, SchemaReader};
use herald::pg::version;
use herald::stream::start_transaction_channel;

// NOTE: row population needs a live SchemaReader wired to the databases in
// pg_conn_strings; with the null reader below the binary tails the WAL and
// publishes unpopulated transactions.

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .ok_or("usage: herald <config.json>")?;
    let config = Config::from_file(&config_path).await?;

    let server_version = version::ensure_supported(&config.data_dir).await?;

    let schema: Arc<dyn SchemaReader> = Arc::new(NullSchemaReader);
    let (pipeline, mut txns) = start_transaction_channel(&server_version, &config, schema).await?;

    let stop = pipeline.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    while let Some(txn) = txns.recv().await {
        println!("{}", serde_json::to_string(&txn)?);
    }

    Ok(())
}
