//! Reads the database list twice (the second read is served from the cache),
//! then invalidates it the way a write would.
//!
//! ```sh
//! API_BASE_URL=http://localhost:8000 cargo run --example cached_reads
//! ```
use rapi::{
    ApiClient, RequestOptions,
    cache::{CacheAction, Resource},
    telemetry, tracing,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("rapi=debug,cached_reads=info").map_err(|e| anyhow::anyhow!(e))?;

    let client = ApiClient::from_env()?;
    let _cleanup = client.start_cache_cleanup();
    let invalidator = client.invalidator();

    let options = RequestOptions::new().cache_ttl(Duration::from_secs(60));
    for attempt in 1..=2 {
        let databases = client
            .get("/mssql-config/mssql-config", options.clone())
            .await?;
        tracing::info!(attempt, "databases: {}", databases);
    }

    let removed = invalidator.invalidate(Resource::Databases);
    tracing::info!("invalidated {} cached database responses", removed);

    let removed = invalidator.invalidate_after_action(CacheAction::Sync, "tables");
    tracing::info!("invalidated {} responses after a tables sync", removed);

    let stats = client.cache().stats();
    tracing::info!(
        hits = stats.hits,
        misses = stats.misses,
        size = stats.size,
        "cache hit ratio {:.2}",
        stats.hit_ratio()
    );
    Ok(())
}
