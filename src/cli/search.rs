use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::search::SearchService;
use crate::store::VectorStoreGateway;
use crate::telemetry::Kind;

/// Run a similarity search from the terminal against the configured store.
///
/// Read-only: the embedding model recorded in the store is left to `serve`.
pub async fn search(
    config: &Config,
    query: &str,
    kind: Kind,
    limit: Option<usize>,
    cluster: Option<&str>,
) -> Result<()> {
    let embedder = crate::embedding::create_provider(&config.embedding)?;
    let backend = crate::store::create_backend(&config.storage)?;
    let gateway = Arc::new(VectorStoreGateway::new(backend).with_metrics(&config.storage.metrics));
    let service = SearchService::new(
        embedder,
        gateway,
        Duration::from_secs(config.embedding.timeout_secs),
        &config.search,
    );

    let limit = service.clamp_limit(limit);
    let results = match cluster {
        Some(cluster) => service.search_cluster(query, kind, limit, cluster).await?,
        None => service.search(query, kind, limit).await?,
    };

    if results.is_empty() {
        println!("No matching {} found.", kind.collection_name());
        return Ok(());
    }

    println!("Found {} result(s) in {}\n", results.len(), kind.collection_name());
    for (i, result) in results.iter().enumerate() {
        println!(
            "  {}. [{}] {} (distance: {:.4})",
            i + 1,
            result.cluster_id,
            result.document.id,
            result.distance,
        );
        println!("     {}", super::preview(&result.document.text, 160));
        println!();
    }

    Ok(())
}
