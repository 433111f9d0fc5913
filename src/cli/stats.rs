use anyhow::Result;

use crate::config::Config;
use crate::store::VectorStoreGateway;

/// Print every collection with its dimensionality, metric and size.
pub async fn stats(config: &Config) -> Result<()> {
    let backend = crate::store::create_backend(&config.storage)?;
    let gateway = VectorStoreGateway::new(backend);
    let collections = gateway.stats().await?;

    println!("Collection Statistics");
    println!("{}", "=".repeat(40));
    if collections.is_empty() {
        println!("  (no telemetry stored yet)");
        return Ok(());
    }

    println!("  {:<12} {:>10} {:>8} {:>10}", "name", "dimensions", "metric", "documents");
    let mut total = 0;
    for c in &collections {
        println!(
            "  {:<12} {:>10} {:>8} {:>10}",
            c.info.name, c.info.dimensions, c.info.metric, c.documents
        );
        total += c.documents;
    }
    println!();
    println!("Total documents:       {total}");

    Ok(())
}
