//! Search every group member's shares.

use anyhow::Result;
use shroud_client::ClientConfig;
use std::time::Duration;

/// Run the search command, printing hits that arrive within `window`.
pub async fn run(
    config: &ClientConfig,
    router: usize,
    wait: Duration,
    keyword: &str,
    window: Duration,
) -> Result<()> {
    super::with_client(config, router, wait, |client, context| async move {
        let search = client.search(keyword).await?;
        println!("Searching for \"{}\"...", keyword);

        let hits = context.searches.collect(&search, usize::MAX, window).await;
        if hits.is_empty() {
            println!("No results.");
            return Ok(());
        }
        for hit in &hits {
            println!(
                "  {}  {:>12}  {}  (from {})",
                hit.file.id, hit.file.size, hit.file.name, hit.client
            );
        }
        println!("{} result(s)", hits.len());
        Ok(())
    })
    .await
}
