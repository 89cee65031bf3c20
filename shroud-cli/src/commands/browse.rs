//! Browse a member's shares.

use anyhow::Result;
use shroud_client::ClientConfig;
use std::time::Duration;

/// Run the browse command. Without a folder id the member's roots are listed.
pub async fn run(
    config: &ClientConfig,
    router: usize,
    wait: Duration,
    member: &str,
    folder: Option<&str>,
) -> Result<()> {
    let member = super::member(member)?;
    super::with_client(config, router, wait, |client, _| async move {
        let listing = client.browse(&member, folder).await?;
        for entry in &listing.folders {
            println!("  {}  {:>12}  {}/", entry.id, "-", entry.name);
        }
        for entry in &listing.files {
            println!("  {}  {:>12}  {}", entry.id, entry.size, entry.name);
        }
        println!(
            "{} folder(s), {} file(s)",
            listing.folders.len(),
            listing.files.len()
        );
        Ok(())
    })
    .await
}
