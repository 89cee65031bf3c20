//! List the other members of our group.

use anyhow::Result;
use shroud_client::ClientConfig;
use std::time::Duration;

/// Run the group command.
pub async fn run(config: &ClientConfig, router: usize, wait: Duration) -> Result<()> {
    super::with_client(config, router, wait, |client, _| async move {
        let members = client.group_members().await?;
        println!("Group {}: {} other member(s)", client.group().id, members.len());
        for member in members {
            println!("  {}  {}", member.id, member.name);
        }
        Ok(())
    })
    .await
}
