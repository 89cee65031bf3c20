//! Print the group id an artifact derives.

use anyhow::{Context, Result};
use shroud_core::Group;
use std::path::Path;

/// Run the group-id command.
pub async fn run(artifact: &Path) -> Result<()> {
    let bytes = tokio::fs::read(artifact)
        .await
        .with_context(|| format!("Failed to read {}", artifact.display()))?;
    let group = Group::from_artifact(&bytes);
    println!("{}", group.id);
    Ok(())
}
