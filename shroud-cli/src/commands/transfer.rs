//! Download and upload commands.

use anyhow::{Context, Result};
use shroud_client::{disk, drive, ClientConfig, DownloadMachine, UploadMachine};
use shroud_core::Status;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Download `file` from `member` into `output`, or into the download folder.
pub async fn download(
    config: &ClientConfig,
    router: usize,
    wait: Duration,
    member: &str,
    file: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let member = super::member(member)?;
    let output = match output {
        Some(path) => path,
        None => disk::destination(&config.client.download_dir, file)
            .with_context(|| format!("Invalid file id: {}", file))?,
    };

    super::with_client(config, router, wait, |client, context| async move {
        println!("Downloading {} to {}...", file, output.display());
        let machine = Arc::new(DownloadMachine::new(
            client,
            Some(member),
            file,
            &output,
            context.timeouts.clone(),
        ));
        let status = drive("download", machine.clone()).await;
        let report = machine.report().await;
        if status != Status::Success || !report.complete() {
            anyhow::bail!(
                "Download failed: {}",
                report.failure.unwrap_or_else(|| format!("{:?}", status))
            );
        }
        println!("Done: {} bytes", report.done);
        Ok(())
    })
    .await
}

/// Upload `path` to `member`.
pub async fn upload(
    config: &ClientConfig,
    router: usize,
    wait: Duration,
    member: &str,
    path: &Path,
) -> Result<()> {
    let member = super::member(member)?;
    if !path.is_file() {
        anyhow::bail!("Not a file: {}", path.display());
    }

    super::with_client(config, router, wait, |client, context| async move {
        println!("Uploading {} to {}...", path.display(), member);
        let machine = Arc::new(UploadMachine::new(
            client,
            member,
            path,
            context.timeouts.clone(),
        ));
        let status = drive("upload", machine.clone()).await;
        let report = machine.report().await;
        if status != Status::Success || !report.complete() {
            anyhow::bail!(
                "Upload failed: {}",
                report.failure.unwrap_or_else(|| format!("{:?}", status))
            );
        }
        println!("Done: {} bytes", report.done);
        Ok(())
    })
    .await
}
