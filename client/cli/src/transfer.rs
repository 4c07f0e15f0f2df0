//! Resumable downloads and chunked uploads

use crate::api::{ApiClient, ApiError, UploadView};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Consecutive offset corrections tolerated before giving up.
const MAX_RESYNCS: u32 = 3;

fn progress_bar(total: Option<u64>, position: u64) -> anyhow::Result<ProgressBar> {
    let bar = match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::with_template(
                    "{bar:40.cyan/blue} {bytes}/{total_bytes} {bytes_per_sec} eta {eta}",
                )?
                .progress_chars("=> "),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(ProgressStyle::with_template("{spinner} {bytes} {bytes_per_sec}")?);
            bar
        }
    };
    bar.set_position(position);
    Ok(bar)
}

fn part_path(local: &Path) -> PathBuf {
    let mut name = local.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Remote target for an upload: a trailing `/` means "into this directory".
pub fn upload_target(local: &Path, remote: &str) -> anyhow::Result<String> {
    if !remote.ends_with('/') && !remote.is_empty() {
        return Ok(remote.to_string());
    }
    let name = local
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Cannot derive a file name from {}", local.display()))?;
    Ok(format!("{}{}", remote, name))
}

/// What a 416 reply to a resumed download says about the part file.
#[derive(Debug, PartialEq, Eq)]
enum Unsatisfied {
    /// The part file already holds the whole remote file
    Complete,
    /// The remote file is shorter than the part file or changed size
    Restart,
}

fn after_unsatisfied(offset: u64, content_range: Option<&str>) -> Unsatisfied {
    let remote_len = content_range
        .and_then(|value| value.trim().strip_prefix("bytes */"))
        .and_then(|len| len.trim().parse::<u64>().ok());
    if remote_len == Some(offset) {
        Unsatisfied::Complete
    } else {
        Unsatisfied::Restart
    }
}

/// Create the parent directories of `local` and report how many bytes
/// `<local>.part` already holds.
async fn prepare_part(local: &Path, resume: bool) -> std::io::Result<(PathBuf, u64)> {
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let part = part_path(local);
    if !resume {
        let _ = fs::remove_file(&part).await;
    }
    let offset = match fs::metadata(&part).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    Ok((part, offset))
}

/// Download `remote` into `local`, resuming from `<local>.part` when present.
pub async fn download(
    client: &ApiClient,
    remote: &str,
    local: &Path,
    resume: bool,
) -> anyhow::Result<u64> {
    let (part, mut offset) = prepare_part(local, resume).await?;

    let mut resp = client.download(remote, offset).await?;
    if resp.status() == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
        let content_range = resp
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok());
        match after_unsatisfied(offset, content_range) {
            Unsatisfied::Complete => {
                fs::rename(&part, local).await?;
                tracing::info!("{} was already complete", local.display());
                return Ok(offset);
            }
            Unsatisfied::Restart => {
                tracing::warn!(
                    "Partial download does not match the remote size of {}, restarting",
                    remote
                );
                offset = 0;
                resp = client.download(remote, 0).await?;
            }
        }
    }
    let status = resp.status();

    let mut file = if status == reqwest::StatusCode::PARTIAL_CONTENT {
        OpenOptions::new().append(true).open(&part).await?
    } else {
        if offset > 0 {
            tracing::warn!("Server ignored the range request, restarting {}", remote);
        }
        fs::File::create(&part).await?
    };
    let start = if status == reqwest::StatusCode::PARTIAL_CONTENT {
        offset
    } else {
        0
    };

    let bar = progress_bar(resp.content_length().map(|len| start + len), start)?;
    let mut written = start;
    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        bar.set_position(written);
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    bar.finish_and_clear();

    fs::rename(&part, local).await?;
    Ok(written)
}

/// Upload `local` to `remote`, resuming a matching session unless told not to.
pub async fn upload(
    client: &ApiClient,
    local: &Path,
    remote: &str,
    chunk_size: u64,
    resume: bool,
    overwrite: bool,
) -> anyhow::Result<UploadView> {
    let target = upload_target(local, remote)?;
    let mut file = fs::File::open(local).await?;
    let size = file.metadata().await?.len();

    let overwrite = overwrite.then_some(true);
    let mut view = client.create_session(&target, size, resume, overwrite).await?;
    tracing::info!(
        upload_id = %view.upload_id,
        received = view.received,
        "Uploading {} to {}",
        local.display(),
        view.target_path
    );

    if view.received >= size {
        // Nothing left to send; an empty chunk at the end finalizes
        return client.upload_chunk(&view.upload_id, size, size, Vec::new()).await;
    }

    let bar = progress_bar(Some(size), view.received)?;
    let mut resyncs = 0;
    let mut offset = view.received;
    let mut buf = vec![0u8; chunk_size as usize];

    while offset < size {
        let len = chunk_size.min(size - offset) as usize;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf[..len]).await?;

        match client
            .upload_chunk(&view.upload_id, offset, size, buf[..len].to_vec())
            .await
        {
            Ok(next) => {
                resyncs = 0;
                view = next;
                offset = view.received;
            }
            Err(err) => {
                let mismatch = err
                    .downcast_ref::<ApiError>()
                    .and_then(ApiError::code)
                    .is_some_and(|code| code == "sequence_mismatch");
                if !mismatch || resyncs >= MAX_RESYNCS {
                    bar.abandon();
                    return Err(err);
                }
                resyncs += 1;
                view = client.upload_status(&view.upload_id).await?;
                tracing::warn!("Server expects offset {}, resyncing", view.received);
                offset = view.received;
            }
        }
        bar.set_position(offset);
    }

    bar.finish_and_clear();
    if !view.completed {
        anyhow::bail!("Server did not confirm upload {} as complete", view.upload_id);
    }
    Ok(view)
}

/// Stream a ZIP of `paths` into `output`.
pub async fn zip(client: &ApiClient, paths: &[String], output: &Path) -> anyhow::Result<u64> {
    let mut resp = client.zip(paths).await?;
    let bar = progress_bar(resp.content_length(), 0)?;

    let mut file = fs::File::create(output).await?;
    let mut written = 0u64;
    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        bar.set_position(written);
    }
    file.flush().await?;
    bar.finish_and_clear();
    Ok(written)
}
