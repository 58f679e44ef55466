//! The `scan` command: walk a path and push every file through the detector.
//!
//! Async mode submits everything up front, parking on `QueueFull` until a
//! slot frees, and prints results as they are delivered. Sync mode scans one
//! file at a time.

use crate::report::Reporter;
use anyhow::{Context, Result};
use filedetect_scheduler::{DetectResult, Detector, ErrorKind, ScanTimeout, Sequence};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use walkdir::WalkDir;

type Delivery = (Sequence, PathBuf, DetectResult);

/// Regular files under `root` (or `root` itself), in walk order.
pub fn collect_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// Submit every file and wait for all results.
pub async fn scan_async<W>(
    detector: &Detector,
    files: &[PathBuf],
    timeout: ScanTimeout,
    reporter: Reporter<W>,
) -> Result<Reporter<W>>
where
    W: Write + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Delivery>();
    let printer = tokio::spawn(print_results(rx, reporter));

    for path in files {
        submit_waiting(detector, path, timeout, &tx).await;
    }
    detector.wait_until_empty(ScanTimeout::Infinite).await;
    drop(tx);

    printer.await.context("Result printer panicked")?
}

/// Scan files one after another, waiting for each result.
pub async fn scan_sync<W: Write>(
    detector: &Detector,
    files: &[PathBuf],
    timeout: ScanTimeout,
    mut reporter: Reporter<W>,
) -> Result<Reporter<W>> {
    for path in files {
        let (sequence, result) = scan_waiting(detector, path, timeout).await;
        reporter.record(sequence, path, &result)?;
    }
    Ok(reporter)
}

async fn print_results<W: Write>(
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    mut reporter: Reporter<W>,
) -> Result<Reporter<W>> {
    while let Some((sequence, path, result)) = rx.recv().await {
        reporter.record(sequence, &path, &result)?;
    }
    Ok(reporter)
}

/// Submit `path`, retrying after `QueueFull` once the queue has room. The
/// transient `QueueFull` deliveries are not forwarded.
async fn submit_waiting(
    detector: &Detector,
    path: &Path,
    timeout: ScanTimeout,
    tx: &mpsc::UnboundedSender<Delivery>,
) {
    loop {
        let tx = tx.clone();
        let submitted = detector.submit(path, timeout, move |sequence, path: &Path, result| {
            if result.error_kind() != Some(ErrorKind::QueueFull) {
                let _ = tx.send((sequence, path.to_path_buf(), result));
            }
        });
        match submitted {
            Ok(sequence) => {
                info!(
                    "[BEGIN] seq: {}, queue_depth: {}, path: {}, timeout: {}",
                    sequence,
                    detector.queue_depth(),
                    path.display(),
                    timeout
                );
                return;
            }
            Err(ErrorKind::QueueFull) => {
                detector.wait_until_below_capacity(ScanTimeout::Infinite).await;
            }
            // Already delivered through the callback.
            Err(_) => return,
        }
    }
}

async fn scan_waiting(
    detector: &Detector,
    path: &Path,
    timeout: ScanTimeout,
) -> (Sequence, DetectResult) {
    loop {
        match detector.submit_with_receiver(path, timeout) {
            Ok((sequence, rx)) => {
                let result = rx.await.unwrap_or_else(|_| {
                    DetectResult::failure(ErrorKind::Aborted, None, Duration::ZERO)
                });
                return (sequence, result);
            }
            Err(result) if result.error_kind() == Some(ErrorKind::QueueFull) => {
                detector.wait_until_below_capacity(ScanTimeout::Infinite).await;
            }
            Err(result) => return (Sequence::NONE, result),
        }
    }
}
