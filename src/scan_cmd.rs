//! `shield scan`: stage local files, scan them concurrently, print alerts.
//!
//! Directories are walked recursively; only files whose extension maps to
//! an image or audio content type are picked up from them. Files named
//! explicitly are always attempted, with `--kind` overriding the guess.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::debug;
use walkdir::WalkDir;

use content_shield_core::job::{JobStatus, ScanState};
use content_shield_core::models::{AlertFilter, AlertView, MediaKind};

use crate::config::Config;
use crate::ingest::{infer_kind, upload_from_path};
use crate::orchestrator::Orchestrator;
use crate::progress::ProgressMode;

/// Expand `paths` into the list of files to scan, in a stable order.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| is_media_file(p))
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

fn is_media_file(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first_raw()
        .and_then(infer_kind)
        .is_some()
}

pub async fn run_scan(
    config: &Config,
    paths: &[PathBuf],
    kind: Option<MediaKind>,
    progress: ProgressMode,
    json: bool,
) -> Result<()> {
    let files = collect_files(paths)?;
    if files.is_empty() {
        bail!("No image or audio files found");
    }

    let orchestrator = Orchestrator::from_config(config)?
        .reporter(Arc::from(progress.reporter()))
        .build();

    let mut rejected = 0usize;
    let mut asset_ids = Vec::new();
    for file in &files {
        let staged = upload_from_path(file, kind, orchestrator.ingestor().limits())
            .and_then(|upload| orchestrator.stage(upload).map_err(anyhow::Error::from));
        match staged {
            Ok(asset) => asset_ids.push(asset.id),
            Err(e) => {
                eprintln!("skip {}: {}", file.display(), e);
                rejected += 1;
            }
        }
    }
    if asset_ids.is_empty() {
        bail!("No files could be staged");
    }

    let mut handles = Vec::with_capacity(asset_ids.len());
    for asset_id in asset_ids {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(
            async move { orchestrator.scan_and_wait(asset_id).await },
        ));
    }

    let mut finished: Vec<JobStatus> = Vec::with_capacity(handles.len());
    for handle in handles {
        finished.push(handle.await??);
    }
    let failed = finished
        .iter()
        .filter(|s| s.state == ScanState::Failed)
        .count();
    debug!(scanned = finished.len(), failed, rejected, "scan run finished");

    let alerts = orchestrator
        .registry()
        .list_alerts(&AlertFilter::default())
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&alerts)?);
    } else {
        print_alerts(&alerts);
        for status in finished.iter().filter(|s| s.state == ScanState::Failed) {
            let name = orchestrator
                .job(status.job_id)
                .await
                .map(|j| j.asset_name)
                .unwrap_or_default();
            let reason = status
                .failure
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_default();
            println!("FAILED {} ({})", name, reason);
        }
    }

    if failed + rejected > 0 {
        bail!(
            "{} of {} files could not be scanned",
            failed + rejected,
            files.len()
        );
    }
    Ok(())
}

fn print_alerts(alerts: &[AlertView]) {
    if alerts.is_empty() {
        println!("No matches.");
        return;
    }

    println!(
        "{:<8} {:>5}  {:<6} {:<28} {}",
        "SEVERITY", "SCORE", "KIND", "TITLE", "WHERE"
    );
    for view in alerts {
        let m = &view.similarity;
        let location = m.descriptor.url.as_deref().unwrap_or(&m.source);
        let title = match &m.descriptor.artist {
            Some(artist) => format!("{} - {}", m.descriptor.title, artist),
            None => m.descriptor.title.clone(),
        };
        println!(
            "{:<8} {:>4}%  {:<6} {:<28} {}",
            view.severity.as_str(),
            m.score,
            m.asset_kind.as_str(),
            title,
            location
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_only_yield_media_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.png"), b"png").unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"mp3").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"txt").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.ogg"), b"ogg").unwrap();

        let files = collect_files(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mp3", "b.png", "c.ogg"]);
    }

    #[test]
    fn missing_path_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(collect_files(&[dir.path().join("absent.png")]).is_err());
    }
}
