//! Media asset ingestion: validation and staging.
//!
//! An [`Upload`] is checked against the kind-specific limits from
//! [`LimitsConfig`] and, if accepted, registered as an immutable
//! [`MediaAsset`]. Nothing is written to disk.
//!
//! # Validation order
//!
//! 1. The display name must not be empty.
//! 2. The file must not be empty.
//! 3. The content type (case-insensitive, parameters ignored) must be in the
//!    kind's accepted set.
//! 4. The byte size must not exceed the kind's maximum.
//!
//! Clearing an asset is guarded by a busy check supplied by the
//! orchestrator, which holds its job table lock while calling
//! [`MediaAssetIngestor::clear_if_idle`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info};

use content_shield_core::error::{Result, ShieldError, ValidationError};
use content_shield_core::models::{AssetContent, AssetId, MediaAsset, MediaKind};

use crate::config::LimitsConfig;

/// A file selected by the user, not yet validated.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub kind: MediaKind,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Lowercase the MIME type and drop any `; param=value` suffix.
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Infer the media kind from a content type's top-level type.
pub fn infer_kind(content_type: &str) -> Option<MediaKind> {
    let normalized = normalize_content_type(content_type);
    if normalized.starts_with("image/") {
        Some(MediaKind::Image)
    } else if normalized.starts_with("audio/") {
        Some(MediaKind::Audio)
    } else {
        None
    }
}

/// Read a file from disk into an [`Upload`], guessing its content type from
/// the extension. `kind` overrides the kind inferred from the content type.
///
/// Files larger than the limit for their kind are rejected from metadata,
/// before any content is read.
pub fn upload_from_path(
    path: &Path,
    kind: Option<MediaKind>,
    limits: &LimitsConfig,
) -> anyhow::Result<Upload> {
    let content_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string();
    let kind = match kind.or_else(|| infer_kind(&content_type)) {
        Some(k) => k,
        None => anyhow::bail!(
            "Cannot tell whether {} is an image or audio file (content type {}); pass --kind",
            path.display(),
            content_type
        ),
    };

    let size = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    let limit = limits.max_bytes(kind);
    if size > limit {
        return Err(ShieldError::from(ValidationError::TooLarge { kind, size, limit }).into());
    }
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Upload {
        name,
        kind,
        content_type,
        bytes,
    })
}

/// Validates uploads and holds staged assets in memory.
pub struct MediaAssetIngestor {
    limits: LimitsConfig,
    assets: RwLock<HashMap<AssetId, MediaAsset>>,
}

impl MediaAssetIngestor {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            assets: RwLock::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<AssetId, MediaAsset>>> {
        self.assets
            .read()
            .map_err(|_| ShieldError::Internal("asset table lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<AssetId, MediaAsset>>> {
        self.assets
            .write()
            .map_err(|_| ShieldError::Internal("asset table lock poisoned".to_string()))
    }

    /// Check an upload without staging it. Returns the normalized content type.
    pub fn validate(&self, upload: &Upload) -> std::result::Result<String, ValidationError> {
        if upload.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        if upload.bytes.is_empty() {
            return Err(ValidationError::Empty);
        }

        let content_type = normalize_content_type(&upload.content_type);
        let accepted = self
            .limits
            .accepted_types(upload.kind)
            .iter()
            .any(|t| normalize_content_type(t) == content_type);
        if !accepted {
            return Err(ValidationError::UnsupportedContentType {
                kind: upload.kind,
                content_type,
            });
        }

        let size = upload.bytes.len() as u64;
        let limit = self.limits.max_bytes(upload.kind);
        if size > limit {
            return Err(ValidationError::TooLarge {
                kind: upload.kind,
                size,
                limit,
            });
        }

        Ok(content_type)
    }

    /// Validate and register an upload as a staged asset.
    pub fn stage(&self, upload: Upload) -> Result<MediaAsset> {
        let content_type = match self.validate(&upload) {
            Ok(ct) => ct,
            Err(e) => {
                debug!(name = %upload.name, kind = %upload.kind, error = %e, "upload rejected");
                return Err(e.into());
            }
        };

        let asset = MediaAsset {
            id: AssetId::new(),
            name: upload.name.trim().to_string(),
            kind: upload.kind,
            size_bytes: upload.bytes.len() as u64,
            content_type,
            uploaded_at: Utc::now(),
            content: AssetContent::from(upload.bytes),
        };

        self.write()?.insert(asset.id, asset.clone());
        info!(
            asset_id = %asset.id,
            name = %asset.name,
            kind = %asset.kind,
            size_bytes = asset.size_bytes,
            "asset staged"
        );
        Ok(asset)
    }

    pub fn get(&self, id: AssetId) -> Result<Option<MediaAsset>> {
        Ok(self.read()?.get(&id).cloned())
    }

    /// All staged assets, oldest first.
    pub fn list(&self) -> Result<Vec<MediaAsset>> {
        let mut assets: Vec<MediaAsset> = self.read()?.values().cloned().collect();
        assets.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(assets)
    }

    /// Discard a staged asset unless `is_busy` reports a non-terminal job for it.
    pub fn clear_if_idle(
        &self,
        id: AssetId,
        is_busy: impl FnOnce(AssetId) -> bool,
    ) -> Result<MediaAsset> {
        let mut assets = self.write()?;
        if !assets.contains_key(&id) {
            return Err(ShieldError::NotFound(format!("asset {}", id)));
        }
        if is_busy(id) {
            return Err(ShieldError::AssetBusy(id));
        }
        let asset = assets
            .remove(&id)
            .ok_or_else(|| ShieldError::NotFound(format!("asset {}", id)))?;
        info!(asset_id = %id, name = %asset.name, "asset cleared");
        Ok(asset)
    }
}
