use async_trait::async_trait;
use sha2::{Digest, Sha256};

use content_shield_core::collab::{FingerprintService, MatchSearchService};
use content_shield_core::error::{FingerprintError, SearchError};
use content_shield_core::models::{
    Fingerprint, MatchCandidate, MatchDescriptor, MediaAsset, MediaKind,
};

/// Fingerprints an asset as the SHA-256 digest of its bytes.
pub struct DigestFingerprinter;

#[async_trait]
impl FingerprintService for DigestFingerprinter {
    fn name(&self) -> &str {
        "sha256-digest"
    }

    async fn compute_fingerprint(
        &self,
        asset: &MediaAsset,
    ) -> Result<Fingerprint, FingerprintError> {
        if asset.content.is_empty() {
            return Err(FingerprintError::new("asset has no content"));
        }
        let digest = Sha256::digest(asset.content.as_bytes());
        Ok(Fingerprint {
            algorithm: "sha256".to_string(),
            kind: asset.kind,
            digest: hex::encode(digest),
        })
    }
}

struct CatalogEntry {
    source: &'static str,
    score: u8,
    title: &'static str,
    artist: Option<&'static str>,
    url: &'static str,
}

const ARTWORK_CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        source: "unauthorized-gallery.example.com",
        score: 92,
        title: "Urban Landscape #3",
        artist: None,
        url: "unauthorized-gallery.example.com/item/283",
    },
    CatalogEntry {
        source: "digital-marketplace.example.com",
        score: 87,
        title: "Abstract Flow Series",
        artist: None,
        url: "digital-marketplace.example.com/product/87342",
    },
    CatalogEntry {
        source: "social-platform.example.com",
        score: 76,
        title: "Neon Dreams",
        artist: None,
        url: "social-platform.example.com/post/29875",
    },
];

const MUSIC_CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        source: "MusicStream",
        score: 82,
        title: "Ambient Waves",
        artist: Some("Unknown Artist"),
        url: "musicstream.example.com/track/54321",
    },
    CatalogEntry {
        source: "BeatShare",
        score: 68,
        title: "Dream Sequence",
        artist: Some("DJ ElectroBeat"),
        url: "beatshare.example.com/track/9876",
    },
];

/// Answers every search from a fixed catalog per media kind.
///
/// Results are deterministic: the same kind always yields the same
/// candidates in the same order.
#[derive(Default)]
pub struct DemoCatalogSearch;

#[async_trait]
impl MatchSearchService for DemoCatalogSearch {
    fn name(&self) -> &str {
        "demo-catalog"
    }

    async fn search(
        &self,
        asset: &MediaAsset,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<MatchCandidate>, SearchError> {
        if fingerprint.kind != asset.kind {
            return Err(SearchError::new(format!(
                "fingerprint is for {} but asset is {}",
                fingerprint.kind, asset.kind
            )));
        }
        let catalog = match asset.kind {
            MediaKind::Image => ARTWORK_CATALOG,
            MediaKind::Audio => MUSIC_CATALOG,
        };
        Ok(catalog
            .iter()
            .map(|entry| MatchCandidate {
                source: entry.source.to_string(),
                score: entry.score,
                descriptor: MatchDescriptor {
                    title: entry.title.to_string(),
                    artist: entry.artist.map(str::to_string),
                    url: Some(entry.url.to_string()),
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use content_shield_core::models::{AssetContent, AssetId};

    fn asset(kind: MediaKind, bytes: &[u8]) -> MediaAsset {
        MediaAsset {
            id: AssetId::new(),
            name: "sample".into(),
            kind,
            size_bytes: bytes.len() as u64,
            content_type: "application/octet-stream".into(),
            uploaded_at: Utc::now(),
            content: AssetContent::from(bytes),
        }
    }

    #[tokio::test]
    async fn digest_is_sha256_hex() {
        let fp = DigestFingerprinter
            .compute_fingerprint(&asset(MediaKind::Image, b"abc"))
            .await
            .unwrap();
        assert_eq!(fp.algorithm, "sha256");
        assert_eq!(
            fp.digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn catalog_depends_on_kind() {
        let image = asset(MediaKind::Image, b"img");
        let fp = DigestFingerprinter.compute_fingerprint(&image).await.unwrap();
        let art = DemoCatalogSearch.search(&image, &fp).await.unwrap();
        assert_eq!(
            art.iter().map(|c| c.score).collect::<Vec<_>>(),
            vec![92, 87, 76]
        );

        let audio = asset(MediaKind::Audio, b"snd");
        let fp = DigestFingerprinter.compute_fingerprint(&audio).await.unwrap();
        let music = DemoCatalogSearch.search(&audio, &fp).await.unwrap();
        assert_eq!(music.len(), 2);
        assert_eq!(music[0].descriptor.artist.as_deref(), Some("Unknown Artist"));
    }

    #[tokio::test]
    async fn mismatched_fingerprint_is_rejected() {
        let image = asset(MediaKind::Image, b"img");
        let audio = asset(MediaKind::Audio, b"snd");
        let fp = DigestFingerprinter.compute_fingerprint(&audio).await.unwrap();
        let err = DemoCatalogSearch.search(&image, &fp).await.unwrap_err();
        assert!(!err.retryable);
    }
}
