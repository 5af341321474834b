//! JSON-over-HTTP collaborators.
//!
//! Fingerprint request (`POST fingerprint_url`):
//!
//! ```json
//! { "name": "Sunset.jpg", "kind": "image", "content_type": "image/jpeg", "content": "<base64>" }
//! ```
//!
//! Response: `{ "algorithm": "phash", "digest": "..." }`.
//!
//! Search request (`POST search_url`):
//!
//! ```json
//! { "name": "Sunset.jpg", "kind": "image", "content_type": "image/jpeg",
//!   "fingerprint": { "algorithm": "phash", "digest": "..." } }
//! ```
//!
//! Response: `{ "matches": [ { "source", "score", "title", "artist"?, "url"? } ] }`.
//! Scores are clamped to `0..=100`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use content_shield_core::collab::{FingerprintService, MatchSearchService};
use content_shield_core::error::{FingerprintError, SearchError};
use content_shield_core::models::{
    Fingerprint, MatchCandidate, MatchDescriptor, MediaAsset, MediaKind,
};

use crate::config::CollaboratorsConfig;

/// Outcome of one HTTP exchange, before it is mapped to a collaborator error.
#[derive(Debug, Error)]
#[error("{message}")]
struct CallFailure {
    message: String,
    retryable: bool,
}

impl From<CallFailure> for FingerprintError {
    fn from(f: CallFailure) -> Self {
        FingerprintError {
            message: f.message,
            retryable: f.retryable,
        }
    }
}

impl From<CallFailure> for SearchError {
    fn from(f: CallFailure) -> Self {
        SearchError {
            message: f.message,
            retryable: f.retryable,
        }
    }
}

/// Shared HTTP plumbing for both remote collaborators.
struct Endpoint {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl Endpoint {
    fn new(config: &CollaboratorsConfig, url: Option<&String>, field: &str) -> Result<Self> {
        let url = match url {
            Some(u) if !u.trim().is_empty() => u.clone(),
            _ => bail!("collaborators.{} required for remote provider", field),
        };
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("{} environment variable not set", var))?,
            ),
            None => None,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            api_key,
        })
    }

    async fn post<B, R>(&self, body: &B) -> std::result::Result<R, CallFailure>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let mut request = self.client.post(&self.url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| CallFailure {
            message: format!("request to {} failed: {}", self.url, e),
            retryable: true,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CallFailure {
                message: format!("{} returned {}: {}", self.url, status, body_text),
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| CallFailure {
            message: format!("reading response from {} failed: {}", self.url, e),
            retryable: true,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| CallFailure {
            message: format!("invalid response from {}: {}", self.url, e),
            retryable: false,
        })
    }
}

#[derive(Serialize)]
struct FingerprintRequest<'a> {
    name: &'a str,
    kind: MediaKind,
    content_type: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct FingerprintResponse {
    algorithm: String,
    digest: String,
}

#[derive(Serialize)]
struct FingerprintRef<'a> {
    algorithm: &'a str,
    digest: &'a str,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    name: &'a str,
    kind: MediaKind,
    content_type: &'a str,
    fingerprint: FingerprintRef<'a>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    matches: Vec<RemoteMatch>,
}

#[derive(Deserialize)]
struct RemoteMatch {
    source: String,
    score: f64,
    title: String,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl RemoteMatch {
    fn into_candidate(self) -> MatchCandidate {
        let score = if self.score.is_finite() {
            self.score.round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        MatchCandidate {
            source: self.source,
            score,
            descriptor: MatchDescriptor {
                title: self.title,
                artist: self.artist,
                url: self.url,
            },
        }
    }
}

/// Fingerprints assets by posting their content to an HTTP service.
pub struct RemoteFingerprinter {
    endpoint: Endpoint,
}

impl RemoteFingerprinter {
    pub fn new(config: &CollaboratorsConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, config.fingerprint_url.as_ref(), "fingerprint_url")?,
        })
    }
}

#[async_trait]
impl FingerprintService for RemoteFingerprinter {
    fn name(&self) -> &str {
        "remote-fingerprint"
    }

    async fn compute_fingerprint(
        &self,
        asset: &MediaAsset,
    ) -> std::result::Result<Fingerprint, FingerprintError> {
        let request = FingerprintRequest {
            name: &asset.name,
            kind: asset.kind,
            content_type: &asset.content_type,
            content: base64::engine::general_purpose::STANDARD.encode(asset.content.as_bytes()),
        };
        let response: FingerprintResponse = self.endpoint.post(&request).await?;
        if response.digest.is_empty() {
            return Err(FingerprintError::new("service returned an empty digest"));
        }
        Ok(Fingerprint {
            algorithm: response.algorithm,
            kind: asset.kind,
            digest: response.digest,
        })
    }
}

/// Searches for copies of a fingerprinted asset through an HTTP service.
pub struct RemoteMatchSearch {
    endpoint: Endpoint,
}

impl RemoteMatchSearch {
    pub fn new(config: &CollaboratorsConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, config.search_url.as_ref(), "search_url")?,
        })
    }
}

#[async_trait]
impl MatchSearchService for RemoteMatchSearch {
    fn name(&self) -> &str {
        "remote-search"
    }

    async fn search(
        &self,
        asset: &MediaAsset,
        fingerprint: &Fingerprint,
    ) -> std::result::Result<Vec<MatchCandidate>, SearchError> {
        let request = SearchRequest {
            name: &asset.name,
            kind: asset.kind,
            content_type: &asset.content_type,
            fingerprint: FingerprintRef {
                algorithm: &fingerprint.algorithm,
                digest: &fingerprint.digest,
            },
        };
        let response: SearchResponse = self.endpoint.post(&request).await?;
        Ok(response
            .matches
            .into_iter()
            .map(RemoteMatch::into_candidate)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_response_and_clamps_scores() {
        let json = r#"{
            "matches": [
                { "source": "BeatShare", "score": 68.4, "title": "Dream Sequence",
                  "artist": "DJ ElectroBeat", "url": "beatshare.example.com/track/9876" },
                { "source": "elsewhere", "score": 140, "title": "Copy" },
                { "source": "noise", "score": -3, "title": "Nothing" }
            ]
        }"#;
        let response: SearchResponse = serde_json::from_str(json).unwrap();
        let candidates: Vec<MatchCandidate> = response
            .matches
            .into_iter()
            .map(RemoteMatch::into_candidate)
            .collect();
        assert_eq!(
            candidates.iter().map(|c| c.score).collect::<Vec<_>>(),
            vec![68, 100, 0]
        );
        assert_eq!(candidates[0].descriptor.artist.as_deref(), Some("DJ ElectroBeat"));
        assert!(candidates[1].descriptor.url.is_none());
    }

    #[test]
    fn empty_search_response_means_no_matches() {
        let response: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(response.matches.is_empty());
    }

    #[test]
    fn requires_api_key_variable_when_configured() {
        let config = CollaboratorsConfig {
            provider: "remote".into(),
            fingerprint_url: Some("http://127.0.0.1:9/fingerprint".into()),
            search_url: Some("http://127.0.0.1:9/search".into()),
            api_key_env: Some("CONTENT_SHIELD_TEST_KEY_THAT_IS_NOT_SET".into()),
            timeout_secs: 1,
        };
        assert!(RemoteFingerprinter::new(&config).is_err());
    }

    #[test]
    fn request_serializes_kind_lowercase() {
        let request = SearchRequest {
            name: "a.mp3",
            kind: MediaKind::Audio,
            content_type: "audio/mpeg",
            fingerprint: FingerprintRef {
                algorithm: "sha256",
                digest: "ab",
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["kind"], "audio");
        assert_eq!(value["fingerprint"]["digest"], "ab");
    }

    #[tokio::test]
    async fn unreachable_service_is_retryable() {
        let config = CollaboratorsConfig {
            provider: "remote".into(),
            fingerprint_url: Some("http://127.0.0.1:9/fingerprint".into()),
            search_url: Some("http://127.0.0.1:9/search".into()),
            api_key_env: None,
            timeout_secs: 2,
        };
        let fingerprinter = RemoteFingerprinter::new(&config).unwrap();
        let asset = MediaAsset {
            id: content_shield_core::models::AssetId::new(),
            name: "a.png".into(),
            kind: MediaKind::Image,
            size_bytes: 3,
            content_type: "image/png".into(),
            uploaded_at: chrono::Utc::now(),
            content: b"png".as_slice().into(),
        };
        let err = fingerprinter.compute_fingerprint(&asset).await.unwrap_err();
        assert!(err.retryable);
    }
}
