//! Fingerprint and match-search collaborators.
//!
//! Two providers implement the core collaborator traits:
//! - **`demo`**: [`DigestFingerprinter`] hashes the content with SHA-256 and
//!   [`DemoCatalogSearch`] answers from a fixed catalog. No network access.
//! - **`remote`**: [`RemoteFingerprinter`] and [`RemoteMatchSearch`] post
//!   base64 content as JSON to configured HTTP endpoints.
//!
//! # Retry classification
//!
//! The remote clients make one attempt per call and mark failures so the
//! orchestrator can decide whether to retry:
//! - HTTP 429 (rate limited) and 5xx (server error) → retryable
//! - Network errors and client-side timeouts → retryable
//! - Other HTTP 4xx and malformed responses → not retryable
//!
//! Use [`create_collaborators`] to build the pair named by the config.

mod demo;
mod remote;

pub use demo::{DemoCatalogSearch, DigestFingerprinter};
pub use remote::{RemoteFingerprinter, RemoteMatchSearch};

use std::sync::Arc;

use anyhow::{bail, Result};

use content_shield_core::collab::{FingerprintService, MatchSearchService};

use crate::config::CollaboratorsConfig;

/// The fingerprint and search services used by one orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub fingerprinter: Arc<dyn FingerprintService>,
    pub searcher: Arc<dyn MatchSearchService>,
}

/// Build the collaborators selected by `[collaborators].provider`.
///
/// # Errors
///
/// Returns an error for unknown providers, missing endpoint URLs, or an
/// `api_key_env` variable that is not set.
pub fn create_collaborators(config: &CollaboratorsConfig) -> Result<Collaborators> {
    match config.provider.as_str() {
        "demo" => Ok(Collaborators {
            fingerprinter: Arc::new(DigestFingerprinter),
            searcher: Arc::new(DemoCatalogSearch::default()),
        }),
        "remote" => Ok(Collaborators {
            fingerprinter: Arc::new(RemoteFingerprinter::new(config)?),
            searcher: Arc::new(RemoteMatchSearch::new(config)?),
        }),
        other => bail!("Unknown collaborator provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_provider_is_default() {
        let collaborators = create_collaborators(&CollaboratorsConfig::default()).unwrap();
        assert_eq!(collaborators.fingerprinter.name(), "sha256-digest");
        assert_eq!(collaborators.searcher.name(), "demo-catalog");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = CollaboratorsConfig {
            provider: "sonar".to_string(),
            ..CollaboratorsConfig::default()
        };
        assert!(create_collaborators(&config).is_err());
    }

    #[test]
    fn remote_requires_urls() {
        let config = CollaboratorsConfig {
            provider: "remote".to_string(),
            ..CollaboratorsConfig::default()
        };
        let err = create_collaborators(&config).err().unwrap();
        assert!(err.to_string().contains("fingerprint_url"));
    }
}
