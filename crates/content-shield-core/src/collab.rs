//! Collaborator traits for the external fingerprint and match search services.
//!
//! The orchestrator never computes similarity itself. It calls a
//! [`FingerprintService`] to derive a [`Fingerprint`] from a staged asset,
//! then hands that fingerprint to a [`MatchSearchService`] which returns
//! scored [`MatchCandidate`]s.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use content_shield_core::collab::FingerprintService;
//! use content_shield_core::error::FingerprintError;
//! use content_shield_core::models::{Fingerprint, MediaAsset};
//!
//! struct LengthFingerprint;
//!
//! #[async_trait]
//! impl FingerprintService for LengthFingerprint {
//!     fn name(&self) -> &str { "length" }
//!
//!     async fn compute_fingerprint(
//!         &self,
//!         asset: &MediaAsset,
//!     ) -> Result<Fingerprint, FingerprintError> {
//!         Ok(Fingerprint {
//!             algorithm: "length".to_string(),
//!             kind: asset.kind,
//!             digest: asset.size_bytes.to_string(),
//!         })
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::{FingerprintError, SearchError};
use crate::models::{Fingerprint, MatchCandidate, MediaAsset};

/// Produces a content fingerprint for a staged asset.
///
/// Implementations may perform network I/O. The orchestrator applies its
/// own timeout and may drop the returned future at any point (cancellation),
/// so implementations must not rely on running to completion.
#[async_trait]
pub trait FingerprintService: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn compute_fingerprint(&self, asset: &MediaAsset)
        -> Result<Fingerprint, FingerprintError>;
}

/// Looks up candidate copies of a fingerprinted asset.
///
/// An empty result is a successful scan with no matches.
#[async_trait]
pub trait MatchSearchService: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn search(
        &self,
        asset: &MediaAsset,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<MatchCandidate>, SearchError>;
}
