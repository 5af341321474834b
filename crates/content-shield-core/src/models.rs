//! Core data models used throughout Content Shield.
//!
//! These types represent the staged media assets, collaborator outputs,
//! similarity matches, and alert projections that flow between the
//! ingestor, the orchestrator, and the registry.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_type!(
    /// Unique identifier of a staged [`MediaAsset`].
    AssetId
);
id_type!(
    /// Unique identifier of a scan job.
    JobId
);
id_type!(
    /// Unique identifier of a [`SimilarityMatch`] (and its [`Alert`]).
    MatchId
);

/// The two media families the scanner protects.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "audio" => Ok(MediaKind::Audio),
            other => Err(format!("unknown media kind: '{}' (expected image or audio)", other)),
        }
    }
}

/// Shared, immutable file content of a staged asset.
///
/// Cloning is cheap (reference counted). `Debug` prints the length only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AssetContent(Arc<[u8]>);

impl AssetContent {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for AssetContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<&[u8]> for AssetContent {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

impl fmt::Debug for AssetContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetContent({} bytes)", self.0.len())
    }
}

/// One user-submitted file awaiting or under protection.
///
/// Created by the ingestor after validation and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct MediaAsset {
    pub id: AssetId,
    pub name: String,
    pub kind: MediaKind,
    pub size_bytes: u64,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip)]
    pub content: AssetContent,
}

/// Compact derived representation of an asset's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Label of the algorithm that produced the digest (e.g. `"sha256"`).
    pub algorithm: String,
    pub kind: MediaKind,
    pub digest: String,
}

/// What a match points at: a title (artwork or track), an optional artist,
/// and an optional URL where the copy was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDescriptor {
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A raw candidate returned by a match search collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Platform or site identifier where the candidate was detected.
    pub source: String,
    /// Similarity score, clamped to 0..=100 when materialized.
    pub score: u8,
    pub descriptor: MatchDescriptor,
}

/// Fixed three-level classification of a similarity score.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Scores at or above this are [`Severity::High`].
pub const HIGH_SEVERITY_MIN_SCORE: u8 = 80;
/// Scores at or above this (and below the high threshold) are [`Severity::Medium`].
pub const MEDIUM_SEVERITY_MIN_SCORE: u8 = 60;

impl Severity {
    /// Classify a similarity score. The same thresholds apply to every media kind.
    pub fn from_score(score: u8) -> Self {
        if score >= HIGH_SEVERITY_MIN_SCORE {
            Severity::High
        } else if score >= MEDIUM_SEVERITY_MIN_SCORE {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity: '{}'", other)),
        }
    }
}

/// One candidate match materialized for a completed job.
///
/// Severity is not stored: it is always derived from `score`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimilarityMatch {
    pub id: MatchId,
    pub job_id: JobId,
    pub asset_id: AssetId,
    pub asset_kind: MediaKind,
    pub descriptor: MatchDescriptor,
    pub score: u8,
    pub source: String,
    pub detected_at: DateTime<Utc>,
}

impl SimilarityMatch {
    /// Build a match from a collaborator candidate, clamping the score to 100.
    pub fn from_candidate(
        job_id: JobId,
        asset_id: AssetId,
        asset_kind: MediaKind,
        candidate: MatchCandidate,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MatchId::new(),
            job_id,
            asset_id,
            asset_kind,
            descriptor: candidate.descriptor,
            score: candidate.score.min(100),
            source: candidate.source,
            detected_at,
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::from_score(self.score)
    }
}

/// Acknowledgement state of an alert. Moves forward only.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckState {
    Open,
    Actioned,
    Dismissed,
}

impl AckState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AckState::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AckState::Open => "open",
            AckState::Actioned => "actioned",
            AckState::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for AckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(AckState::Open),
            "actioned" => Ok(AckState::Actioned),
            "dismissed" => Ok(AckState::Dismissed),
            other => Err(format!("unknown acknowledgement state: '{}'", other)),
        }
    }
}

/// The terminal states a caller may acknowledge an alert as.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acknowledgement {
    Actioned,
    Dismissed,
}

impl From<Acknowledgement> for AckState {
    fn from(ack: Acknowledgement) -> Self {
        match ack {
            Acknowledgement::Actioned => AckState::Actioned,
            Acknowledgement::Dismissed => AckState::Dismissed,
        }
    }
}

/// Action-tracking projection of a [`SimilarityMatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub match_id: MatchId,
    pub state: AckState,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn open(match_id: MatchId) -> Self {
        Self {
            match_id,
            state: AckState::Open,
            acknowledged_at: None,
        }
    }
}

/// An alert joined with the match it tracks, as returned by `list_alerts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertView {
    pub alert: Alert,
    #[serde(rename = "match")]
    pub similarity: SimilarityMatch,
    pub severity: Severity,
}

impl AlertView {
    pub fn new(alert: Alert, similarity: SimilarityMatch) -> Self {
        let severity = similarity.severity();
        Self {
            alert,
            similarity,
            severity,
        }
    }
}

/// Optional filters for `list_alerts`. Empty filter returns everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AlertFilter {
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default, alias = "kind")]
    pub asset_kind: Option<MediaKind>,
    #[serde(default)]
    pub state: Option<AckState>,
}

impl AlertFilter {
    pub fn matches(&self, view: &AlertView) -> bool {
        self.severity.map_or(true, |s| s == view.severity)
            && self
                .asset_kind
                .map_or(true, |k| k == view.similarity.asset_kind)
            && self.state.map_or(true, |s| s == view.alert.state)
    }
}

/// Aggregate counts over the registry, by severity and acknowledgement state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub open: usize,
    pub actioned: usize,
    pub dismissed: usize,
}

impl AlertSummary {
    pub fn add(&mut self, view: &AlertView) {
        self.total += 1;
        match view.severity {
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
        match view.alert.state {
            AckState::Open => self.open += 1,
            AckState::Actioned => self.actioned += 1,
            AckState::Dismissed => self.dismissed += 1,
        }
    }
}
