//! Scan job state machine.
//!
//! A [`ScanJob`] moves `staged → fingerprinting → searching → completed`,
//! or to `failed` from any non-terminal state. Every transition is checked
//! against the current state, so a late collaborator response for a job
//! that was already cancelled or timed out is rejected instead of applied.
//!
//! Progress is split into two phases: fingerprinting covers `0..=40`,
//! searching covers `40..=99`, and only completion sets `100`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::models::{AssetId, JobId, MediaAsset, MediaKind};

/// Upper bound of progress while fingerprinting; reached on entering search.
pub const FINGERPRINT_PHASE_CEILING: u8 = 40;
/// Upper bound of progress while searching. 100 is reserved for completion.
pub const SEARCH_PHASE_CEILING: u8 = 99;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// The asset has never been scanned.
    Idle,
    Staged,
    Fingerprinting,
    Searching,
    Completed,
    Failed,
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Completed | ScanState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Staged => "staged",
            ScanState::Fingerprinting => "fingerprinting",
            ScanState::Searching => "searching",
            ScanState::Completed => "completed",
            ScanState::Failed => "failed",
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended in [`ScanState::Failed`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailureReason {
    Cancelled,
    Timeout,
    Fingerprint(String),
    Search(String),
    Internal(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::Fingerprint(msg) => write!(f, "fingerprint: {}", msg),
            FailureReason::Search(msg) => write!(f, "search: {}", msg),
            FailureReason::Internal(msg) => write!(f, "internal: {}", msg),
        }
    }
}

impl Serialize for FailureReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("job {job_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: ScanState,
    pub to: ScanState,
}

/// The `{state, progress}` pair readers observe, plus the failure reason.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub asset_id: AssetId,
    pub state: ScanState,
    pub progress: u8,
    pub failure: Option<FailureReason>,
}

/// One attempt to check a media asset.
#[derive(Clone, Debug, Serialize)]
pub struct ScanJob {
    pub id: JobId,
    pub asset_id: AssetId,
    pub asset_name: String,
    pub asset_kind: MediaKind,
    state: ScanState,
    progress: u8,
    pub started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    failure: Option<FailureReason>,
    attempts: u32,
}

impl ScanJob {
    /// Create a job in [`ScanState::Staged`] for `asset`.
    pub fn new(asset: &MediaAsset, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            asset_id: asset.id,
            asset_name: asset.name.clone(),
            asset_kind: asset.kind,
            state: ScanState::Staged,
            progress: 0,
            started_at: now,
            completed_at: None,
            failure: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    /// Number of collaborator calls made so far, retries included.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.id,
            asset_id: self.asset_id,
            state: self.state,
            progress: self.progress,
            failure: self.failure.clone(),
        }
    }

    fn require_state(&self, from: ScanState, to: ScanState) -> Result<(), TransitionError> {
        if self.state == from {
            Ok(())
        } else {
            Err(TransitionError {
                job_id: self.id,
                from: self.state,
                to,
            })
        }
    }

    pub fn begin_fingerprinting(&mut self) -> Result<(), TransitionError> {
        self.require_state(ScanState::Staged, ScanState::Fingerprinting)?;
        self.state = ScanState::Fingerprinting;
        Ok(())
    }

    pub fn begin_searching(&mut self) -> Result<(), TransitionError> {
        self.require_state(ScanState::Fingerprinting, ScanState::Searching)?;
        self.state = ScanState::Searching;
        self.progress = self.progress.max(FINGERPRINT_PHASE_CEILING);
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require_state(ScanState::Searching, ScanState::Completed)?;
        self.state = ScanState::Completed;
        self.progress = 100;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Move to [`ScanState::Failed`]. Progress is left where it stopped.
    pub fn fail(&mut self, reason: FailureReason, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError {
                job_id: self.id,
                from: self.state,
                to: ScanState::Failed,
            });
        }
        self.state = ScanState::Failed;
        self.failure = Some(reason);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Advance progress by `step`, capped at the current phase ceiling.
    ///
    /// Returns `true` if the value changed. Staged and terminal jobs never move.
    pub fn tick(&mut self, step: u8) -> bool {
        let ceiling = match self.state {
            ScanState::Fingerprinting => FINGERPRINT_PHASE_CEILING,
            ScanState::Searching => SEARCH_PHASE_CEILING,
            _ => return false,
        };
        let next = self.progress.saturating_add(step).min(ceiling);
        if next > self.progress {
            self.progress = next;
            true
        } else {
            false
        }
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }
}
