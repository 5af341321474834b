//! Alert/result registry abstraction.
//!
//! The [`AlertRegistry`] trait owns every [`SimilarityMatch`] and its
//! [`Alert`](crate::models::Alert) projection. The orchestrator writes a
//! job's result set once the job completes; readers list, filter, and
//! acknowledge alerts. The registry never calls back into the orchestrator.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`record_results`](AlertRegistry::record_results) | Replace a job's result set |
//! | [`list_alerts`](AlertRegistry::list_alerts) | Filtered, ordered alert listing |
//! | [`get_alert`](AlertRegistry::get_alert) | Single alert lookup |
//! | [`acknowledge`](AlertRegistry::acknowledge) | Mark an alert actioned or dismissed |
//! | [`clear_job`](AlertRegistry::clear_job) | Drop a job's result set |
//! | [`summary`](AlertRegistry::summary) | Counts by severity and state |

pub mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Acknowledgement, AlertFilter, AlertSummary, AlertView, JobId, MatchId, SimilarityMatch,
};

#[async_trait]
pub trait AlertRegistry: Send + Sync {
    /// Replace any prior result set for `job_id` with `matches`.
    ///
    /// Recording the same payload twice leaves one copy. Alerts for match
    /// ids present in both the old and new set keep their acknowledgement.
    async fn record_results(&self, job_id: JobId, matches: Vec<SimilarityMatch>) -> Result<()>;

    /// List alerts joined with their matches, most recent detection first,
    /// ties broken by descending score.
    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<AlertView>>;

    async fn get_alert(&self, match_id: MatchId) -> Result<Option<AlertView>>;

    /// Move an open alert to a terminal state.
    ///
    /// Repeating the current terminal state is a no-op. Fails with
    /// `NotFound` for unknown ids and for alerts already in the other
    /// terminal state; the message names that state.
    async fn acknowledge(&self, match_id: MatchId, ack: Acknowledgement) -> Result<AlertView>;

    /// Remove the result set of `job_id`. Returns how many matches were dropped.
    async fn clear_job(&self, job_id: JobId) -> Result<usize>;

    async fn summary(&self) -> Result<AlertSummary>;
}

/// Listing order: detected-at descending, then score descending, then match id.
pub fn compare_alerts(a: &AlertView, b: &AlertView) -> Ordering {
    b.similarity
        .detected_at
        .cmp(&a.similarity.detected_at)
        .then_with(|| b.similarity.score.cmp(&a.similarity.score))
        .then_with(|| a.similarity.id.cmp(&b.similarity.id))
}

pub fn order_alerts(views: &mut [AlertView]) {
    views.sort_by(compare_alerts);
}
