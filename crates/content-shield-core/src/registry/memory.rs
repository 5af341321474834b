//! In-memory [`AlertRegistry`] implementation.
//!
//! Uses `HashMap`s behind a single `std::sync::RwLock`. Writes are keyed by
//! job id, so result sets of different jobs never overlap.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, ShieldError};
use crate::models::{
    AckState, Acknowledgement, Alert, AlertFilter, AlertSummary, AlertView, JobId, MatchId,
    SimilarityMatch,
};

use super::{order_alerts, AlertRegistry};

#[derive(Default)]
struct RegistryState {
    by_job: HashMap<JobId, Vec<MatchId>>,
    matches: HashMap<MatchId, SimilarityMatch>,
    alerts: HashMap<MatchId, Alert>,
}

impl RegistryState {
    fn view(&self, match_id: &MatchId) -> Option<AlertView> {
        let m = self.matches.get(match_id)?;
        let alert = self
            .alerts
            .get(match_id)
            .cloned()
            .unwrap_or_else(|| Alert::open(*match_id));
        Some(AlertView::new(alert, m.clone()))
    }

    fn remove_job(&mut self, job_id: &JobId) -> usize {
        let ids = self.by_job.remove(job_id).unwrap_or_default();
        for id in &ids {
            self.matches.remove(id);
            self.alerts.remove(id);
        }
        ids.len()
    }
}

/// In-memory registry for the CLI, the HTTP server, and tests.
#[derive(Default)]
pub struct InMemoryRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|_| ShieldError::Internal("alert registry lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|_| ShieldError::Internal("alert registry lock poisoned".to_string()))
    }
}

#[async_trait]
impl AlertRegistry for InMemoryRegistry {
    async fn record_results(&self, job_id: JobId, matches: Vec<SimilarityMatch>) -> Result<()> {
        if let Some(stray) = matches.iter().find(|m| m.job_id != job_id) {
            return Err(ShieldError::Conflict(format!(
                "match {} belongs to job {}, not {}",
                stray.id, stray.job_id, job_id
            )));
        }

        let mut state = self.write()?;

        if let Some(taken) = matches.iter().find(|m| {
            state
                .matches
                .get(&m.id)
                .is_some_and(|existing| existing.job_id != job_id)
        }) {
            return Err(ShieldError::Conflict(format!(
                "match id {} is already recorded for another job",
                taken.id
            )));
        }

        let new_ids: HashSet<MatchId> = matches.iter().map(|m| m.id).collect();
        let previous = state.by_job.remove(&job_id).unwrap_or_default();
        for id in previous.iter().filter(|id| !new_ids.contains(id)) {
            state.matches.remove(id);
            state.alerts.remove(id);
        }

        let mut ids = Vec::with_capacity(matches.len());
        for m in matches {
            if ids.contains(&m.id) {
                continue;
            }
            ids.push(m.id);
            // A changed payload under a known id starts a fresh alert.
            if state.matches.get(&m.id) != Some(&m) {
                state.alerts.insert(m.id, Alert::open(m.id));
            }
            state.matches.insert(m.id, m);
        }
        state.by_job.insert(job_id, ids);
        Ok(())
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<AlertView>> {
        let state = self.read()?;
        let mut views: Vec<AlertView> = state
            .matches
            .keys()
            .filter_map(|id| state.view(id))
            .filter(|v| filter.matches(v))
            .collect();
        order_alerts(&mut views);
        Ok(views)
    }

    async fn get_alert(&self, match_id: MatchId) -> Result<Option<AlertView>> {
        Ok(self.read()?.view(&match_id))
    }

    async fn acknowledge(&self, match_id: MatchId, ack: Acknowledgement) -> Result<AlertView> {
        let mut state = self.write()?;
        if !state.matches.contains_key(&match_id) {
            return Err(ShieldError::NotFound(format!("alert {}", match_id)));
        }
        let requested = AckState::from(ack);
        let alert = state
            .alerts
            .entry(match_id)
            .or_insert_with(|| Alert::open(match_id));
        match alert.state {
            AckState::Open => {
                alert.state = requested;
                alert.acknowledged_at = Some(Utc::now());
            }
            current if current == requested => {}
            current => {
                return Err(ShieldError::NotFound(format!(
                    "open alert {} (already {})",
                    match_id, current
                )))
            }
        }
        state
            .view(&match_id)
            .ok_or_else(|| ShieldError::NotFound(format!("alert {}", match_id)))
    }

    async fn clear_job(&self, job_id: JobId) -> Result<usize> {
        Ok(self.write()?.remove_job(&job_id))
    }

    async fn summary(&self) -> Result<AlertSummary> {
        let state = self.read()?;
        let mut summary = AlertSummary::default();
        for id in state.matches.keys() {
            if let Some(view) = state.view(id) {
                summary.add(&view);
            }
        }
        Ok(summary)
    }
}
