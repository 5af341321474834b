//! Scan progress reporting.
//!
//! The orchestrator emits a [`ScanEvent`] on every state transition and on
//! every synthetic progress tick. Reporters render those events for the
//! CLI. Output goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;

use content_shield_core::job::{FailureReason, ScanState};
use content_shield_core::models::JobId;

/// A single progress event for a scan job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanEvent {
    /// The job entered `state`.
    Transition {
        job_id: JobId,
        asset_name: String,
        state: ScanState,
        progress: u8,
        failure: Option<FailureReason>,
    },
    /// Progress moved within the current state.
    Progress {
        job_id: JobId,
        asset_name: String,
        state: ScanState,
        progress: u8,
    },
}

impl ScanEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            ScanEvent::Transition { job_id, .. } | ScanEvent::Progress { job_id, .. } => *job_id,
        }
    }

    pub fn state(&self) -> ScanState {
        match self {
            ScanEvent::Transition { state, .. } | ScanEvent::Progress { state, .. } => *state,
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            ScanEvent::Transition { progress, .. } | ScanEvent::Progress { progress, .. } => {
                *progress
            }
        }
    }
}

/// Receives scan events. Called synchronously from the orchestrator, so
/// implementations must not block.
pub trait ScanProgressReporter: Send + Sync {
    fn report(&self, event: &ScanEvent);
}

/// Human-friendly progress on stderr: "scan Sunset.jpg  searching  45%".
pub struct StderrProgress;

impl ScanProgressReporter for StderrProgress {
    fn report(&self, event: &ScanEvent) {
        let line = match event {
            ScanEvent::Transition {
                asset_name,
                state,
                progress,
                failure: Some(reason),
                ..
            } => format!(
                "scan {}  {}  {:>3}%  ({})\n",
                asset_name, state, progress, reason
            ),
            ScanEvent::Transition {
                asset_name,
                state,
                progress,
                ..
            }
            | ScanEvent::Progress {
                asset_name,
                state,
                progress,
                ..
            } => format!("scan {}  {}  {:>3}%\n", asset_name, state, progress),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ScanProgressReporter for JsonProgress {
    fn report(&self, event: &ScanEvent) {
        let obj = match event {
            ScanEvent::Transition {
                job_id,
                asset_name,
                state,
                progress,
                failure,
            } => serde_json::json!({
                "event": "transition",
                "job_id": job_id,
                "asset": asset_name,
                "state": state,
                "progress": progress,
                "failure": failure,
            }),
            ScanEvent::Progress {
                job_id,
                asset_name,
                state,
                progress,
            } => serde_json::json!({
                "event": "progress",
                "job_id": job_id,
                "asset": asset_name,
                "state": state,
                "progress": progress,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ScanProgressReporter for NoProgress {
    fn report(&self, _event: &ScanEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ScanProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_accessors() {
        let id = JobId::new();
        let event = ScanEvent::Progress {
            job_id: id,
            asset_name: "a.png".into(),
            state: ScanState::Searching,
            progress: 55,
        };
        assert_eq!(event.job_id(), id);
        assert_eq!(event.state(), ScanState::Searching);
        assert_eq!(event.progress(), 55);
    }
}
