//! # Content Shield
//!
//! Scan orchestration for content protection. A creator stages an image or
//! audio file; a scan job fingerprints it, searches for copies, and turns
//! every candidate into a similarity match with a severity tier and an
//! alert the creator can action or dismiss.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────────────────┐   ┌──────────┐
//! │  Upload  │──▶│   Ingestor   │──▶│      Orchestrator       │──▶│ Registry │
//! │ CLI/HTTP │   │ limits+types │   │ fingerprint ▸ search    │   │  alerts  │
//! └──────────┘   └──────────────┘   └───────────┬─────────────┘   └──────────┘
//!                                               │
//!                                   ┌───────────┴───────────┐
//!                                   ▼                       ▼
//!                             demo collaborators     remote collaborators
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! shield scan ./portfolio             # scan every image/audio file
//! shield --config shield.toml serve   # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`ingest`] | Upload validation and staging |
//! | [`orchestrator`] | Scan job lifecycle |
//! | [`collaborators`] | Fingerprint and search services |
//! | [`progress`] | Scan progress reporters |
//! | [`scan_cmd`] | `shield scan` |
//! | [`server`] | HTTP API |
//!
//! Domain types, the job state machine, and the alert registry live in the
//! `content-shield-core` crate.

pub mod collaborators;
pub mod config;
pub mod ingest;
pub mod orchestrator;
pub mod progress;
pub mod scan_cmd;
pub mod server;
