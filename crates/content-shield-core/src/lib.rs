//! # Content Shield Core
//!
//! Shared, runtime-agnostic logic for Content Shield: the media asset data
//! model, the scan job state machine, the severity policy, the error
//! taxonomy, the collaborator traits, and the alert registry.
//!
//! This crate contains no tokio, HTTP, or filesystem dependencies. The
//! orchestrator, ingestor, and outer surfaces live in the `content-shield`
//! crate.

pub mod collab;
pub mod error;
pub mod job;
pub mod models;
pub mod registry;
