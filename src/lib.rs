//! ==============================================================================
//! sensor_fleet - fleet query & report aggregation engine
//! ==============================================================================
//!
//! purpose:
//!     the control-node side of a home sensor fleet. many raspberry pi nodes
//!     expose an https command endpoint; this crate probes them, gathers
//!     fleet-wide reports and builds bulk export bundles, tolerating nodes
//!     that are slow, offline or misconfigured.
//!
//! layering (leaves first):
//!
//! ```text
//!     address ─┬─ client ── probe ── address_book
//!              │              │
//!              │              ├── report (gather, settings, render)
//!              │              └── export
//!              └────────────────── fleet (facade)
//!
//!     jobs.rs holds the single-flight state shared by report and export.
//! ```
//!
//! ==============================================================================

pub mod address;
pub mod address_book;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod fleet;
pub mod jobs;
pub mod logging;
pub mod probe;
pub mod report;

pub use address::{Address, NodeKey, DEFAULT_PORT};
pub use address_book::{AddressBook, DirectoryStore, ListStore};
pub use client::{Command, HttpNodeClient, NodeClient, Payload};
pub use config::FleetConfig;
pub use error::{FleetError, Result};
pub use export::{ExportArtifact, ExportBundle, ExportKind, ExportOrchestrator, ExportStatus, StorageMode};
pub use fleet::{Fleet, RunningJob};
pub use jobs::JobState;
pub use probe::{ProbeResult, Prober};
pub use report::{FleetReport, ReportAggregator, ReportKind};
