//! ==============================================================================
//! report - fleet report aggregation
//! ==============================================================================
//!
//! purpose:
//!     fans a per-node gather out over the cleaned address list, joins every
//!     unit, sorts the records by display key and keeps the assembled report
//!     until the caller takes it. at most one run per report kind is in flight.
//!
//! flow:
//!
//! ```text
//!     start_report(kind, addresses)
//!         │  NoAddresses when empty
//!         │  no-op when kind is already Running
//!         ▼
//!     tokio task ── build() ── gather_section() per section
//!                                  ├── spawn gather unit per address
//!                                  ├── join all, collector drained
//!                                  └── sort by hostname, then address
//!         ▼
//!     Ready ── take_report() ──> Idle
//! ```
//!
//! submodules:
//!     - gather.rs:   per-node commands -> NodeReport records
//!     - settings.rs: configuration dump parsing + badges
//!     - render.rs:   FleetReport -> html
//!
//! ==============================================================================

pub mod gather;
pub mod render;
pub mod settings;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::address::Address;
use crate::client::NodeClient;
use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::jobs::{JobBoard, JobState};

pub use gather::{GatherTimeouts, LoginCheck, NodeOutcome, NodeReport, ReportBody};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ReportKind {
    System,
    Configuration,
    Readings,
    Latency,
    Combination,
}

impl ReportKind {
    pub const ALL: [ReportKind; 5] = [
        ReportKind::System,
        ReportKind::Configuration,
        ReportKind::Readings,
        ReportKind::Latency,
        ReportKind::Combination,
    ];

    /// sections a report of this kind is assembled from
    pub fn sections(self) -> &'static [ReportKind] {
        match self {
            ReportKind::System => &[ReportKind::System],
            ReportKind::Configuration => &[ReportKind::Configuration],
            ReportKind::Readings => &[ReportKind::Readings],
            ReportKind::Latency => &[ReportKind::Latency],
            ReportKind::Combination => &[
                ReportKind::System,
                ReportKind::Configuration,
                ReportKind::Readings,
                ReportKind::Latency,
            ],
        }
    }

    pub fn title(self) -> String {
        match self {
            ReportKind::System => "Sensors System Report".to_string(),
            ReportKind::Configuration => "Sensors Configuration Report".to_string(),
            ReportKind::Readings => "Sensors Readings Report".to_string(),
            ReportKind::Latency => "Sensors Latency Report".to_string(),
            ReportKind::Combination => "Sensors Combination Report".to_string(),
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportKind::System => "system",
            ReportKind::Configuration => "configuration",
            ReportKind::Readings => "readings",
            ReportKind::Latency => "latency",
            ReportKind::Combination => "combination",
        };
        f.write_str(name)
    }
}

impl FromStr for ReportKind {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" | "systems" => Ok(ReportKind::System),
            "configuration" | "config" => Ok(ReportKind::Configuration),
            "readings" | "sensors" => Ok(ReportKind::Readings),
            "latency" => Ok(ReportKind::Latency),
            "combination" | "combo" => Ok(ReportKind::Combination),
            _ => Err(FleetError::InvalidReportKind(s.to_string())),
        }
    }
}

// ==============================================================================
// assembled report
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ReportSection {
    pub kind: ReportKind,
    /// sorted by display key, then address
    pub nodes: Vec<NodeReport>,
}

impl ReportSection {
    pub fn online_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_online()).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    pub kind: ReportKind,
    pub generated: DateTime<Utc>,
    pub sections: Vec<ReportSection>,
}

impl FleetReport {
    pub fn to_html(&self) -> String {
        render::html(self)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn sort_nodes(nodes: &mut [NodeReport]) {
    nodes.sort_by(|a, b| {
        a.display_key()
            .cmp(b.display_key())
            .then_with(|| a.address.cmp(&b.address))
    });
}

// ==============================================================================
// aggregator
// ==============================================================================

#[derive(Clone)]
pub struct ReportAggregator {
    gatherer: Arc<gather::Gatherer>,
    jobs: JobBoard<ReportKind, Arc<FleetReport>>,
}

impl ReportAggregator {
    pub fn new(client: Arc<dyn NodeClient>, config: &FleetConfig) -> Self {
        let timeouts = GatherTimeouts {
            gather: config.timeouts.gather(),
            readings: config.timeouts.readings(),
        };
        Self {
            gatherer: Arc::new(gather::Gatherer {
                client,
                timeouts,
                default_port: config.node.default_port,
            }),
            jobs: JobBoard::new(),
        }
    }

    /// start a background run. Ok(false) when this kind is already running.
    ///
    /// `addresses` should be the cleaned (online) list.
    pub fn start_report(&self, kind: ReportKind, addresses: Vec<Address>) -> Result<bool> {
        if addresses.is_empty() {
            return Err(FleetError::NoAddresses);
        }
        let Some(guard) = self.jobs.try_begin(kind) else {
            tracing::info!("[REPORT] {} report already running, ignoring start", kind);
            return Ok(false);
        };

        let aggregator = self.clone();
        tokio::spawn(async move {
            let report = aggregator.build(kind, &addresses).await;
            guard.complete(Arc::new(report));
        });
        Ok(true)
    }

    /// run in the caller's task and hand the report straight back.
    /// Ok(None) when this kind is already running elsewhere.
    pub async fn run_report(&self, kind: ReportKind, addresses: &[Address]) -> Result<Option<Arc<FleetReport>>> {
        if addresses.is_empty() {
            return Err(FleetError::NoAddresses);
        }
        let Some(guard) = self.jobs.try_begin(kind) else {
            return Ok(None);
        };
        let report = Arc::new(self.build(kind, addresses).await);
        guard.complete(report.clone());
        self.jobs.take(kind);
        Ok(Some(report))
    }

    /// gather and assemble without touching job state
    pub async fn build(&self, kind: ReportKind, addresses: &[Address]) -> FleetReport {
        tracing::info!("[REPORT] building {} report for {} nodes", kind, addresses.len());

        let handles: Vec<_> = kind
            .sections()
            .iter()
            .map(|&section| {
                let gatherer = self.gatherer.clone();
                let addresses = addresses.to_vec();
                tokio::spawn(async move { gather_section(gatherer, section, addresses).await })
            })
            .collect();

        let mut sections = Vec::with_capacity(handles.len());
        for (handle, &section) in handles.into_iter().zip(kind.sections()) {
            match handle.await {
                Ok(built) => sections.push(built),
                Err(e) => {
                    tracing::error!("[REPORT] {} section task failed: {}", section, e);
                    sections.push(ReportSection { kind: section, nodes: Vec::new() });
                }
            }
        }

        let report = FleetReport {
            kind,
            generated: Utc::now(),
            sections,
        };
        tracing::info!("[REPORT] {} report ready", kind);
        report
    }

    pub fn state(&self, kind: ReportKind) -> JobState {
        self.jobs.state(kind)
    }

    /// consume a finished report (Ready -> Idle)
    pub fn take_report(&self, kind: ReportKind) -> Option<Arc<FleetReport>> {
        self.jobs.take(kind)
    }

    /// look at a finished report without consuming it
    pub fn report(&self, kind: ReportKind) -> Option<Arc<FleetReport>> {
        self.jobs.peek(kind)
    }

    pub fn running(&self) -> Vec<ReportKind> {
        let mut running = self.jobs.running();
        running.sort();
        running
    }
}

async fn gather_section(gatherer: Arc<gather::Gatherer>, kind: ReportKind, addresses: Vec<Address>) -> ReportSection {
    let collector: Arc<Mutex<Vec<NodeReport>>> = Arc::new(Mutex::new(Vec::with_capacity(addresses.len())));

    let mut handles = Vec::with_capacity(addresses.len());
    for address in addresses {
        let gatherer = gatherer.clone();
        let collector = collector.clone();
        let unit_address = address.clone();
        let handle = tokio::spawn(async move {
            let record = gatherer.gather(kind, &unit_address).await;
            collector.lock().await.push(record);
        });
        handles.push((address, handle));
    }

    let mut lost = Vec::new();
    for (address, handle) in handles {
        if let Err(e) = handle.await {
            tracing::warn!("[REPORT] gather unit for {} failed: {}", address, e);
            lost.push(NodeReport {
                address: address.clone(),
                endpoint: address.host_port(gatherer.default_port),
                link: address.base_url(gatherer.default_port),
                hostname: None,
                latency: None,
                login: LoginCheck::Unknown,
                outcome: NodeOutcome::Failed(e.to_string()),
            });
        }
    }

    let mut nodes = std::mem::take(&mut *collector.lock().await);
    nodes.extend(lost);
    sort_nodes(&mut nodes);
    ReportSection { kind, nodes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parsing() {
        assert_eq!("System".parse::<ReportKind>().unwrap(), ReportKind::System);
        assert_eq!("combo".parse::<ReportKind>().unwrap(), ReportKind::Combination);
        assert!(matches!(
            "weather".parse::<ReportKind>(),
            Err(FleetError::InvalidReportKind(k)) if k == "weather"
        ));
    }

    #[test]
    fn combination_has_four_sections() {
        assert_eq!(ReportKind::Combination.sections().len(), 4);
        assert_eq!(ReportKind::Latency.sections(), &[ReportKind::Latency]);
    }
}
