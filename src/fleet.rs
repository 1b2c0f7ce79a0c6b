//! ==============================================================================
//! fleet.rs - control node facade
//! ==============================================================================
//!
//! purpose:
//!     one handle the caller (cli, a web layer, tests) keeps for the process
//!     lifetime. owns the address book, the prober, and the report and export
//!     job state, and applies the "clean addresses first" rule before any
//!     heavyweight fan-out.
//!
//! shared state:
//!     - address book behind a tokio mutex (selection + working slots)
//!     - ReportAggregator / ExportOrchestrator are Clone handles over
//!       Arc'd job boards, so background tasks and pollers see the same state
//!
//! ==============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::address::Address;
use crate::address_book::{self, AddressBook, DirectoryStore, ListStore};
use crate::client::{HttpNodeClient, NodeClient};
use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::export::{ExportBundle, ExportKind, ExportOrchestrator, ExportStatus};
use crate::jobs::JobState;
use crate::probe::{self, ProbeResult, Prober};
use crate::report::{FleetReport, ReportAggregator, ReportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningJob {
    Report(ReportKind),
    Export(ExportKind),
}

impl fmt::Display for RunningJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningJob::Report(kind) => write!(f, "{} report", kind),
            RunningJob::Export(kind) => write!(f, "{} export", kind),
        }
    }
}

pub struct Fleet {
    config: FleetConfig,
    book: Mutex<AddressBook>,
    prober: Prober,
    reports: ReportAggregator,
    exports: ExportOrchestrator,
}

impl Fleet {
    /// https client + address lists on disk, both from config
    pub fn new(config: FleetConfig) -> Result<Self> {
        let client: Arc<dyn NodeClient> = Arc::new(HttpNodeClient::new(&config)?);
        let store = Box::new(DirectoryStore::new(config.address_book.directory.clone()));
        Ok(Self::with_parts(config, client, store))
    }

    pub fn with_parts(config: FleetConfig, client: Arc<dyn NodeClient>, store: Box<dyn ListStore>) -> Self {
        let reports = ReportAggregator::new(client.clone(), &config);
        let exports = ExportOrchestrator::new(client.clone(), reports.clone(), &config);
        Self {
            book: Mutex::new(
                AddressBook::new(store, config.address_book.slots).with_default_port(config.node.default_port),
            ),
            prober: Prober::new(client),
            reports,
            exports,
            config,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn reports(&self) -> &ReportAggregator {
        &self.reports
    }

    pub fn exports(&self) -> &ExportOrchestrator {
        &self.exports
    }

    // ==========================================================================
    // address book
    // ==========================================================================

    pub async fn list_names(&self) -> Result<Vec<String>> {
        self.book.lock().await.list_names()
    }

    pub async fn select(&self, name: &str) -> Result<()> {
        self.book.lock().await.select(name)
    }

    pub async fn selected(&self) -> Option<String> {
        self.book.lock().await.selected().map(str::to_string)
    }

    pub async fn raw_addresses(&self) -> Vec<String> {
        self.book.lock().await.raw_addresses().to_vec()
    }

    pub async fn set_addresses(&self, slots: Vec<String>) -> Result<()> {
        self.book.lock().await.set_addresses(slots)
    }

    pub async fn create_list(&self, name: &str) -> Result<String> {
        self.book.lock().await.create(name)
    }

    pub async fn rename_list(&self, old: &str, new: &str) -> Result<String> {
        self.book.lock().await.rename(old, new)
    }

    pub async fn delete_list(&self, name: &str) -> Result<()> {
        self.book.lock().await.delete(name)
    }

    /// valid + currently online addresses of the selected list
    pub async fn clean_addresses(&self) -> Result<Vec<Address>> {
        let slots = self.selected_slots().await?;
        Ok(address_book::clean_addresses(
            &slots,
            &self.prober,
            self.config.timeouts.clean(),
            self.config.node.default_port,
        )
        .await)
    }

    async fn selected_slots(&self) -> Result<Vec<String>> {
        let book = self.book.lock().await;
        if book.selected().is_none() {
            return Err(FleetError::NoListSelected);
        }
        Ok(book.raw_addresses().to_vec())
    }

    // ==========================================================================
    // status
    // ==========================================================================

    /// probe every valid slot of the selected list, sorted by hostname
    pub async fn check_status(&self, with_hostname: bool) -> Result<Vec<ProbeResult>> {
        let slots = self.selected_slots().await?;
        let addresses: Vec<Address> = slots
            .iter()
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| Address::parse(s).ok())
            .collect();
        if addresses.is_empty() {
            return Err(FleetError::NoAddresses);
        }

        let mut results = self
            .prober
            .probe(&addresses, self.config.timeouts.probe(), with_hostname)
            .await;
        probe::sort_by_display_key(&mut results);
        Ok(results)
    }

    // ==========================================================================
    // reports
    // ==========================================================================

    /// clean the selected list and start a report in the background
    pub async fn start_report(&self, kind: ReportKind) -> Result<bool> {
        if self.reports.state(kind) == JobState::Running {
            return Ok(false);
        }
        let addresses = self.clean_addresses().await?;
        self.reports.start_report(kind, addresses)
    }

    pub async fn run_report(&self, kind: ReportKind) -> Result<Option<Arc<FleetReport>>> {
        let addresses = self.clean_addresses().await?;
        self.reports.run_report(kind, &addresses).await
    }

    pub fn report_state(&self, kind: ReportKind) -> JobState {
        self.reports.state(kind)
    }

    pub fn take_report(&self, kind: ReportKind) -> Option<Arc<FleetReport>> {
        self.reports.take_report(kind)
    }

    // ==========================================================================
    // exports
    // ==========================================================================

    pub async fn start_export(&self, kind: ExportKind) -> Result<bool> {
        if self.exports.status(kind).state == JobState::Running {
            return Ok(false);
        }
        let addresses = self.clean_addresses().await?;
        self.exports.start_export(kind, addresses)
    }

    pub async fn run_export(&self, kind: ExportKind) -> Result<Option<Arc<ExportBundle>>> {
        let addresses = self.clean_addresses().await?;
        self.exports.run_export(kind, &addresses).await
    }

    pub fn export_status(&self, kind: ExportKind) -> ExportStatus {
        self.exports.status(kind)
    }

    pub fn take_export(&self, kind: ExportKind) -> Option<Arc<ExportBundle>> {
        self.exports.take_export(kind)
    }

    /// every report and export kind currently being built
    pub fn running_jobs(&self) -> Vec<RunningJob> {
        self.reports
            .running()
            .into_iter()
            .map(RunningJob::Report)
            .chain(self.exports.running().into_iter().map(RunningJob::Export))
            .collect()
    }
}
