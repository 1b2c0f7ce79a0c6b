//! ==============================================================================
//! export.rs - bulk export orchestrator
//! ==============================================================================
//!
//! purpose:
//!     builds one downloadable zip out of every node's logs, databases or
//!     "everything", tolerating nodes that fail along the way.
//!
//! job flow (one run per export kind at a time):
//!
//! ```text
//!     1. guard        kind already Running -> no-op
//!     2. estimate     Databases / Everything: sum GetSQLDBSize over the fleet
//!     3. decide       estimate < threshold -> Memory, else Disk (fixed for the run)
//!     4. fetch        one task per node, long timeout; Disk mode stages each
//!                     artifact under the spool dir as soon as it arrives
//!     5. assemble     blocking thread writes the zip (memory buffer or
//!                     `<spool>/fleet_<kind>.zip`, replaced atomically)
//!     6. publish      Ready + ExportBundle
//!
//!     a node that fails to respond is skipped. a node that rejects the login
//!     contributes a short text entry saying so. only local i/o failures fail
//!     the job, which then returns to Idle with the error recorded.
//! ```
//!
//! relationships:
//!     - uses:    client.rs, jobs.rs, report/ (combination report for Everything)
//!     - used by: fleet.rs
//!
//! ==============================================================================

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::address::Address;
use crate::client::{Command, NodeClient};
use crate::config::{ExportConfig, FleetConfig};
use crate::error::{FleetError, Result};
use crate::jobs::{JobBoard, JobState};
use crate::report::{ReportAggregator, ReportKind};

/// body of the entry written for a node that rejected the credentials
pub const LOGIN_REJECTED_NOTE: &str = "Incorrect Login Provided";
pub const COMBINATION_REPORT_ENTRY: &str = "ReportCombo.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ExportKind {
    Logs,
    Databases,
    Everything,
}

impl ExportKind {
    pub const ALL: [ExportKind; 3] = [ExportKind::Logs, ExportKind::Databases, ExportKind::Everything];

    pub fn command(self) -> Command {
        match self {
            ExportKind::Logs => Command::DownloadZippedLogs,
            ExportKind::Databases => Command::DownloadALLSQLDatabases,
            ExportKind::Everything => Command::DownloadZippedEverything,
        }
    }

    /// only database payloads are big enough to need the estimate
    pub fn needs_size_estimate(self) -> bool {
        matches!(self, ExportKind::Databases | ExportKind::Everything)
    }

    /// fixed spool filename, overwritten on every successful run
    pub fn spool_file_name(self) -> &'static str {
        match self {
            ExportKind::Logs => "fleet_logs.zip",
            ExportKind::Databases => "fleet_databases.zip",
            ExportKind::Everything => "fleet_everything.zip",
        }
    }

    pub fn download_name(self, unix_seconds: i64) -> String {
        let prefix = match self {
            ExportKind::Logs => "Multiple_Logs",
            ExportKind::Databases => "Multiple_Databases",
            ExportKind::Everything => "TheBigZip",
        };
        format!("{}_{}.zip", prefix, unix_seconds)
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportKind::Logs => "logs",
            ExportKind::Databases => "databases",
            ExportKind::Everything => "everything",
        };
        f.write_str(name)
    }
}

impl FromStr for ExportKind {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "logs" => Ok(ExportKind::Logs),
            "databases" | "database" | "db" => Ok(ExportKind::Databases),
            "everything" | "all" => Ok(ExportKind::Everything),
            _ => Err(FleetError::InvalidExportKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StorageMode {
    Memory,
    Disk,
}

impl StorageMode {
    pub fn for_estimate(estimate_bytes: u64, threshold_bytes: u64) -> Self {
        if estimate_bytes < threshold_bytes {
            StorageMode::Memory
        } else {
            StorageMode::Disk
        }
    }
}

// ==============================================================================
// results
// ==============================================================================

#[derive(Debug, Clone)]
pub enum ExportArtifact {
    Memory(Arc<Vec<u8>>),
    Disk(PathBuf),
}

impl ExportArtifact {
    /// copy the bundle to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        match self {
            ExportArtifact::Memory(bytes) => fs::write(path, bytes.as_slice())?,
            ExportArtifact::Disk(spooled) => {
                fs::copy(spooled, path)?;
            }
        }
        Ok(())
    }

    /// size of the finished zip in bytes
    pub fn len(&self) -> Result<u64> {
        match self {
            ExportArtifact::Memory(bytes) => Ok(bytes.len() as u64),
            ExportArtifact::Disk(path) => Ok(fs::metadata(path)?.len()),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[derive(Debug, Clone)]
pub struct ExportBundle {
    pub kind: ExportKind,
    pub download_name: String,
    pub storage: StorageMode,
    pub estimate_bytes: u64,
    pub artifact: ExportArtifact,
    /// zip entry names, sorted
    pub included: Vec<String>,
    /// nodes that failed to respond
    pub skipped: Vec<Address>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportStatus {
    pub kind: ExportKind,
    pub state: JobState,
    /// decided at the start of the latest run
    pub storage: Option<StorageMode>,
    pub last_error: Option<String>,
}

// ==============================================================================
// per-node fetch
// ==============================================================================

enum EntryContent {
    Bytes(Vec<u8>),
    Staged(PathBuf),
}

struct Entry {
    name: String,
    content: EntryContent,
}

enum NodeFetch {
    Included(Entry),
    Skipped(Address, String),
}

/// `<hostname>_<address>.<ext>` with anything path-hostile replaced
pub fn entry_name(hostname: Option<&str>, address: &Address, extension: &str) -> String {
    fn safe(text: &str) -> String {
        text.chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '-' })
            .collect()
    }
    match hostname.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hostname) => format!("{}_{}.{}", safe(hostname), safe(address.as_str()), extension),
        None => format!("{}.{}", safe(address.as_str()), extension),
    }
}

#[derive(Clone)]
struct ExportSettings {
    export: ExportConfig,
    gather_timeout: Duration,
    fetch_timeout: Duration,
}

// ==============================================================================
// orchestrator
// ==============================================================================

#[derive(Clone)]
pub struct ExportOrchestrator {
    client: Arc<dyn NodeClient>,
    reports: ReportAggregator,
    settings: ExportSettings,
    jobs: JobBoard<ExportKind, Arc<ExportBundle>>,
    modes: Arc<Mutex<HashMap<ExportKind, StorageMode>>>,
}

impl ExportOrchestrator {
    pub fn new(client: Arc<dyn NodeClient>, reports: ReportAggregator, config: &FleetConfig) -> Self {
        Self {
            client,
            reports,
            settings: ExportSettings {
                export: config.export.clone(),
                gather_timeout: config.timeouts.gather(),
                fetch_timeout: config.timeouts.fetch(),
            },
            jobs: JobBoard::new(),
            modes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// start a background run. Ok(false) when this kind is already running.
    pub fn start_export(&self, kind: ExportKind, addresses: Vec<Address>) -> Result<bool> {
        if addresses.is_empty() {
            return Err(FleetError::NoAddresses);
        }
        let Some(guard) = self.jobs.try_begin(kind) else {
            tracing::info!("[EXPORT] {} export already running, ignoring start", kind);
            return Ok(false);
        };

        let orchestrator = self.clone();
        tokio::spawn(async move {
            match orchestrator.execute(kind, &addresses).await {
                Ok(bundle) => guard.complete(Arc::new(bundle)),
                Err(e) => {
                    tracing::error!("[EXPORT] {} export failed: {}", kind, e);
                    guard.fail(e);
                }
            }
        });
        Ok(true)
    }

    /// run in the caller's task. Ok(None) when this kind is already running.
    pub async fn run_export(&self, kind: ExportKind, addresses: &[Address]) -> Result<Option<Arc<ExportBundle>>> {
        if addresses.is_empty() {
            return Err(FleetError::NoAddresses);
        }
        let Some(guard) = self.jobs.try_begin(kind) else {
            return Ok(None);
        };
        match self.execute(kind, addresses).await {
            Ok(bundle) => {
                let bundle = Arc::new(bundle);
                guard.complete(bundle.clone());
                Ok(Some(bundle))
            }
            Err(e) => {
                guard.fail(&e);
                Err(e)
            }
        }
    }

    pub fn status(&self, kind: ExportKind) -> ExportStatus {
        let storage = self
            .modes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied();
        ExportStatus {
            kind,
            state: self.jobs.state(kind),
            storage,
            last_error: self.jobs.last_error(kind),
        }
    }

    /// the finished bundle while the job is Ready
    pub fn bundle(&self, kind: ExportKind) -> Option<Arc<ExportBundle>> {
        self.jobs.peek(kind)
    }

    /// hand the bundle over (Ready -> Idle); a spooled file stays on disk
    pub fn take_export(&self, kind: ExportKind) -> Option<Arc<ExportBundle>> {
        self.jobs.take(kind)
    }

    pub fn running(&self) -> Vec<ExportKind> {
        let mut running = self.jobs.running();
        running.sort();
        running
    }

    async fn execute(&self, kind: ExportKind, addresses: &[Address]) -> Result<ExportBundle> {
        let estimate = if kind.needs_size_estimate() {
            self.estimate_size(addresses).await
        } else {
            0
        };
        let threshold = self.settings.export.memory_threshold_bytes();
        let storage = StorageMode::for_estimate(estimate, threshold);
        self.modes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, storage);
        tracing::info!(
            "[EXPORT] {} export for {} nodes: estimate {} bytes, threshold {} bytes -> {:?}",
            kind,
            addresses.len(),
            estimate,
            threshold,
            storage
        );

        let staging = match storage {
            StorageMode::Memory => None,
            StorageMode::Disk => {
                let dir = self.settings.export.spool_dir.join(format!(".staging_{}", kind));
                if dir.exists() {
                    fs::remove_dir_all(&dir)?;
                }
                fs::create_dir_all(&dir)?;
                Some(dir)
            }
        };

        let fetched = self.fetch_all(kind, addresses, staging.clone()).await;

        let mut entries = Vec::new();
        let mut skipped = Vec::new();
        for fetch in fetched {
            match fetch {
                NodeFetch::Included(entry) => entries.push(entry),
                NodeFetch::Skipped(address, reason) => {
                    tracing::warn!("[EXPORT] skipping {}: {}", address, reason);
                    skipped.push(address);
                }
            }
        }

        if kind == ExportKind::Everything {
            let report = self.reports.build(ReportKind::Combination, addresses).await;
            entries.push(Entry {
                name: COMBINATION_REPORT_ENTRY.to_string(),
                content: EntryContent::Bytes(report.to_html().into_bytes()),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        skipped.sort();
        let included: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();

        let target = self.settings.export.spool_dir.join(kind.spool_file_name());
        let artifact = tokio::task::spawn_blocking(move || assemble(entries, storage, &target))
            .await
            .map_err(|e| FleetError::Io(std::io::Error::other(e.to_string())))??;

        if let Some(dir) = staging {
            if let Err(e) = fs::remove_dir_all(&dir) {
                tracing::debug!("[EXPORT] could not remove {}: {}", dir.display(), e);
            }
        }

        tracing::info!(
            "[EXPORT] {} export ready: {} entries, {} nodes skipped",
            kind,
            included.len(),
            skipped.len()
        );
        Ok(ExportBundle {
            kind,
            download_name: kind.download_name(chrono::Utc::now().timestamp()),
            storage,
            estimate_bytes: estimate,
            artifact,
            included,
            skipped,
        })
    }

    // ==========================================================================
    // size estimate
    // ==========================================================================

    async fn estimate_size(&self, addresses: &[Address]) -> u64 {
        let collector: Arc<tokio::sync::Mutex<Vec<u64>>> = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::with_capacity(addresses.len());
        for address in addresses {
            let client = self.client.clone();
            let collector = collector.clone();
            let address = address.clone();
            let attempts = self.settings.export.size_attempts.max(1);
            let timeout = self.settings.gather_timeout;
            handles.push(tokio::spawn(async move {
                let size = database_size(client.as_ref(), &address, attempts, timeout).await;
                collector.lock().await.push(size);
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("[EXPORT] size estimate task failed: {}", e);
            }
        }
        // node-reported sizes are untrusted, a huge total must still mean Disk
        let total = collector.lock().await.iter().fold(0u64, |sum, size| sum.saturating_add(*size));
        total
    }

    // ==========================================================================
    // fetch
    // ==========================================================================

    async fn fetch_all(&self, kind: ExportKind, addresses: &[Address], staging: Option<PathBuf>) -> Vec<NodeFetch> {
        let collector: Arc<tokio::sync::Mutex<Vec<NodeFetch>>> =
            Arc::new(tokio::sync::Mutex::new(Vec::with_capacity(addresses.len())));

        let mut handles = Vec::with_capacity(addresses.len());
        for address in addresses {
            let client = self.client.clone();
            let collector = collector.clone();
            let unit_address = address.clone();
            let staging = staging.clone();
            let settings = self.settings.clone();
            let handle = tokio::spawn(async move {
                let fetch = fetch_one(client.as_ref(), kind, &unit_address, &settings, staging.as_deref()).await;
                collector.lock().await.push(fetch);
            });
            handles.push((address.clone(), handle));
        }

        let mut lost = Vec::new();
        for (address, handle) in handles {
            if let Err(e) = handle.await {
                lost.push(NodeFetch::Skipped(address, format!("fetch task failed: {}", e)));
            }
        }

        let mut fetched = std::mem::take(&mut *collector.lock().await);
        fetched.extend(lost);
        fetched
    }
}

async fn database_size(client: &dyn NodeClient, address: &Address, attempts: u32, timeout: Duration) -> u64 {
    for attempt in 1..=attempts {
        let answer = tokio::time::timeout(timeout, client.call(address, Command::GetSQLDBSize, None, timeout)).await;
        match answer {
            Ok(Ok(body)) => match body.trim().parse::<f64>() {
                Ok(size) if size.is_finite() && size >= 0.0 => return size as u64,
                _ => tracing::debug!("[EXPORT] {} sent an unreadable database size {:?}", address, body),
            },
            Ok(Err(e)) => tracing::debug!("[EXPORT] {} size attempt {} failed: {}", address, attempt, e),
            Err(_) => tracing::debug!("[EXPORT] {} size attempt {} timed out", address, attempt),
        }
    }
    0
}

async fn fetch_one(
    client: &dyn NodeClient,
    kind: ExportKind,
    address: &Address,
    settings: &ExportSettings,
    staging: Option<&Path>,
) -> NodeFetch {
    let hostname = match tokio::time::timeout(
        settings.gather_timeout,
        client.call(address, Command::GetHostName, None, settings.gather_timeout),
    )
    .await
    {
        Ok(Ok(name)) => Some(name.trim().to_string()),
        Ok(Err(e)) if e.is_unreachable() => return NodeFetch::Skipped(address.clone(), e.to_string()),
        Ok(Err(_)) => None,
        Err(_) => return NodeFetch::Skipped(address.clone(), "hostname request timed out".to_string()),
    };

    let fetched = tokio::time::timeout(
        settings.fetch_timeout,
        client.fetch(address, kind.command(), settings.fetch_timeout),
    )
    .await;

    let bytes = match fetched {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(FleetError::Unauthorized { .. })) => {
            tracing::warn!("[EXPORT] {} rejected the login", address);
            return NodeFetch::Included(Entry {
                name: entry_name(hostname.as_deref(), address, "txt"),
                content: EntryContent::Bytes(LOGIN_REJECTED_NOTE.as_bytes().to_vec()),
            });
        }
        Ok(Err(e)) => return NodeFetch::Skipped(address.clone(), e.to_string()),
        Err(_) => return NodeFetch::Skipped(address.clone(), "download timed out".to_string()),
    };

    let name = entry_name(hostname.as_deref(), address, "zip");
    let content = match staging {
        None => EntryContent::Bytes(bytes),
        Some(dir) => {
            let path = dir.join(&name);
            match tokio::fs::write(&path, &bytes).await {
                Ok(()) => EntryContent::Staged(path),
                Err(e) => {
                    // keep the payload rather than lose a node that answered
                    tracing::warn!("[EXPORT] staging {} failed, keeping it in memory: {}", name, e);
                    EntryContent::Bytes(bytes)
                }
            }
        }
    };
    NodeFetch::Included(Entry { name, content })
}

// ==============================================================================
// assembly (blocking thread)
// ==============================================================================

fn write_entries<W: Write + Seek>(writer: W, entries: Vec<Entry>) -> Result<W> {
    let mut zip = ZipWriter::new(writer);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for entry in entries {
        zip.start_file(entry.name.as_str(), options)?;
        match entry.content {
            EntryContent::Bytes(bytes) => zip.write_all(&bytes)?,
            EntryContent::Staged(path) => {
                let mut staged = File::open(&path)?;
                std::io::copy(&mut staged, &mut zip)?;
            }
        }
    }
    Ok(zip.finish()?)
}

fn assemble(entries: Vec<Entry>, storage: StorageMode, target: &Path) -> Result<ExportArtifact> {
    match storage {
        StorageMode::Memory => {
            let buffer = write_entries(Cursor::new(Vec::new()), entries)?;
            Ok(ExportArtifact::Memory(Arc::new(buffer.into_inner())))
        }
        StorageMode::Disk => {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let partial = target.with_extension("zip.part");
            let file = write_entries(File::create(&partial)?, entries)?;
            file.sync_all()?;
            fs::rename(&partial, target)?;
            Ok(ExportArtifact::Disk(target.to_path_buf()))
        }
    }
}
