//! ==============================================================================
//! probe.rs - concurrent reachability + latency prober
//! ==============================================================================
//!
//! purpose:
//!     answers "which of these addresses are up, and how fast?" in one
//!     round of wall-clock time instead of one per node.
//!
//! how it works:
//!
//! ```text
//!     addresses ──┬── task ── CheckOnlineStatus (+ GetHostName) ──┐
//!                 ├── task ── ...                                  ├─> collector
//!                 └── task ── ...                                  ┘   (Arc<Mutex<Vec>>)
//!
//!     1. one tokio task per address, each bounded by the per-request timeout
//!     2. each task pushes exactly one ProbeResult into the shared collector
//!     3. the parent awaits every handle, then drains the collector
//!
//!     the collector holds results in completion order. callers that need a
//!     stable order sort afterwards (see `sort_by_address` / `sort_by_display_key`).
//! ```
//!
//! relationships:
//!     - uses:    client.rs (NodeClient)
//!     - used by: address_book.rs (clean addresses), fleet.rs (status table),
//!                report/gather.rs (latency colour helpers)
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::address::Address;
use crate::client::{Command, NodeClient};

/// status token a healthy node returns for CheckOnlineStatus
pub const ONLINE_TOKEN: &str = "OK";

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub address: Address,
    pub reachable: bool,
    /// wall-clock time around the status call
    pub latency: Duration,
    pub hostname: Option<String>,
}

impl ProbeResult {
    fn unreachable(address: Address, latency: Duration) -> Self {
        Self {
            address,
            reachable: false,
            latency,
            hostname: None,
        }
    }

    /// hostname when known, otherwise the address
    pub fn display_key(&self) -> &str {
        self.hostname.as_deref().unwrap_or(self.address.as_str())
    }
}

#[derive(Clone)]
pub struct Prober {
    client: Arc<dyn NodeClient>,
}

impl Prober {
    pub fn new(client: Arc<dyn NodeClient>) -> Self {
        Self { client }
    }

    /// probe every address concurrently and wait for all of them.
    ///
    /// always returns one result per input address. result order is
    /// completion order, not input order.
    pub async fn probe(
        &self,
        addresses: &[Address],
        timeout: Duration,
        with_hostname: bool,
    ) -> Vec<ProbeResult> {
        let collector: Arc<Mutex<Vec<ProbeResult>>> =
            Arc::new(Mutex::new(Vec::with_capacity(addresses.len())));

        let mut handles = Vec::with_capacity(addresses.len());
        for address in addresses {
            let client = self.client.clone();
            let collector = collector.clone();
            let unit_address = address.clone();
            let handle = tokio::spawn(async move {
                let result = probe_one(client.as_ref(), &unit_address, timeout, with_hostname).await;
                collector.lock().await.push(result);
            });
            handles.push((address.clone(), handle));
        }

        let mut lost = Vec::new();
        for (address, handle) in handles {
            if let Err(e) = handle.await {
                // the unit died before writing its slot
                tracing::warn!("[PROBE] probe task for {} failed: {}", address, e);
                lost.push(ProbeResult::unreachable(address, timeout));
            }
        }

        let mut results = std::mem::take(&mut *collector.lock().await);
        results.extend(lost);

        let online = results.iter().filter(|r| r.reachable).count();
        tracing::debug!("[PROBE] {}/{} nodes reachable", online, results.len());
        results
    }

    /// addresses that answered, in their input order
    pub async fn online(&self, addresses: &[Address], timeout: Duration) -> Vec<Address> {
        let results = self.probe(addresses, timeout, false).await;
        addresses
            .iter()
            .filter(|address| results.iter().any(|r| r.reachable && &r.address == *address))
            .cloned()
            .collect()
    }
}

async fn probe_one(
    client: &dyn NodeClient,
    address: &Address,
    timeout: Duration,
    with_hostname: bool,
) -> ProbeResult {
    let start = Instant::now();
    let status = tokio::time::timeout(
        timeout,
        client.call(address, Command::CheckOnlineStatus, None, timeout),
    )
    .await;
    let latency = start.elapsed();

    let reachable = match status {
        Ok(Ok(body)) => body.trim() == ONLINE_TOKEN,
        Ok(Err(e)) => {
            tracing::debug!("[PROBE] {} offline: {}", address, e);
            false
        }
        Err(_) => {
            tracing::debug!("[PROBE] {} timed out after {:?}", address, timeout);
            false
        }
    };
    if !reachable {
        return ProbeResult::unreachable(address.clone(), latency);
    }

    let hostname = if with_hostname {
        match tokio::time::timeout(
            timeout,
            client.call(address, Command::GetHostName, None, timeout),
        )
        .await
        {
            Ok(Ok(name)) if !name.trim().is_empty() => Some(name.trim().to_string()),
            _ => None,
        }
    } else {
        None
    };

    ProbeResult {
        address: address.clone(),
        reachable: true,
        latency,
        hostname,
    }
}

// ==============================================================================
// ordering + display helpers
// ==============================================================================

pub fn sort_by_address(results: &mut [ProbeResult]) {
    results.sort_by(|a, b| a.address.cmp(&b.address));
}

/// hostname (falling back to address), ties broken by address
pub fn sort_by_display_key(results: &mut [ProbeResult]) {
    results.sort_by(|a, b| {
        a.display_key()
            .cmp(b.display_key())
            .then_with(|| a.address.cmp(&b.address))
    });
}

/// colour band for a response time; None means unknown/offline
pub fn latency_colour(latency: Option<Duration>) -> &'static str {
    match latency.map(|l| l.as_secs_f64()) {
        None => "purple",
        Some(secs) if secs < 0.5 => "darkgreen",
        Some(secs) if secs < 0.75 => "#859B14",
        Some(secs) if secs < 1.5 => "#8b4c00",
        Some(_) => "red",
    }
}

/// seconds, millisecond precision
pub fn format_latency(latency: Duration) -> String {
    format!("{:.3}", latency.as_secs_f64())
}
