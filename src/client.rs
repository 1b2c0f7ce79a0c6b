//! ==============================================================================
//! client.rs - single-node rpc client
//! ==============================================================================
//!
//! purpose:
//!     executes one named command against one sensor node over https.
//!     everything above this file (prober, reports, exports) talks to nodes
//!     only through the `NodeClient` trait, so tests can swap in a scripted
//!     double without a network.
//!
//! wire format:
//!     GET  https://<host>:<port>/<Command>              -> text or bytes
//!     PUT  https://<host>:<port>/<Command>  (form body) -> text
//!     http basic auth on every request.
//!
//! failure modes:
//!     - timeout / connect / read error     -> FleetError::Unreachable
//!     - 401/403 or the node's login form   -> FleetError::Unauthorized
//!     - any other non-2xx                  -> FleetError::Status
//!
//! relationships:
//!     - used by: probe.rs, report/gather.rs, export.rs
//!     - reads:   config.rs (NodeConfig, connect timeout)
//!
//! ==============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::address::Address;
use crate::config::FleetConfig;
use crate::error::{FleetError, Result};

/// form fields sent with a PUT command
pub type Payload = BTreeMap<String, String>;

/// a node answering with its html login page instead of data means the
/// credentials were not accepted
const LOGIN_FORM_MARKER: &str = r#"<form class="pure-form" method="POST" action="/atpro/login">"#;

// ==============================================================================
// command catalogue
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    CheckOnlineStatus,
    TestLogin,
    GetHostName,
    GetSensorID,
    GetOSVersion,
    GetSensorVersion,
    GetProgramLastUpdated,
    GetSystemDateTime,
    GetSystemUptime,
    GetSQLDBSize,
    GetCPUTemperature,
    GetRAMUsed,
    GetRAMTotal,
    GetFreeDiskSpace,
    GetPrimaryConfiguration,
    GetInstalledSensors,
    GetIntervalConfiguration,
    GetHighLowTriggerConfiguration,
    GetVarianceConfiguration,
    GetDisplayConfiguration,
    GetWeatherUndergroundConfiguration,
    GetOnlineServicesLuftdaten,
    GetOnlineServicesOpenSenseMap,
    GetWifiConfiguration,
    GetAllSensorReadings,
    GetSensorsLatency,
    DisplayText,
    DownloadZippedLogs,
    DownloadALLSQLDatabases,
    DownloadZippedEverything,
}

impl Command {
    /// url path segment, identical to the variant name
    pub fn path(self) -> &'static str {
        match self {
            Command::CheckOnlineStatus => "CheckOnlineStatus",
            Command::TestLogin => "TestLogin",
            Command::GetHostName => "GetHostName",
            Command::GetSensorID => "GetSensorID",
            Command::GetOSVersion => "GetOSVersion",
            Command::GetSensorVersion => "GetSensorVersion",
            Command::GetProgramLastUpdated => "GetProgramLastUpdated",
            Command::GetSystemDateTime => "GetSystemDateTime",
            Command::GetSystemUptime => "GetSystemUptime",
            Command::GetSQLDBSize => "GetSQLDBSize",
            Command::GetCPUTemperature => "GetCPUTemperature",
            Command::GetRAMUsed => "GetRAMUsed",
            Command::GetRAMTotal => "GetRAMTotal",
            Command::GetFreeDiskSpace => "GetFreeDiskSpace",
            Command::GetPrimaryConfiguration => "GetPrimaryConfiguration",
            Command::GetInstalledSensors => "GetInstalledSensors",
            Command::GetIntervalConfiguration => "GetIntervalConfiguration",
            Command::GetHighLowTriggerConfiguration => "GetHighLowTriggerConfiguration",
            Command::GetVarianceConfiguration => "GetVarianceConfiguration",
            Command::GetDisplayConfiguration => "GetDisplayConfiguration",
            Command::GetWeatherUndergroundConfiguration => "GetWeatherUndergroundConfiguration",
            Command::GetOnlineServicesLuftdaten => "GetOnlineServicesLuftdaten",
            Command::GetOnlineServicesOpenSenseMap => "GetOnlineServicesOpenSenseMap",
            Command::GetWifiConfiguration => "GetWifiConfiguration",
            Command::GetAllSensorReadings => "GetAllSensorReadings",
            Command::GetSensorsLatency => "GetSensorsLatency",
            Command::DisplayText => "DisplayText",
            Command::DownloadZippedLogs => "DownloadZippedLogs",
            Command::DownloadALLSQLDatabases => "DownloadALLSQLDatabases",
            Command::DownloadZippedEverything => "DownloadZippedEverything",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

// ==============================================================================
// client seam
// ==============================================================================

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// run a text command; a payload turns the request into a form PUT
    async fn call(
        &self,
        address: &Address,
        command: Command,
        payload: Option<&Payload>,
        timeout: Duration,
    ) -> Result<String>;

    /// download a binary artifact (zip, database file)
    async fn fetch(&self, address: &Address, command: Command, timeout: Duration) -> Result<Vec<u8>>;
}

// ==============================================================================
// reqwest implementation
// ==============================================================================

pub struct HttpNodeClient {
    http: reqwest::Client,
    default_port: u16,
    username: String,
    password: String,
}

impl HttpNodeClient {
    pub fn new(config: &FleetConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.node.accept_invalid_certs)
            .connect_timeout(config.timeouts.fetch_connect())
            .build()?;

        Ok(Self {
            http,
            default_port: config.node.default_port,
            username: config.node.username.clone(),
            password: config.node.password.clone(),
        })
    }

    async fn send(
        &self,
        address: &Address,
        command: Command,
        payload: Option<&Payload>,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let url = address.command_url(self.default_port, command.path());
        tracing::debug!("[CLIENT] {} {}", if payload.is_some() { "PUT" } else { "GET" }, url);

        let request = match payload {
            Some(form) => self.http.put(&url).form(form),
            None => self.http.get(&url),
        };

        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FleetError::unreachable(address, e))?;

        check_status(address, response.status())?;
        Ok(response)
    }
}

fn check_status(address: &Address, status: StatusCode) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(FleetError::Unauthorized { address: address.to_string() });
    }
    if !status.is_success() {
        return Err(FleetError::Status {
            address: address.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

/// true when the body is the node's login page rather than command output
pub fn is_login_page(body: &[u8]) -> bool {
    let marker = LOGIN_FORM_MARKER.as_bytes();
    body.windows(marker.len()).any(|window| window == marker)
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn call(
        &self,
        address: &Address,
        command: Command,
        payload: Option<&Payload>,
        timeout: Duration,
    ) -> Result<String> {
        let response = self.send(address, command, payload, timeout).await?;
        let body = response
            .text()
            .await
            .map_err(|e| FleetError::unreachable(address, e))?;

        if is_login_page(body.as_bytes()) {
            return Err(FleetError::Unauthorized { address: address.to_string() });
        }
        Ok(body)
    }

    async fn fetch(&self, address: &Address, command: Command, timeout: Duration) -> Result<Vec<u8>> {
        let response = self.send(address, command, None, timeout).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| FleetError::unreachable(address, e))?;

        if is_login_page(&body) {
            return Err(FleetError::Unauthorized { address: address.to_string() });
        }
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_paths_match_node_routes() {
        assert_eq!(Command::CheckOnlineStatus.path(), "CheckOnlineStatus");
        assert_eq!(Command::GetSQLDBSize.to_string(), "GetSQLDBSize");
        assert_eq!(Command::DownloadALLSQLDatabases.path(), "DownloadALLSQLDatabases");
    }

    #[test]
    fn login_page_detection() {
        let page = format!("<html><body>{}</form></body></html>", LOGIN_FORM_MARKER);
        assert!(is_login_page(page.as_bytes()));
        assert!(!is_login_page(b"OK"));
        assert!(!is_login_page(b""));
    }

    #[test]
    fn status_mapping() {
        let address = Address::parse("10.0.0.5").unwrap();
        assert!(check_status(&address, StatusCode::OK).is_ok());
        assert!(matches!(
            check_status(&address, StatusCode::UNAUTHORIZED),
            Err(FleetError::Unauthorized { .. })
        ));
        assert!(matches!(
            check_status(&address, StatusCode::NOT_FOUND),
            Err(FleetError::Status { status: 404, .. })
        ));
    }
}
