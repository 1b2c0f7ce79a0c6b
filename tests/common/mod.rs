//! scripted NodeClient double shared by the integration tests.
//!
//! every node is described by a `NodeScript`; calls are counted per
//! (address, command) so tests can assert how often a node was hit.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sensor_fleet::client::{Command, NodeClient, Payload};
use sensor_fleet::config::FleetConfig;
use sensor_fleet::{Address, FleetError, Result};

pub const READINGS: &str = "SensorName,IP,Env_Temperature,Humidity[new_data_section]node,10.0.0.1,21.5,40.2";
pub const WIFI: &str = "ctrl_interface=DIR=/var/run/wpa_supplicant\nupdate_config=1\nnetwork={\n    ssid=\"HomeNet\"\n}\n";
pub const LATENCY: &str = "SensorName,IP,Env_Temperature,Humidity[new_data_section]node,10.0.0.1,0.012,0.030";

#[derive(Clone)]
pub struct NodeScript {
    pub online: bool,
    /// answer to CheckOnlineStatus
    pub status: String,
    pub delay: Duration,
    pub hostname: String,
    pub login_ok: bool,
    pub responses: HashMap<Command, String>,
    pub files: HashMap<Command, Vec<u8>>,
}

impl NodeScript {
    /// a healthy node answering every report and export command
    pub fn online(hostname: &str) -> Self {
        let mut responses = HashMap::new();
        for (command, value) in [
            (Command::GetSensorID, "sensor-id-1"),
            (Command::GetOSVersion, "Raspbian 12"),
            (Command::GetSensorVersion, "Beta.33.1"),
            (Command::GetProgramLastUpdated, "2026-01-01"),
            (Command::GetSystemDateTime, "2026-10-18 10:00"),
            (Command::GetSystemUptime, "3 days"),
            (Command::GetSQLDBSize, "1048576"),
            (Command::GetCPUTemperature, "48.2"),
            (Command::GetRAMUsed, "0.4"),
            (Command::GetRAMTotal, "1.0"),
            (Command::GetFreeDiskSpace, "12.5"),
            (
                Command::GetPrimaryConfiguration,
                "hdr\n10065 = HTTPS port number\n1 = Enable debug logging\n1 = Enable Sensor Check-Ins\n",
            ),
            (
                Command::GetInstalledSensors,
                "hdr\n1 = Gnu/Linux\n0 = Raspberry Pi\n1 = Raspberry Pi 4 Model B\n",
            ),
            (Command::GetIntervalConfiguration, "hdr\n1 = Enable interval recording\n300.0 = Recording interval in seconds\n"),
            (Command::GetHighLowTriggerConfiguration, "hdr\n0 = Enable High/Low Trigger Recording\n"),
            (Command::GetVarianceConfiguration, "hdr\n0 = Enable Sensor Uptime\n"),
            (Command::GetDisplayConfiguration, "hdr\n0 = Enable display\n"),
            (Command::GetWeatherUndergroundConfiguration, "hdr\n1 = Enable Weather Underground\n"),
            (Command::GetOnlineServicesLuftdaten, "hdr\n0 = Enable Luftdaten\n"),
            (Command::GetOnlineServicesOpenSenseMap, "hdr\n0 = Enable Open Sense Map\n"),
            (Command::GetWifiConfiguration, WIFI),
            (Command::GetAllSensorReadings, READINGS),
            (Command::GetSensorsLatency, LATENCY),
        ] {
            responses.insert(command, value.to_string());
        }

        let mut files = HashMap::new();
        files.insert(Command::DownloadZippedLogs, format!("logs of {}", hostname).into_bytes());
        files.insert(Command::DownloadALLSQLDatabases, format!("db of {}", hostname).into_bytes());
        files.insert(Command::DownloadZippedEverything, format!("all of {}", hostname).into_bytes());

        Self {
            online: true,
            status: "OK".to_string(),
            delay: Duration::ZERO,
            hostname: hostname.to_string(),
            login_ok: true,
            responses,
            files,
        }
    }

    pub fn offline() -> Self {
        Self {
            online: false,
            ..Self::online("offline")
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn bad_login(mut self) -> Self {
        self.login_ok = false;
        self
    }

    pub fn respond(mut self, command: Command, body: &str) -> Self {
        self.responses.insert(command, body.to_string());
        self
    }

    pub fn without(mut self, command: Command) -> Self {
        self.responses.remove(&command);
        self.files.remove(&command);
        self
    }
}

#[derive(Default)]
pub struct ScriptedClient {
    nodes: HashMap<String, NodeScript>,
    calls: Mutex<HashMap<(String, Command), usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, address: &str, script: NodeScript) -> Self {
        self.nodes.insert(address.to_string(), script);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self, address: &str, command: Command) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.get(&(address.to_string(), command)).copied().unwrap_or(0)
    }

    pub fn total_calls(&self, command: Command) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.iter().filter(|((_, c), _)| *c == command).map(|(_, n)| n).sum()
    }

    /// highest number of simultaneous calls seen
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, address: &Address, command: Command) -> Result<&NodeScript> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry((address.to_string(), command))
            .or_insert(0) += 1;

        let script = self
            .nodes
            .get(address.as_str())
            .ok_or_else(|| FleetError::Unreachable {
                address: address.to_string(),
                reason: "no route to host".to_string(),
            })?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(script.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if !script.online {
            return Err(FleetError::Unreachable {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(script)
    }
}

fn unauthorized(address: &Address) -> FleetError {
    FleetError::Unauthorized { address: address.to_string() }
}

fn missing(address: &Address) -> FleetError {
    FleetError::Status {
        address: address.to_string(),
        status: 404,
    }
}

#[async_trait]
impl NodeClient for ScriptedClient {
    async fn call(
        &self,
        address: &Address,
        command: Command,
        payload: Option<&Payload>,
        _timeout: Duration,
    ) -> Result<String> {
        let script = self.enter(address, command).await?;
        match command {
            Command::CheckOnlineStatus => Ok(script.status.clone()),
            Command::GetHostName => Ok(script.hostname.clone()),
            Command::TestLogin if script.login_ok => Ok("OK".to_string()),
            Command::TestLogin => Err(unauthorized(address)),
            Command::DisplayText => Ok(payload
                .and_then(|p| p.get("command_data").cloned())
                .unwrap_or_default()),
            other => script.responses.get(&other).cloned().ok_or_else(|| missing(address)),
        }
    }

    async fn fetch(&self, address: &Address, command: Command, _timeout: Duration) -> Result<Vec<u8>> {
        let script = self.enter(address, command).await?;
        if !script.login_ok {
            return Err(unauthorized(address));
        }
        script.files.get(&command).cloned().ok_or_else(|| missing(address))
    }
}

/// fresh empty directory under the system temp dir
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sensor-fleet-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// config with short timeouts and everything on disk under `dir`
pub fn test_config(dir: &std::path::Path) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.timeouts.probe = 0.5;
    config.timeouts.clean = 0.5;
    config.timeouts.gather = 1.0;
    config.timeouts.readings = 1.0;
    config.timeouts.fetch = 2.0;
    config.export.memory_threshold_mb = Some(500);
    config.export.spool_dir = dir.join("spool");
    config.address_book.directory = dir.join("lists");
    config
}

pub fn addresses(list: &[&str]) -> Vec<Address> {
    list.iter().map(|a| Address::parse(a).unwrap()).collect()
}

/// poll until `done` returns true or two seconds pass
pub async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
