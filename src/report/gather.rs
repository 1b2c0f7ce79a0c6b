//! ==============================================================================
//! gather.rs - per-node data gathering for reports
//! ==============================================================================
//!
//! purpose:
//!     one gather unit per node per report section. a unit never fails: every
//!     outcome (online with data, offline, failed mid-way) becomes a
//!     `NodeReport` record that the renderer turns into a fragment.
//!
//! unit sequence:
//!     1. CheckOnlineStatus, timed         -> Offline when it does not answer "OK"
//!     2. TestLogin                        -> Login OK / Login Failed / Unknown Error
//!     3. GetHostName                      -> display key
//!     4. kind specific commands           -> ReportBody
//!
//! relationships:
//!     - uses:    client.rs, report/settings.rs
//!     - used by: report/mod.rs (fan-out + sort)
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};

use super::settings::{ConfigDumps, ConfigSummary};
use super::ReportKind;
use crate::address::Address;
use crate::client::{Command, NodeClient};
use crate::error::{FleetError, Result};
use crate::probe::ONLINE_TOKEN;

/// splits the name row from the value row in reading dumps
pub const DATA_SEPARATOR: &str = "[new_data_section]";

/// columns that describe the node rather than a sensor
const SKIPPED_COLUMNS: [&str; 2] = ["SensorName", "IP"];

const SYSTEM_COMMANDS: [(&str, Command); 11] = [
    ("Sensor ID", Command::GetSensorID),
    ("OS Version", Command::GetOSVersion),
    ("Program Version", Command::GetSensorVersion),
    ("Last Updated", Command::GetProgramLastUpdated),
    ("Sensor Date & Time", Command::GetSystemDateTime),
    ("System Uptime", Command::GetSystemUptime),
    ("SQL Database Size", Command::GetSQLDBSize),
    ("CPU Temperature", Command::GetCPUTemperature),
    ("RAM Used", Command::GetRAMUsed),
    ("Total RAM", Command::GetRAMTotal),
    ("Free Disk Space", Command::GetFreeDiskSpace),
];

// ==============================================================================
// records
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoginCheck {
    Ok,
    Failed,
    Unknown,
}

impl LoginCheck {
    pub fn label(self) -> &'static str {
        match self {
            LoginCheck::Ok => "Login OK",
            LoginCheck::Failed => "Login Failed",
            LoginCheck::Unknown => "Unknown Error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Field {
    pub label: String,
    pub value: String,
}

/// one sensor column from a readings or latency dump
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub name: String,
    pub value: String,
    /// empty when the column has no known unit
    pub unit: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ReportBody {
    System(Vec<Field>),
    Configuration(ConfigSummary),
    Readings(Vec<Reading>),
    Latency(Vec<Reading>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "body")]
pub enum NodeOutcome {
    Online(ReportBody),
    Offline,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub address: Address,
    /// `host:port` actually contacted
    pub endpoint: String,
    /// node web portal, scheme included
    pub link: String,
    pub hostname: Option<String>,
    /// time around the status call only
    #[serde(serialize_with = "millis")]
    pub latency: Option<Duration>,
    pub login: LoginCheck,
    pub outcome: NodeOutcome,
}

fn millis<S: Serializer>(latency: &Option<Duration>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match latency {
        Some(latency) => serializer.serialize_some(&(latency.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

impl NodeReport {
    fn new(address: &Address, default_port: u16) -> Self {
        Self {
            address: address.clone(),
            endpoint: address.host_port(default_port),
            link: address.base_url(default_port),
            hostname: None,
            latency: None,
            login: LoginCheck::Unknown,
            outcome: NodeOutcome::Offline,
        }
    }

    /// hostname when known, otherwise the address
    pub fn display_key(&self) -> &str {
        self.hostname.as_deref().unwrap_or(self.address.as_str())
    }

    pub fn is_online(&self) -> bool {
        matches!(self.outcome, NodeOutcome::Online(_))
    }
}

// ==============================================================================
// gather unit
// ==============================================================================

#[derive(Debug, Clone, Copy)]
pub struct GatherTimeouts {
    pub gather: Duration,
    /// readings and latency dumps are slow on nodes with many sensors
    pub readings: Duration,
}

pub struct Gatherer {
    pub client: Arc<dyn NodeClient>,
    pub timeouts: GatherTimeouts,
    pub default_port: u16,
}

impl Gatherer {
    /// gather one section for one node. `kind` is never Combination here.
    pub async fn gather(&self, kind: ReportKind, address: &Address) -> NodeReport {
        let mut report = NodeReport::new(address, self.default_port);

        let start = Instant::now();
        let status = self.text(address, Command::CheckOnlineStatus).await;
        let latency = start.elapsed();

        match status {
            Ok(body) if body.trim() == ONLINE_TOKEN => report.latency = Some(latency),
            Ok(_) | Err(_) => {
                tracing::debug!("[REPORT] {} failed the reachability re-check", address);
                return report;
            }
        }

        report.login = self.login_check(address).await;

        let outcome = async {
            let hostname = self.text(address, Command::GetHostName).await?;
            report.hostname = Some(hostname.trim().to_string()).filter(|h| !h.is_empty());
            self.body(kind, address, report.login).await
        }
        .await;

        report.outcome = match outcome {
            Ok(body) => NodeOutcome::Online(body),
            Err(e) => {
                tracing::warn!("[REPORT] {} failed providing {} data: {}", address, kind, e);
                NodeOutcome::Failed(e.to_string())
            }
        };
        report
    }

    async fn text(&self, address: &Address, command: Command) -> Result<String> {
        self.text_within(address, command, self.timeouts.gather).await
    }

    async fn text_within(&self, address: &Address, command: Command, timeout: Duration) -> Result<String> {
        match tokio::time::timeout(timeout, self.client.call(address, command, None, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(FleetError::unreachable(address, format!("{} timed out", command))),
        }
    }

    async fn login_check(&self, address: &Address) -> LoginCheck {
        match self.text(address, Command::TestLogin).await {
            Ok(body) if body.trim() == ONLINE_TOKEN => LoginCheck::Ok,
            Ok(_) | Err(FleetError::Unauthorized { .. }) => LoginCheck::Failed,
            Err(_) => LoginCheck::Unknown,
        }
    }

    async fn body(&self, kind: ReportKind, address: &Address, login: LoginCheck) -> Result<ReportBody> {
        match kind {
            ReportKind::System => self.system(address).await.map(ReportBody::System),
            ReportKind::Configuration => self
                .configuration(address, login)
                .await
                .map(ReportBody::Configuration),
            ReportKind::Readings => self
                .readings(address, Command::GetAllSensorReadings)
                .await
                .map(ReportBody::Readings),
            ReportKind::Latency => self
                .readings(address, Command::GetSensorsLatency)
                .await
                .map(ReportBody::Latency),
            ReportKind::Combination => Err(FleetError::InvalidReportKind(
                "combination is assembled from the other sections".to_string(),
            )),
        }
    }

    async fn system(&self, address: &Address) -> Result<Vec<Field>> {
        let mut fields = Vec::with_capacity(SYSTEM_COMMANDS.len());
        for (label, command) in SYSTEM_COMMANDS {
            let value = self.text(address, command).await?;
            fields.push(Field {
                label: label.to_string(),
                value: value.trim().to_string(),
            });
        }
        Ok(fields)
    }

    async fn configuration(&self, address: &Address, login: LoginCheck) -> Result<ConfigSummary> {
        let date_time = self.text(address, Command::GetSystemDateTime).await?;

        let mut dumps = ConfigDumps {
            primary: self.text(address, Command::GetPrimaryConfiguration).await?,
            installed_sensors: self.text(address, Command::GetInstalledSensors).await?,
            interval: self.text(address, Command::GetIntervalConfiguration).await?,
            high_low: self.text(address, Command::GetHighLowTriggerConfiguration).await?,
            variance: self.text(address, Command::GetVarianceConfiguration).await?,
            display: self.text(address, Command::GetDisplayConfiguration).await?,
            luftdaten: self.text(address, Command::GetOnlineServicesLuftdaten).await?,
            ..ConfigDumps::default()
        };

        // online service credentials are only readable with a valid login
        if login == LoginCheck::Ok {
            dumps.weather_underground = Some(
                self.text(address, Command::GetWeatherUndergroundConfiguration)
                    .await?,
            );
            dumps.open_sense_map = Some(self.text(address, Command::GetOnlineServicesOpenSenseMap).await?);
            dumps.wifi = match self.text(address, Command::GetWifiConfiguration).await {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::debug!("[REPORT] {} wifi configuration unavailable: {}", address, e);
                    None
                }
            };
        }

        Ok(ConfigSummary::from_dumps(date_time.trim().to_string(), &dumps))
    }

    async fn readings(&self, address: &Address, command: Command) -> Result<Vec<Reading>> {
        let raw = self.text_within(address, command, self.timeouts.readings).await?;
        parse_readings(&raw)
    }
}

/// `name,name,...[new_data_section]value,value,...` into ordered pairs
pub fn parse_readings(raw: &str) -> Result<Vec<Reading>> {
    let (names, values) = raw
        .trim()
        .split_once(DATA_SEPARATOR)
        .ok_or_else(|| FleetError::MalformedResponse("missing data separator in readings".to_string()))?;

    Ok(names
        .split(',')
        .zip(values.split(','))
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| !SKIPPED_COLUMNS.contains(name))
        .map(|(name, value)| Reading {
            name: name.replace('_', " "),
            value: value.to_string(),
            unit: reading_unit(name),
        })
        .collect())
}

/// display unit for a raw dump column name
pub fn reading_unit(column: &str) -> &'static str {
    match column {
        "SystemTemp" | "EnvironmentTemp" | "EnvTempOffset" | "Dew_Point" => "°C",
        "Seconds" => "Sec",
        "Pressure" => "hPa",
        "Altitude" => "Meters",
        "Humidity" => "%RH",
        "SensorUpTime" => "Minutes",
        "GPS_Speed_Over_Ground" => "km/hr",
        "GPS_Timestamp" => "UTC0",
        "Lumen" | "Red" | "Orange" | "Yellow" | "Green" | "Blue" | "Violet" => "lm",
        c if c.starts_with("Ultra_Violet_") => "lm",
        c if c.starts_with("Gas_") => "kΩ",
        c if c.starts_with("Particulate_Matter_") => "µg/m³",
        c if c.starts_with("Acc_") => "g",
        c if c.starts_with("Mag_") => "μT",
        c if c.starts_with("Gyro_") => "°/s",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_skip_identity_columns() {
        let raw = "SensorName,IP,Env_Temperature,Pressure[new_data_section]kitchen,10.0.0.5,21.4,1013\n";
        let readings = parse_readings(raw).unwrap();
        assert_eq!(
            readings,
            vec![
                Reading { name: "Env Temperature".into(), value: "21.4".into(), unit: "" },
                Reading { name: "Pressure".into(), value: "1013".into(), unit: "hPa" },
            ]
        );
    }

    #[test]
    fn units_follow_the_raw_column_name() {
        assert_eq!(reading_unit("EnvironmentTemp"), "°C");
        assert_eq!(reading_unit("Dew_Point"), "°C");
        assert_eq!(reading_unit("Humidity"), "%RH");
        assert_eq!(reading_unit("Particulate_Matter_2_5"), "µg/m³");
        assert_eq!(reading_unit("Gas_NH3"), "kΩ");
        assert_eq!(reading_unit("Ultra_Violet_Index"), "lm");
        assert_eq!(reading_unit("Gyro_Z"), "°/s");
        assert_eq!(reading_unit("Latitude"), "");
    }

    #[test]
    fn link_keeps_the_address_scheme() {
        let plain = NodeReport::new(&Address::parse("http://10.0.0.5:8080").unwrap(), 10065);
        assert_eq!(plain.link, "http://10.0.0.5:8080/");
        let default = NodeReport::new(&Address::parse("10.0.0.5").unwrap(), 10065);
        assert_eq!(default.link, "https://10.0.0.5:10065/");
    }

    #[test]
    fn readings_without_separator_are_malformed() {
        assert!(matches!(
            parse_readings("Env_Temperature,21.4"),
            Err(FleetError::MalformedResponse(_))
        ));
    }

    #[test]
    fn login_labels() {
        assert_eq!(LoginCheck::Ok.label(), "Login OK");
        assert_eq!(LoginCheck::Failed.label(), "Login Failed");
        assert_eq!(LoginCheck::Unknown.label(), "Unknown Error");
    }
}
