//! settings.rs - re-parse a node's configuration dumps locally
//!
//! a dump is a header line followed by one `value = setting name` line per
//! setting. the value is everything before the last `=`, so values that
//! contain `=` themselves survive.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub name: String,
    pub value: String,
}

pub fn parse_settings(text: &str) -> Vec<Setting> {
    text.trim()
        .lines()
        .skip(1)
        .filter_map(|line| {
            let (value, name) = line.rsplit_once('=')?;
            Some(Setting {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

fn find<'a>(settings: &'a [Setting], name: &str) -> Option<&'a Setting> {
    settings.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

/// first `Enable ...` toggle whose name mentions any of `words` (case-insensitive)
fn find_toggle<'a>(settings: &'a [Setting], words: &[&str]) -> Option<&'a Setting> {
    settings.iter().find(|s| {
        let name = s.name.to_ascii_lowercase();
        name.starts_with("enable") && words.iter().any(|w| name.contains(w))
    })
}

// ==============================================================================
// badges
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Badge {
    Enabled,
    Disabled,
    /// missing, unparseable or not fetched
    NotAvailable,
}

impl Badge {
    /// integer settings: non-zero means on
    pub fn from_value(value: &str) -> Self {
        match value.trim().parse::<i64>() {
            Ok(0) => Badge::Disabled,
            Ok(_) => Badge::Enabled,
            Err(_) => Badge::NotAvailable,
        }
    }

    pub fn lookup(settings: &[Setting], name: &str) -> Self {
        find(settings, name).map_or(Badge::NotAvailable, |s| Badge::from_value(&s.value))
    }

    /// toggle names drift between node versions, so match on keywords
    pub fn lookup_toggle(settings: &[Setting], words: &[&str]) -> Self {
        find_toggle(settings, words).map_or(Badge::NotAvailable, |s| Badge::from_value(&s.value))
    }

    pub fn label(self) -> &'static str {
        match self {
            Badge::Enabled => "Enabled",
            Badge::Disabled => "Disabled",
            Badge::NotAvailable => "N/A",
        }
    }
}

// ==============================================================================
// derived configuration summary
// ==============================================================================

/// raw dumps fetched from one node
#[derive(Debug, Default)]
pub struct ConfigDumps {
    pub primary: String,
    pub installed_sensors: String,
    pub interval: String,
    pub high_low: String,
    pub variance: String,
    pub display: String,
    pub luftdaten: String,
    /// only fetched when the login check passed
    pub weather_underground: Option<String>,
    pub open_sense_map: Option<String>,
    pub wifi: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub date_time: String,
    /// board name the node reports for itself
    pub rpi_model: String,
    pub debug_logging: Badge,
    pub sensor_checkin: Badge,
    pub temperature_offset: Badge,
    pub temperature_correction: Badge,
    /// N/A unless the login check passed
    pub wifi_ssid: String,
    pub display: Badge,
    pub interval_recording: Badge,
    pub interval_seconds: String,
    pub high_low_recording: Badge,
    pub variance_recording: Badge,
    pub weather_underground: Badge,
    pub luftdaten: Badge,
    pub open_sense_map: Badge,
    pub installed_sensors: String,
}

impl ConfigSummary {
    pub fn from_dumps(date_time: String, dumps: &ConfigDumps) -> Self {
        let primary = parse_settings(&dumps.primary);
        let interval = parse_settings(&dumps.interval);
        let variance = parse_settings(&dumps.variance);

        let interval_seconds = interval
            .iter()
            .find(|s| s.name.to_ascii_lowercase().starts_with("recording interval in seconds"))
            .map_or_else(|| "N/A".to_string(), |s| s.value.clone());

        Self {
            date_time,
            rpi_model: rpi_model(&dumps.installed_sensors),
            debug_logging: Badge::lookup(&primary, "Enable debug logging"),
            sensor_checkin: Badge::lookup_toggle(&primary, &["check-in", "checkin"]),
            temperature_offset: Badge::lookup_toggle(&primary, &["temperature offset", "temp offset"]),
            temperature_correction: Badge::lookup_toggle(&primary, &["correction factor", "comp factor"]),
            wifi_ssid: dumps
                .wifi
                .as_deref()
                .and_then(wifi_ssid)
                .unwrap_or_else(|| "N/A".to_string()),
            display: Badge::lookup(&parse_settings(&dumps.display), "Enable display"),
            interval_recording: Badge::lookup(&interval, "Enable interval recording"),
            interval_seconds,
            high_low_recording: Badge::lookup(
                &parse_settings(&dumps.high_low),
                "Enable High/Low Trigger Recording",
            ),
            variance_recording: any_enabled(&variance),
            weather_underground: dumps.weather_underground.as_deref().map_or(Badge::NotAvailable, |text| {
                Badge::lookup(&parse_settings(text), "Enable Weather Underground")
            }),
            luftdaten: Badge::lookup(&parse_settings(&dumps.luftdaten), "Enable Luftdaten"),
            open_sense_map: dumps.open_sense_map.as_deref().map_or(Badge::NotAvailable, |text| {
                Badge::lookup(&parse_settings(text), "Enable Open Sense Map")
            }),
            installed_sensors: installed_names(&parse_settings(&dumps.installed_sensors)),
        }
    }
}

const DEFAULT_RPI_MODEL: &str = "Raspberry Pi";

// the fourth line of the installed sensors dump carries the board name
fn rpi_model(installed_sensors: &str) -> String {
    installed_sensors
        .trim()
        .lines()
        .nth(3)
        .and_then(|line| line.split('=').nth(1))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_RPI_MODEL)
        .to_string()
}

/// network name from a wpa_supplicant dump; a login page comes back as html
pub fn wifi_ssid(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.trim().lines().collect();
    if lines.len() <= 2 || lines[1].trim_start().starts_with('<') {
        return None;
    }
    lines
        .iter()
        .filter_map(|line| line.trim().strip_prefix("ssid="))
        .map(|ssid| ssid.trim_matches('"').to_string())
        .find(|ssid| !ssid.is_empty())
}

// the variance file has no master switch, one toggle per reading type
fn any_enabled(settings: &[Setting]) -> Badge {
    let toggles: Vec<Badge> = settings
        .iter()
        .filter(|s| s.name.starts_with("Enable"))
        .map(|s| Badge::from_value(&s.value))
        .collect();
    if toggles.contains(&Badge::Enabled) {
        Badge::Enabled
    } else if toggles.contains(&Badge::Disabled) {
        Badge::Disabled
    } else {
        Badge::NotAvailable
    }
}

fn installed_names(settings: &[Setting]) -> String {
    let names: Vec<&str> = settings
        .iter()
        .filter(|s| Badge::from_value(&s.value) == Badge::Enabled)
        .map(|s| s.name.as_str())
        .collect();
    if names.is_empty() {
        "N/A".to_string()
    } else {
        names.join(" || ")
    }
}
