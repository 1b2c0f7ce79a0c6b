//! ==============================================================================
//! render.rs - FleetReport -> html document
//! ==============================================================================
//!
//! purpose:
//!     presentation only. aggregation hands over sorted records; this file
//!     decides how they look. every value coming from a node is escaped.
//!
//! layout:
//!     header (title, generated time)
//!       per section: heading + one fragment per node
//!         online  -> info table for the section kind
//!         offline -> failure fragment "Offline"
//!         failed  -> failure fragment with the error
//!     footer
//!
//! ==============================================================================

use std::fmt::Write;

use super::gather::{Field, NodeOutcome, NodeReport, Reading, ReportBody};
use super::settings::{Badge, ConfigSummary};
use super::{FleetReport, ReportSection};
use crate::probe::{format_latency, latency_colour};

const STYLE: &str = "body{font-family:system-ui,sans-serif;background:#1a1a2e;color:#eee;padding:1rem}\
h1,h2{color:#7f3299}\
.node{background:#16213e;border-radius:8px;margin:0.5rem 0;padding:0.75rem}\
.node.failed{border-left:4px solid purple}\
table{border-collapse:collapse}td{padding:0.15rem 0.75rem}\
.enabled{color:#4caf50}.disabled{color:#ff6b6b}.na{color:#888}";

pub fn html(report: &FleetReport) -> String {
    let mut out = String::new();
    header(&mut out, report);
    for section in &report.sections {
        render_section(&mut out, section);
    }
    footer(&mut out, report);
    out
}

fn header(out: &mut String, report: &FleetReport) {
    let _ = write!(
        out,
        "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<h1>{title}</h1>\n<p>Generated {generated}</p>\n",
        title = html_escape(&report.kind.title()),
        generated = report.generated.format("%Y-%m-%d %H:%M:%S UTC"),
    );
}

fn footer(out: &mut String, report: &FleetReport) {
    let (online, total) = report.sections.iter().fold((0, 0), |(online, total), s| {
        (online + s.online_count(), total + s.nodes.len())
    });
    let _ = write!(
        out,
        "<p class=\"na\">{} of {} node responses online</p>\n</body>\n</html>\n",
        online, total
    );
}

fn render_section(out: &mut String, section: &ReportSection) {
    let _ = writeln!(out, "<h2>{}</h2>", html_escape(&section.kind.title()));
    for node in &section.nodes {
        match &node.outcome {
            NodeOutcome::Online(body) => node_fragment(out, node, body),
            NodeOutcome::Offline => failure_fragment(out, node, "Offline"),
            NodeOutcome::Failed(reason) => failure_fragment(out, node, reason),
        }
    }
}

fn node_fragment(out: &mut String, node: &NodeReport, body: &ReportBody) {
    let colour = latency_colour(node.latency);
    let latency = node.latency.map_or_else(|| "N/A".to_string(), format_latency);

    let _ = write!(
        out,
        "<div class=\"node\">\n<h3>{name}</h3>\n<table>\n\
         <tr><td>Address</td><td><a href=\"{link}\" target=\"_blank\">{endpoint}</a></td></tr>\n\
         <tr><td>Response Time</td><td style=\"color:{colour}\">{latency} s</td></tr>\n\
         <tr><td>Login</td><td>{login}</td></tr>\n",
        name = html_escape(node.display_key()),
        endpoint = html_escape(&node.endpoint),
        link = html_escape(&node.link),
        login = node.login.label(),
    );

    match body {
        ReportBody::System(fields) => field_rows(out, fields),
        ReportBody::Configuration(summary) => config_rows(out, summary),
        ReportBody::Readings(readings) | ReportBody::Latency(readings) => reading_rows(out, readings),
    }
    out.push_str("</table>\n</div>\n");
}

fn failure_fragment(out: &mut String, node: &NodeReport, reason: &str) {
    let _ = write!(
        out,
        "<div class=\"node failed\">\n<h3>{}</h3>\n<p>{}: <span style=\"color:{}\">{}</span></p>\n</div>\n",
        html_escape(node.display_key()),
        html_escape(&node.endpoint),
        latency_colour(None),
        html_escape(reason),
    );
}

fn field_rows(out: &mut String, fields: &[Field]) {
    for field in fields {
        row(out, &field.label, &html_escape(&field.value));
    }
}

fn reading_rows(out: &mut String, readings: &[Reading]) {
    if readings.is_empty() {
        row(out, "Sensors", "N/A");
    }
    for reading in readings {
        let value = if reading.unit.is_empty() {
            html_escape(&reading.value)
        } else {
            html_escape(&format!("{} {}", reading.value, reading.unit))
        };
        row(out, &reading.name, &value);
    }
}

fn config_rows(out: &mut String, summary: &ConfigSummary) {
    row(out, "Sensor Date & Time", &html_escape(&summary.date_time));
    row(out, "Board", &html_escape(&summary.rpi_model));
    row(out, "Debug Logging", &badge(summary.debug_logging));
    row(out, "Sensor Checkin", &badge(summary.sensor_checkin));
    row(out, "Display", &badge(summary.display));
    row(out, "Interval Recording", &badge(summary.interval_recording));
    row(out, "Interval Seconds", &html_escape(&summary.interval_seconds));
    row(out, "High/Low Recording", &badge(summary.high_low_recording));
    row(out, "Variance Recording", &badge(summary.variance_recording));
    row(out, "Temperature Offset", &badge(summary.temperature_offset));
    row(out, "Temperature Correction Factor", &badge(summary.temperature_correction));
    row(out, "WiFi Network", &html_escape(&summary.wifi_ssid));
    row(out, "Weather Underground", &badge(summary.weather_underground));
    row(out, "Luftdaten", &badge(summary.luftdaten));
    row(out, "Open Sense Map", &badge(summary.open_sense_map));
    row(out, "Installed Sensors", &html_escape(&summary.installed_sensors));
}

fn badge(badge: Badge) -> String {
    let class = match badge {
        Badge::Enabled => "enabled",
        Badge::Disabled => "disabled",
        Badge::NotAvailable => "na",
    };
    format!("<span class=\"{}\">{}</span>", class, badge.label())
}

// value is markup and must already be escaped
fn row(out: &mut String, label: &str, value: &str) {
    let _ = writeln!(out, "<tr><td>{}</td><td>{}</td></tr>", html_escape(label), value);
}

/// escape html special characters to prevent xss
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            html_escape(r#"<script>alert("x&y")</script>"#),
            "&lt;script&gt;alert(&quot;x&amp;y&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn badge_markup() {
        assert_eq!(badge(Badge::Enabled), "<span class=\"enabled\">Enabled</span>");
        assert_eq!(badge(Badge::NotAvailable), "<span class=\"na\">N/A</span>");
    }
}
