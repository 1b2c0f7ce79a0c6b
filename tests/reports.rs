//! report aggregation against scripted nodes

mod common;

use std::time::Duration;

use common::{addresses, scratch_dir, test_config, wait_for, NodeScript, ScriptedClient};
use sensor_fleet::client::Command;
use sensor_fleet::report::settings::Badge;
use sensor_fleet::report::{LoginCheck, NodeOutcome, ReportBody};
use sensor_fleet::{FleetError, JobState, ReportAggregator, ReportKind};

fn aggregator(client: std::sync::Arc<ScriptedClient>, name: &str) -> ReportAggregator {
    let config = test_config(&scratch_dir(name));
    ReportAggregator::new(client, &config)
}

#[tokio::test]
async fn nodes_sorted_by_hostname_not_completion() {
    // the alphabetically first node answers last
    let client = ScriptedClient::new()
        .node("10.0.0.1", NodeScript::online("gamma"))
        .node("10.0.0.2", NodeScript::online("alpha").delayed(Duration::from_millis(60)))
        .node("10.0.0.3", NodeScript::online("beta").delayed(Duration::from_millis(30)))
        .shared();
    let reports = aggregator(client, "report-order");

    let report = reports
        .run_report(ReportKind::Readings, &addresses(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]))
        .await
        .unwrap()
        .unwrap();

    let names: Vec<&str> = report.sections[0].nodes.iter().map(|n| n.display_key()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);

    let html = report.to_html();
    let alpha = html.find("alpha").unwrap();
    let beta = html.find("beta").unwrap();
    let gamma = html.find("gamma").unwrap();
    assert!(alpha < beta && beta < gamma);
    assert!(html.contains("3 of 3 node responses online"));
}

#[tokio::test]
async fn second_start_is_a_no_op() {
    let client = ScriptedClient::new()
        .node("10.0.0.1", NodeScript::online("alpha").delayed(Duration::from_millis(40)))
        .node("10.0.0.2", NodeScript::online("beta").delayed(Duration::from_millis(40)))
        .shared();
    let reports = aggregator(client.clone(), "report-single-flight");
    let targets = addresses(&["10.0.0.1", "10.0.0.2"]);

    assert!(reports.start_report(ReportKind::System, targets.clone()).unwrap());
    assert_eq!(reports.state(ReportKind::System), JobState::Running);
    assert!(!reports.start_report(ReportKind::System, targets.clone()).unwrap());
    assert_eq!(reports.running(), vec![ReportKind::System]);

    wait_for(|| reports.state(ReportKind::System) == JobState::Ready).await;

    // one gather unit per node, not two
    assert_eq!(client.calls("10.0.0.1", Command::CheckOnlineStatus), 1);
    assert_eq!(client.calls("10.0.0.2", Command::CheckOnlineStatus), 1);

    let report = reports.report(ReportKind::System).unwrap();
    assert_eq!(report.sections[0].nodes.len(), 2);
    assert!(reports.take_report(ReportKind::System).is_some());
    assert_eq!(reports.state(ReportKind::System), JobState::Idle);
    assert!(reports.take_report(ReportKind::System).is_none());
}

#[tokio::test]
async fn other_kinds_run_independently() {
    let client = ScriptedClient::new()
        .node("10.0.0.1", NodeScript::online("alpha").delayed(Duration::from_millis(40)))
        .shared();
    let reports = aggregator(client, "report-kinds");
    let targets = addresses(&["10.0.0.1"]);

    assert!(reports.start_report(ReportKind::System, targets.clone()).unwrap());
    assert!(reports.start_report(ReportKind::Latency, targets).unwrap());
    assert_eq!(reports.running(), vec![ReportKind::System, ReportKind::Latency]);

    wait_for(|| reports.running().is_empty()).await;
    assert_eq!(reports.state(ReportKind::Latency), JobState::Ready);
}

#[tokio::test]
async fn empty_list_is_rejected() {
    let reports = aggregator(ScriptedClient::new().shared(), "report-empty");
    assert!(matches!(
        reports.start_report(ReportKind::System, Vec::new()),
        Err(FleetError::NoAddresses)
    ));
    assert!(matches!(
        reports.run_report(ReportKind::System, &[]).await,
        Err(FleetError::NoAddresses)
    ));
    assert_eq!(reports.state(ReportKind::System), JobState::Idle);
}

#[test]
fn unknown_kind_is_rejected() {
    assert!(matches!("weather".parse::<ReportKind>(), Err(FleetError::InvalidReportKind(_))));
    assert_eq!("combo".parse::<ReportKind>().unwrap(), ReportKind::Combination);
}

#[tokio::test]
async fn node_gone_offline_becomes_a_fragment() {
    let client = ScriptedClient::new()
        .node("10.0.0.1", NodeScript::online("alpha"))
        .node("10.0.0.2", NodeScript::offline())
        .shared();
    let reports = aggregator(client, "report-offline");

    let report = reports
        .run_report(ReportKind::System, &addresses(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap()
        .unwrap();

    let nodes = &report.sections[0].nodes;
    assert_eq!(nodes.len(), 2);
    let offline = nodes.iter().find(|n| n.address.as_str() == "10.0.0.2").unwrap();
    assert!(matches!(offline.outcome, NodeOutcome::Offline));
    assert_eq!(report.sections[0].online_count(), 1);
    assert!(report.to_html().contains("Offline"));
}

#[tokio::test]
async fn node_failing_mid_way_becomes_a_failed_fragment() {
    let client = ScriptedClient::new()
        .node("10.0.0.1", NodeScript::online("alpha").without(Command::GetRAMTotal))
        .shared();
    let reports = aggregator(client, "report-failed");

    let report = reports
        .run_report(ReportKind::System, &addresses(&["10.0.0.1"]))
        .await
        .unwrap()
        .unwrap();

    let node = &report.sections[0].nodes[0];
    assert_eq!(node.hostname.as_deref(), Some("alpha"));
    assert!(matches!(node.outcome, NodeOutcome::Failed(_)));
    assert!(!node.is_online());
}

#[tokio::test]
async fn failed_login_hides_online_service_settings() {
    let client = ScriptedClient::new()
        .node("10.0.0.1", NodeScript::online("alpha").bad_login())
        .shared();
    let reports = aggregator(client.clone(), "report-login");

    let report = reports
        .run_report(ReportKind::Configuration, &addresses(&["10.0.0.1"]))
        .await
        .unwrap()
        .unwrap();

    let node = &report.sections[0].nodes[0];
    assert_eq!(node.login, LoginCheck::Failed);
    let NodeOutcome::Online(ReportBody::Configuration(summary)) = &node.outcome else {
        panic!("expected a configuration body, got {:?}", node.outcome);
    };
    assert_eq!(summary.weather_underground, Badge::NotAvailable);
    assert_eq!(summary.open_sense_map, Badge::NotAvailable);
    assert_eq!(summary.debug_logging, Badge::Enabled);
    assert_eq!(summary.interval_seconds, "300.0");
    assert_eq!(summary.wifi_ssid, "N/A");
    assert_eq!(client.calls("10.0.0.1", Command::GetWeatherUndergroundConfiguration), 0);
    assert_eq!(client.calls("10.0.0.1", Command::GetWifiConfiguration), 0);
}

#[tokio::test]
async fn good_login_reads_online_service_settings() {
    let client = ScriptedClient::new()
        .node("10.0.0.1", NodeScript::online("alpha"))
        .shared();
    let reports = aggregator(client, "report-login-ok");

    let report = reports
        .run_report(ReportKind::Configuration, &addresses(&["10.0.0.1"]))
        .await
        .unwrap()
        .unwrap();

    let node = &report.sections[0].nodes[0];
    assert_eq!(node.login, LoginCheck::Ok);
    let NodeOutcome::Online(ReportBody::Configuration(summary)) = &node.outcome else {
        panic!("expected a configuration body, got {:?}", node.outcome);
    };
    assert_eq!(summary.weather_underground, Badge::Enabled);
    assert_eq!(summary.open_sense_map, Badge::Disabled);
    assert_eq!(summary.wifi_ssid, "HomeNet");
    assert_eq!(summary.sensor_checkin, Badge::Enabled);
    assert_eq!(summary.temperature_offset, Badge::NotAvailable);
    assert_eq!(summary.rpi_model, "Raspberry Pi 4 Model B");

    let html = report.to_html();
    assert!(html.contains("<tr><td>WiFi Network</td><td>HomeNet</td></tr>"));
    assert!(html.contains("<tr><td>Board</td><td>Raspberry Pi 4 Model B</td></tr>"));
}

#[tokio::test]
async fn missing_wifi_dump_keeps_the_node_online() {
    let client = ScriptedClient::new()
        .node("10.0.0.1", NodeScript::online("alpha").without(Command::GetWifiConfiguration))
        .shared();
    let reports = aggregator(client, "report-no-wifi");

    let report = reports
        .run_report(ReportKind::Configuration, &addresses(&["10.0.0.1"]))
        .await
        .unwrap()
        .unwrap();

    let NodeOutcome::Online(ReportBody::Configuration(summary)) = &report.sections[0].nodes[0].outcome else {
        panic!("expected a configuration body");
    };
    assert_eq!(summary.wifi_ssid, "N/A");
}

#[tokio::test]
async fn readings_carry_units_and_links_keep_the_scheme() {
    let client = ScriptedClient::new()
        .node("http://10.0.0.9:8080", NodeScript::online("porch"))
        .shared();
    let reports = aggregator(client, "report-units");

    let report = reports
        .run_report(ReportKind::Readings, &addresses(&["http://10.0.0.9:8080"]))
        .await
        .unwrap()
        .unwrap();

    let node = &report.sections[0].nodes[0];
    let NodeOutcome::Online(ReportBody::Readings(readings)) = &node.outcome else {
        panic!("expected readings, got {:?}", node.outcome);
    };
    let units: Vec<&str> = readings.iter().map(|r| r.unit).collect();
    assert_eq!(units, vec!["", "%RH"]);

    let html = report.to_html();
    assert!(html.contains("<tr><td>Humidity</td><td>40.2 %RH</td></tr>"));
    assert!(html.contains("href=\"http://10.0.0.9:8080/\""));
    assert!(!html.contains("https://10.0.0.9"));
}

#[tokio::test]
async fn combination_has_every_section() {
    let client = ScriptedClient::new()
        .node("10.0.0.1", NodeScript::online("alpha"))
        .node("10.0.0.2", NodeScript::online("beta"))
        .shared();
    let reports = aggregator(client, "report-combo");

    let report = reports
        .run_report(ReportKind::Combination, &addresses(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap()
        .unwrap();

    let kinds: Vec<ReportKind> = report.sections.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![ReportKind::System, ReportKind::Configuration, ReportKind::Readings, ReportKind::Latency]
    );
    assert!(report.sections.iter().all(|s| s.nodes.len() == 2));

    let NodeOutcome::Online(ReportBody::Readings(readings)) = &report.sections[2].nodes[0].outcome else {
        panic!("expected readings");
    };
    let names: Vec<&str> = readings.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Env Temperature", "Humidity"]);

    // run_report hands the result over directly
    assert_eq!(reports.state(ReportKind::Combination), JobState::Idle);

    let json = report.to_json().unwrap();
    assert!(json.contains("\"Configuration\""));
}
