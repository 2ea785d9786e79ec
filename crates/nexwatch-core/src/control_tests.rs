use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::MonitorConfig;
use crate::control::{ControlLoop, LoopError, StopReason};
use crate::device::Feature;
use crate::monitor::{detail_monitor, FdbProbe, FeatureMonitor, InterfaceProbe, RoutingProbe};
use crate::orchestrator::Orchestrator;
use crate::report::{COMMON_REPORT_FILE, DETAIL_REPORT_FILE};
use crate::testing::{make_temp_dir, Reply, ScriptedDevice, ScriptedOperator};

const FOOTER: usize = 102;

fn interfaces() -> Value {
    json!({"Ethernet1/1": {"oper_status": "up"}, "Ethernet1/2": {"oper_status": "up"}})
}

fn mac_table(entries: usize) -> Value {
    let macs: serde_json::Map<String, Value> = (0..entries)
        .map(|i| (format!("0000.0000.{i:04x}"), json!({})))
        .collect();
    json!({"mac_table": {"vlans": {"10": {"mac_addresses": macs}}}})
}

fn config(dir: &Path, max_cycles: Option<u64>) -> MonitorConfig {
    MonitorConfig {
        output_dir: dir.to_path_buf(),
        reconnect_delay: Duration::ZERO,
        max_cycles,
        ..MonitorConfig::default()
    }
}

fn orchestrator() -> Orchestrator {
    let monitors = vec![FeatureMonitor::boxed(InterfaceProbe), FeatureMonitor::boxed(FdbProbe::new(5.0))];
    Orchestrator::new(monitors, 2).with_detail(detail_monitor())
}

fn control(
    device: &ScriptedDevice,
    operator: &ScriptedOperator,
    config: MonitorConfig,
) -> (ControlLoop<ScriptedDevice, ScriptedOperator>, mpsc::Sender<()>) {
    control_with(device, operator, config, orchestrator())
}

fn control_with(
    device: &ScriptedDevice,
    operator: &ScriptedOperator,
    config: MonitorConfig,
    orchestrator: Orchestrator,
) -> (ControlLoop<ScriptedDevice, ScriptedOperator>, mpsc::Sender<()>) {
    let (tx, rx) = mpsc::channel(4);
    let device = device.clone().interrupting(tx.clone());
    (ControlLoop::new(device, operator.clone(), orchestrator, config, rx), tx)
}

fn baseline_dirs(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .expect("read output dir")
        .map(|entry| entry.expect("dir entry").path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("leaf-1_original_snapshot_"))
        })
        .collect()
}

#[tokio::test]
async fn single_cycle_writes_report_and_baseline() {
    // Arrange
    let dir = make_temp_dir("single-cycle");
    let device = ScriptedDevice::new("leaf-1")
        .with(Feature::Interface, [Reply::Value(interfaces())])
        .with(Feature::Fdb, [Reply::Value(mac_table(20))]);
    let operator = ScriptedOperator::default();
    let (mut control, _tx) = control(&device, &operator, config(&dir, Some(1)));

    // Act
    let summary = control.run().await.expect("run");

    // Assert
    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.stop, StopReason::CycleLimit);
    let report = fs::read_to_string(dir.join(COMMON_REPORT_FILE)).expect("common report");
    assert!(report.contains("leaf-1 does not change."));
    let baselines = baseline_dirs(&dir);
    assert_eq!(baselines.len(), 1);
    assert!(baselines[0].join("interface_up_list.json").is_file());
    assert!(baselines[0].join("fdb.json").is_file());
    assert!(operator.saw("leaf-1 does not change."));

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn transport_loss_retries_the_cycle_without_partial_report() {
    // Arrange
    let dir = make_temp_dir("transport-retry");
    let device = ScriptedDevice::new("leaf-1")
        .with(
            Feature::Interface,
            [Reply::Value(interfaces()), Reply::Disconnected, Reply::Value(interfaces())],
        )
        .with(Feature::Fdb, [Reply::Value(mac_table(1000)), Reply::Value(mac_table(100))]);
    let operator = ScriptedOperator::default();
    let (mut control, _tx) = control(&device, &operator, config(&dir, Some(1)));

    // Act
    let summary = control.run().await.expect("run");

    // Assert
    assert_eq!(summary.cycles, 1);
    assert_eq!(device.connect_count(), 2);
    assert_eq!(device.query_count(Feature::Interface), 3);
    assert!(operator.saw("Retrying in 0 seconds"));
    let report = fs::read_to_string(dir.join(COMMON_REPORT_FILE)).expect("common report");
    assert_eq!(report.matches(&"-".repeat(FOOTER)).count(), 1);
    assert_eq!(report.matches("entries lost").count(), 1);
    assert!(report.contains("900 entries lost: 90.00% MAC addresses below baseline (1000 -> 100)"));

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn pause_keeps_baseline_and_toggles_detailed_mode() {
    // Arrange
    let dir = make_temp_dir("pause-toggle");
    let device = ScriptedDevice::new("leaf-1")
        .with(
            Feature::Interface,
            [Reply::Value(interfaces()), Reply::Interrupt, Reply::Value(interfaces())],
        )
        .with(Feature::Fdb, [Reply::Value(mac_table(20))])
        .with_all([Reply::Value(json!({"show clock": {"timezone": "UTC"}}))]);
    let operator = ScriptedOperator::answering(&[false], &[true]);
    let (mut control, _tx) = control(&device, &operator, config(&dir, Some(1)));

    // Act
    let summary = control.run().await.expect("run");

    // Assert
    assert_eq!(summary.cycles, 1);
    assert!(control.detailed());
    assert!(operator.saw("You have paused the program."));
    assert_eq!(device.disconnect_count(), 1);
    assert_eq!(device.connect_count(), 2);
    assert_eq!(device.query_count(Feature::Interface), 3);
    assert_eq!(control.orchestrator().active(), vec!["interface", "fdb"]);
    let detail = fs::read_to_string(dir.join(DETAIL_REPORT_FILE)).expect("detail report");
    assert!(detail.contains("None\n"));
    assert_eq!(baseline_dirs(&dir).len(), 1);

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn operator_can_exit_while_paused() {
    // Arrange
    let dir = make_temp_dir("operator-exit");
    let device = ScriptedDevice::new("leaf-1")
        .with(Feature::Interface, [Reply::Value(interfaces()), Reply::Interrupt])
        .with(Feature::Fdb, [Reply::Value(mac_table(20))]);
    let operator = ScriptedOperator::answering(&[true], &[]);
    let (mut control, _tx) = control(&device, &operator, config(&dir, None));

    // Act
    let summary = control.run().await.expect("run");

    // Assert
    assert_eq!(summary.stop, StopReason::OperatorExit);
    assert_eq!(summary.cycles, 0);
    assert!(operator.saw("The program has exited."));
    assert!(!dir.join(COMMON_REPORT_FILE).exists());

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn interrupt_while_learning_baseline_terminates_without_prompting() {
    // Arrange
    let dir = make_temp_dir("baseline-interrupt");
    let device = ScriptedDevice::new("leaf-1")
        .with(Feature::Interface, [Reply::Interrupt])
        .with(Feature::Fdb, [Reply::Value(mac_table(20))]);
    let operator = ScriptedOperator::answering(&[false], &[]);
    let (mut control, _tx) = control(&device, &operator, config(&dir, None));

    // Act
    let summary = control.run().await.expect("run");

    // Assert
    assert_eq!(summary.stop, StopReason::Interrupted);
    assert!(operator.presented().is_empty());

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn refused_connection_is_fatal() {
    // Arrange
    let dir = make_temp_dir("refused");
    let device = ScriptedDevice::new("leaf-1").refusing_connections();
    let operator = ScriptedOperator::default();
    let (mut control, _tx) = control(&device, &operator, config(&dir, None));

    // Act
    let result = control.run().await;

    // Assert
    assert!(matches!(result, Err(LoopError::Connect(_))));

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn connection_lost_during_baseline_is_fatal() {
    // Arrange
    let dir = make_temp_dir("baseline-lost");
    let device = ScriptedDevice::new("leaf-1")
        .with(Feature::Interface, [Reply::Disconnected])
        .with(Feature::Fdb, [Reply::Value(mac_table(20))]);
    let operator = ScriptedOperator::default();
    let (mut control, _tx) = control(&device, &operator, config(&dir, None));

    // Act
    let result = control.run().await;

    // Assert
    assert!(matches!(result, Err(LoopError::BaselineLost(_))));
    assert_eq!(device.connect_count(), 1);

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn baseline_only_run_stops_after_learning() {
    // Arrange
    let dir = make_temp_dir("baseline-only");
    let device = ScriptedDevice::new("leaf-1")
        .with(Feature::Interface, [Reply::Value(interfaces())])
        .with(Feature::Fdb, [Reply::Value(mac_table(20))]);
    let operator = ScriptedOperator::default();
    let (mut control, _tx) = control(&device, &operator, config(&dir, Some(0)));

    // Act
    let summary = control.run().await.expect("run");

    // Assert
    assert_eq!(summary.cycles, 0);
    assert_eq!(summary.stop, StopReason::CycleLimit);
    assert_eq!(device.query_count(Feature::Interface), 1);
    assert_eq!(baseline_dirs(&dir).len(), 1);

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn previous_report_files_are_cleared_at_start() {
    // Arrange
    let dir = make_temp_dir("clear-reports");
    fs::write(dir.join(COMMON_REPORT_FILE), "stale report\n").expect("seed common");
    fs::write(dir.join(DETAIL_REPORT_FILE), "stale detail\n").expect("seed detail");
    let device = ScriptedDevice::new("leaf-1")
        .with(Feature::Interface, [Reply::Value(interfaces())])
        .with(Feature::Fdb, [Reply::Value(mac_table(20))]);
    let operator = ScriptedOperator::default();
    let (mut control, _tx) = control(&device, &operator, config(&dir, Some(1)));

    // Act
    control.run().await.expect("run");

    // Assert
    let report = fs::read_to_string(dir.join(COMMON_REPORT_FILE)).expect("common report");
    assert!(!report.contains("stale report"));
    assert!(!dir.join(DETAIL_REPORT_FILE).exists());

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn imported_baseline_is_compared_without_relearning() {
    // Arrange
    let dir = make_temp_dir("import");
    let import = dir.join("saved");
    fs::create_dir_all(&import).expect("import dir");
    fs::write(import.join("interface_up_list.json"), r#"["Ethernet1/1", "Ethernet1/2"]"#).expect("interfaces");
    fs::write(import.join("fdb.json"), "100").expect("fdb");
    let device = ScriptedDevice::new("leaf-1")
        .with(Feature::Interface, [Reply::Value(interfaces())])
        .with(Feature::Fdb, [Reply::Value(mac_table(50))]);
    let operator = ScriptedOperator::default();
    let mut settings = config(&dir, Some(1));
    settings.baseline_dir = Some(import.clone());
    let (mut control, _tx) = control(&device, &operator, settings);

    // Act
    control.run().await.expect("run");

    // Assert
    assert_eq!(device.query_count(Feature::Fdb), 1);
    assert!(baseline_dirs(&dir).is_empty());
    assert!(operator.saw("50 entries lost: 50.00% MAC addresses below baseline (100 -> 50)"));

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn capability_loss_during_a_lost_round_does_not_end_the_run() {
    // Arrange
    let dir = make_temp_dir("lost-round-capability");
    let device = ScriptedDevice::new("leaf-1")
        .with(
            Feature::Interface,
            [Reply::Value(interfaces()), Reply::Disconnected, Reply::Value(interfaces())],
        )
        .with(Feature::Fdb, [Reply::Value(mac_table(20)), Reply::Parse]);
    let operator = ScriptedOperator::default();
    let (mut control, _tx) = control(&device, &operator, config(&dir, Some(1)));

    // Act
    let summary = control.run().await.expect("run");

    // Assert
    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.stop, StopReason::CycleLimit);
    assert!(operator.saw("Retrying in 0 seconds"));
    assert_eq!(device.query_count(Feature::Fdb), 2);
    assert_eq!(control.orchestrator().active(), vec!["interface"]);
    assert_eq!(control.orchestrator().unsupported(), &["fdb"]);
    let report = fs::read_to_string(dir.join(COMMON_REPORT_FILE)).expect("common report");
    assert!(report.contains("leaf-1 does not change."));

    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn interrupt_after_some_monitors_evaluated_adopts_nothing_from_that_round() {
    // Arrange
    let dir = make_temp_dir("partial-interrupt");
    let one_down = json!({"Ethernet1/1": {"oper_status": "up"}, "Ethernet1/2": {"oper_status": "down"}});
    let routes = json!({"vrf": {"default": {"address_family": {"ipv4": {"routes": {"0.0.0.0/0": {}}}}}}});
    let device = ScriptedDevice::new("leaf-1")
        .with(
            Feature::Interface,
            [Reply::Value(interfaces()), Reply::Value(one_down), Reply::Value(interfaces())],
        )
        .with(
            Feature::Fdb,
            [Reply::Value(mac_table(20)), Reply::Interrupt, Reply::Value(mac_table(20))],
        )
        .with(Feature::Routing, [Reply::Value(routes), Reply::Parse]);
    let monitors = vec![
        FeatureMonitor::boxed(InterfaceProbe),
        FeatureMonitor::boxed(FdbProbe::new(5.0)),
        FeatureMonitor::boxed(RoutingProbe::new(5.0)),
    ];
    let operator = ScriptedOperator::answering(&[false], &[false]);
    let (mut control, _tx) = control_with(&device, &operator, config(&dir, Some(1)), Orchestrator::new(monitors, 3));

    // Act
    let summary = control.run().await.expect("run");

    // Assert
    assert_eq!(summary.cycles, 1);
    assert!(operator.saw("You have paused the program."));
    assert_eq!(device.query_count(Feature::Interface), 3);
    assert_eq!(device.query_count(Feature::Fdb), 3);
    assert_eq!(device.query_count(Feature::Routing), 2);
    assert_eq!(control.orchestrator().active(), vec!["interface", "fdb"]);
    assert_eq!(control.orchestrator().unsupported(), &["routing"]);
    let report = fs::read_to_string(dir.join(COMMON_REPORT_FILE)).expect("common report");
    assert_eq!(report.matches(&"-".repeat(FOOTER)).count(), 1);
    assert!(report.contains("leaf-1 does not change."));
    assert!(!report.contains("changed to down"));

    let _ = fs::remove_dir_all(dir);
}
