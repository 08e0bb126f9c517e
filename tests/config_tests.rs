use bms_sim::config::{ConfigError, Credentials, SimulatorConfig};
use bms_sim::transport::MemoryTransport;
use bms_sim::{Simulator, SimulatorError};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn yaml_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_minimal_config_uses_defaults() {
    let file = yaml_file("mqtt_server: broker.local\n");
    let config = SimulatorConfig::load(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.mqtt_server, "broker.local");
    assert_eq!(config.mqtt_port, 1883);
    assert_eq!(config.client_id, "bms-sim");
    assert_eq!(config.num_modules, 12);
    assert_eq!(config.num_cells, 12);
    assert_eq!(config.publish_interval(), Duration::from_secs(3));
    assert_eq!(config.keep_alive(), Duration::from_secs(60));
    assert_eq!(config.log_level, "info");
}

#[test]
fn test_full_config() {
    let file = yaml_file(
        "mqtt_server: 10.0.0.2\n\
         mqtt_port: 8883\n\
         client_id: rack-7\n\
         keep_alive_secs: 30\n\
         num_modules: 4\n\
         num_cells: 16\n\
         publish_interval_secs: 1\n\
         log_level: debug\n",
    );
    let config = SimulatorConfig::load(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.mqtt_port, 8883);
    assert_eq!(config.client_id, "rack-7");
    assert_eq!(config.num_modules, 4);
    assert_eq!(config.num_cells, 16);
    assert_eq!(config.publish_interval(), Duration::from_secs(1));
    assert_eq!(config.log_level, "debug");
}

#[test]
fn test_missing_server_is_a_parse_error() {
    let file = yaml_file("num_modules: 2\n");
    let err = SimulatorConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_missing_config_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SimulatorConfig::load(dir.path().join("config.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn test_validation_rejects_out_of_range_values() {
    for yaml in [
        "mqtt_server: b\nnum_modules: 0\n",
        "mqtt_server: b\nnum_cells: 0\n",
        "mqtt_server: b\nnum_cells: 17\n",
        "mqtt_server: b\npublish_interval_secs: 0\n",
        "mqtt_server: b\nkeep_alive_secs: 1\n",
        "mqtt_server: '  '\n",
    ] {
        let config = SimulatorConfig::from_yaml(yaml).unwrap();
        assert!(
            matches!(config.validate(), Err(ConfigError::Invalid(_))),
            "accepted {yaml:?}"
        );
    }
}

#[test]
fn test_simulator_from_config_validates() {
    let mut config = SimulatorConfig::default();
    config.num_modules = 3;
    config.num_cells = 2;
    let simulator = Simulator::from_config(&config, Arc::new(MemoryTransport::new())).unwrap();
    assert_eq!(simulator.interval(), Duration::from_secs(3));

    config.num_cells = 0;
    let err = Simulator::from_config(&config, Arc::new(MemoryTransport::new())).err();
    assert!(matches!(err, Some(SimulatorError::Config(ConfigError::Invalid(_)))));
}

#[test]
fn test_credentials_are_optional() {
    let dir = tempfile::tempdir().unwrap();
    let missing = Credentials::load_optional(dir.path().join("credentials.yaml")).unwrap();
    assert!(missing.is_none());

    let file = yaml_file("username: sim\npassword: hunter2\n");
    let credentials = Credentials::load_optional(file.path()).unwrap().unwrap();
    assert_eq!(credentials.username, "sim");
    assert_eq!(credentials.password, "hunter2");

    let debug = format!("{credentials:?}");
    assert!(debug.contains("sim"));
    assert!(!debug.contains("hunter2"));
}

#[test]
fn test_malformed_credentials_are_rejected() {
    let file = yaml_file("username: sim\n");
    let err = Credentials::load_optional(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}
