//! Configuration loading from files and the environment.

use std::io::Write;
use std::path::PathBuf;

use meids::config::{BoardModel, MeidsConfig};
use meids::logging::OutputFormat;
use meids::rpc::DEFAULT_PORT;
use meids::trigger::ConvClassMapping;
use meids::Driver;
use serial_test::serial;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(contents.as_bytes()).expect("Failed to write config");
    file
}

#[test]
#[serial]
fn test_shipped_config_loads_and_opens() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/meids.toml");
    let config = MeidsConfig::load_from(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.local.boards.len(), 2);
    assert_eq!(config.local.boards[1].model, BoardModel::Digital);
    assert!(config.remote.hosts.is_empty());
    assert_eq!(config.trigger.mapping, ConvClassMapping::Straight);

    let driver = Driver::open(&config).unwrap();
    assert_eq!(driver.query_number_devices(), 2);
}

#[test]
#[serial]
fn test_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
        [logging]
        level = "debug"
        format = "json"

        [trigger]
        mapping = "legacy"
        "#,
    );
    let config = MeidsConfig::load_from(file.path()).unwrap();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, OutputFormat::Json);
    assert_eq!(config.trigger.mapping, ConvClassMapping::Legacy);
    assert!(config.local.enabled);
    assert_eq!(config.remote.port, DEFAULT_PORT);
    assert_eq!(config.rpc_server.listen_address(), format!("0.0.0.0:{DEFAULT_PORT}"));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
        [remote]
        hosts = ["daq-lab-1", "daq-lab-2:7000"]
        timeout_ms = 5000
        "#,
    );
    std::env::set_var("MEIDS_REMOTE__TIMEOUT_MS", "250");
    let loaded = MeidsConfig::load_from(file.path());
    std::env::remove_var("MEIDS_REMOTE__TIMEOUT_MS");

    let config = loaded.unwrap();
    assert_eq!(config.remote.timeout_ms, 250);
    assert_eq!(
        config.remote.addresses(),
        vec![format!("daq-lab-1:{DEFAULT_PORT}"), "daq-lab-2:7000".to_string()]
    );
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    let file = write_config(
        r#"
        [[local.boards]]
        model = "digital"
        serial = 4

        [[local.boards]]
        model = "multifunction"
        serial = 4
        "#,
    );
    let config = MeidsConfig::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.contains("Duplicate board serial"));

    let bad_model = write_config(
        r#"
        [[local.boards]]
        model = "oscilloscope"
        serial = 1
        "#,
    );
    assert!(MeidsConfig::load_from(bad_model.path()).is_err());
}

#[test]
#[serial]
fn test_rendered_config_loads_back() {
    let file = write_config(
        r#"
        [logging]
        format = "compact"

        [local]
        boards = [{ model = "digital", serial = 7 }]

        [remote]
        hosts = ["10.0.0.5", "10.0.0.6:9000"]
        timeout_ms = 750

        [trigger]
        mapping = "legacy"
        "#,
    );
    let config = MeidsConfig::load_from(file.path()).unwrap();

    let rendered = config.to_toml().unwrap();
    assert!(rendered.contains("mapping = \"legacy\""));

    let copy = write_config(&rendered);
    assert_eq!(MeidsConfig::load_from(copy.path()).unwrap(), config);
}
