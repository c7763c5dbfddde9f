use hestia::config::{Config, MqttSettings, ValueKind};
use hestia::plugin::Context;
use std::fs;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg: Config = serde_yaml::from_str(
        r#"
devices:
  grid:
    kind: int
    source: modbus
    uri: 192.168.1.20
    id: 3
    register: {address: 40083, type: holding, decode: int16}
"#,
    )
    .unwrap();
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.logging.file, cfg.logging.file);
    let grid = &loaded.devices["grid"];
    assert_eq!(grid.kind, ValueKind::Int);
    assert_eq!(grid.plugin.source, "modbus");
    assert_eq!(grid.plugin, cfg.devices["grid"].plugin);
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();
    assert!(cfg.validate().is_ok());

    // Invalid level
    cfg.logging.level = "chatty".to_string();
    assert!(cfg.validate().is_err());

    // Broker required when mqtt is configured
    cfg = Config::default();
    cfg.mqtt = Some(MqttSettings::default());
    assert!(cfg.validate().is_err());

    // Device without source
    cfg = serde_yaml::from_str("devices:\n  pv:\n    kind: float\n").unwrap();
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("devices.pv.source"));
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}

#[tokio::test]
async fn devices_resolve_through_registry() {
    let cfg: Config = serde_yaml::from_str(
        r#"
devices:
  limit:
    kind: int
    source: calc
    mul:
      - {source: const, value: 16}
      - {source: const, value: 3}
"#,
    )
    .unwrap();

    let ctx = Context::builtin().unwrap().with_device("limit");
    let g = cfg.devices["limit"].plugin.int_getter(&ctx).await.unwrap();
    assert_eq!(g().await.unwrap(), 48);
}
