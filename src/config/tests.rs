use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::settings::{PartialDispatchSettings, PartialSettings, Settings};
use super::{BacklogKind, load_config, load_config_from};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.broker.max_connections, 1000);
    assert_eq!(settings.dispatch.config_key, "dispatch");
    assert_eq!(settings.dispatch.admin_identity, "__dispatch");
    assert_eq!(settings.dispatch.backlog, BacklogKind::Memory);
    assert!(settings.dispatch.rules_file.is_none());
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn test_partial_merge_keeps_unset_defaults() {
    let partial = PartialSettings {
        dispatch: Some(PartialDispatchSettings {
            backlog: Some(BacklogKind::Sled),
            ..Default::default()
        }),
        ..Default::default()
    };
    let merged = partial.merge(Settings::default());
    assert_eq!(merged.dispatch.backlog, BacklogKind::Sled);
    assert_eq!(merged.dispatch.backlog_path, "backlog_db");
    assert_eq!(merged.server, Settings::default().server);
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("msgdispatch.toml");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [broker]
        max_connections = 10

        [dispatch]
        config_key = "uplink"
        rules_file = "rules/uplink.xml"
        backlog = "sled"

        [logging]
        level = "debug"
    "#;
    fs::write(&path, toml).expect("write config file");

    let cfg = load_config_from(Some(&path)).expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.broker.max_connections, 10);
    assert_eq!(cfg.dispatch.config_key, "uplink");
    assert_eq!(cfg.dispatch.rules_file.as_deref(), Some("rules/uplink.xml"));
    assert_eq!(cfg.dispatch.backlog, BacklogKind::Sled);
    assert_eq!(cfg.dispatch.admin_identity, "__dispatch");
    assert_eq!(cfg.logging.level, "debug");
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    let tmp = TempDir::new().expect("create tempdir");
    assert!(load_config_from(Some(&tmp.path().join("absent.toml"))).is_err());
}

#[test]
#[serial]
fn test_environment_overrides() {
    temp_env::with_vars(
        [
            ("MSGDISPATCH_SERVER__PORT", Some("9100")),
            ("MSGDISPATCH_DISPATCH__ADMIN_IDENTITY", Some("__ops")),
            ("MSGDISPATCH_LOGGING__LEVEL", Some("warn")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.server.port, 9100);
            assert_eq!(cfg.dispatch.admin_identity, "__ops");
            assert_eq!(cfg.logging.level, "warn");
        },
    );
}
