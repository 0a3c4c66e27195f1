//! Tests for startup configuration loading and validation.

use std::env;
use std::io::Write;
use std::sync::Mutex;

use logfunnel::config::{
    Config, SinkKind, DEFAULT_BUS_ADDR, DEFAULT_DEAD_LETTER_CAPACITY_MB, DEFAULT_INTAKE_WORKERS,
    DEFAULT_PRIORITY_CAPACITY_BYTES, DEFAULT_SINK_PATH,
};

/// `Config::load` reads process-wide environment variables; serialize the
/// tests that touch them.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

// ============================================================================
// Defaults
// ============================================================================

#[test]
fn test_builtin_defaults() {
    let cfg = Config::defaults();
    assert_eq!(cfg.intake_workers, DEFAULT_INTAKE_WORKERS);
    assert_eq!(cfg.priority_capacity_bytes, DEFAULT_PRIORITY_CAPACITY_BYTES);
    assert_eq!(cfg.dead_letter_capacity_mb, DEFAULT_DEAD_LETTER_CAPACITY_MB);
    assert_eq!(cfg.sink, SinkKind::File);
    assert_eq!(cfg.sink_path.to_str().unwrap(), DEFAULT_SINK_PATH);
    assert_eq!(&*cfg.bus_addr, DEFAULT_BUS_ADDR);
}

// ============================================================================
// TOML loading
// ============================================================================

#[test]
fn test_load_full_toml() {
    let _guard = ENV_LOCK.lock().unwrap();
    let file = write_config(
        r#"
intake_workers = 8
priority_capacity_bytes = 1048576
dead_letter_capacity_mb = 2
sink = "console"
sink_path = "/tmp/out.log"
bus_addr = "127.0.0.1:7777"
app_config_path = "/tmp/apps.json"
"#,
    );

    let cfg = Config::load(Some(file.path().to_path_buf())).unwrap();
    assert_eq!(cfg.intake_workers, 8);
    assert_eq!(cfg.priority_capacity_bytes, 1_048_576);
    assert_eq!(cfg.dead_letter_capacity_mb, 2);
    assert_eq!(cfg.sink, SinkKind::Console);
    assert_eq!(cfg.sink_path.to_str().unwrap(), "/tmp/out.log");
    assert_eq!(&*cfg.bus_addr, "127.0.0.1:7777");
    assert_eq!(cfg.app_config_path.to_str().unwrap(), "/tmp/apps.json");
}

#[test]
fn test_partial_toml_fills_in_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    let file = write_config("intake_workers = 2\n");

    let cfg = Config::load(Some(file.path().to_path_buf())).unwrap();
    assert_eq!(cfg.intake_workers, 2);
    assert_eq!(cfg.priority_capacity_bytes, DEFAULT_PRIORITY_CAPACITY_BYTES);
    assert_eq!(cfg.sink, SinkKind::File);
}

#[test]
fn test_unknown_sink_kind_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    let file = write_config("sink = \"carrier-pigeon\"\n");
    assert!(Config::load(Some(file.path().to_path_buf())).is_err());
}

#[test]
fn test_zero_workers_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    let file = write_config("intake_workers = 0\n");
    assert!(Config::load(Some(file.path().to_path_buf())).is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    assert!(Config::load(Some("/definitely/not/here.toml".into())).is_err());
}

// ============================================================================
// Environment overrides
// ============================================================================

#[test]
fn test_env_overrides_file_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    let file = write_config("intake_workers = 2\nsink = \"file\"\n");

    env::set_var("INTAKE_WORKERS", "9");
    env::set_var("SINK", "console");
    env::set_var("BUS_ADDR", "127.0.0.1:8888");
    let result = Config::load(Some(file.path().to_path_buf()));
    env::remove_var("INTAKE_WORKERS");
    env::remove_var("SINK");
    env::remove_var("BUS_ADDR");

    let cfg = result.unwrap();
    assert_eq!(cfg.intake_workers, 9);
    assert_eq!(cfg.sink, SinkKind::Console);
    assert_eq!(&*cfg.bus_addr, "127.0.0.1:8888");
}

#[test]
fn test_unparseable_env_values_are_ignored() {
    let _guard = ENV_LOCK.lock().unwrap();
    let file = write_config("intake_workers = 3\n");

    env::set_var("INTAKE_WORKERS", "many");
    let result = Config::load(Some(file.path().to_path_buf()));
    env::remove_var("INTAKE_WORKERS");

    assert_eq!(result.unwrap().intake_workers, 3);
}

// ============================================================================
// Sink kind parsing
// ============================================================================

#[test]
fn test_sink_kind_parse() {
    assert_eq!(SinkKind::parse("file"), Some(SinkKind::File));
    assert_eq!(SinkKind::parse("FILE"), Some(SinkKind::File));
    assert_eq!(SinkKind::parse("console"), Some(SinkKind::Console));
    assert_eq!(SinkKind::parse("Console"), Some(SinkKind::Console));
    assert_eq!(SinkKind::parse("syslog"), None);
}
