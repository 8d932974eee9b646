mod common;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::TestResult;
use privhelper::config::{load_and_validate, load_or_default, validate_config, ConfigFile};
use privhelper::types::parse_duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn defaults_are_valid() -> TestResult {
    let cfg = load_or_default(None)?;
    assert_eq!(cfg.helper.service_name, "io.privhelper.worker");
    assert_eq!(cfg.helper.socket_path, PathBuf::from("/var/run/privhelper.sock"));
    assert_eq!(cfg.helper.poll_interval(), Duration::from_secs(1));
    assert_eq!(
        cfg.install.executable_path,
        PathBuf::from("/usr/local/libexec/privhelper-worker")
    );
    assert_eq!(
        cfg.install.descriptor_path,
        PathBuf::from("/etc/privhelper/worker.toml")
    );
    assert_eq!(cfg.authority.rights_path, PathBuf::from("/etc/privhelper/rights.toml"));
    assert_eq!(cfg.authority.key_path, PathBuf::from("/etc/privhelper/authority.key"));
    assert!(!cfg.authority.interactive);
    assert!(cfg.identity.trusted_digests.is_empty());
    Ok(())
}

#[test]
fn empty_file_yields_defaults() -> TestResult {
    let file = write_config("");
    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.helper.service_name, ConfigFile::default().helper.service_name);
    Ok(())
}

#[test]
fn full_file_is_parsed() -> TestResult {
    let digest = "ab".repeat(32);
    let file = write_config(&format!(
        r#"
[helper]
service_name = "com.example.helper"
socket_path = "/run/example.sock"
poll_interval = "250ms"

[install]
executable_path = "/opt/example/worker"
descriptor_path = "/opt/example/worker.toml"

[authority]
rights_path = "/opt/example/rights.toml"
key_path = "/opt/example/authority.key"
interactive = true

[identity]
trusted_digests = ["{digest}"]
"#
    ));

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.helper.service_name, "com.example.helper");
    assert_eq!(cfg.helper.socket_path, Path::new("/run/example.sock"));
    assert_eq!(cfg.helper.poll_interval(), Duration::from_millis(250));
    assert_eq!(cfg.install.executable_path, Path::new("/opt/example/worker"));
    assert_eq!(cfg.authority.key_path, Path::new("/opt/example/authority.key"));
    assert!(cfg.authority.interactive);
    assert_eq!(cfg.identity.trusted_digests, vec![digest]);
    Ok(())
}

#[test]
fn zero_poll_interval_is_rejected() {
    let file = write_config("[helper]\npoll_interval = \"0s\"\n");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("poll_interval"));
}

#[test]
fn unparsable_poll_interval_is_rejected() {
    let file = write_config("[helper]\npoll_interval = \"soon\"\n");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("parsing TOML config"));
}

#[test]
fn relative_paths_are_rejected() {
    let file = write_config("[install]\nexecutable_path = \"bin/worker\"\n");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("[install].executable_path"));
}

#[test]
fn bad_service_name_is_rejected() {
    let mut cfg = ConfigFile::default();
    cfg.helper.service_name = "has space".to_string();
    assert!(validate_config(&cfg).is_err());

    cfg.helper.service_name = String::new();
    assert!(validate_config(&cfg).is_err());
}

#[test]
fn malformed_digest_is_rejected() {
    let mut cfg = ConfigFile::default();
    cfg.identity.trusted_digests = vec!["deadbeef".to_string()];
    let err = validate_config(&cfg).unwrap_err();
    assert!(err.to_string().contains("deadbeef"));
}

#[test]
fn missing_file_reports_path() {
    let err = load_or_default(Some(Path::new("/nonexistent/privhelper.toml"))).unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/privhelper.toml"));
}

#[test]
fn durations_accept_common_units() -> TestResult {
    assert_eq!(parse_duration("250ms")?, Duration::from_millis(250));
    assert_eq!(parse_duration("3s")?, Duration::from_secs(3));
    assert_eq!(parse_duration("2m")?, Duration::from_secs(120));
    assert_eq!(parse_duration("1h")?, Duration::from_secs(3600));
    assert!(parse_duration("5").is_err());
    assert!(parse_duration("5d").is_err());
    assert!(parse_duration("").is_err());
    Ok(())
}

#[test]
fn oversized_durations_are_rejected_not_wrapped() -> TestResult {
    let err = parse_duration("18446744073709551615h").unwrap_err();
    assert!(err.contains("too large"), "unexpected error: {err}");
    assert!(parse_duration("307445734561825861m").is_err());
    assert!(parse_duration("18446744073709551615s").is_err());
    assert_eq!(
        parse_duration("18446744073709551615ms")?,
        Duration::from_millis(u64::MAX)
    );
    Ok(())
}

#[test]
fn relative_key_path_is_rejected() {
    let file = write_config("[authority]\nkey_path = \"authority.key\"\n");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("[authority].key_path"));
}
