use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use mdbench::config::{Config, ConfigLoader};
use mdbench::environment::EnvironmentPolicy;
use mdbench::error::MdError;

#[test]
fn parse_config_overrides() {
    let config: Config = serde_json::from_str(
        r#"{
            "schema_version": 1,
            "dbdir": "/data/md17",
            "base_url": "http://mirror.test/npz",
            "properties": ["energy", "forces"],
            "environment": { "kind": "cutoff", "radius": 5.0 },
            "collect_triples": true,
            "timeout_secs": 30
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.dbdir, Utf8PathBuf::from("/data/md17"));
    assert_eq!(resolved.base_url, "http://mirror.test/npz");
    assert_eq!(
        resolved.store.environment,
        EnvironmentPolicy::Cutoff { radius: 5.0 }
    );
    assert!(resolved.store.collect_triples);
    assert_eq!(resolved.timeout, Duration::from_secs(30));
    assert_eq!(resolved.scratch_dir, None);
}

#[test]
fn empty_properties_are_rejected() {
    let config = Config {
        dbdir: Some("/tmp/md".to_string()),
        properties: Some(Vec::new()),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(MdError::ConfigParse(_))
    );
}

#[test]
fn non_positive_cutoff_is_rejected() {
    let config = Config {
        dbdir: Some("/tmp/md".to_string()),
        environment: Some(EnvironmentPolicy::Cutoff { radius: 0.0 }),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(MdError::ConfigParse(_))
    );
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(MdError::ConfigRead(missing)) if missing == path
    );
}

#[test]
fn config_file_is_loaded() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("mdbench.json");
    fs::write(&path, r#"{ "dbdir": "/srv/md17", "scratch_dir": "/srv/tmp" }"#).unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.dbdir, Utf8PathBuf::from("/srv/md17"));
    assert_eq!(resolved.scratch_dir, Some(Utf8PathBuf::from("/srv/tmp")));
}

#[test]
fn invalid_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("mdbench.json");
    fs::write(&path, "{ dbdir: ").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(MdError::ConfigParse(_))
    );
}
