#![cfg(feature = "toml-config")]

use std::fs;

use anyhow::Result;
use kernjit::JitConfig;
use kernjit::runtime::jit::{KeyPolicy, SpecializationMode};

fn temp_config_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("kernjit-config-test")
        .tempdir()
        .expect("failed to create temp dir")
}

#[test]
fn config_file_roundtrips() -> Result<()> {
    let dir = temp_config_dir();
    let path = dir.path().join("kernjit.toml");
    fs::write(
        &path,
        "worker_threads = 3\nkey_policy = \"location\"\nspecialization = \"always\"\nmax_specializations = 4\n",
    )?;

    let config = JitConfig::from_file(&path)?;
    assert_eq!(config.worker_threads, 3);
    assert_eq!(config.key_policy, KeyPolicy::Location);
    assert_eq!(config.specialization, SpecializationMode::Always);
    assert_eq!(config.max_specializations, 4);

    let rendered = toml::to_string(&config)?;
    assert_eq!(JitConfig::from_toml_str(&rendered)?, config);
    Ok(())
}

#[test]
fn missing_file_reports_its_path() {
    let dir = temp_config_dir();
    let path = dir.path().join("absent.toml");
    let err = JitConfig::from_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("absent.toml"));
}

#[test]
fn unknown_policy_is_rejected() {
    assert!(JitConfig::from_toml_str("key_policy = \"callsite\"\n").is_err());
}
