//! Configuration resolution order: command line > environment > TOML > default

use crewledger_common::config::ConfigLoader;
use serial_test::serial;
use std::io::Write;

#[test]
#[serial]
fn test_env_beats_file() {
    std::env::set_var("APP_PORT", "8088");

    let config = ConfigLoader::new()
        .toml_str("port = 9000")
        .unwrap()
        .load()
        .unwrap();

    std::env::remove_var("APP_PORT");
    assert_eq!(config.port, 8088);
}

#[test]
#[serial]
fn test_cli_beats_env() {
    std::env::set_var("APP_PORT", "8088");

    let config = ConfigLoader::new()
        .cli("port", Some(7000u16))
        .unwrap()
        .load()
        .unwrap();

    std::env::remove_var("APP_PORT");
    assert_eq!(config.port, 7000);
}

#[test]
#[serial]
fn test_empty_env_var_is_ignored() {
    std::env::set_var("TWILIO_AUTH_TOKEN", "");

    let config = ConfigLoader::new()
        .toml_str("twilio_auth_token = \"from-file\"")
        .unwrap()
        .load()
        .unwrap();

    std::env::remove_var("TWILIO_AUTH_TOKEN");
    assert_eq!(config.twilio.auth_token, "from-file");
}

#[test]
#[serial]
fn test_defaults_when_nothing_set() {
    for var in ["APP_PORT", "APP_HOST", "SMTP_PORT", "SESSION_HOURS", "OPENAI_MODEL"] {
        std::env::remove_var(var);
    }

    let config = ConfigLoader::new().load().unwrap();

    assert_eq!(config.port, 5000);
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.smtp.port, 587);
    assert_eq!(config.session_hours, 24);
    assert_eq!(config.openai_model, "gpt-4o-mini");
    assert!(config.database_path.ends_with("crewledger.db"));
}

#[test]
fn test_explicit_config_file_is_read() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "accountant_email = \"books@example.com\"").unwrap();
    writeln!(file, "receipt_storage_path = \"/srv/receipts\"").unwrap();

    let config = ConfigLoader::new()
        .file(Some(file.path()))
        .unwrap()
        .load()
        .unwrap();

    assert_eq!(config.accountant_email, "books@example.com");
    assert_eq!(config.receipt_storage_path.to_str(), Some("/srv/receipts"));
}

#[test]
fn test_missing_explicit_config_file_is_error() {
    let result = ConfigLoader::new().file(Some(std::path::Path::new("/nonexistent/crewledger.toml")));
    assert!(result.is_err());
}
