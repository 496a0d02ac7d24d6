use marketsync_config::{ConfigError, ConfigLoader, EnvResolver, FileFormat};
use std::env;
use std::fs;
use tempfile::TempDir;

const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

#[test]
fn loads_yaml_file_with_env_placeholders() {
    env::set_var("MARKETSYNC_IT_DB_URL", "postgres://sync@localhost/marketsync");
    env::set_var("MARKETSYNC_IT_KEY", KEY);

    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("marketsync.yaml");
    fs::write(
        &path,
        r#"
database:
  url: "${MARKETSYNC_IT_DB_URL}"
  max_connections: "${MARKETSYNC_IT_POOL:4}"
vault:
  key_hex: "${MARKETSYNC_IT_KEY}"
workers:
  order_poll_interval_secs: 120
  lease_ttl_secs: 0
providers:
  marketplaces: [allegro, ebay]
  oauth_refresh: [allegro]
logging:
  level: "marketsync=debug,info"
  json: true
"#,
    )
    .expect("write config");

    let config = ConfigLoader::new().load_from_file(&path).expect("load");

    assert_eq!(config.database_url().expect("url"), "postgres://sync@localhost/marketsync");
    assert_eq!(config.database.max_connections, 4);
    assert_eq!(config.key_hex().expect("key"), KEY);
    assert_eq!(config.workers.order_poll_interval_secs, 120);
    assert_eq!(config.workers.tracking_poll_interval_secs, 900);
    assert!(!config.workers.leases_enabled());
    assert_eq!(config.providers.oauth_refresh, vec!["allegro"]);
    assert!(config.logging.json);

    env::remove_var("MARKETSYNC_IT_DB_URL");
    env::remove_var("MARKETSYNC_IT_KEY");
}

#[test]
fn loads_json_file() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("marketsync.json");
    fs::write(&path, r#"{"http": {"timeout_secs": 5}, "providers": {"tracking": false}}"#)
        .expect("write config");

    let config = ConfigLoader::new().load_from_file(&path).expect("load");

    assert_eq!(config.http.timeout_secs, 5);
    assert_eq!(config.http.connect_timeout_secs, 10);
    assert!(!config.providers.tracking);
}

#[test]
fn short_vault_key_is_rejected() {
    let err = ConfigLoader::new()
        .parse_content("vault:\n  key_hex: \"abcd\"\n", FileFormat::Yaml)
        .expect_err("short key");
    assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("32 bytes")));
}

#[test]
fn zero_interval_is_rejected() {
    let err = ConfigLoader::new()
        .parse_content(r#"{"workers": {"oauth_refresh_interval_secs": 0}}"#, FileFormat::Json)
        .expect_err("zero interval");
    assert!(err.to_string().contains("oauth_refresh_interval_secs"));
}

#[test]
fn non_whitelisted_variable_is_rejected_before_resolution() {
    let err = ConfigLoader::new()
        .parse_content("database:\n  url: \"${HOME}\"\n", FileFormat::Yaml)
        .expect_err("not whitelisted");
    assert!(matches!(err, ConfigError::Env(_)));

    let config = ConfigLoader::with_resolver(EnvResolver::unrestricted())
        .parse_content("database:\n  url: \"${UNSET_IT_VAR:postgres://x}\"\n", FileFormat::Yaml)
        .expect("unrestricted");
    assert_eq!(config.database.url.as_deref(), Some("postgres://x"));
}

#[test]
fn missing_file_is_io_error() {
    let dir = TempDir::new().expect("tempdir");
    let err = ConfigLoader::new()
        .load_from_file(dir.path().join("absent.yaml"))
        .expect_err("missing");
    assert!(matches!(err, ConfigError::Io(_)));
}
