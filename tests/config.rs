// tests/config.rs
use std::path::{Path, PathBuf};
use std::{env, fs};

use timeline_consolidator::config::{AppConfig, ENV_CONFIG_PATH, ENV_DATABASE_PATH};
use timeline_consolidator::error::Error;
use timeline_consolidator::model::Platform;

#[test]
fn shipped_sample_config_parses() {
    let p = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/timeline.toml");
    let cfg = AppConfig::load_from(&p).unwrap();
    assert_eq!(cfg.policy(Platform::Twitch).shadow_window_secs, Some(3 * 3600));
    assert_eq!(cfg.quotas()[0].0, Platform::YouTube);
    assert_eq!(cfg.quotas()[0].1.daily_limit, 10_000);
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // isolate from the repo's own config/
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_CONFIG_PATH);
    env::remove_var(ENV_DATABASE_PATH);

    // 1) nothing on disk: built-in defaults
    let d = AppConfig::load_default().unwrap();
    assert_eq!(d, AppConfig::default());

    // 2) ./config/timeline.toml
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(
        cfg_dir.join("timeline.toml"),
        r#"
database_path = "local.db"

[ingest]
max_concurrency = 4
"#,
    )
    .unwrap();
    let local = AppConfig::load_default().unwrap();
    assert_eq!(local.database_path, PathBuf::from("local.db"));
    assert_eq!(local.ingest.max_concurrency, 4);

    // 3) env path wins over the fallback
    let p_env = tmp.path().join("elsewhere.toml");
    fs::write(&p_env, "[timeline]\nmax_limit = 25\n").unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    let from_env = AppConfig::load_default().unwrap();
    assert_eq!(from_env.timeline.max_limit, 25);
    assert_eq!(from_env.ingest.max_concurrency, 10);

    // 4) DATABASE_PATH overrides whatever the file said
    env::set_var(ENV_DATABASE_PATH, "/var/lib/timeline/prod.db");
    let over = AppConfig::load_default().unwrap();
    assert_eq!(over.database_path, PathBuf::from("/var/lib/timeline/prod.db"));

    env::remove_var(ENV_CONFIG_PATH);
    env::remove_var(ENV_DATABASE_PATH);
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_path_to_missing_file_is_an_error() {
    env::set_var(ENV_CONFIG_PATH, "/definitely/not/here/timeline.toml");
    let err = AppConfig::load_default().unwrap_err();
    env::remove_var(ENV_CONFIG_PATH);
    assert!(matches!(err, Error::Config(_)));
}

#[serial_test::serial]
#[test]
fn database_override_applies_to_explicit_files_and_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("explicit.toml");
    fs::write(&p, "database_path = \"from-file.db\"\n").unwrap();

    env::remove_var(ENV_DATABASE_PATH);
    assert_eq!(
        AppConfig::load_from(&p).unwrap().database_path,
        PathBuf::from("from-file.db")
    );

    env::set_var(ENV_DATABASE_PATH, "/srv/timeline/override.db");
    let explicit = AppConfig::load_from(&p).unwrap();
    assert_eq!(explicit.database_path, PathBuf::from("/srv/timeline/override.db"));

    // blank values are ignored
    env::set_var(ENV_DATABASE_PATH, "   ");
    assert_eq!(
        AppConfig::load_from(&p).unwrap().database_path,
        PathBuf::from("from-file.db")
    );

    let old = env::current_dir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_CONFIG_PATH);
    env::set_var(ENV_DATABASE_PATH, "/srv/timeline/override.db");
    let defaults = AppConfig::load_default().unwrap();
    assert_eq!(defaults.database_path, PathBuf::from("/srv/timeline/override.db"));

    env::remove_var(ENV_DATABASE_PATH);
    env::set_current_dir(&old).unwrap();
}
