//! Configuration resolution tests
//!
//! Priority: `TAGIATO_*` environment → `<photos>/.tagiato/settings.toml` →
//! user config file → compiled defaults.
//!
//! Tests touching `TAGIATO_*` variables are marked `#[serial]` so they never
//! observe each other's environment.

use serial_test::serial;
use tagiato_common::config::{
    write_config, ConfigResolver, EnrichConfig, ProviderKind, WorkDir,
};
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "TAGIATO_DESCRIBE_PROVIDER",
    "TAGIATO_DESCRIBE_MODEL",
    "TAGIATO_LOCATE_PROVIDER",
    "TAGIATO_LOCATE_MODEL",
    "TAGIATO_WORKERS",
    "TAGIATO_MAX_TIME_GAP",
    "TAGIATO_LOG_LEVEL",
];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

fn resolver(dir: &TempDir) -> ConfigResolver {
    ConfigResolver::new(WorkDir::new(dir.path())).with_user_config(None)
}

async fn write_settings(dir: &TempDir, content: &str) {
    let work_dir = WorkDir::new(dir.path());
    work_dir.ensure_dirs().await.unwrap();
    std::fs::write(work_dir.settings_file(), content).unwrap();
}

#[test]
#[serial]
fn test_defaults_without_any_source() {
    clear_env();
    let dir = TempDir::new().unwrap();

    let config = resolver(&dir).resolve().unwrap();
    assert_eq!(config, EnrichConfig::default());
    assert_eq!(config.max_time_gap_minutes, 30);
    assert_eq!(config.describe.provider, ProviderKind::Claude);
}

#[tokio::test]
#[serial]
async fn test_work_dir_settings_loaded() {
    clear_env();
    let dir = TempDir::new().unwrap();
    write_settings(
        &dir,
        r#"
        worker_count = 2

        [describe]
        provider = "gemini"
        model = "pro"
        "#,
    )
    .await;

    let config = resolver(&dir).resolve().unwrap();
    assert_eq!(config.worker_count, 2);
    assert_eq!(config.describe.provider, ProviderKind::Gemini);
    assert_eq!(config.describe.model(), "pro");
    assert_eq!(config.locate.provider, ProviderKind::Claude);
}

#[tokio::test]
#[serial]
async fn test_work_dir_settings_outrank_user_config() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let user_dir = TempDir::new().unwrap();
    let user_config = user_dir.path().join("config.toml");
    std::fs::write(&user_config, "worker_count = 7").unwrap();

    let from_user = resolver(&dir)
        .with_user_config(Some(user_config.clone()))
        .resolve()
        .unwrap();
    assert_eq!(from_user.worker_count, 7);

    write_settings(&dir, "worker_count = 3").await;
    let from_work_dir = resolver(&dir)
        .with_user_config(Some(user_config))
        .resolve()
        .unwrap();
    assert_eq!(from_work_dir.worker_count, 3);
}

#[tokio::test]
#[serial]
async fn test_env_overrides_toml() {
    clear_env();
    let dir = TempDir::new().unwrap();
    write_settings(&dir, "max_time_gap_minutes = 10\n[locate]\nprovider = \"gemini\"\n").await;

    std::env::set_var("TAGIATO_MAX_TIME_GAP", "90");
    std::env::set_var("TAGIATO_LOCATE_PROVIDER", "codex");
    std::env::set_var("TAGIATO_LOCATE_MODEL", "o4-mini");
    std::env::set_var("TAGIATO_LOG_LEVEL", "debug");

    let config = resolver(&dir).resolve();
    clear_env();
    let config = config.unwrap();

    assert_eq!(config.max_time_gap_minutes, 90);
    assert_eq!(config.locate.provider, ProviderKind::OpenAi);
    assert_eq!(config.locate.model(), "o4-mini");
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_blank_env_is_ignored() {
    clear_env();
    let dir = TempDir::new().unwrap();
    std::env::set_var("TAGIATO_DESCRIBE_MODEL", "   ");

    let config = resolver(&dir).resolve();
    clear_env();
    assert_eq!(config.unwrap().describe.model, None);
}

#[test]
#[serial]
fn test_invalid_env_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();

    std::env::set_var("TAGIATO_WORKERS", "many");
    let workers = resolver(&dir).resolve();
    clear_env();
    assert!(workers.is_err());

    std::env::set_var("TAGIATO_DESCRIBE_PROVIDER", "llama");
    let provider = resolver(&dir).resolve();
    clear_env();
    assert!(provider.is_err());
}

#[tokio::test]
#[serial]
async fn test_invalid_toml_names_the_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    write_settings(&dir, "worker_count = \"four\"").await;

    let err = resolver(&dir).resolve().unwrap_err().to_string();
    assert!(err.contains("settings.toml"), "unexpected error: {}", err);
}

#[tokio::test]
#[serial]
async fn test_written_config_resolves_back() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let work_dir = WorkDir::new(dir.path());
    work_dir.ensure_dirs().await.unwrap();

    let mut config = EnrichConfig::default();
    config.worker_count = 6;
    config.context.radius_km = 2.5;
    config.describe.provider = ProviderKind::OpenAi;
    write_config(&config, &work_dir.settings_file()).await.unwrap();

    let resolved = resolver(&dir).resolve().unwrap();
    assert_eq!(resolved, config);
}
