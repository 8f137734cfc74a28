use serial_test::serial;
use tempfile::TempDir;
use unique_locks::config::Settings;
use unique_locks::conflict::OnConflict;
use unique_locks::constants::{CONFIG_PATH_ENV, DEFAULT_REDIS_URL, REDIS_URL_ENV};
use unique_locks::lock::LockStrategy;
use unique_locks::locksmith::{LockKind, LockTimeout};

/// Scoped environment changes, restored on drop
struct EnvGuard {
    saved: Vec<(&'static str, Option<String>)>,
}

impl EnvGuard {
    fn new(vars: &[&'static str]) -> Self {
        Self {
            saved: vars.iter().map(|name| (*name, std::env::var(name).ok())).collect(),
        }
    }

    fn set(&self, name: &str, value: impl AsRef<std::ffi::OsStr>) {
        unsafe { std::env::set_var(name, value) };
    }

    fn remove(&self, name: &str) {
        unsafe { std::env::remove_var(name) };
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (name, value) in &self.saved {
            match value {
                Some(value) => unsafe { std::env::set_var(name, value) },
                None => unsafe { std::env::remove_var(name) },
            }
        }
    }
}

#[tokio::test]
#[serial]
async fn test_explicit_path_wins() {
    let env = EnvGuard::new(&[CONFIG_PATH_ENV, REDIS_URL_ENV]);
    env.remove(REDIS_URL_ENV);
    let dir = TempDir::new().unwrap();

    let explicit = dir.path().join("explicit.toml");
    tokio::fs::write(&explicit, "redis_url = \"redis://explicit:6379\"\n").await.unwrap();
    let from_env = dir.path().join("env.toml");
    tokio::fs::write(&from_env, "redis_url = \"redis://env:6379\"\n").await.unwrap();
    env.set(CONFIG_PATH_ENV, &from_env);

    let settings = Settings::load(Some(explicit)).await.unwrap();
    assert_eq!(settings.redis_url, "redis://explicit:6379");

    let settings = Settings::load(None).await.unwrap();
    assert_eq!(settings.redis_url, "redis://env:6379");
}

#[tokio::test]
#[serial]
async fn test_missing_file_gives_defaults() {
    let env = EnvGuard::new(&[CONFIG_PATH_ENV, REDIS_URL_ENV]);
    env.remove(REDIS_URL_ENV);
    let dir = TempDir::new().unwrap();
    env.set(CONFIG_PATH_ENV, dir.path().join("absent.toml"));

    let settings = Settings::load(None).await.unwrap();
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.redis_url, DEFAULT_REDIS_URL);
}

#[tokio::test]
#[serial]
async fn test_redis_url_env_overrides_file() {
    let env = EnvGuard::new(&[CONFIG_PATH_ENV, REDIS_URL_ENV]);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    tokio::fs::write(&path, "redis_url = \"redis://file:6379\"\n").await.unwrap();

    env.set(REDIS_URL_ENV, "redis://override:6379");
    let settings = Settings::load(Some(path.clone())).await.unwrap();
    assert_eq!(settings.redis_url, "redis://override:6379");

    env.set(REDIS_URL_ENV, "");
    let settings = Settings::load(Some(path)).await.unwrap();
    assert_eq!(settings.redis_url, "redis://file:6379");
}

#[tokio::test]
#[serial]
async fn test_defaults_flow_into_requests() {
    let env = EnvGuard::new(&[REDIS_URL_ENV]);
    env.remove(REDIS_URL_ENV);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    tokio::fs::write(
        &path,
        r#"
[defaults]
lock_ttl = 30
lock_timeout = -1
lock_limit = 3
lock_retry_count = 0
on_conflict = "replace"
"#,
    )
    .await
    .unwrap();

    let settings = Settings::load(Some(path)).await.unwrap();
    let defaults = &settings.defaults;
    assert_eq!(defaults.on_conflict, OnConflict::Replace);
    assert_eq!(defaults.on_server_conflict, OnConflict::Raise);
    assert_eq!(defaults.primary_kind(), LockKind::Semaphore);
    assert!(defaults.validate(LockStrategy::UntilExpired).is_ok());

    let request = defaults.request("uniquejobs:digest", "jid", LockKind::RunLock);
    assert_eq!(request.ttl.as_secs(), 30);
    assert_eq!(request.timeout, LockTimeout::NoWait);
    assert_eq!(request.effective_limit(), 3);
    assert_eq!(request.attempts(), 1);
}

#[tokio::test]
async fn test_unparsable_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    tokio::fs::write(&path, "lock_ttl = [").await.unwrap();

    let error = Settings::load_from(&path).await.unwrap_err();
    assert!(format!("{error:#}").contains("Failed to parse settings"));
}
