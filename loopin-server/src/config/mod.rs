//! Configuration module for loopin-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables. Also handles admin secret hashing.

pub mod file;
pub mod runtime;

use crate::config::file::{FileConfig, LogFormat};
use crate::config::runtime::SharedConfig;
use loopin_core::config::{AdminConfig, QueueConfig, RateGuardMode, ScheduleConfig, WebhookConfig};
use loopin_core::processors::normalize_schedule;
use loopin_core::queue::RetryPolicy;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("password hashing error: {0}")]
    HashError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
#[derive(Debug)]
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub log_format: LogFormat,
    pub admin: AdminConfig,
    pub webhook: WebhookConfig,
    pub queue: QueueConfig,
    pub rate_guard: RateGuardMode,
    pub schedules: Vec<ScheduleConfig>,
    /// Set when the plaintext admin secret was hashed and written back.
    pub secret_rehashed: bool,
}

impl LoadedConfig {
    /// Split off the sections that can change on reload.
    pub fn shared(&self) -> SharedConfig {
        SharedConfig::new(self.admin.clone(), self.webhook.clone())
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Hash the admin secret if it's plaintext (and rewrite the file)
    /// 5. Build the loaded configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;

        // Runs before tracing is up, so the caller logs the rewrite.
        let secret_rehashed = !file_config.is_admin_secret_hashed();
        if secret_rehashed {
            file_config.admin.secret = hash_secret(&file_config.admin.secret)?;
            self.rewrite_config(&file_config)?;
        }

        Ok(build_loaded_config(file_config, secret_rehashed))
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn rewrite_config(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)?;

        // Write atomically: write to temp file, then rename
        let temp_path = self.config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml_string)?;
        std::fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.admin.secret.is_empty() {
        return Err(ConfigError::ValidationError(
            "admin secret must not be empty".to_string(),
        ));
    }
    if config.queue.attempts == 0 {
        return Err(ConfigError::ValidationError(
            "queue attempts must be at least 1".to_string(),
        ));
    }
    if config.queue.concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "queue concurrency must be at least 1".to_string(),
        ));
    }
    if config.queue.name == config.queue.dead_letter_name {
        return Err(ConfigError::ValidationError(format!(
            "dead letter queue must differ from the working queue ({})",
            config.queue.name
        )));
    }
    if config.webhook.max_body_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "webhook max_body_bytes must be positive".to_string(),
        ));
    }
    for schedule in &config.schedules {
        let normalized = normalize_schedule(&schedule.cron);
        if let Err(e) = cron::Schedule::from_str(&normalized) {
            return Err(ConfigError::ValidationError(format!(
                "schedule {} has invalid cron expression {:?}: {}",
                schedule.job, schedule.cron, e
            )));
        }
        if schedule.lock_ttl_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "schedule {} needs a positive lock_ttl_ms",
                schedule.job
            )));
        }
    }
    Ok(())
}

fn hash_secret(plaintext: &str) -> Result<String, ConfigError> {
    use argon2::{
        Argon2, PasswordHasher,
        password_hash::{SaltString, rand_core::OsRng},
    };

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ConfigError::HashError(e.to_string()))
}

fn build_loaded_config(file_config: FileConfig, secret_rehashed: bool) -> LoadedConfig {
    let queue = &file_config.queue;
    let mut webhook = WebhookConfig::new(
        file_config.webhook.app_secret.into_bytes(),
        file_config.webhook.verify_token,
        file_config.webhook.processing_mode,
    );
    webhook.max_body_bytes = file_config.webhook.max_body_bytes;

    LoadedConfig {
        listen: file_config.server.listen,
        log_format: file_config.server.log_format,
        admin: AdminConfig::new(file_config.admin.secret),
        webhook,
        queue: QueueConfig {
            name: queue.name.clone(),
            dead_letter_name: queue.dead_letter_name.clone(),
            retry: RetryPolicy {
                max_attempts: queue.attempts,
                base_delay: Duration::from_millis(queue.backoff_ms),
            },
            concurrency: queue.concurrency,
            poll_interval: Duration::from_millis(queue.poll_interval_ms),
            lease: Duration::from_millis(queue.lease_ms),
        },
        rate_guard: file_config.rate_guard.mode,
        schedules: file_config
            .schedules
            .into_iter()
            .map(|s| ScheduleConfig {
                job: s.job,
                cron: s.cron,
                lock_ttl: Duration::from_millis(s.lock_ttl_ms),
            })
            .collect(),
        secret_rehashed,
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopin_core::config::ProcessingMode;

    const CONFIG: &str = r#"
[server]
listen = "127.0.0.1:3000"

[admin]
secret = "plaintext-secret"

[webhook]
app_secret = "shh"
verify_token = "verify-me"

[queue]
attempts = 4
backoff_ms = 100

[[schedules]]
job = "store-prune"
cron = "*/10 * * * *"
"#;

    fn temp_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "loopin-config-{}-{}",
            name,
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("loopin-config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn plaintext_secret_is_hashed_and_rewritten() {
        let path = temp_config("hash", CONFIG);
        let loaded = ConfigLoader::new(&path, None).load().unwrap();

        assert!(loaded.secret_rehashed);
        assert!(loaded.admin.secret_hash.starts_with("$argon2"));
        assert!(loaded.admin.verify_secret("plaintext-secret"));

        let rewritten: FileConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(rewritten.is_admin_secret_hashed());
        assert!(!path.with_extension("toml.tmp").exists());

        // second load keeps the hash
        let again = ConfigLoader::new(&path, None).load().unwrap();
        assert!(!again.secret_rehashed);
        assert_eq!(again.admin.secret_hash, loaded.admin.secret_hash);
    }

    #[test]
    fn sections_are_converted() {
        let path = temp_config("convert", CONFIG);
        let listen: SocketAddr = "0.0.0.0:9999".parse().unwrap();
        let loaded = ConfigLoader::new(&path, Some(listen)).load().unwrap();

        assert_eq!(loaded.listen, listen);
        assert_eq!(loaded.webhook.secret_bytes(), b"shh");
        assert_eq!(loaded.webhook.processing_mode, ProcessingMode::Queue);
        assert_eq!(loaded.queue.retry.max_attempts, 4);
        assert_eq!(loaded.queue.retry.base_delay, Duration::from_millis(100));
        assert_eq!(loaded.schedules[0].lock_ttl, Duration::from_secs(300));
        assert_eq!(loaded.rate_guard, RateGuardMode::Auto);
    }

    #[test]
    fn invalid_cron_is_rejected() {
        let path = temp_config(
            "cron",
            r#"
[admin]
secret = "x"

[webhook]

[[schedules]]
job = "store-prune"
cron = "every tuesday"
"#,
        );
        let err = ConfigLoader::new(&path, None).load().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn dead_letter_queue_must_differ() {
        let path = temp_config(
            "dlq",
            r#"
[admin]
secret = "x"

[webhook]

[queue]
name = "same"
dead_letter_name = "same"
"#,
        );
        let err = ConfigLoader::new(&path, None).load().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }
}
