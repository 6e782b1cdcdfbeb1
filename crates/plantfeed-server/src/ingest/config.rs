//! Ingestion configuration
//!
//! Everything the pipeline needs from the environment: the remote source,
//! run tuning knobs, the retry policy, the recovery monitor thresholds and the
//! optional built-in cadence.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::retry::RetryPolicy;
use crate::config::env_or;

pub const DEFAULT_FTP_PORT: u16 = 21;
pub const DEFAULT_FTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_FTP_MAX_RETRIES: u32 = 5;
pub const DEFAULT_FTP_RETRY_DELAY_SECS: u64 = 10;

pub const DEFAULT_FILE_EXTENSION: &str = ".xml";
pub const DEFAULT_CHUNK_SIZE: usize = 25;
pub const DEFAULT_LOCK_TTL_SECS: u64 = 7200;
pub const DEFAULT_PAUSE_POLL_SECS: u64 = 5;
pub const DEFAULT_PAUSE_CEILING_SECS: u64 = 3600;
pub const DEFAULT_SOFT_TIME_LIMIT_SECS: u64 = 1800;
pub const DEFAULT_CHECKPOINT_TTL_SECS: u64 = 86_400;

pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 60;
pub const DEFAULT_RETRY_BACKOFF_MAX_SECS: u64 = 600;

pub const DEFAULT_RECOVERY_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_STALLED_AFTER_SECS: u64 = 3600;
pub const DEFAULT_INTERRUPTED_AFTER_SECS: u64 = 1800;

pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Whether the server starts the background scheduler at all
    pub enabled: bool,
    pub source: FtpSourceConfig,
    pub run: RunConfig,
    pub retry: RetryConfig,
    pub recovery: RecoveryConfig,
    pub schedule: ScheduleConfig,
}

/// Connection settings for the remote file server. A schedule may replace
/// `remote_dir`; nothing else is overridable per schedule.
#[derive(Clone, Serialize, Deserialize)]
pub struct FtpSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub remote_dir: String,
    /// Applies to both connect and read
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl std::fmt::Debug for FtpSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpSourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remote_dir", &self.remote_dir)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .finish()
    }
}

impl FtpSourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Address in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Location recorded on file outcomes, e.g. `ftp://plant01/reports/A_010124.xml`.
    pub fn file_url(&self, remote_dir: &str, file_name: &str) -> String {
        let dir = remote_dir.trim_end_matches('/');
        if dir.is_empty() {
            format!("ftp://{}/{}", self.host, file_name)
        } else if dir.starts_with('/') {
            format!("ftp://{}{}/{}", self.host, dir, file_name)
        } else {
            format!("ftp://{}/{}/{}", self.host, dir, file_name)
        }
    }
}

impl Default for FtpSourceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_FTP_PORT,
            username: "anonymous".to_string(),
            password: String::new(),
            remote_dir: "/".to_string(),
            timeout_secs: DEFAULT_FTP_TIMEOUT_SECS,
            max_retries: DEFAULT_FTP_MAX_RETRIES,
            retry_delay_secs: DEFAULT_FTP_RETRY_DELAY_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Only names ending in this (case-insensitive) are discovered
    pub file_extension: String,
    /// Files between forced checkpoint/progress boundaries
    pub chunk_size: usize,
    pub lock_ttl_secs: u64,
    pub pause_poll_secs: u64,
    pub pause_ceiling_secs: u64,
    pub soft_time_limit_secs: u64,
    pub checkpoint_ttl_secs: u64,
}

impl RunConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_secs(self.pause_poll_secs)
    }

    pub fn pause_ceiling(&self) -> Duration {
        Duration::from_secs(self.pause_ceiling_secs)
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_secs)
    }

    pub fn checkpoint_ttl(&self) -> Duration {
        Duration::from_secs(self.checkpoint_ttl_secs)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            pause_poll_secs: DEFAULT_PAUSE_POLL_SECS,
            pause_ceiling_secs: DEFAULT_PAUSE_CEILING_SECS,
            soft_time_limit_secs: DEFAULT_SOFT_TIME_LIMIT_SECS,
            checkpoint_ttl_secs: DEFAULT_CHECKPOINT_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub backoff_max_secs: u64,
    pub jitter: bool,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.backoff_secs),
            Duration::from_secs(self.backoff_max_secs),
        )
        .with_jitter(self.jitter)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            backoff_secs: DEFAULT_RETRY_BACKOFF_SECS,
            backoff_max_secs: DEFAULT_RETRY_BACKOFF_MAX_SECS,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub interval_secs: u64,
    pub stalled_after_secs: u64,
    pub interrupted_after_secs: u64,
}

impl RecoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stalled_after(&self) -> Duration {
        Duration::from_secs(self.stalled_after_secs)
    }

    pub fn interrupted_after(&self) -> Duration {
        Duration::from_secs(self.interrupted_after_secs)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_RECOVERY_INTERVAL_SECS,
            stalled_after_secs: DEFAULT_STALLED_AFTER_SECS,
            interrupted_after_secs: DEFAULT_INTERRUPTED_AFTER_SECS,
        }
    }
}

/// Built-in cadence for one schedule. Without `schedule_id` only manual
/// and externally triggered runs happen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub schedule_id: Option<i64>,
    pub interval_secs: u64,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            enabled: env_or("INGEST_ENABLED", true),
            source: FtpSourceConfig {
                host: std::env::var("FTP_HOST").unwrap_or_default(),
                port: env_or("FTP_PORT", DEFAULT_FTP_PORT),
                username: std::env::var("FTP_USER").unwrap_or_else(|_| "anonymous".to_string()),
                password: std::env::var("FTP_PASS").unwrap_or_default(),
                remote_dir: std::env::var("REMOTE_DIR").unwrap_or_else(|_| "/".to_string()),
                timeout_secs: env_or("FTP_TIMEOUT_SECS", DEFAULT_FTP_TIMEOUT_SECS),
                max_retries: env_or("FTP_MAX_RETRIES", DEFAULT_FTP_MAX_RETRIES),
                retry_delay_secs: env_or("FTP_RETRY_DELAY_SECS", DEFAULT_FTP_RETRY_DELAY_SECS),
            },
            run: RunConfig {
                file_extension: std::env::var("INGEST_FILE_EXTENSION")
                    .unwrap_or_else(|_| DEFAULT_FILE_EXTENSION.to_string()),
                chunk_size: env_or("INGEST_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
                lock_ttl_secs: env_or("INGEST_LOCK_TTL_SECS", DEFAULT_LOCK_TTL_SECS),
                pause_poll_secs: env_or("INGEST_PAUSE_POLL_SECS", DEFAULT_PAUSE_POLL_SECS),
                pause_ceiling_secs: env_or("INGEST_PAUSE_CEILING_SECS", DEFAULT_PAUSE_CEILING_SECS),
                soft_time_limit_secs: env_or(
                    "INGEST_SOFT_TIME_LIMIT_SECS",
                    DEFAULT_SOFT_TIME_LIMIT_SECS,
                ),
                checkpoint_ttl_secs: env_or("INGEST_CHECKPOINT_TTL_SECS", DEFAULT_CHECKPOINT_TTL_SECS),
            },
            retry: RetryConfig {
                max_attempts: env_or("INGEST_RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS),
                backoff_secs: env_or("INGEST_RETRY_BACKOFF_SECS", DEFAULT_RETRY_BACKOFF_SECS),
                backoff_max_secs: env_or(
                    "INGEST_RETRY_BACKOFF_MAX_SECS",
                    DEFAULT_RETRY_BACKOFF_MAX_SECS,
                ),
                jitter: env_or("INGEST_RETRY_JITTER", true),
            },
            recovery: RecoveryConfig {
                interval_secs: env_or("INGEST_RECOVERY_INTERVAL_SECS", DEFAULT_RECOVERY_INTERVAL_SECS),
                stalled_after_secs: env_or("INGEST_STALLED_AFTER_SECS", DEFAULT_STALLED_AFTER_SECS),
                interrupted_after_secs: env_or(
                    "INGEST_INTERRUPTED_AFTER_SECS",
                    DEFAULT_INTERRUPTED_AFTER_SECS,
                ),
            },
            schedule: ScheduleConfig {
                schedule_id: std::env::var("INGEST_SCHEDULE_ID")
                    .ok()
                    .and_then(|s| s.trim().parse().ok()),
                interval_secs: env_or("INGEST_SCHEDULE_INTERVAL_SECS", DEFAULT_SCHEDULE_INTERVAL_SECS),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.source.host.trim().is_empty() {
            anyhow::bail!("FTP_HOST must be set when ingestion is enabled");
        }
        if self.source.max_retries == 0 {
            anyhow::bail!("FTP_MAX_RETRIES must be at least 1");
        }
        if self.run.chunk_size == 0 {
            anyhow::bail!("INGEST_CHUNK_SIZE must be greater than 0");
        }
        if self.run.pause_poll_secs == 0 {
            anyhow::bail!("INGEST_PAUSE_POLL_SECS must be greater than 0");
        }
        if !self.run.file_extension.starts_with('.') {
            anyhow::bail!(
                "INGEST_FILE_EXTENSION must start with '.', got '{}'",
                self.run.file_extension
            );
        }
        if self.retry.backoff_secs > self.retry.backoff_max_secs {
            anyhow::bail!(
                "INGEST_RETRY_BACKOFF_SECS ({}) cannot exceed INGEST_RETRY_BACKOFF_MAX_SECS ({})",
                self.retry.backoff_secs,
                self.retry.backoff_max_secs
            );
        }
        if self.schedule.schedule_id.is_some() && self.schedule.interval_secs == 0 {
            anyhow::bail!("INGEST_SCHEDULE_INTERVAL_SECS must be greater than 0");
        }
        if self.run.lock_ttl_secs <= self.run.pause_poll_secs {
            tracing::warn!(
                lock_ttl_secs = self.run.lock_ttl_secs,
                "Lock TTL is shorter than the pause poll interval; paused runs may lose the lock"
            );
        }
        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source: FtpSourceConfig::default(),
            run: RunConfig::default(),
            retry: RetryConfig::default(),
            recovery: RecoveryConfig::default(),
            schedule: ScheduleConfig {
                schedule_id: None,
                interval_secs: DEFAULT_SCHEDULE_INTERVAL_SECS,
            },
        }
    }
}
