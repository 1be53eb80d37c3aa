//! Application configuration loaded from environment variables.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Process-wide configuration shared by the `api` and `worker` binaries.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jobs_dir: String,
    pub poll_interval: Duration,
    pub runner_timeout_secs: u64,
    pub log_dir: String,
    pub rate_limit_per_min: u32,
    pub log_level: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `DATABASE_URL` is the only required variable; everything else falls
    /// back to the defaults documented in the spec's configuration table.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let poll_secs: f64 = env::var("RUNNER_POLL_SECS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .context("RUNNER_POLL_SECS must be a valid number")?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            jobs_dir: env::var("RUNNER_JOBS_DIR")
                .unwrap_or_else(|_| "/srv/sandbox-orchestrator/var/jobs".to_string()),
            poll_interval: Duration::from_secs_f64(poll_secs.max(0.0)),
            runner_timeout_secs: env::var("RUNNER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("RUNNER_TIMEOUT_SECS must be a valid number")?,
            log_dir: env::var("RUNNER_LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            rate_limit_per_min: env::var("RATE_LIMIT_PER_MIN")
                .unwrap_or_else(|_| "200".to_string())
                .parse()
                .context("RATE_LIMIT_PER_MIN must be a valid number")?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn from_env_requires_database_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            env::remove_var("DATABASE_URL");
        }
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn from_env_applies_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            env::set_var("DATABASE_URL", "sqlite://:memory:");
            env::remove_var("RUNNER_JOBS_DIR");
            env::remove_var("RUNNER_POLL_SECS");
            env::remove_var("RUNNER_TIMEOUT_SECS");
            env::remove_var("RATE_LIMIT_PER_MIN");
        }
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.jobs_dir, "/srv/sandbox-orchestrator/var/jobs");
        assert_eq!(cfg.runner_timeout_secs, 30);
        assert_eq!(cfg.rate_limit_per_min, 200);
        unsafe {
            env::remove_var("DATABASE_URL");
        }
    }
}
