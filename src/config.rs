use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub insert_batch_size: usize,
    pub grading_workers: usize,
    pub analytics_job_type: String,
    pub analytics_job_priority: i32,
    pub exam_lock_timeout_secs: u64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let config = Self {
            database_url: get_env("DATABASE_URL")?,
            database_max_connections: get_env_parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            insert_batch_size: get_env_parse_or("INSERT_BATCH_SIZE", 1000)?,
            grading_workers: get_env_parse_or("GRADING_WORKERS", default_workers())?,
            analytics_job_type: env::var("ANALYTICS_JOB_TYPE")
                .unwrap_or_else(|_| "exam_analytics".to_string()),
            analytics_job_priority: get_env_parse_or("ANALYTICS_JOB_PRIORITY", 5)?,
            exam_lock_timeout_secs: get_env_parse_or("EXAM_LOCK_TIMEOUT_SECS", 300)?,
        };

        if config.insert_batch_size == 0 {
            return Err(Error::Config("INSERT_BATCH_SIZE must be at least 1".to_string()));
        }
        if config.grading_workers == 0 {
            return Err(Error::Config("GRADING_WORKERS must be at least 1".to_string()));
        }

        Ok(config)
    }

    pub fn recompute_options(&self) -> crate::services::recompute_service::RecomputeOptions {
        crate::services::recompute_service::RecomputeOptions {
            batch_size: self.insert_batch_size,
            workers: self.grading_workers,
            analytics_job_type: self.analytics_job_type.clone(),
            analytics_job_priority: self.analytics_job_priority,
            lock_timeout: Duration::from_secs(self.exam_lock_timeout_secs),
            force_key_rebuild: false,
        }
    }
}

pub(crate) fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
