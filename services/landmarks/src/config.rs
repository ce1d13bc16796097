//! Service configuration sourced from environment variables, with optional
//! YAML overrides for ops-friendly config files.
use anyhow::{Context, Result};
use landmark_cache::CacheConfig;
use landmark_queue::QueueConfig;
use serde::Deserialize;
use std::fmt::Display;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_QUEUE_TOPIC: &str = "webhook-processing";
pub const DEFAULT_CONSUMER_GROUP: &str = "webhook-processor-group";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    // HTTP bind address for the API.
    pub bind_addr: SocketAddr,
    // Metrics HTTP bind address.
    pub metrics_bind: SocketAddr,
    // Bearer token required on POST /webhook.
    pub webhook_secret: String,
    // Base URL of the upstream Overpass service.
    pub overpass_url: String,
    pub query_radius_meters: u32,
    // Freshness horizon for stored requests, in days.
    pub cache_expiration_days: i64,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: usize,
    pub overpass_timeout_seconds: u64,
    pub overpass_transport_retries: u32,
    pub worker_concurrency: usize,
    pub queue_topic: String,
    pub consumer_group: String,
    pub queue_partitions: u32,
    pub queue_max_delivery_attempts: u32,
    // PENDING records older than this are re-enqueued by the sweeper.
    pub pending_requeue_seconds: u64,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    overpass_url: Option<String>,
    query_radius_meters: Option<u32>,
    cache_expiration_days: Option<i64>,
    worker_concurrency: Option<usize>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults suitable for local development;
        // only the webhook secret has no default.
        let bind_addr = env_or("LANDMARKS_BIND", "0.0.0.0:8080")
            .parse()
            .with_context(|| "parse LANDMARKS_BIND")?;
        let metrics_bind = env_or("LANDMARKS_METRICS_BIND", "0.0.0.0:9090")
            .parse()
            .with_context(|| "parse LANDMARKS_METRICS_BIND")?;
        let webhook_secret = std::env::var("LANDMARKS_WEBHOOK_SECRET")
            .with_context(|| "LANDMARKS_WEBHOOK_SECRET is required")?;
        let overpass_url = env_or("LANDMARKS_OVERPASS_URL", "https://overpass-api.de/api");

        let postgres_url = std::env::var("LANDMARKS_POSTGRES_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok();
        let (storage, postgres) = match postgres_url {
            Some(url) => (
                StorageBackend::Postgres,
                Some(PostgresConfig {
                    url,
                    max_connections: env_parse("LANDMARKS_PG_MAX_CONNECTIONS", 10)?,
                    acquire_timeout_ms: env_parse("LANDMARKS_PG_ACQUIRE_TIMEOUT_MS", 5_000)?,
                }),
            ),
            None => (StorageBackend::Memory, None),
        };

        Ok(Self {
            bind_addr,
            metrics_bind,
            webhook_secret,
            overpass_url,
            query_radius_meters: env_parse("LANDMARKS_QUERY_RADIUS_METERS", 500)?,
            cache_expiration_days: env_parse("LANDMARKS_CACHE_EXPIRATION_DAYS", 60)?,
            cache_ttl_seconds: env_parse("LANDMARKS_CACHE_TTL_SECONDS", 600)?,
            cache_max_entries: env_parse("LANDMARKS_CACHE_MAX_ENTRIES", 10_000)?,
            overpass_timeout_seconds: env_parse("LANDMARKS_OVERPASS_TIMEOUT_SECONDS", 30)?,
            overpass_transport_retries: env_parse("LANDMARKS_OVERPASS_TRANSPORT_RETRIES", 2)?,
            worker_concurrency: env_parse("LANDMARKS_WORKER_CONCURRENCY", 3)?,
            queue_topic: env_or("LANDMARKS_QUEUE_TOPIC", DEFAULT_QUEUE_TOPIC),
            consumer_group: env_or("LANDMARKS_CONSUMER_GROUP", DEFAULT_CONSUMER_GROUP),
            queue_partitions: env_parse("LANDMARKS_QUEUE_PARTITIONS", 8)?,
            queue_max_delivery_attempts: env_parse("LANDMARKS_QUEUE_MAX_DELIVERY_ATTEMPTS", 5)?,
            pending_requeue_seconds: env_parse("LANDMARKS_PENDING_REQUEUE_SECONDS", 300)?,
            storage,
            postgres,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("LANDMARKS_CONFIG") {
            // YAML overrides allow ops-friendly config files.
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read LANDMARKS_CONFIG: {path}"))?;
            let override_cfg: ServiceConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse landmarks config yaml")?;
            if let Some(value) = override_cfg.bind_addr {
                config.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.overpass_url {
                config.overpass_url = value;
            }
            if let Some(value) = override_cfg.query_radius_meters {
                config.query_radius_meters = value;
            }
            if let Some(value) = override_cfg.cache_expiration_days {
                config.cache_expiration_days = value;
            }
            if let Some(value) = override_cfg.worker_concurrency {
                config.worker_concurrency = value;
            }
        }
        Ok(config)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries_per_namespace: self.cache_max_entries,
            ttl: Some(Duration::from_secs(self.cache_ttl_seconds)),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            partitions: self.queue_partitions,
            partition_capacity: 1024,
            max_delivery_attempts: self.queue_max_delivery_attempts,
        }
    }

    pub fn refresh_horizon(&self) -> chrono::Duration {
        chrono::Duration::days(self.cache_expiration_days)
    }

    pub fn overpass_timeout(&self) -> Duration {
        Duration::from_secs(self.overpass_timeout_seconds)
    }

    pub fn pending_requeue_threshold(&self) -> Duration {
        Duration::from_secs(self.pending_requeue_seconds)
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("parse {name}: {err}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    // Helper to clear all service env vars between tests.
    fn clear_landmarks_env() {
        for (key, _) in env::vars() {
            if key.starts_with("LANDMARKS_") || key == "DATABASE_URL" {
                unsafe {
                    env::remove_var(key);
                }
            }
        }
    }

    fn set_secret() {
        unsafe {
            env::set_var("LANDMARKS_WEBHOOK_SECRET", "supersecret");
        }
    }

    #[serial]
    #[test]
    fn from_env_uses_defaults() {
        clear_landmarks_env();
        set_secret();
        let config = ServiceConfig::from_env().expect("from_env");
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.metrics_bind.to_string(), "0.0.0.0:9090");
        assert_eq!(config.query_radius_meters, 500);
        assert_eq!(config.cache_expiration_days, 60);
        assert_eq!(config.cache_ttl_seconds, 600);
        assert_eq!(config.cache_max_entries, 10_000);
        assert_eq!(config.overpass_timeout_seconds, 30);
        assert_eq!(config.overpass_transport_retries, 2);
        assert_eq!(config.worker_concurrency, 3);
        assert_eq!(config.queue_topic, DEFAULT_QUEUE_TOPIC);
        assert_eq!(config.consumer_group, DEFAULT_CONSUMER_GROUP);
        assert_eq!(config.storage, StorageBackend::Memory);
        clear_landmarks_env();
    }

    #[serial]
    #[test]
    fn from_env_requires_the_webhook_secret() {
        clear_landmarks_env();
        let result = ServiceConfig::from_env();
        assert!(result.is_err());
    }

    #[serial]
    #[test]
    fn from_env_respects_env_vars() {
        clear_landmarks_env();
        set_secret();
        unsafe {
            env::set_var("LANDMARKS_BIND", "127.0.0.1:9443");
            env::set_var("LANDMARKS_QUERY_RADIUS_METERS", "250");
            env::set_var("LANDMARKS_WORKER_CONCURRENCY", "5");
            env::set_var("LANDMARKS_POSTGRES_URL", "postgres://localhost/landmarks");
        }
        let config = ServiceConfig::from_env().expect("from_env");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9443");
        assert_eq!(config.query_radius_meters, 250);
        assert_eq!(config.worker_concurrency, 5);
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(
            config.postgres.expect("postgres").url,
            "postgres://localhost/landmarks"
        );
        clear_landmarks_env();
    }

    #[serial]
    #[test]
    fn from_env_rejects_invalid_socket_addr() {
        clear_landmarks_env();
        set_secret();
        unsafe {
            env::set_var("LANDMARKS_BIND", "not-a-valid-address");
        }
        assert!(ServiceConfig::from_env().is_err());
        clear_landmarks_env();
    }

    #[serial]
    #[test]
    fn from_env_rejects_unparseable_numbers() {
        clear_landmarks_env();
        set_secret();
        unsafe {
            env::set_var("LANDMARKS_CACHE_TTL_SECONDS", "not-a-number");
        }
        assert!(ServiceConfig::from_env().is_err());
        clear_landmarks_env();
    }

    #[serial]
    #[test]
    fn from_env_or_yaml_overrides_with_valid_yaml() {
        clear_landmarks_env();
        set_secret();
        let tmpdir = TempDir::new().unwrap();
        let config_path = tmpdir.path().join("config.yml");
        std::fs::write(
            &config_path,
            r#"
bind_addr: "127.0.0.1:7443"
overpass_url: "http://overpass.internal/api"
query_radius_meters: 750
worker_concurrency: 2
"#,
        )
        .unwrap();
        unsafe {
            env::set_var("LANDMARKS_CONFIG", config_path.to_str().unwrap());
        }

        let config = ServiceConfig::from_env_or_yaml().expect("from_env_or_yaml");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:7443");
        assert_eq!(config.overpass_url, "http://overpass.internal/api");
        assert_eq!(config.query_radius_meters, 750);
        assert_eq!(config.worker_concurrency, 2);
        clear_landmarks_env();
    }

    #[serial]
    #[test]
    fn from_env_or_yaml_file_not_found_fails() {
        clear_landmarks_env();
        set_secret();
        let tmpdir = TempDir::new().unwrap();
        let nonexistent = tmpdir.path().join("nonexistent.yml");
        unsafe {
            env::set_var("LANDMARKS_CONFIG", nonexistent.to_str().unwrap());
        }
        assert!(ServiceConfig::from_env_or_yaml().is_err());
        clear_landmarks_env();
    }

    #[serial]
    #[test]
    fn from_env_or_yaml_invalid_yaml_fails() {
        clear_landmarks_env();
        set_secret();
        let tmpdir = TempDir::new().unwrap();
        let config_path = tmpdir.path().join("bad.yml");
        std::fs::write(&config_path, "this is not: valid: yaml:").unwrap();
        unsafe {
            env::set_var("LANDMARKS_CONFIG", config_path.to_str().unwrap());
        }
        assert!(ServiceConfig::from_env_or_yaml().is_err());
        clear_landmarks_env();
    }
}
