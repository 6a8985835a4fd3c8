use std::env;
use std::time::Duration;

use serde::Deserialize;

/// Process configuration. Every key has a default, so an empty
/// environment boots a working development instance; config files and
/// `RIDEFLOW_`-prefixed variables override.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub tracing: TracingConfig,
    /// Deployment environment tag (development, staging, production).
    pub environment: String,
    pub matching: MatchingConfig,
    pub hub: HubConfig,
    pub publish: PublishConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TracingConfig {
    /// Trace collector endpoint; instrumentation wiring is external, this
    /// is only surfaced so operators can point it somewhere.
    pub endpoint: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    pub max_attempts: u32,
    pub retry_interval_secs: u64,
}

impl MatchingConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HubConfig {
    pub write_timeout_ms: u64,
}

impl HubConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub reconcile_interval_secs: u64,
}

impl PublishConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .set_default("server.port", 8081)?
            .set_default("kafka.brokers", "localhost:9092")?
            .set_default("kafka.group_id", "rideflow")?
            .set_default("tracing.endpoint", "http://jaeger:14268/api/traces")?
            .set_default("environment", "development")?
            .set_default("matching.max_attempts", 3)?
            .set_default("matching.retry_interval_secs", 5)?
            .set_default("hub.write_timeout_ms", 1000)?
            .set_default("publish.max_retries", 3)?
            .set_default("publish.backoff_ms", 200)?
            .set_default("publish.reconcile_interval_secs", 30)?
            // Config files are optional; defaults carry a bare checkout.
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("RIDEFLOW").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
