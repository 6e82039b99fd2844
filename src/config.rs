/*!
 * Process-level configuration: logging, heartbeat/election/loader tuning,
 * and where the locally persisted replica set config document lives.
 *
 * Distinct from `ReplSetConfig` (src/model.rs), which is the versioned
 * document describing set membership itself.
 */

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub heartbeat: HeartbeatConfig,
    pub election: ElectionConfig,
    pub loader: LoaderConfig,
    pub local_config_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(with = "duration_millis")]
    pub interval: Duration,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    #[serde(with = "duration_millis")]
    pub backoff_min: Duration,
    #[serde(with = "duration_millis")]
    pub backoff_max: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    #[serde(with = "duration_millis")]
    pub per_vote_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub election_window: Duration,
    #[serde(with = "duration_secs")]
    pub step_down_cooldown: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(with = "duration_secs")]
    pub retry_sleep_min: Duration,
    #[serde(with = "duration_secs")]
    pub retry_sleep_max: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            heartbeat: HeartbeatConfig {
                interval: Duration::from_millis(2000),
                timeout: Duration::from_millis(2000),
                backoff_min: Duration::from_millis(500),
                backoff_max: Duration::from_secs(10),
            },
            election: ElectionConfig {
                per_vote_timeout: Duration::from_secs(30),
                election_window: Duration::from_secs(30),
                step_down_cooldown: Duration::from_secs(60),
            },
            loader: LoaderConfig {
                retry_sleep_min: Duration::from_secs(10),
                retry_sleep_max: Duration::from_secs(20),
            },
            local_config_path: "replset.conf.json".to_string(),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path).await?;

        let config: Config = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };

        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string_pretty(self)
                .map_err(|e| crate::error::ReplSetError::ConfigInvalid(e.to_string()))?,
            _ => toml::to_string_pretty(self)
                .map_err(|e| crate::error::ReplSetError::ConfigInvalid(e.to_string()))?,
        };

        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
