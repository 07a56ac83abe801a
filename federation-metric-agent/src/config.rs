use crate::publisher::NatsConfig;
use crate::sources::vault::VaultConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_PATH_VAR: &str = "FEDERATION_METRIC_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Which non-host credentials count as federation members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MembershipRule {
    /// Member if listed in the topology OR not the host, i.e. every non-host cluster.
    #[default]
    AnyNonHost,
    /// Member only if its endpoint is listed in the topology.
    Topology,
}

impl std::str::FromStr for MembershipRule {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "any-non-host" => Ok(MembershipRule::AnyNonHost),
            "topology" => Ok(MembershipRule::Topology),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentConfig {
    pub host_cluster_name: String,
    pub karmada_api: String,
    pub karmada_token: String,
    pub nats_url: String,
    pub nats_id: String,
    pub nats_password: String,
    pub nats_bucket_name: String,
    pub nats_subject_name: String,
    pub vault_url: String,
    pub vault_role_id: String,
    pub vault_secret_id: String,
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    #[serde(default)]
    pub membership_rule: MembershipRule,
}

fn default_publish_interval() -> u64 {
    30
}

fn default_probe_concurrency() -> usize {
    4
}

fn default_probe_timeout() -> u64 {
    20
}

fn default_health_port() -> u16 {
    8001
}

impl AgentConfig {
    /// YAML file named by `FEDERATION_METRIC_CONFIG` if it exists, otherwise the
    /// environment (after `config.env` and `.env`). Keys are the same in both.
    pub async fn load() -> Result<Self, ConfigError> {
        dotenvy::from_filename("config.env").ok();
        dotenvy::dotenv().ok();

        match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) if Path::new(&path).exists() => Self::from_yaml_file(&path).await,
            Ok(path) => {
                tracing::warn!("[config] {} introuvable ({}), config depuis l'environnement", path, CONFIG_PATH_VAR);
                Self::from_lookup(|key| std::env::var(key).ok())
            }
            Err(_) => Self::from_lookup(|key| std::env::var(key).ok()),
        }
    }

    pub async fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path).await?;
        let config: AgentConfig = serde_yaml::from_str(&text)?;
        config.validate()
    }

    /// Build from a key lookup (the environment in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let config = AgentConfig {
            host_cluster_name: required("HostClusterName")?,
            karmada_api: required("KarmadaApi")?,
            karmada_token: required("KarmadaToken")?,
            nats_url: required("NatsUrl")?,
            nats_id: required("NatsId")?,
            nats_password: required("NatsPassword")?,
            nats_bucket_name: required("NatsBucketName")?,
            nats_subject_name: required("NatsSubjectName")?,
            vault_url: required("VaultUrl")?,
            vault_role_id: required("VaultRoleId")?,
            vault_secret_id: required("VaultSecretId")?,
            publish_interval_secs: optional(&lookup, "PublishIntervalSecs", default_publish_interval())?,
            probe_concurrency: optional(&lookup, "ProbeConcurrency", default_probe_concurrency())?,
            probe_timeout_secs: optional(&lookup, "ProbeTimeoutSecs", default_probe_timeout())?,
            health_port: optional(&lookup, "HealthPort", default_health_port())?,
            membership_rule: optional(&lookup, "MembershipRule", MembershipRule::default())?,
        };
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.publish_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "PublishIntervalSecs",
                value: "0".into(),
            });
        }
        if self.probe_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "ProbeConcurrency",
                value: "0".into(),
            });
        }
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "ProbeTimeoutSecs",
                value: "0".into(),
            });
        }
        Ok(self)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn vault(&self) -> VaultConfig {
        VaultConfig {
            url: self.vault_url.clone(),
            role_id: self.vault_role_id.clone(),
            secret_id: self.vault_secret_id.clone(),
        }
    }

    pub fn nats(&self) -> NatsConfig {
        NatsConfig {
            url: self.nats_url.clone(),
            user: self.nats_id.clone(),
            password: self.nats_password.clone(),
        }
    }
}

fn optional<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
