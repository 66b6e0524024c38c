// ABOUTME: dbsync.toml configuration for site identity, queue, stores and entity registry
// ABOUTME: Loads, defaults and validates operator-facing settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::consumer::identity::OperatorAccount;
use crate::error::{Result, SyncError};
use crate::hash::registry::{EntityDescriptor, EntityRegistry};

pub const DEFAULT_CONFIG_PATH: &str = "dbsync.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub site: SiteConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub hash_store: HashStoreConfig,
    #[serde(default)]
    pub replica: ReplicaConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// Stamped on every outbound sync event as `sourceSite`.
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub path: PathBuf,
    pub name: String,
    /// Upper bound on events pulled per consumer iteration.
    pub max_batch: usize,
    /// How long a poll blocks on an empty queue before returning an empty batch.
    pub poll_wait_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.dbsync/queue.db"),
            name: "dbsync.events".to_string(),
            max_batch: 50,
            poll_wait_secs: 15,
            poll_interval_ms: 250,
        }
    }
}

impl QueueConfig {
    pub fn poll_wait(&self) -> Duration {
        Duration::from_secs(self.poll_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HashStoreConfig {
    pub path: PathBuf,
}

impl Default for HashStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.dbsync/hashes.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicaConfig {
    pub path: PathBuf,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.dbsync/replica.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerConfig {
    pub operator_user: Option<String>,
    /// Added on top of the poll wait when waiting for the consumer to stop.
    pub shutdown_margin_secs: u64,
    pub operators: Vec<OperatorAccount>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            operator_user: None,
            shutdown_margin_secs: 10,
            operators: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityConfig {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub timestamp_fields: Vec<String>,
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            SyncError::Configuration(format!("failed to read {}: {}", path.display(), err))
        })?;
        let config = Self::from_toml(&contents)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: SyncConfig = toml::from_str(contents)
            .map_err(|err| SyncError::Configuration(format!("invalid configuration: {err}")))?;
        config.queue.path = expand_home(&config.queue.path)?;
        config.hash_store.path = expand_home(&config.hash_store.path)?;
        config.replica.path = expand_home(&config.replica.path)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.site.id.trim().is_empty() {
            return Err(SyncError::Configuration("site.id cannot be empty".into()));
        }
        if self.queue.name.trim().is_empty() {
            return Err(SyncError::Configuration("queue.name cannot be empty".into()));
        }
        if self.queue.max_batch == 0 {
            return Err(SyncError::Configuration(
                "queue.max_batch must be at least 1".into(),
            ));
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(SyncError::Configuration(
                "queue.poll_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Builds the immutable entity registry; call once during startup.
    pub fn entity_registry(&self) -> Result<EntityRegistry> {
        let mut builder = EntityRegistry::builder();
        for entity in &self.entities {
            builder = builder.register(EntityDescriptor::new(
                &entity.name,
                &entity.table,
                entity.timestamp_fields.iter().map(String::as_str),
            ))?;
        }
        Ok(builder.build())
    }

    /// Grace period granted to the consumer thread on shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        self.queue.poll_wait() + Duration::from_secs(self.consumer.shutdown_margin_secs)
    }
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    let as_str = path.to_string_lossy();
    let home = || {
        dirs::home_dir().ok_or_else(|| {
            SyncError::Configuration("unable to determine home directory".to_string())
        })
    };
    if let Some(stripped) = as_str.strip_prefix("~/") {
        return Ok(home()?.join(stripped));
    }
    if as_str == "~" {
        return home();
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [site]
        id = "remote-1"

        [queue]
        path = "/var/lib/dbsync/queue.db"
        name = "sync.inbound"
        max_batch = 20
        poll_wait_secs = 5

        [hash_store]
        path = "/var/lib/dbsync/hashes.db"

        [consumer]
        operator_user = "admin"
        shutdown_margin_secs = 3
        operators = [{ username = "admin", uuid = "1c3db49d-440a-11e6-a65c-00e04c680037" }]

        [[entities]]
        name = "person"
        table = "person"
        timestamp_fields = ["dateCreated", "birthdate"]
    "#;

    #[test]
    fn test_parses_full_config() {
        let config = SyncConfig::from_toml(FULL).unwrap();
        assert_eq!(config.site.id, "remote-1");
        assert_eq!(config.queue.max_batch, 20);
        assert_eq!(config.queue.poll_interval_ms, 250);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(8));
        assert_eq!(config.consumer.operators.len(), 1);

        let registry = config.entity_registry().unwrap();
        let person = registry.get("person").unwrap();
        assert!(person.is_timestamp_field("birthdate"));
        assert!(!person.is_timestamp_field("gender"));
    }

    #[test]
    fn test_defaults_apply() {
        let config = SyncConfig::from_toml("[site]\nid = \"central\"\n").unwrap();
        assert_eq!(config.queue.max_batch, 50);
        assert_eq!(config.queue.poll_wait(), Duration::from_secs(15));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(25));
        assert!(config.consumer.operator_user.is_none());
        assert!(!config.queue.path.starts_with("~"));
    }

    #[test]
    fn test_rejects_blank_site() {
        let err = SyncConfig::from_toml("[site]\nid = \" \"\n").unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn test_rejects_zero_batch() {
        let err = SyncConfig::from_toml("[site]\nid = \"a\"\n[queue]\nmax_batch = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_batch"));
    }

    #[test]
    fn test_rejects_duplicate_entity() {
        let config = SyncConfig::from_toml(
            r#"
            [site]
            id = "a"
            [[entities]]
            name = "person"
            table = "person"
            [[entities]]
            name = "person"
            table = "person_copy"
            "#,
        )
        .unwrap();
        assert!(config.entity_registry().is_err());
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        let path = PathBuf::from("/tmp/queue.db");
        assert_eq!(expand_home(&path).unwrap(), path);
    }
}
