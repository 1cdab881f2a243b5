use serde::Deserialize;

/// Backend selection for the state substrate.
///
/// Both sections default to the in-memory backend, so an empty `[state]`
/// table yields a fully usable provider.
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_kv")]
    pub kv: Option<KvConfig>,
    #[serde(default = "default_queue")]
    pub queue: Option<QueueConfig>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            kv: default_kv(),
            queue: default_queue(),
        }
    }
}

#[allow(clippy::unnecessary_wraps)]
fn default_kv() -> Option<KvConfig> {
    Some(KvConfig::Memory)
}

#[allow(clippy::unnecessary_wraps)]
fn default_queue() -> Option<QueueConfig> {
    Some(QueueConfig::Memory)
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum KvConfig {
    #[default]
    Memory,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum QueueConfig {
    #[default]
    Memory,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_selects_memory_backends() {
        let config: StateConfig = toml::from_str("").unwrap();
        assert_eq!(config.kv, Some(KvConfig::Memory));
        assert_eq!(config.queue, Some(QueueConfig::Memory));
    }

    #[test]
    fn explicit_backend_tag() {
        let config: StateConfig = toml::from_str(
            r#"
            [kv]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.kv, Some(KvConfig::Memory));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result: Result<StateConfig, _> = toml::from_str(
            r#"
            [queue]
            backend = "carrier-pigeon"
            "#,
        );
        assert!(result.is_err());
    }
}
