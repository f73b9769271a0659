//! KV template: reads and writes under the service base key.
//!
//! Reads never fail the caller: backend and decode errors are logged and
//! surface as `None`.

use crate::connection::BackendConnection;
use consulate_core::{keys, CoordinationError, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

pub struct KvTemplate {
    connection: Arc<BackendConnection>,
    base_key: String,
}

impl KvTemplate {
    pub fn new(connection: Arc<BackendConnection>, base_key: impl Into<String>) -> Self {
        Self {
            connection,
            base_key: base_key.into(),
        }
    }

    pub async fn write(&self, key: &str, value: &str) -> Result<()> {
        let backend = self.connection.get_or_reconnect().await?;
        backend.put(&keys::relative(&self.base_key, key), value).await
    }

    pub async fn find(&self, key: &str) -> Option<String> {
        let full_key = keys::relative(&self.base_key, key);
        match self.read(&full_key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %full_key, error = %e, "KV read failed");
                None
            }
        }
    }

    /// Read `key` and decode it from JSON.
    pub async fn find_and_convert<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.find(key).await?;
        match decode(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Stored value could not be decoded");
                None
            }
        }
    }

    /// Delete `key` and everything below it.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let backend = self.connection.get_or_reconnect().await?;
        backend
            .delete_tree(&keys::relative(&self.base_key, key))
            .await
    }

    async fn read(&self, full_key: &str) -> Result<Option<String>> {
        let backend = self.connection.get_or_reconnect().await?;
        backend.get(full_key, None).await
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| CoordinationError::ConfigData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CoordinationBackend, InMemoryBackend};
    use crate::registration::tests::connection;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pool {
        size: u32,
    }

    fn template(backend: &InMemoryBackend) -> KvTemplate {
        KvTemplate::new(connection(backend), "orders/orders-1")
    }

    #[tokio::test]
    async fn test_write_and_find_are_relative_to_base_key() {
        let backend = InMemoryBackend::new();
        let kv = template(&backend);

        kv.write("/settings/pool", "{\"size\":4}").await.unwrap();

        assert!(backend
            .get("orders/orders-1/settings/pool", None)
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            kv.find_and_convert::<Pool>("settings/pool").await,
            Some(Pool { size: 4 })
        );
        assert_eq!(kv.find("settings/missing").await, None);
    }

    #[tokio::test]
    async fn test_undecodable_value_is_none() {
        let backend = InMemoryBackend::new();
        let kv = template(&backend);

        kv.write("settings/pool", "sixteen").await.unwrap();
        assert_eq!(kv.find("settings/pool").await.as_deref(), Some("sixteen"));
        assert_eq!(kv.find_and_convert::<Pool>("settings/pool").await, None);
    }

    #[tokio::test]
    async fn test_find_while_offline_is_none() {
        let backend = InMemoryBackend::new();
        let kv = template(&backend);
        kv.write("settings/pool", "{\"size\":4}").await.unwrap();

        backend.set_available(false).await;
        assert_eq!(kv.find("settings/pool").await, None);
    }

    #[tokio::test]
    async fn test_delete_is_recursive() {
        let backend = InMemoryBackend::new();
        let kv = template(&backend);
        kv.write("settings/pool", "1").await.unwrap();
        kv.write("settings/cache/ttl", "2").await.unwrap();
        kv.write("other", "3").await.unwrap();

        kv.delete("settings").await.unwrap();

        assert_eq!(kv.find("settings/pool").await, None);
        assert_eq!(kv.find("settings/cache/ttl").await, None);
        assert_eq!(kv.find("other").await.as_deref(), Some("3"));
    }
}
