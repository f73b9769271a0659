//! Catalog resolution of other services by name.

use crate::connection::BackendConnection;
use consulate_core::{CatalogService, Result};
use std::collections::HashSet;
use std::sync::Arc;

pub struct CatalogResolver {
    connection: Arc<BackendConnection>,
}

impl CatalogResolver {
    pub fn new(connection: Arc<BackendConnection>) -> Self {
        Self { connection }
    }

    /// Distinct instances of `service_name`, ordered case-insensitively by
    /// service name, then address, then port.
    pub async fn resolve_by_name(&self, service_name: &str) -> Result<Vec<CatalogService>> {
        let backend = self.connection.get_or_reconnect().await?;
        let instances = backend.service_instances(service_name).await?;
        Ok(dedup_and_sort(instances))
    }

    /// Comma-joined `address:port` pairs, empty when nothing is registered.
    pub async fn resolve_by_name_as_cluster_definition(&self, service_name: &str) -> Result<String> {
        Ok(cluster_definition(&self.resolve_by_name(service_name).await?))
    }
}

fn dedup_and_sort(instances: Vec<CatalogService>) -> Vec<CatalogService> {
    let mut seen = HashSet::new();
    let mut distinct: Vec<CatalogService> = instances
        .into_iter()
        .filter(|s| {
            seen.insert((
                s.service_id.clone(),
                s.effective_address().to_string(),
                s.service_port,
            ))
        })
        .collect();

    distinct.sort_by(|a, b| {
        a.service_name
            .to_lowercase()
            .cmp(&b.service_name.to_lowercase())
            .then_with(|| a.effective_address().cmp(b.effective_address()))
            .then_with(|| a.service_port.cmp(&b.service_port))
    });
    distinct
}

fn cluster_definition(instances: &[CatalogService]) -> String {
    instances
        .iter()
        .map(CatalogService::endpoint)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::registration::tests::connection;

    fn instance(id: &str, address: &str, port: u16) -> CatalogService {
        CatalogService {
            node: "node-b".to_string(),
            address: address.to_string(),
            service_id: id.to_string(),
            service_name: "cache".to_string(),
            service_address: String::new(),
            service_port: port,
            service_tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_cluster_definition_is_sorted_and_distinct() {
        let backend = InMemoryBackend::new();
        backend.add_catalog_service(instance("cache-2", "b", 2)).await;
        backend.add_catalog_service(instance("cache-1", "a", 1)).await;
        backend.add_catalog_service(instance("cache-1", "a", 1)).await;
        let resolver = CatalogResolver::new(connection(&backend));

        assert_eq!(resolver.resolve_by_name("cache").await.unwrap().len(), 2);
        assert_eq!(
            resolver
                .resolve_by_name_as_cluster_definition("cache")
                .await
                .unwrap(),
            "a:1,b:2"
        );
    }

    #[tokio::test]
    async fn test_no_instances_is_empty_definition() {
        let backend = InMemoryBackend::new();
        let resolver = CatalogResolver::new(connection(&backend));

        assert_eq!(
            resolver
                .resolve_by_name_as_cluster_definition("cache")
                .await
                .unwrap(),
            ""
        );
    }

    #[test]
    fn test_service_address_wins_over_node_address() {
        let mut svc = instance("cache-1", "10.0.0.1", 6379);
        svc.service_address = "10.9.9.9".to_string();
        assert_eq!(cluster_definition(&[svc]), "10.9.9.9:6379");
    }

    #[test]
    fn test_ordering_ignores_case() {
        let mut upper = instance("x-1", "z", 1);
        upper.service_name = "Alpha".to_string();
        let lower = instance("x-2", "a", 1);

        let sorted = dedup_and_sort(vec![lower, upper]);
        assert_eq!(sorted[0].service_name, "Alpha");
    }
}
