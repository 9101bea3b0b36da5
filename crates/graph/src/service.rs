use std::ops::Deref;
use tracing::{info, warn};

use crate::memory::MemoryGraphStore;
use crate::neo4j::Neo4jStore;
use crate::store::GraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Neo4j,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: String::new(),
        }
    }
}

/// Owned, injected handle over the selected backend. The backend is chosen
/// once at process start; if the persistent backend is unreachable the
/// service falls back to the in-memory store and flags itself degraded.
pub struct GraphService {
    store: Box<dyn GraphStore>,
    degraded: bool,
    merge_lock: tokio::sync::Mutex<()>,
}

impl GraphService {
    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryGraphStore::new()),
            degraded: false,
            merge_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn connect(settings: &BackendSettings) -> Self {
        match settings.kind {
            BackendKind::Memory => Self::in_memory(),
            BackendKind::Neo4j => {
                match Neo4jStore::connect(
                    &settings.neo4j_uri,
                    &settings.neo4j_user,
                    &settings.neo4j_password,
                )
                .await
                {
                    Ok(store) => {
                        info!(uri = %settings.neo4j_uri, "connected to neo4j backend");
                        Self {
                            store: Box::new(store),
                            degraded: false,
                            merge_lock: tokio::sync::Mutex::new(()),
                        }
                    }
                    Err(err) => {
                        warn!(
                            uri = %settings.neo4j_uri,
                            error = %err,
                            "neo4j unreachable, falling back to in-memory store"
                        );
                        let mut service = Self::in_memory();
                        service.degraded = true;
                        service
                    }
                }
            }
        }
    }

    /// True when the configured persistent backend could not be reached and
    /// the in-memory fallback is serving instead.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    /// Exclusive section for the resolver's merge+redirect passes. The store
    /// contract exposes no per-pair locking, so this is whole-graph.
    pub async fn merge_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.merge_lock.lock().await
    }
}

impl Deref for GraphService {
    type Target = dyn GraphStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewEntity;

    #[tokio::test]
    async fn in_memory_service_is_not_degraded() {
        let service = GraphService::in_memory();
        assert!(!service.degraded());
        service
            .upsert_entity(NewEntity::new("Apple Inc.", "Company"))
            .await
            .unwrap();
        assert_eq!(service.stats().await.unwrap().entities, 1);
    }
}
