// Copyright 2025 ChronoWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use rand::seq::SliceRandom;
use thiserror_ext::AsReport;

use super::cache::MetaCache;
use super::env::MetaSrvEnv;
use super::id::IdCategory;
use crate::model::{
    EngineId, EngineKind, FrontendNode, MetadataModel, StorageEngine, StorageUnit,
};
use crate::storage::MetaStore;
use crate::MetaResult;

pub type ClusterManagerRef<S> = Arc<ClusterManager<S>>;

/// [`ClusterManager`] owns the lifecycle of front-end nodes, storage
/// engines and the remote-event application path for storage units.
pub struct ClusterManager<S: MetaStore> {
    env: MetaSrvEnv<S>,
    cache: Arc<MetaCache>,
}

impl<S: MetaStore> ClusterManager<S> {
    pub fn new(env: MetaSrvEnv<S>, cache: Arc<MetaCache>) -> Self {
        Self { env, cache }
    }

    /// Register this process as a front-end node: load the peer view, reuse
    /// the id of a previous incarnation at the same address or obtain a
    /// fresh one, and seed the local id generator.
    pub async fn register(&self) -> MetaResult<FrontendNode> {
        let store = self.env.meta_store();
        let nodes = FrontendNode::list(store).await?;
        for node in &nodes {
            self.cache.add_frontend_node(node.clone());
        }

        let opts = self.env.opts();
        let node = match nodes
            .iter()
            .find(|n| n.host == opts.host && n.port == opts.port)
        {
            Some(existing) => existing.clone(),
            None => {
                let id = self
                    .env
                    .id_gen_manager()
                    .generate::<{ IdCategory::Node }>()
                    .await?;
                let node = FrontendNode {
                    id,
                    host: opts.host.clone(),
                    port: opts.port,
                };
                node.insert(store).await?;
                self.cache.add_frontend_node(node.clone());
                node
            }
        };
        self.env.set_node_identity(node.id);
        tracing::info!(node = node.id, host = %node.host, port = node.port, "registered front-end");
        Ok(node)
    }

    /// Deregister on clean shutdown. Session expiry is handled by the
    /// coordination service.
    pub async fn deregister(&self) -> MetaResult<()> {
        let id = self.env.node_id();
        FrontendNode::delete(self.env.meta_store(), &id).await?;
        self.cache.remove_frontend_node(id);
        Ok(())
    }

    /// Load the persisted engine view into the cache.
    pub async fn load_storage_engines(&self) -> MetaResult<()> {
        for engine in StorageEngine::list(self.env.meta_store()).await? {
            self.cache.add_storage_engine(engine);
        }
        Ok(())
    }

    /// Register the statically configured engines whose endpoints are not
    /// yet part of the cluster. Malformed entries are skipped with a log.
    pub async fn register_static_engines(&self) -> MetaResult<()> {
        for config in &self.env.opts().storage_engines {
            if self
                .cache
                .has_storage_engine_endpoint(&config.host, config.port)
            {
                continue;
            }
            let kind = match config.kind.parse::<EngineKind>() {
                Ok(kind) => kind,
                Err(err) => {
                    tracing::warn!(
                        error = %err.as_report(),
                        host = %config.host,
                        port = config.port,
                        "skipping configured storage engine",
                    );
                    continue;
                }
            };
            self.add_engine_inner(StorageEngine {
                id: 0,
                host: config.host.clone(),
                port: config.port,
                kind,
                parameters: config.parameters.clone(),
                created_by: 0,
            })
            .await?;
        }
        Ok(())
    }

    async fn add_engine_inner(&self, mut engine: StorageEngine) -> MetaResult<StorageEngine> {
        engine.id = self
            .env
            .id_gen_manager()
            .generate::<{ IdCategory::StorageEngine }>()
            .await?;
        engine.created_by = self.env.node_id();
        engine.insert(self.env.meta_store()).await?;
        self.cache.add_storage_engine(engine.clone());
        Ok(engine)
    }

    /// Publish a batch of operator-provided engines. Per-engine
    /// all-or-nothing: on failure already-added engines stay (the operator
    /// retries the batch).
    pub async fn add_storage_engines(&self, engines: Vec<StorageEngine>) -> bool {
        for engine in engines {
            let endpoint = engine.endpoint();
            if let Err(err) = self.add_engine_inner(engine).await {
                tracing::warn!(
                    error = %err.as_report(),
                    endpoint = %endpoint,
                    "failed to add storage engine",
                );
                return false;
            }
        }
        true
    }

    /// Uniform sample of `1 + replica_num` engine ids; all of them when the
    /// cluster is not larger than that.
    pub fn select_storage_engine_ids(&self) -> Vec<EngineId> {
        let engines = self.cache.get_storage_engines();
        let want = self.env.opts().replica_num + 1;
        if engines.len() <= want {
            return engines.iter().map(|e| e.id).collect();
        }
        engines
            .choose_multiple(&mut rand::thread_rng(), want)
            .map(|e| e.id)
            .collect()
    }

    /// Apply a remote front-end membership change.
    pub fn apply_node_update(&self, node: FrontendNode) {
        if node.id == self.env.node_id() {
            return;
        }
        self.cache.add_frontend_node(node);
    }

    pub fn apply_node_delete(&self, id: crate::model::NodeId) {
        if id == self.env.node_id() {
            return;
        }
        self.cache.remove_frontend_node(id);
    }

    /// Apply a remote engine event. Returns whether the event survived the
    /// echo filter (hooks only fire for survivors).
    pub fn apply_storage_engine_event(&self, engine: StorageEngine) -> Option<StorageEngine> {
        if engine.created_by == self.env.node_id() {
            return None;
        }
        self.cache.add_storage_engine(engine.clone());
        Some(engine)
    }

    /// Apply a remote storage-unit event, filtering duplicates: events for
    /// self-created units were applied optimistically, initial units only
    /// flow through the bootstrap load, and a pre-bootstrap cache picks the
    /// unit up in its initial load instead.
    pub fn apply_storage_unit_event(&self, unit: StorageUnit) {
        if unit.created_by == self.env.node_id() {
            return;
        }
        if unit.initial {
            return;
        }
        if !self.cache.has_storage_unit() {
            return;
        }
        self.cache.install_storage_unit(unit);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::model::EngineKind;

    fn engine_proposal(host: &str) -> StorageEngine {
        StorageEngine {
            id: 0,
            host: host.to_string(),
            port: 8086,
            kind: EngineKind::InfluxDb,
            parameters: HashMap::new(),
            created_by: 0,
        }
    }

    #[tokio::test]
    async fn test_register_and_engines() {
        let env = MetaSrvEnv::for_test().await;
        let cache = Arc::new(MetaCache::default());
        let cluster = ClusterManager::new(env.clone(), cache.clone());

        let node = cluster.register().await.unwrap();
        assert_eq!(env.node_id(), node.id);
        assert_eq!(cache.get_frontend_nodes().len(), 1);

        assert!(
            cluster
                .add_storage_engines(vec![engine_proposal("db-0"), engine_proposal("db-1")])
                .await
        );
        let engines = cache.get_storage_engines();
        assert_eq!(engines.len(), 2);
        assert!(engines.iter().all(|e| e.id != 0));
        assert!(engines.iter().all(|e| e.created_by == node.id));

        // replica_num = 1 in test opts: sample of two from two engines.
        let mut selected = cluster.select_storage_engine_ids();
        selected.sort_unstable();
        let mut all: Vec<_> = engines.iter().map(|e| e.id).collect();
        all.sort_unstable();
        assert_eq!(selected, all);
    }

    #[tokio::test]
    async fn test_register_reuses_identity() {
        let store = crate::storage::MemStore::shared();
        let env = MetaSrvEnv::for_test_with_store(store.clone()).await;
        let cluster = ClusterManager::new(env, Arc::new(MetaCache::default()));
        let first = cluster.register().await.unwrap();

        // Same address, new process: the id survives.
        let env = MetaSrvEnv::for_test_with_store(store).await;
        let cluster = ClusterManager::new(env, Arc::new(MetaCache::default()));
        let second = cluster.register().await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_unit_event_filters() {
        let env = MetaSrvEnv::for_test().await;
        let cache = Arc::new(MetaCache::default());
        let cluster = ClusterManager::new(env.clone(), cache.clone());
        cluster.register().await.unwrap();

        let mut remote = StorageUnit::new_master("m1", 1);
        remote.created_by = env.node_id() + 1;

        // Pre-bootstrap events are dropped.
        cluster.apply_storage_unit_event(remote.clone());
        assert!(cache.get_storage_unit("m1").is_none());

        cache.init_storage_units(vec![]);
        // Initial-flagged units only flow through the bootstrap load.
        let mut initial = remote.clone();
        initial.initial = true;
        cluster.apply_storage_unit_event(initial);
        assert!(cache.get_storage_unit("m1").is_none());

        // Self-created events were applied optimistically already.
        let mut own = remote.clone();
        own.created_by = env.node_id();
        cluster.apply_storage_unit_event(own);
        assert!(cache.get_storage_unit("m1").is_none());

        cluster.apply_storage_unit_event(remote);
        assert!(cache.get_storage_unit("m1").is_some());
    }
}
