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

use std::sync::{Arc, OnceLock};

use chronowave_common::config::{MetaConfig, StorageEngineConfig};

use super::id::{IdGeneratorManager, IdGeneratorManagerRef, SnowflakeIdGenerator};
use crate::model::NodeId;
use crate::storage::MetaStore;
use crate::MetaResult;

/// Options shared by every manager of one front-end process, distilled from
/// [`MetaConfig`] at construction.
#[derive(Clone, Debug)]
pub struct MetaOpts {
    pub host: String,
    pub port: u16,
    /// Replicas per fragment in addition to the master.
    pub replica_num: usize,
    /// Fragments created per storage engine when rebalancing.
    pub fragment_per_engine: usize,
    /// Flush threshold (and growth step) of the series-prefix statistics.
    pub prefix_flush_threshold: usize,
    /// Statically configured storage engines registered on first boot.
    pub storage_engines: Vec<StorageEngineConfig>,
    pub admin_username: String,
    pub admin_password: String,
}

impl MetaOpts {
    pub fn from_config(config: &MetaConfig) -> MetaResult<Self> {
        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            replica_num: config.replica_num,
            fragment_per_engine: config.fragment_per_engine,
            prefix_flush_threshold: config.prefix_flush_threshold,
            storage_engines: config
                .storage_engines()
                .map_err(|e| anyhow::anyhow!(e).context("invalid storage engine list"))?,
            admin_username: config.admin_username.clone(),
            admin_password: config.admin_password.clone(),
        })
    }

    /// Default opts for testing.
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6888,
            replica_num: 1,
            fragment_per_engine: 2,
            prefix_flush_threshold: 4,
            storage_engines: Vec::new(),
            admin_username: "root".to_string(),
            admin_password: "root".to_string(),
        }
    }
}

/// [`MetaSrvEnv`] is the shared environment of the metadata managers: the
/// store handle, the id generators and the process options. One instance
/// per process, cloned by handle into every manager.
pub struct MetaSrvEnv<S: MetaStore> {
    id_gen_manager: IdGeneratorManagerRef<S>,
    meta_store: Arc<S>,
    /// Identity of this front-end, set once registration assigned an id.
    node_id: Arc<OnceLock<NodeId>>,
    /// Generator for locally-originated object ids, seeded by the node id.
    snowflake: Arc<OnceLock<SnowflakeIdGenerator>>,
    opts: Arc<MetaOpts>,
}

impl<S: MetaStore> Clone for MetaSrvEnv<S> {
    fn clone(&self) -> Self {
        Self {
            id_gen_manager: self.id_gen_manager.clone(),
            meta_store: self.meta_store.clone(),
            node_id: self.node_id.clone(),
            snowflake: self.snowflake.clone(),
            opts: self.opts.clone(),
        }
    }
}

impl<S: MetaStore> MetaSrvEnv<S> {
    pub async fn new(opts: MetaOpts, meta_store: Arc<S>) -> MetaResult<Self> {
        let id_gen_manager = Arc::new(IdGeneratorManager::new(meta_store.clone()).await?);
        Ok(Self {
            id_gen_manager,
            meta_store,
            node_id: Arc::new(OnceLock::new()),
            snowflake: Arc::new(OnceLock::new()),
            opts: Arc::new(opts),
        })
    }

    pub fn meta_store(&self) -> &S {
        &self.meta_store
    }

    pub fn meta_store_ref(&self) -> Arc<S> {
        self.meta_store.clone()
    }

    pub fn id_gen_manager(&self) -> &IdGeneratorManager<S> {
        &self.id_gen_manager
    }

    pub fn opts(&self) -> &MetaOpts {
        &self.opts
    }

    /// Record the registered identity. Called exactly once during bootstrap.
    pub(crate) fn set_node_identity(&self, node_id: NodeId) {
        self.node_id
            .set(node_id)
            .expect("node identity set more than once");
        self.snowflake
            .set(SnowflakeIdGenerator::new(node_id))
            .expect("node identity set more than once");
    }

    /// Id of the local front-end node. Registration happens during manager
    /// construction, before any other component can observe the env.
    pub fn node_id(&self) -> NodeId {
        *self
            .node_id
            .get()
            .expect("node identity accessed before registration")
    }

    pub fn snowflake(&self) -> &SnowflakeIdGenerator {
        self.snowflake
            .get()
            .expect("node identity accessed before registration")
    }
}

#[cfg(any(test, feature = "test"))]
impl MetaSrvEnv<crate::storage::MemStore> {
    /// Instance for test over a private in-memory store.
    pub async fn for_test() -> Self {
        Self::for_test_with_store(crate::storage::MemStore::shared()).await
    }

    /// Instance for test sharing `meta_store` with other instances, to
    /// exercise multi-node coordination in one process.
    pub async fn for_test_with_store(meta_store: Arc<crate::storage::MemStore>) -> Self {
        Self::new(MetaOpts::test(), meta_store)
            .await
            .expect("mem store env construction cannot fail")
    }
}
