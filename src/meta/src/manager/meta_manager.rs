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

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chronowave_common::types::{TimeInterval, TimeSeriesInterval};

use super::cache::MetaCache;
use super::cluster::{ClusterManager, ClusterManagerRef};
use super::env::{MetaOpts, MetaSrvEnv};
use super::fragment::{FragmentManager, FragmentManagerRef};
use super::notification::{ChangeDispatcher, StorageEngineChangeHook};
use super::schema::SchemaMappingManager;
use super::user::UserManager;
use crate::model::{
    Auth, EngineId, Fragment, FrontendNode, NodeId, StorageEngine, StorageUnit, UserInfo,
};
use crate::storage::{BoxedMetaStore, MetaStore, MetaStoreBackend};
use crate::MetaResult;

pub type MetaManagerRef<S> = Arc<MetaManager<S>>;

/// The capability surface of the metadata core, handed by `Arc` to every
/// collaborator of the front-end process.
///
/// Exactly one instance exists per process; construction performs the
/// bootstrap sequence (subscribe, register identity, load topology, seed
/// the administrator) and a failure there is fatal to the host.
pub struct MetaManager<S: MetaStore> {
    env: MetaSrvEnv<S>,
    cache: Arc<MetaCache>,
    cluster: ClusterManagerRef<S>,
    fragment: FragmentManagerRef<S>,
    user: UserManager<S>,
    schema: SchemaMappingManager<S>,
    dispatcher: ChangeDispatcher,
}

impl MetaManager<BoxedMetaStore> {
    /// Construct the manager over the backend the `meta_storage`
    /// configuration key selected. Store construction is the only
    /// backend-specific step; everything after goes through
    /// [`MetaManager::new_with_store`].
    pub async fn new(
        opts: MetaOpts,
        backend: MetaStoreBackend,
    ) -> MetaResult<MetaManagerRef<BoxedMetaStore>> {
        let meta_store = backend.open().await?;
        Self::new_with_store(opts, Arc::new(meta_store)).await
    }
}

impl<S: MetaStore> MetaManager<S> {
    pub async fn new_with_store(opts: MetaOpts, meta_store: Arc<S>) -> MetaResult<MetaManagerRef<S>> {
        let env = MetaSrvEnv::new(opts, meta_store).await?;
        let cache = Arc::new(MetaCache::default());
        let cluster = Arc::new(ClusterManager::new(env.clone(), cache.clone()));
        let fragment = Arc::new(FragmentManager::new(env.clone(), cache.clone()));

        // Subscribe before the initial load; the dispatcher gates unit and
        // fragment events on the cache init flags until the bulk load is
        // the source of truth.
        let dispatcher = ChangeDispatcher::start(
            env.clone(),
            cache.clone(),
            cluster.clone(),
            fragment.clone(),
        )
        .await?;

        cluster.register().await?;
        cluster.load_storage_engines().await?;
        cluster.register_static_engines().await?;
        let user = UserManager::new(env.clone(), cache.clone()).await?;
        let schema = SchemaMappingManager::new(env.clone(), cache.clone()).await?;

        Ok(Arc::new(Self {
            env,
            cache,
            cluster,
            fragment,
            user,
            schema,
            dispatcher,
        }))
    }

    pub fn local_node_id(&self) -> NodeId {
        self.env.node_id()
    }

    pub(crate) fn env(&self) -> &MetaSrvEnv<S> {
        &self.env
    }

    pub fn opts(&self) -> &MetaOpts {
        self.env.opts()
    }

    /// Deregister this front-end on clean shutdown.
    pub async fn deregister(&self) -> MetaResult<()> {
        self.cluster.deregister().await
    }
}

// Topology views and engine registration.
impl<S: MetaStore> MetaManager<S> {
    pub fn get_frontend_nodes(&self) -> Vec<FrontendNode> {
        self.cache.get_frontend_nodes()
    }

    pub fn get_storage_engines(&self) -> Vec<StorageEngine> {
        self.cache.get_storage_engines()
    }

    pub fn get_storage_engine(&self, id: EngineId) -> Option<StorageEngine> {
        self.cache.get_storage_engine(id)
    }

    pub fn storage_engine_count(&self) -> usize {
        self.cache.storage_engine_count()
    }

    pub fn get_storage_units(&self) -> Vec<StorageUnit> {
        self.cache.get_storage_units()
    }

    pub fn get_storage_unit(&self, id: &str) -> Option<StorageUnit> {
        self.cache.get_storage_unit(id)
    }

    pub fn get_storage_units_by_engine(&self, engine_id: EngineId) -> Vec<StorageUnit> {
        self.cache.get_storage_units_by_engine(engine_id)
    }

    pub async fn add_storage_engines(&self, engines: Vec<StorageEngine>) -> bool {
        self.cluster.add_storage_engines(engines).await
    }

    /// Uniform sample of `1 + replica_num` engine ids for placing a new
    /// master and its replicas.
    pub fn select_storage_engine_ids(&self) -> Vec<EngineId> {
        self.cluster.select_storage_engine_ids()
    }

    pub fn register_storage_engine_change_hook(&self, hook: StorageEngineChangeHook) {
        self.dispatcher.register_storage_engine_change_hook(hook);
    }
}

// Fragment lifecycle and range queries.
impl<S: MetaStore> MetaManager<S> {
    pub fn has_fragment(&self) -> bool {
        self.cache.has_fragment()
    }

    pub fn has_storage_unit(&self) -> bool {
        self.cache.has_storage_unit()
    }

    pub async fn create_initial_fragments_and_storage_units(
        &self,
        units: Vec<StorageUnit>,
        fragments: Vec<Fragment>,
    ) -> bool {
        self.fragment
            .create_initial_fragments_and_storage_units(units, fragments)
            .await
    }

    pub async fn create_fragments_and_storage_units(
        &self,
        units: Vec<StorageUnit>,
        fragments: Vec<Fragment>,
    ) -> bool {
        self.fragment
            .create_fragments_and_storage_units(units, fragments)
            .await
    }

    pub fn get_fragment_map_by_series_interval(
        &self,
        series: &TimeSeriesInterval,
    ) -> Vec<(TimeSeriesInterval, Vec<Fragment>)> {
        self.cache.get_fragment_map_by_series_interval(series)
    }

    pub fn get_fragment_map_by_series_and_time_interval(
        &self,
        series: &TimeSeriesInterval,
        time: &TimeInterval,
    ) -> Vec<(TimeSeriesInterval, Vec<Fragment>)> {
        self.cache
            .get_fragment_map_by_series_and_time_interval(series, time)
    }

    pub fn get_latest_fragment_map(&self) -> Vec<(TimeSeriesInterval, Fragment)> {
        self.cache.get_latest_fragment_map()
    }

    pub fn get_latest_fragment_map_by_series_interval(
        &self,
        series: &TimeSeriesInterval,
    ) -> Vec<(TimeSeriesInterval, Fragment)> {
        self.cache.get_latest_fragment_map_by_series_interval(series)
    }

    pub fn get_fragments_by_series_name(&self, series: &str) -> Vec<Fragment> {
        self.cache.get_fragments_by_series_name(series)
    }

    pub fn get_fragments_by_series_name_and_time_interval(
        &self,
        series: &str,
        time: &TimeInterval,
    ) -> Vec<Fragment> {
        self.cache
            .get_fragments_by_series_name_and_time_interval(series, time)
    }
}

// User and schema-mapping management.
impl<S: MetaStore> MetaManager<S> {
    pub async fn create_user(&self, user: UserInfo) -> MetaResult<()> {
        self.user.create_user(user).await
    }

    pub fn get_user(&self, username: &str) -> Option<UserInfo> {
        self.user.get_user(username)
    }

    pub fn list_users(&self) -> Vec<UserInfo> {
        self.user.list_users()
    }

    pub async fn update_user(
        &self,
        username: &str,
        password: Option<String>,
        auths: Option<HashSet<Auth>>,
    ) -> MetaResult<()> {
        self.user.update_user(username, password, auths).await
    }

    pub async fn drop_user(&self, username: &str) -> MetaResult<()> {
        self.user.drop_user(username).await
    }

    pub async fn add_or_update_schema_mapping(
        &self,
        name: &str,
        mapping: Option<HashMap<String, i64>>,
    ) -> MetaResult<()> {
        self.schema.add_or_update_schema_mapping(name, mapping).await
    }

    pub async fn add_or_update_schema_mapping_item(
        &self,
        name: &str,
        key: &str,
        value: i64,
    ) -> MetaResult<()> {
        self.schema
            .add_or_update_schema_mapping_item(name, key, value)
            .await
    }

    pub fn get_schema_mapping(&self, name: &str) -> Option<HashMap<String, i64>> {
        self.schema.get_schema_mapping(name)
    }

    pub fn get_schema_mapping_item(&self, name: &str, key: &str) -> i64 {
        self.schema.get_schema_mapping_item(name, key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chronowave_common::config::MetaConfig;
    use chronowave_common::types::TIME_MAX;

    use super::*;
    use crate::model::{EngineKind, MetadataModel};
    use crate::storage::MemStore;

    async fn manager_on(
        store: Arc<MemStore>,
        port: u16,
    ) -> MetaManagerRef<MemStore> {
        let opts = MetaOpts {
            port,
            ..MetaOpts::test()
        };
        MetaManager::new_with_store(opts, store).await.unwrap()
    }

    fn engine_proposal(host: &str) -> StorageEngine {
        StorageEngine {
            id: 0,
            host: host.to_string(),
            port: 8086,
            kind: EngineKind::Memory,
            parameters: HashMap::new(),
            created_by: 0,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_single_node_bootstrap_no_engines() {
        // File backend selected by configuration, empty engine list.
        let dir = tempfile::tempdir().unwrap();
        let config = MetaConfig {
            meta_storage: "file".to_string(),
            file_data_path: dir.path().join("meta.json").display().to_string(),
            storage_engine_list: String::new(),
            ..MetaConfig::default()
        };
        let opts = MetaOpts::from_config(&config).unwrap();
        let backend = MetaStoreBackend::from_config(&config).unwrap();
        let manager = MetaManager::new(opts, backend).await.unwrap();

        assert_eq!(manager.storage_engine_count(), 0);
        assert!(manager.select_storage_engine_ids().is_empty());
        assert!(!manager.has_fragment());
        assert!(manager.get_user("root").is_some());
    }

    #[tokio::test]
    async fn test_engine_propagation_and_hooks() {
        let store = MemStore::shared();
        let manager_a = manager_on(store.clone(), 7001).await;
        let manager_b = manager_on(store.clone(), 7002).await;

        let hooks_a = Arc::new(AtomicUsize::new(0));
        let hooks_b = Arc::new(AtomicUsize::new(0));
        {
            let hooks_a = hooks_a.clone();
            manager_a.register_storage_engine_change_hook(Box::new(move |_| {
                hooks_a.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }));
            let hooks_b = hooks_b.clone();
            manager_b.register_storage_engine_change_hook(Box::new(move |_| {
                hooks_b.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }));
        }

        assert!(manager_a.add_storage_engines(vec![engine_proposal("db-0")]).await);
        settle().await;

        // The peer observes the engine; the writer's own hook stays silent.
        assert_eq!(manager_b.storage_engine_count(), 1);
        assert_eq!(hooks_b.load(Ordering::Relaxed), 1);
        assert_eq!(hooks_a.load(Ordering::Relaxed), 0);

        // Both nodes see each other.
        assert_eq!(manager_a.get_frontend_nodes().len(), 2);
        settle().await;
        assert_eq!(manager_b.get_frontend_nodes().len(), 2);
    }

    #[tokio::test]
    async fn test_replica_propagation_via_observer() {
        let store = MemStore::shared();
        let manager_a = manager_on(store.clone(), 7001).await;
        let manager_b = manager_on(store.clone(), 7002).await;

        // Bootstrap: A initializes, B adopts the layout.
        let units = vec![StorageUnit::new_master("fake-m", 1)];
        let fragments = vec![Fragment::new(
            TimeSeriesInterval::full(),
            TimeInterval::open_ended(0),
            "fake-m",
        )];
        assert!(
            manager_a
                .create_initial_fragments_and_storage_units(units.clone(), fragments.clone())
                .await
        );
        assert!(
            !manager_b
                .create_initial_fragments_and_storage_units(units, fragments)
                .await
        );
        assert!(manager_b.has_storage_unit());

        // A publishes a master, then a replica of it. B splices the replica
        // into the master's replica set; A's own cache never sees the echo.
        let node_a = manager_a.local_node_id();
        let mut master = StorageUnit::new_master("m-late", 1);
        master.created_by = node_a;
        master.insert(store.as_ref()).await.unwrap();
        settle().await;

        let mut replica = StorageUnit::new_replica("r-late", 2, "m-late");
        replica.created_by = node_a;
        replica.insert(store.as_ref()).await.unwrap();
        settle().await;

        let master_at_b = manager_b.get_storage_unit("m-late").unwrap();
        assert_eq!(master_at_b.replicas, vec!["r-late".to_string()]);
        // Echo suppression: the originator's cache was not mutated by the
        // observer path.
        assert!(manager_a.get_storage_unit("m-late").is_none());
    }

    #[tokio::test]
    async fn test_incremental_batch_propagates() {
        let store = MemStore::shared();
        let manager_a = manager_on(store.clone(), 7001).await;
        let manager_b = manager_on(store.clone(), 7002).await;

        let units = vec![StorageUnit::new_master("fake-m", 1)];
        let fragments = vec![Fragment::new(
            TimeSeriesInterval::full(),
            TimeInterval::open_ended(0),
            "fake-m",
        )];
        assert!(
            manager_a
                .create_initial_fragments_and_storage_units(units.clone(), fragments.clone())
                .await
        );
        assert!(
            !manager_b
                .create_initial_fragments_and_storage_units(units, fragments)
                .await
        );

        let new_units = vec![
            StorageUnit::new_master("fake-m2", 1),
            StorageUnit::new_replica("fake-r2", 2, "fake-m2"),
        ];
        let new_fragments = vec![Fragment::new(
            TimeSeriesInterval::full(),
            TimeInterval::open_ended(1000),
            "fake-m2",
        )];
        assert!(
            manager_a
                .create_fragments_and_storage_units(new_units, new_fragments)
                .await
        );
        settle().await;

        // B converges: the old open fragment is closed at the split point
        // and exactly one open fragment per series interval remains.
        let latest_b = manager_b.get_latest_fragment_map();
        assert_eq!(latest_b.len(), 1);
        assert_eq!(latest_b[0].1.time_interval.start, 1000);
        let all_b = manager_b.get_fragment_map_by_series_interval(&TimeSeriesInterval::full());
        let fragments_b = &all_b[0].1;
        assert_eq!(fragments_b.len(), 2);
        assert_eq!(fragments_b[0].time_interval.end, 1000);
        assert_eq!(fragments_b[1].time_interval.end, TIME_MAX);

        // The replica arrived with its master relationship intact.
        let units_b = manager_b.get_storage_units();
        let master = units_b
            .iter()
            .find(|u| u.is_master() && !u.initial)
            .unwrap();
        assert_eq!(master.replicas.len(), 1);
    }

    #[tokio::test]
    async fn test_user_propagation() {
        let store = MemStore::shared();
        let manager_a = manager_on(store.clone(), 7001).await;
        let manager_b = manager_on(store.clone(), 7002).await;

        manager_a
            .create_user(UserInfo {
                username: "analyst".to_string(),
                password: "secret".to_string(),
                kind: crate::model::UserKind::Normal,
                auths: HashSet::from([Auth::Read]),
            })
            .await
            .unwrap();
        settle().await;
        assert!(manager_b.get_user("analyst").is_some());

        manager_a.drop_user("analyst").await.unwrap();
        settle().await;
        assert!(manager_b.get_user("analyst").is_none());
    }
}
