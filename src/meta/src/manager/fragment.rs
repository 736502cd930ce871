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

use std::collections::HashMap;
use std::sync::Arc;

use thiserror_ext::AsReport;

use super::cache::MetaCache;
use super::env::MetaSrvEnv;
use super::id::{format_storage_unit_id, IdCategory};
use crate::model::{Fragment, MetadataModel, StorageUnit, StorageUnitId};
use crate::storage::{MetaStore, FRAGMENT_LOCK, STORAGE_UNIT_LOCK};
use crate::{MetaError, MetaResult};

pub type FragmentManagerRef<S> = Arc<FragmentManager<S>>;

/// [`FragmentManager`] creates fragment/storage-unit batches under the
/// cluster-wide advisory locks and applies remote fragment events.
///
/// Lock discipline: the fragment lock is always taken before the
/// storage-unit lock and released after it. Every path through this manager
/// that takes both locks follows that order.
pub struct FragmentManager<S: MetaStore> {
    env: MetaSrvEnv<S>,
    cache: Arc<MetaCache>,
}

impl<S: MetaStore> FragmentManager<S> {
    pub fn new(env: MetaSrvEnv<S>, cache: Arc<MetaCache>) -> Self {
        Self { env, cache }
    }

    /// One-shot cluster bootstrap: whichever front-end wins the lock race
    /// persists its proposal; every other participant loads the winner's
    /// layout and returns `false`.
    ///
    /// Proposals carry placeholder unit ids; the published batch gets real
    /// ids reserved from the store, with fragment references relinked
    /// through the translation table.
    pub async fn create_initial_fragments_and_storage_units(
        &self,
        units: Vec<StorageUnit>,
        fragments: Vec<Fragment>,
    ) -> bool {
        if self.cache.has_fragment() && self.cache.has_storage_unit() {
            return false;
        }
        if !self.acquire_locks().await {
            return false;
        }
        let result = self.create_initial_inner(units, fragments).await;
        self.release_locks().await;
        match result {
            Ok(initialized) => initialized,
            Err(err) => {
                tracing::warn!(error = %err.as_report(), "initial fragment bootstrap failed");
                false
            }
        }
    }

    async fn create_initial_inner(
        &self,
        units: Vec<StorageUnit>,
        fragments: Vec<Fragment>,
    ) -> MetaResult<bool> {
        // Re-check under the locks.
        if self.cache.has_fragment() && self.cache.has_storage_unit() {
            return Ok(false);
        }
        let store = self.env.meta_store();
        let existing_units = StorageUnit::list(store).await?;
        if !existing_units.is_empty() {
            // Another node won the race; adopt its layout. Units install
            // before the fragments that reference them.
            let existing_fragments = Fragment::list(store).await?;
            self.cache.init_storage_units(existing_units);
            self.cache.init_fragments(existing_fragments);
            return Ok(false);
        }

        let translation = self.publish_storage_units(units, true).await?;
        self.publish_fragments(fragments, &translation, true).await?;

        // Reload from the store so this cache holds exactly what peers
        // will observe.
        let loaded_units = StorageUnit::list(store).await?;
        let loaded_fragments = Fragment::list(store).await?;
        self.cache.init_storage_units(loaded_units);
        self.cache.init_fragments(loaded_fragments);
        Ok(true)
    }

    /// Incremental batch creation: closes every currently-latest fragment
    /// at the new batch's start time before the new fragments appear, so no
    /// reader ever sees two open fragments per series interval.
    pub async fn create_fragments_and_storage_units(
        &self,
        units: Vec<StorageUnit>,
        fragments: Vec<Fragment>,
    ) -> bool {
        if !(self.cache.has_fragment() && self.cache.has_storage_unit()) {
            tracing::warn!("incremental fragment creation before cluster bootstrap");
            return false;
        }
        if fragments.is_empty() {
            return false;
        }
        if !self.acquire_locks().await {
            return false;
        }
        let result = self.create_incremental_inner(units, fragments).await;
        self.release_locks().await;
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err.as_report(), "incremental fragment creation failed");
                false
            }
        }
    }

    async fn create_incremental_inner(
        &self,
        units: Vec<StorageUnit>,
        fragments: Vec<Fragment>,
    ) -> MetaResult<()> {
        let store = self.env.meta_store();
        let me = self.env.node_id();

        let translation = self.publish_storage_units(units, false).await?;
        // Unit creation is visible in cache strictly before any local
        // fragment references it; masters first so replica splicing always
        // finds its target.
        for unit in translation.values().filter(|u| u.is_master()) {
            self.cache.install_storage_unit(unit.clone());
        }
        for unit in translation.values().filter(|u| !u.is_master()) {
            self.cache.install_storage_unit(unit.clone());
        }

        let split_time = fragments
            .iter()
            .map(|f| f.time_interval.start)
            .min()
            .expect("checked non-empty");
        for (series, latest) in self.cache.get_latest_fragment_map() {
            if latest.time_interval.start >= split_time {
                tracing::error!(
                    series = %series,
                    start = latest.time_interval.start,
                    split_time,
                    "refusing to close an open fragment at or before its own start",
                );
                continue;
            }
            let mut closed = latest;
            closed.close(split_time, me);
            closed.insert(store).await?;
            self.cache.update_fragment(closed);
        }

        let published = self.publish_fragments(fragments, &translation, false).await?;
        for fragment in published {
            self.cache.add_fragment(fragment);
        }
        Ok(())
    }

    /// Publish unit proposals: every master gets a freshly reserved id (its
    /// self-reference follows), then its replicas get theirs with the
    /// master pointer resolved; the master is republished once its replica
    /// set is complete. Returns the placeholder-id translation table.
    async fn publish_storage_units(
        &self,
        proposals: Vec<StorageUnit>,
        initial: bool,
    ) -> MetaResult<HashMap<StorageUnitId, StorageUnit>> {
        let store = self.env.meta_store();
        let me = self.env.node_id();
        let (masters, replicas): (Vec<_>, Vec<_>) =
            proposals.into_iter().partition(|u| u.is_master());

        let mut translation: HashMap<StorageUnitId, StorageUnit> = HashMap::new();
        for proposal in masters {
            let placeholder = proposal.id.clone();
            let mut master = proposal;
            let id = self.reserve_unit_id().await?;
            master.id = id.clone();
            master.master_id = id;
            master.replicas = Vec::new();
            master.initial = initial;
            master.created_by = me;
            master.insert(store).await?;

            for replica_proposal in replicas.iter().filter(|r| r.master_id == placeholder) {
                let replica_placeholder = replica_proposal.id.clone();
                let mut replica = replica_proposal.clone();
                replica.id = self.reserve_unit_id().await?;
                replica.master_id = master.id.clone();
                replica.replicas = Vec::new();
                replica.initial = initial;
                replica.created_by = me;
                replica.insert(store).await?;
                master.replicas.push(replica.id.clone());
                translation.insert(replica_placeholder, replica);
            }
            if !master.replicas.is_empty() {
                master.insert(store).await?;
            }
            translation.insert(placeholder, master);
        }

        if let Some(orphan) = replicas.iter().find(|r| !translation.contains_key(&r.id)) {
            return Err(MetaError::invariant_violation(format!(
                "replica proposal {} references unknown master {}",
                orphan.id, orphan.master_id
            )));
        }
        Ok(translation)
    }

    /// Reserve a fresh cluster-unique storage-unit id without publishing
    /// content.
    pub async fn reserve_unit_id(&self) -> MetaResult<StorageUnitId> {
        let id = self
            .env
            .id_gen_manager()
            .generate::<{ IdCategory::StorageUnit }>()
            .await?;
        Ok(format_storage_unit_id(id))
    }

    /// Publish fragment proposals ascending by start time, relinking their
    /// unit references: a reference resolving to a replica is rewritten to
    /// that replica's master.
    async fn publish_fragments(
        &self,
        mut proposals: Vec<Fragment>,
        translation: &HashMap<StorageUnitId, StorageUnit>,
        initial: bool,
    ) -> MetaResult<Vec<Fragment>> {
        let store = self.env.meta_store();
        let me = self.env.node_id();
        proposals.sort_by_key(|f| f.time_interval.start);

        let mut published = Vec::with_capacity(proposals.len());
        for mut fragment in proposals {
            let reference = &fragment.master_storage_unit_id;
            let unit = match translation.get(reference) {
                Some(unit) => unit.clone(),
                // References to already-published units pass through.
                None => self.cache.get_storage_unit(reference).ok_or_else(|| {
                    MetaError::invariant_violation(format!(
                        "fragment references unknown storage unit {}",
                        reference
                    ))
                })?,
            };
            fragment.master_storage_unit_id = if unit.is_master() {
                unit.id.clone()
            } else {
                unit.master_id.clone()
            };
            fragment.created_by = me;
            fragment.updated_by = me;
            fragment.initial = initial;
            fragment.insert(store).await?;
            published.push(fragment);
        }
        Ok(published)
    }

    async fn acquire_locks(&self) -> bool {
        let store = self.env.meta_store();
        if let Err(err) = store.lock(FRAGMENT_LOCK).await {
            tracing::warn!(error = %err.as_report(), "failed to take fragment lock");
            return false;
        }
        if let Err(err) = store.lock(STORAGE_UNIT_LOCK).await {
            tracing::warn!(error = %err.as_report(), "failed to take storage-unit lock");
            if let Err(err) = store.unlock(FRAGMENT_LOCK).await {
                tracing::warn!(error = %err.as_report(), "failed to release fragment lock");
            }
            return false;
        }
        true
    }

    async fn release_locks(&self) {
        let store = self.env.meta_store();
        if let Err(err) = store.unlock(STORAGE_UNIT_LOCK).await {
            tracing::warn!(error = %err.as_report(), "failed to release storage-unit lock");
        }
        if let Err(err) = store.unlock(FRAGMENT_LOCK).await {
            tracing::warn!(error = %err.as_report(), "failed to release fragment lock");
        }
    }

    /// Apply a remote fragment event, mirroring the storage-unit filters:
    /// initial fragments only flow through the bootstrap load, pre-bootstrap
    /// caches wait for their initial load, and local echoes are dropped by
    /// creator (adds) or updater (updates) id.
    pub fn apply_fragment_event(&self, fragment: Fragment, is_create: bool) {
        if fragment.initial {
            return;
        }
        if !self.cache.has_fragment() {
            return;
        }
        let me = self.env.node_id();
        if is_create && fragment.created_by == me {
            return;
        }
        if !is_create && fragment.updated_by == me {
            return;
        }
        if self
            .cache
            .get_storage_unit(&fragment.master_storage_unit_id)
            .is_none()
        {
            tracing::error!(
                unit = %fragment.master_storage_unit_id,
                "fragment event references a storage unit absent from cache",
            );
        }
        if is_create {
            self.cache.add_fragment(fragment);
        } else {
            self.cache.update_fragment(fragment);
        }
    }
}

#[cfg(test)]
mod tests {
    use chronowave_common::types::{TimeInterval, TimeSeriesInterval, TIME_MAX};

    use super::*;
    use crate::manager::env::MetaOpts;
    use crate::storage::MemStore;

    fn test_proposals() -> (Vec<StorageUnit>, Vec<Fragment>) {
        let units = vec![
            StorageUnit::new_master("fake-m0", 1),
            StorageUnit::new_replica("fake-r0", 2, "fake-m0"),
            StorageUnit::new_master("fake-m1", 2),
        ];
        let fragments = vec![
            Fragment::new(
                TimeSeriesInterval::bounded(None, Some("m".into())),
                TimeInterval::open_ended(0),
                "fake-m0",
            ),
            Fragment::new(
                TimeSeriesInterval::bounded(Some("m".into()), None),
                TimeInterval::open_ended(0),
                // Referencing a replica resolves to its master.
                "fake-r0",
            ),
        ];
        (units, fragments)
    }

    async fn manager_on(store: Arc<MemStore>, port: u16) -> FragmentManager<MemStore> {
        let opts = MetaOpts {
            port,
            ..MetaOpts::test()
        };
        let env = MetaSrvEnv::new(opts, store).await.unwrap();
        let cache = Arc::new(MetaCache::default());
        let cluster = super::super::cluster::ClusterManager::new(env.clone(), cache.clone());
        cluster.register().await.unwrap();
        FragmentManager::new(env, cache)
    }

    #[tokio::test]
    async fn test_initial_bootstrap() {
        let store = MemStore::shared();
        let manager = manager_on(store, 7001).await;
        let (units, fragments) = test_proposals();

        assert!(
            manager
                .create_initial_fragments_and_storage_units(units.clone(), fragments.clone())
                .await
        );
        assert!(manager.cache.has_fragment());
        assert!(manager.cache.has_storage_unit());

        let cached_units = manager.cache.get_storage_units();
        assert_eq!(cached_units.len(), 3);
        // Placeholder ids were rewritten.
        assert!(cached_units.iter().all(|u| u.id.starts_with("unit")));
        assert!(cached_units.iter().all(|u| u.initial));
        let master_of_replica = cached_units
            .iter()
            .find(|u| !u.is_master())
            .map(|r| r.master_id.clone())
            .unwrap();
        let master = cached_units
            .iter()
            .find(|u| u.id == master_of_replica)
            .unwrap();
        assert_eq!(master.replicas.len(), 1);

        let latest = manager.cache.get_latest_fragment_map();
        assert_eq!(latest.len(), 2);
        // The fragment that referenced the replica points at the master.
        assert!(latest.iter().all(|(_, f)| f.master_storage_unit_id == master_of_replica
            || manager
                .cache
                .get_storage_unit(&f.master_storage_unit_id)
                .unwrap()
                .is_master()));

        // A second call takes the fast path.
        let (units, fragments) = test_proposals();
        assert!(
            !manager
                .create_initial_fragments_and_storage_units(units, fragments)
                .await
        );
    }

    #[tokio::test]
    async fn test_initial_bootstrap_race() {
        let store = MemStore::shared();
        let manager_a = manager_on(store.clone(), 7001).await;
        let manager_b = manager_on(store.clone(), 7002).await;

        let (units_a, fragments_a) = test_proposals();
        let (mut units_b, fragments_b) = test_proposals();
        // Disjoint proposal content for the loser.
        for unit in &mut units_b {
            unit.engine_id += 10;
        }

        let (won_a, won_b) = tokio::join!(
            manager_a.create_initial_fragments_and_storage_units(units_a, fragments_a),
            manager_b.create_initial_fragments_and_storage_units(units_b, fragments_b),
        );
        assert!(won_a ^ won_b, "exactly one initializer must win");

        // Both caches converge to the winner's layout.
        let mut units_a: Vec<_> = manager_a.cache.get_storage_units();
        let mut units_b: Vec<_> = manager_b.cache.get_storage_units();
        units_a.sort_by(|a, b| a.id.cmp(&b.id));
        units_b.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(units_a, units_b);
        assert_eq!(
            manager_a.cache.get_latest_fragment_map(),
            manager_b.cache.get_latest_fragment_map()
        );
    }

    #[tokio::test]
    async fn test_incremental_creation_closes_latest() {
        let store = MemStore::shared();
        let manager = manager_on(store, 7001).await;
        let (units, fragments) = test_proposals();
        assert!(
            manager
                .create_initial_fragments_and_storage_units(units, fragments)
                .await
        );

        let new_units = vec![StorageUnit::new_master("fake-m2", 3)];
        let new_fragments = vec![
            Fragment::new(
                TimeSeriesInterval::bounded(None, Some("m".into())),
                TimeInterval::open_ended(100),
                "fake-m2",
            ),
            Fragment::new(
                TimeSeriesInterval::bounded(Some("m".into()), None),
                TimeInterval::open_ended(100),
                "fake-m2",
            ),
        ];
        assert!(
            manager
                .create_fragments_and_storage_units(new_units, new_fragments)
                .await
        );

        // One open fragment per series interval, all starting at the split.
        let latest = manager.cache.get_latest_fragment_map();
        assert_eq!(latest.len(), 2);
        assert!(latest.iter().all(|(_, f)| f.time_interval.start == 100));

        // The previous generation is closed at exactly the split point.
        let all = manager
            .cache
            .get_fragment_map_by_series_interval(&TimeSeriesInterval::full());
        for (_, fragments) in all {
            assert_eq!(fragments.len(), 2);
            assert_eq!(fragments[0].time_interval.end, 100);
            assert_eq!(fragments[1].time_interval.end, TIME_MAX);
        }
    }

    #[tokio::test]
    async fn test_incremental_requires_bootstrap() {
        let store = MemStore::shared();
        let manager = manager_on(store, 7001).await;
        let (units, fragments) = test_proposals();
        assert!(
            !manager
                .create_fragments_and_storage_units(units, fragments)
                .await
        );
    }

    #[tokio::test]
    async fn test_fragment_event_filters() {
        let store = MemStore::shared();
        let manager = manager_on(store, 7001).await;
        manager.cache.init_storage_units(vec![]);
        manager.cache.init_fragments(vec![]);

        let me = manager.env.node_id();
        let mut remote = Fragment::new(
            TimeSeriesInterval::new("a", "m"),
            TimeInterval::open_ended(0),
            "unit-x",
        );
        remote.created_by = me + 1;
        remote.updated_by = me + 1;

        // Initial-flagged fragments only flow through the bootstrap load.
        let mut initial = remote.clone();
        initial.initial = true;
        manager.apply_fragment_event(initial, true);
        assert!(manager.cache.get_latest_fragment_map().is_empty());

        // Local echo by creator.
        let mut own = remote.clone();
        own.created_by = me;
        manager.apply_fragment_event(own, true);
        assert!(manager.cache.get_latest_fragment_map().is_empty());

        manager.apply_fragment_event(remote.clone(), true);
        assert_eq!(manager.cache.get_latest_fragment_map().len(), 1);

        // Local echo by updater.
        let mut own_update = remote.clone();
        own_update.updated_by = me;
        own_update.time_interval.end = 50;
        manager.apply_fragment_event(own_update, false);
        assert_eq!(manager.cache.get_latest_fragment_map().len(), 1);

        // Remote update closes the fragment.
        remote.time_interval.end = 50;
        manager.apply_fragment_event(remote, false);
        assert!(manager.cache.get_latest_fragment_map().is_empty());
    }
}
