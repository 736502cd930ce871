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

use std::collections::{BTreeMap, HashMap};

use chronowave_common::types::{TimeInterval, TimeSeriesInterval};
use parking_lot::RwLock;

use crate::model::{
    EngineId, FragmentKey, FrontendNode, NodeId, StorageEngine, StorageUnit, StorageUnitId,
    UserInfo,
};
use crate::model::Fragment;

/// The in-memory index of cluster state. Exclusively owns the mutable view
/// of every entity; everything else holds ids and resolves them here.
///
/// Thread-safe: each logical index serializes through its own
/// reader-writer lock, giving read consistency per method call. No lock is
/// ever held across a suspension point, so observer tasks may mutate the
/// cache freely.
#[derive(Default)]
pub struct MetaCache {
    nodes: RwLock<HashMap<NodeId, FrontendNode>>,
    engines: RwLock<HashMap<EngineId, StorageEngine>>,
    units: RwLock<StorageUnitIndex>,
    fragments: RwLock<FragmentIndex>,
    schema_mappings: RwLock<HashMap<String, HashMap<String, i64>>>,
    users: RwLock<HashMap<String, UserInfo>>,
}

#[derive(Default)]
struct StorageUnitIndex {
    units: HashMap<StorageUnitId, StorageUnit>,
    by_engine: HashMap<EngineId, Vec<StorageUnitId>>,
    initialized: bool,
}

#[derive(Default)]
struct FragmentIndex {
    /// Series intervals in insertion order, each with its fragments sorted
    /// by start time ascending.
    series: Vec<(TimeSeriesInterval, Vec<Fragment>)>,
    /// The open-ended fragment per series interval.
    latest: BTreeMap<TimeSeriesInterval, Fragment>,
    initialized: bool,
}

// Front-end nodes.
impl MetaCache {
    pub fn add_frontend_node(&self, node: FrontendNode) {
        self.nodes.write().insert(node.id, node);
    }

    pub fn remove_frontend_node(&self, id: NodeId) {
        self.nodes.write().remove(&id);
    }

    pub fn get_frontend_nodes(&self) -> Vec<FrontendNode> {
        self.nodes.read().values().cloned().collect()
    }
}

// Storage engines.
impl MetaCache {
    pub fn add_storage_engine(&self, engine: StorageEngine) {
        self.engines.write().insert(engine.id, engine);
    }

    pub fn get_storage_engine(&self, id: EngineId) -> Option<StorageEngine> {
        self.engines.read().get(&id).cloned()
    }

    pub fn get_storage_engines(&self) -> Vec<StorageEngine> {
        self.engines.read().values().cloned().collect()
    }

    pub fn storage_engine_count(&self) -> usize {
        self.engines.read().len()
    }

    pub fn has_storage_engine_endpoint(&self, host: &str, port: u16) -> bool {
        self.engines
            .read()
            .values()
            .any(|e| e.host == host && e.port == port)
    }
}

// Storage units.
impl MetaCache {
    /// Install or update one storage unit, keeping the master/replica links
    /// and the per-engine back-pointers consistent. Handles out-of-order
    /// arrival of replicas before their master.
    pub fn install_storage_unit(&self, unit: StorageUnit) {
        let mut index = self.units.write();
        index.install(unit);
    }

    pub fn get_storage_unit(&self, id: &str) -> Option<StorageUnit> {
        self.units.read().units.get(id).cloned()
    }

    pub fn get_storage_units(&self) -> Vec<StorageUnit> {
        self.units.read().units.values().cloned().collect()
    }

    pub fn get_storage_units_by_engine(&self, engine_id: EngineId) -> Vec<StorageUnit> {
        let index = self.units.read();
        index
            .by_engine
            .get(&engine_id)
            .into_iter()
            .flatten()
            .filter_map(|id| index.units.get(id))
            .cloned()
            .collect()
    }

    /// Bulk install of the bootstrap snapshot. Idempotent: once the unit
    /// view is initialized, further calls are no-ops.
    pub fn init_storage_units(&self, units: Vec<StorageUnit>) {
        let mut index = self.units.write();
        if index.initialized {
            return;
        }
        for unit in units {
            index.install(unit);
        }
        index.initialized = true;
    }

    /// Whether the storage-unit view finished bootstrap.
    pub fn has_storage_unit(&self) -> bool {
        self.units.read().initialized
    }
}

impl StorageUnitIndex {
    fn install(&mut self, mut unit: StorageUnit) {
        match self.units.get(&unit.id).cloned() {
            None => {
                if unit.is_master() {
                    // Replicas that arrived ahead of their master are
                    // spliced in now.
                    let stragglers: Vec<_> = self
                        .units
                        .values()
                        .filter(|u| !u.is_master() && u.master_id == unit.id)
                        .map(|u| u.id.clone())
                        .collect();
                    for id in stragglers {
                        if !unit.replicas.contains(&id) {
                            unit.replicas.push(id);
                        }
                    }
                } else {
                    match self.units.get_mut(&unit.master_id) {
                        Some(master) => {
                            if !master.replicas.contains(&unit.id) {
                                master.replicas.push(unit.id.clone());
                            }
                        }
                        None => tracing::error!(
                            replica = %unit.id,
                            master = %unit.master_id,
                            "cache consistency error: replica references a master absent from cache",
                        ),
                    }
                }
                self.by_engine
                    .entry(unit.engine_id)
                    .or_default()
                    .push(unit.id.clone());
                self.units.insert(unit.id.clone(), unit);
            }
            Some(prev) => {
                if unit.is_master() {
                    // An updated master keeps the replica set accumulated
                    // in the cache.
                    unit.replicas = prev.replicas.clone();
                } else {
                    if prev.master_id != unit.master_id {
                        if let Some(old_master) = self.units.get_mut(&prev.master_id) {
                            old_master.replicas.retain(|id| id != &unit.id);
                        }
                    }
                    match self.units.get_mut(&unit.master_id) {
                        Some(master) => {
                            if !master.replicas.contains(&unit.id) {
                                master.replicas.push(unit.id.clone());
                            }
                        }
                        None => tracing::error!(
                            replica = %unit.id,
                            master = %unit.master_id,
                            "cache consistency error: replica references a master absent from cache",
                        ),
                    }
                }
                if prev.engine_id != unit.engine_id {
                    if let Some(ids) = self.by_engine.get_mut(&prev.engine_id) {
                        ids.retain(|id| id != &unit.id);
                    }
                    self.by_engine
                        .entry(unit.engine_id)
                        .or_default()
                        .push(unit.id.clone());
                }
                self.units.insert(unit.id.clone(), unit);
            }
        }
    }
}

// Fragments.
impl MetaCache {
    pub fn add_fragment(&self, fragment: Fragment) {
        self.fragments.write().install(fragment, false);
    }

    pub fn update_fragment(&self, fragment: Fragment) {
        self.fragments.write().install(fragment, true);
    }

    pub fn contains_fragment(&self, key: &FragmentKey) -> bool {
        self.fragments
            .read()
            .series
            .iter()
            .find(|(iv, _)| iv == &key.series_interval)
            .map(|(_, list)| {
                list.binary_search_by_key(&key.start_time, |f| f.time_interval.start)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    /// Bulk install of the bootstrap snapshot. Idempotent like
    /// [`MetaCache::init_storage_units`].
    pub fn init_fragments(&self, mut fragments: Vec<Fragment>) {
        let mut index = self.fragments.write();
        if index.initialized {
            return;
        }
        fragments.sort_by(|a, b| {
            a.series_interval
                .cmp(&b.series_interval)
                .then_with(|| a.time_interval.start.cmp(&b.time_interval.start))
        });
        for fragment in fragments {
            index.install(fragment, false);
        }
        index.initialized = true;
    }

    /// Whether the fragment view finished bootstrap.
    pub fn has_fragment(&self) -> bool {
        self.fragments.read().initialized
    }

    /// All fragments whose series interval overlaps `series`, grouped by
    /// series interval in insertion order.
    pub fn get_fragment_map_by_series_interval(
        &self,
        series: &TimeSeriesInterval,
    ) -> Vec<(TimeSeriesInterval, Vec<Fragment>)> {
        self.fragments
            .read()
            .series
            .iter()
            .filter(|(iv, _)| iv.overlaps(series))
            .cloned()
            .collect()
    }

    /// As [`Self::get_fragment_map_by_series_interval`], additionally
    /// filtered by time overlap. Groups with no surviving fragment are
    /// dropped.
    pub fn get_fragment_map_by_series_and_time_interval(
        &self,
        series: &TimeSeriesInterval,
        time: &TimeInterval,
    ) -> Vec<(TimeSeriesInterval, Vec<Fragment>)> {
        self.fragments
            .read()
            .series
            .iter()
            .filter(|(iv, _)| iv.overlaps(series))
            .filter_map(|(iv, fragments)| {
                let fragments: Vec<_> = fragments
                    .iter()
                    .filter(|f| f.time_interval.overlaps(time))
                    .cloned()
                    .collect();
                (!fragments.is_empty()).then(|| (iv.clone(), fragments))
            })
            .collect()
    }

    /// The open-ended fragment per series interval, ordered by series
    /// interval.
    pub fn get_latest_fragment_map(&self) -> Vec<(TimeSeriesInterval, Fragment)> {
        self.fragments
            .read()
            .latest
            .iter()
            .map(|(iv, f)| (iv.clone(), f.clone()))
            .collect()
    }

    pub fn get_latest_fragment_map_by_series_interval(
        &self,
        series: &TimeSeriesInterval,
    ) -> Vec<(TimeSeriesInterval, Fragment)> {
        self.fragments
            .read()
            .latest
            .iter()
            .filter(|(iv, _)| iv.overlaps(series))
            .map(|(iv, f)| (iv.clone(), f.clone()))
            .collect()
    }

    /// Fragments covering one series name, ordered by start time within
    /// each covering series interval.
    pub fn get_fragments_by_series_name(&self, series: &str) -> Vec<Fragment> {
        self.fragments
            .read()
            .series
            .iter()
            .filter(|(iv, _)| iv.contains(series))
            .flat_map(|(_, fragments)| fragments.iter().cloned())
            .collect()
    }

    pub fn get_fragments_by_series_name_and_time_interval(
        &self,
        series: &str,
        time: &TimeInterval,
    ) -> Vec<Fragment> {
        self.fragments
            .read()
            .series
            .iter()
            .filter(|(iv, _)| iv.contains(series))
            .flat_map(|(_, fragments)| {
                fragments
                    .iter()
                    .filter(|f| f.time_interval.overlaps(time))
                    .cloned()
            })
            .collect()
    }
}

impl FragmentIndex {
    fn install(&mut self, fragment: Fragment, expect_existing: bool) {
        let series = fragment.series_interval.clone();
        let pos = match self.series.iter().position(|(iv, _)| iv == &series) {
            Some(pos) => pos,
            None => {
                self.series.push((series.clone(), Vec::new()));
                self.series.len() - 1
            }
        };
        let entry = &mut self.series[pos].1;
        match entry.binary_search_by_key(&fragment.time_interval.start, |f| f.time_interval.start)
        {
            Ok(pos) => {
                if !expect_existing {
                    tracing::error!(
                        series = %series,
                        start = fragment.time_interval.start,
                        "cache consistency error: two fragments share a start time",
                    );
                }
                entry[pos] = fragment.clone();
            }
            Err(pos) => {
                if expect_existing {
                    tracing::warn!(
                        series = %series,
                        start = fragment.time_interval.start,
                        "updated fragment was absent from cache, installing",
                    );
                }
                entry.insert(pos, fragment.clone());
            }
        }

        if fragment.is_open_ended() {
            if let Some(prev) = self.latest.get(&series) {
                if prev.time_interval.start != fragment.time_interval.start {
                    tracing::error!(
                        series = %series,
                        "cache consistency error: two open fragments for one series interval",
                    );
                }
            }
            self.latest.insert(series, fragment);
        } else if let Some(prev) = self.latest.get(&series) {
            if prev.time_interval.start == fragment.time_interval.start {
                // The open fragment was closed.
                self.latest.remove(&series);
            }
        }
    }
}

// Schema mappings.
impl MetaCache {
    pub fn add_or_update_schema_mapping(&self, name: &str, mapping: HashMap<String, i64>) {
        self.schema_mappings
            .write()
            .insert(name.to_string(), mapping);
    }

    pub fn remove_schema_mapping(&self, name: &str) {
        self.schema_mappings.write().remove(name);
    }

    pub fn get_schema_mapping(&self, name: &str) -> Option<HashMap<String, i64>> {
        self.schema_mappings.read().get(name).cloned()
    }
}

// Users.
impl MetaCache {
    pub fn install_user(&self, user: UserInfo) {
        self.users.write().insert(user.username.clone(), user);
    }

    pub fn remove_user(&self, username: &str) {
        self.users.write().remove(username);
    }

    pub fn get_user(&self, username: &str) -> Option<UserInfo> {
        self.users.read().get(username).cloned()
    }

    pub fn list_users(&self) -> Vec<UserInfo> {
        self.users.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use chronowave_common::types::TIME_MAX;

    use super::*;

    fn fragment(series: (&str, &str), start: i64, end: i64, unit: &str) -> Fragment {
        Fragment::new(
            TimeSeriesInterval::new(series.0, series.1),
            TimeInterval::new(start, end),
            unit,
        )
    }

    #[test]
    fn test_fragment_index_ordering() {
        let cache = MetaCache::default();
        cache.init_fragments(vec![]);

        // Out-of-order inserts end up sorted by start time.
        cache.add_fragment(fragment(("a", "m"), 100, 200, "u1"));
        cache.add_fragment(fragment(("a", "m"), 0, 100, "u0"));
        cache.add_fragment(Fragment::new(
            TimeSeriesInterval::new("a", "m"),
            TimeInterval::open_ended(200),
            "u2",
        ));
        cache.add_fragment(fragment(("m", "z"), 0, TIME_MAX, "u3"));

        let groups =
            cache.get_fragment_map_by_series_interval(&TimeSeriesInterval::full());
        assert_eq!(groups.len(), 2);
        // Insertion order of series intervals is preserved.
        assert_eq!(groups[0].0, TimeSeriesInterval::new("a", "m"));
        let starts: Vec<_> = groups[0].1.iter().map(|f| f.time_interval.start).collect();
        assert_eq!(starts, vec![0, 100, 200]);

        let latest = cache.get_latest_fragment_map();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].1.time_interval.start, 200);
    }

    #[test]
    fn test_fragment_time_filter_and_series_lookup() {
        let cache = MetaCache::default();
        cache.init_fragments(vec![
            fragment(("a", "m"), 0, 100, "u0"),
            fragment(("a", "m"), 100, 200, "u1"),
            fragment(("m", "z"), 0, 200, "u2"),
        ]);

        let groups = cache.get_fragment_map_by_series_and_time_interval(
            &TimeSeriesInterval::new("a", "b"),
            &TimeInterval::new(120, 130),
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 1);
        assert_eq!(groups[0].1[0].master_storage_unit_id, "u1");

        let by_name = cache.get_fragments_by_series_name("n.temp");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].master_storage_unit_id, "u2");

        let by_name_time = cache
            .get_fragments_by_series_name_and_time_interval("alpha", &TimeInterval::new(0, 50));
        assert_eq!(by_name_time.len(), 1);
        assert_eq!(by_name_time[0].master_storage_unit_id, "u0");
    }

    #[test]
    fn test_close_fragment_updates_latest() {
        let cache = MetaCache::default();
        let mut open = Fragment::new(
            TimeSeriesInterval::new("a", "m"),
            TimeInterval::open_ended(0),
            "u0",
        );
        cache.init_fragments(vec![open.clone()]);
        assert_eq!(cache.get_latest_fragment_map().len(), 1);

        open.close(500, 1);
        cache.update_fragment(open);
        assert!(cache.get_latest_fragment_map().is_empty());
        // The closed fragment is still indexed.
        assert_eq!(
            cache
                .get_fragments_by_series_name_and_time_interval("b", &TimeInterval::new(0, 1000))
                .len(),
            1
        );
    }

    #[test]
    fn test_init_is_idempotent() {
        let cache = MetaCache::default();
        assert!(!cache.has_fragment());
        cache.init_fragments(vec![fragment(("a", "m"), 0, 100, "u0")]);
        assert!(cache.has_fragment());
        // A second bulk install is a no-op.
        cache.init_fragments(vec![fragment(("m", "z"), 0, 100, "u1")]);
        assert_eq!(
            cache
                .get_fragment_map_by_series_interval(&TimeSeriesInterval::full())
                .len(),
            1
        );

        assert!(!cache.has_storage_unit());
        cache.init_storage_units(vec![StorageUnit::new_master("u0", 1)]);
        cache.init_storage_units(vec![StorageUnit::new_master("u1", 1)]);
        assert!(cache.has_storage_unit());
        assert!(cache.get_storage_unit("u1").is_none());
    }

    #[test]
    fn test_unit_replica_splice() {
        let cache = MetaCache::default();
        cache.init_storage_units(vec![StorageUnit::new_master("m1", 1)]);

        cache.install_storage_unit(StorageUnit::new_replica("r1", 2, "m1"));
        assert_eq!(
            cache.get_storage_unit("m1").unwrap().replicas,
            vec!["r1".to_string()]
        );

        // An updated master keeps the cached replica set.
        let mut master = StorageUnit::new_master("m1", 1);
        master.created_by = 9;
        cache.install_storage_unit(master);
        assert_eq!(
            cache.get_storage_unit("m1").unwrap().replicas,
            vec!["r1".to_string()]
        );
        assert_eq!(cache.get_storage_unit("m1").unwrap().created_by, 9);

        // Replica arriving before its master is spliced when it shows up.
        cache.install_storage_unit(StorageUnit::new_replica("r2", 2, "m2"));
        cache.install_storage_unit(StorageUnit::new_master("m2", 3));
        assert_eq!(
            cache.get_storage_unit("m2").unwrap().replicas,
            vec!["r2".to_string()]
        );

        assert_eq!(cache.get_storage_units_by_engine(2).len(), 2);
    }
}
