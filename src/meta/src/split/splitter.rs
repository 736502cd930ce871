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
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chronowave_common::types::{TimeInterval, TimeSeriesInterval, Timestamp};
use itertools::Itertools;
use parking_lot::RwLock;
use thiserror_ext::AsReport;

use super::downsample::split_downsample_intervals_from;
use super::plan::{LogicalPlan, PlanKind, SplitInfo};
use crate::manager::MetaManagerRef;
use crate::model::{Fragment, StorageUnit, StorageUnitId};
use crate::storage::{MetaStore, DEFAULT_COLUMN_FAMILY};

/// Pluggable synthesis of fragment/storage-unit layouts for regions no
/// fragment covers yet.
pub trait FragmentGenerator: Send + Sync {
    /// Layout for the first write the cluster ever sees. Proposals carry
    /// placeholder unit ids; the fragment manager assigns real ones.
    fn generate_initial(&self, paths: &[String]) -> (Vec<StorageUnit>, Vec<Fragment>);

    /// Rebalanced layer of up to `count` fragments opening at `start_time`,
    /// with series split points chosen from the observed prefix weights.
    fn generate_rebalance(
        &self,
        prefixes: &[(String, f64)],
        count: usize,
        start_time: Timestamp,
    ) -> (Vec<StorageUnit>, Vec<Fragment>);
}

/// Default generator: carves the series space at path (or hot-prefix)
/// boundaries and places each range's master and replicas on a rotation of
/// the sampled storage engines.
pub struct DefaultFragmentGenerator<S: MetaStore> {
    manager: MetaManagerRef<S>,
}

impl<S: MetaStore> DefaultFragmentGenerator<S> {
    pub fn new(manager: MetaManagerRef<S>) -> Self {
        Self { manager }
    }

    fn layout(
        &self,
        interior: Vec<String>,
        start_time: Timestamp,
    ) -> (Vec<StorageUnit>, Vec<Fragment>) {
        let engine_ids = self.manager.select_storage_engine_ids();
        if engine_ids.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let replica_count = engine_ids.len() - 1;

        let mut bounds: Vec<Option<String>> = Vec::with_capacity(interior.len() + 2);
        bounds.push(None);
        bounds.extend(interior.into_iter().map(Some));
        bounds.push(None);

        let mut units = Vec::new();
        let mut fragments = Vec::new();
        for (j, window) in bounds.windows(2).enumerate() {
            let master_id = format!("fake.unit.{}", j);
            units.push(StorageUnit::new_master(
                master_id.clone(),
                engine_ids[j % engine_ids.len()],
            ));
            for k in 1..=replica_count {
                units.push(StorageUnit::new_replica(
                    format!("fake.unit.{}.{}", j, k),
                    engine_ids[(j + k) % engine_ids.len()],
                    master_id.clone(),
                ));
            }
            fragments.push(Fragment::new(
                TimeSeriesInterval::bounded(window[0].clone(), window[1].clone()),
                TimeInterval::open_ended(start_time),
                master_id,
            ));
        }
        (units, fragments)
    }
}

impl<S: MetaStore> FragmentGenerator for DefaultFragmentGenerator<S> {
    fn generate_initial(&self, paths: &[String]) -> (Vec<StorageUnit>, Vec<Fragment>) {
        // Bound the initial layout by the engine count, sampling the
        // addressed paths evenly as split points.
        let max_points = self.manager.storage_engine_count().max(1);
        let interior: Vec<String> = if paths.len() <= max_points {
            paths.to_vec()
        } else {
            let step = paths.len() / max_points;
            paths.iter().step_by(step).take(max_points).cloned().collect()
        };
        self.layout(interior, 0)
    }

    fn generate_rebalance(
        &self,
        prefixes: &[(String, f64)],
        count: usize,
        start_time: Timestamp,
    ) -> (Vec<StorageUnit>, Vec<Fragment>) {
        let interior: Vec<String> = prefixes
            .iter()
            .sorted_by(|a, b| b.1.total_cmp(&a.1))
            .take(count.saturating_sub(1))
            .map(|(prefix, _)| prefix.clone())
            .sorted()
            .dedup()
            .collect();
        self.layout(interior, start_time)
    }
}

/// Sliding series-prefix frequency table. Recording happens under the read
/// path of plan splitting; the flush swaps the table out and grows the
/// threshold by its initial value.
struct PrefixStats {
    table: RwLock<HashMap<String, f64>>,
    threshold: AtomicUsize,
    increment: usize,
}

impl PrefixStats {
    fn new(threshold: usize) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            threshold: AtomicUsize::new(threshold),
            increment: threshold,
        }
    }

    /// Record one plan's paths, each weighted by `1 / |paths|`. Returns the
    /// drained table when the flush threshold is reached.
    fn record(&self, paths: &[String]) -> Option<Vec<(String, f64)>> {
        if paths.is_empty() {
            return None;
        }
        let weight = 1.0 / paths.len() as f64;
        let mut table = self.table.write();
        for path in paths {
            *table.entry(prefix_of(path)).or_insert(0.0) += weight;
        }
        if table.len() >= self.threshold.load(Ordering::Relaxed) {
            self.threshold.fetch_add(self.increment, Ordering::Relaxed);
            return Some(table.drain().collect());
        }
        None
    }
}

/// The series namespace prefix a path is accounted under: everything up to
/// its last segment.
fn prefix_of(path: &str) -> String {
    match path.rsplit_once('.') {
        Some((prefix, _)) => prefix.to_string(),
        None => path.to_string(),
    }
}

/// [`PlanSplitter`] maps a logical plan onto the (fragment, storage unit)
/// targets owning the addressed (series, time) region, bootstrapping the
/// initial layout for the first write and triggering rebalancing from the
/// observed workload.
pub struct PlanSplitter<S: MetaStore> {
    manager: MetaManagerRef<S>,
    generator: Box<dyn FragmentGenerator>,
    stats: PrefixStats,
    /// Raised by the first statistics flush; consumed by the next write
    /// plan that observes an existing fragment map.
    needs_rebalance: AtomicBool,
    flushed_once: AtomicBool,
    /// Latest flushed statistics, feeding rebalance split points.
    flushed: RwLock<Vec<(String, f64)>>,
}

impl<S: MetaStore> PlanSplitter<S> {
    pub fn new(manager: MetaManagerRef<S>, generator: Box<dyn FragmentGenerator>) -> Self {
        let threshold = manager.opts().prefix_flush_threshold;
        Self {
            manager,
            generator,
            stats: PrefixStats::new(threshold),
            needs_rebalance: AtomicBool::new(false),
            flushed_once: AtomicBool::new(false),
            flushed: RwLock::new(Vec::new()),
        }
    }

    pub fn with_default_generator(manager: MetaManagerRef<S>) -> Self {
        let generator = Box::new(DefaultFragmentGenerator::new(manager.clone()));
        Self::new(manager, generator)
    }

    /// Split `plan` into one [`SplitInfo`] per addressed (fragment,
    /// storage unit) pair. Read plans address masters only; write plans the
    /// master plus all replicas.
    pub async fn split(&self, plan: &LogicalPlan) -> Vec<SplitInfo> {
        if let Some(snapshot) = self.stats.record(&plan.paths) {
            self.flush_statistics(snapshot).await;
        }
        let Some(series) = plan.series_interval() else {
            return Vec::new();
        };
        let time = plan.time_interval_or_full();

        let mut groups = self.lookup(plan, &series, &time);
        if plan.kind.is_write()
            && !groups.is_empty()
            && self.needs_rebalance.swap(false, Ordering::Relaxed)
        {
            self.reallocate(time.end).await;
            groups = self.lookup(plan, &series, &time);
        }
        if groups.is_empty() && plan.kind.is_write() {
            let (units, fragments) = self.generator.generate_initial(&plan.paths);
            if units.is_empty() {
                tracing::warn!("no storage engines available to lay out initial fragments");
                return Vec::new();
            }
            // Either this node initializes the cluster or it adopts the
            // winner's layout; both end with a populated cache.
            self.manager
                .create_initial_fragments_and_storage_units(units, fragments)
                .await;
            groups = self.lookup(plan, &series, &time);
        }

        match plan.kind {
            PlanKind::Downsample(_) => self.split_downsample(plan, groups),
            _ => self.split_plain(plan, groups, &time),
        }
    }

    fn lookup(
        &self,
        plan: &LogicalPlan,
        series: &TimeSeriesInterval,
        time: &TimeInterval,
    ) -> Vec<(TimeSeriesInterval, Vec<Fragment>)> {
        if plan.time_interval.is_some() {
            self.manager
                .get_fragment_map_by_series_and_time_interval(series, time)
        } else {
            self.manager.get_fragment_map_by_series_interval(series)
        }
    }

    fn split_plain(
        &self,
        plan: &LogicalPlan,
        groups: Vec<(TimeSeriesInterval, Vec<Fragment>)>,
        time: &TimeInterval,
    ) -> Vec<SplitInfo> {
        let mut infos = Vec::new();
        for (series_interval, fragments) in groups {
            for fragment in fragments {
                let Some(clipped) = fragment.time_interval.intersect(time) else {
                    continue;
                };
                for unit in self.target_units(&fragment, plan.kind.is_write()) {
                    infos.push(SplitInfo::new(
                        clipped,
                        series_interval.clone(),
                        unit,
                        plan.kind,
                    ));
                }
            }
        }
        infos
    }

    fn split_downsample(
        &self,
        plan: &LogicalPlan,
        groups: Vec<(TimeSeriesInterval, Vec<Fragment>)>,
    ) -> Vec<SplitInfo> {
        let time = plan.time_interval_or_full();
        let precision = plan.precision.unwrap_or(0);
        let mut infos = Vec::new();
        let mut next_group = 0;
        for (series_interval, fragments) in groups {
            let intervals: Vec<_> = fragments.iter().map(|f| f.time_interval).collect();
            let (shards, continued) = split_downsample_intervals_from(
                &intervals,
                time.start,
                time.end,
                precision,
                next_group,
            );
            next_group = continued;
            for shard in shards {
                // Shards never cross fragment boundaries.
                let Some(fragment) = fragments
                    .iter()
                    .find(|f| f.time_interval.contains(shard.interval.start))
                else {
                    continue;
                };
                for unit in self.target_units(fragment, false) {
                    let mut info =
                        SplitInfo::new(shard.interval, series_interval.clone(), unit, plan.kind);
                    info.combine_group = Some(shard.combine_group);
                    infos.push(info);
                }
            }
        }
        infos
    }

    /// Resolve a fragment's replica set to address: the master for reads,
    /// master plus replicas for writes.
    fn target_units(&self, fragment: &Fragment, write: bool) -> Vec<StorageUnitId> {
        let Some(master) = self
            .manager
            .get_storage_unit(&fragment.master_storage_unit_id)
        else {
            tracing::error!(
                unit = %fragment.master_storage_unit_id,
                "fragment references a storage unit absent from cache",
            );
            return Vec::new();
        };
        let mut targets = vec![master.id.clone()];
        if write {
            targets.extend(master.replicas.iter().cloned());
        }
        targets
    }

    async fn reallocate(&self, start_time: Timestamp) {
        let engine_count = self.manager.storage_engine_count();
        let count = self.manager.opts().fragment_per_engine * engine_count;
        if count == 0 {
            return;
        }
        let prefixes = self.flushed.read().clone();
        let (units, fragments) = self
            .generator
            .generate_rebalance(&prefixes, count, start_time);
        if units.is_empty() {
            return;
        }
        if !self
            .manager
            .create_fragments_and_storage_units(units, fragments)
            .await
        {
            tracing::warn!("fragment reallocation failed");
        }
    }

    async fn flush_statistics(&self, snapshot: Vec<(String, f64)>) {
        *self.flushed.write() = snapshot.clone();
        if !self.flushed_once.swap(true, Ordering::Relaxed) {
            self.needs_rebalance.store(true, Ordering::Relaxed);
        }
        // Publish for cluster-wide visibility; best-effort.
        let key = format!("series_stats/{}", self.manager.local_node_id());
        let value = match serde_json::to_vec(&snapshot) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode series statistics");
                return;
            }
        };
        if let Err(err) = self
            .manager
            .env()
            .meta_store()
            .put_cf(DEFAULT_COLUMN_FAMILY, key.into_bytes(), value)
            .await
        {
            tracing::warn!(error = %err.as_report(), "failed to publish series statistics");
        }
    }
}
