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

use chronowave_common::types::{TimeInterval, TimeSeriesInterval, Timestamp, TIME_MAX};

use crate::model::StorageUnitId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateKind {
    Min,
    Max,
    Sum,
    Count,
    Avg,
    First,
    Last,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanKind {
    InsertRows,
    InsertColumns,
    DeleteData,
    /// Removes whole series; mutates schema, so it is addressed like a
    /// write.
    DeleteColumns,
    Query,
    ValueFilterQuery,
    Aggregate(AggregateKind),
    Downsample(AggregateKind),
}

impl PlanKind {
    /// Write plans address the master and all replicas; read plans the
    /// master only.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            PlanKind::InsertRows
                | PlanKind::InsertColumns
                | PlanKind::DeleteData
                | PlanKind::DeleteColumns
        )
    }
}

/// A logical plan as handed down by the query layer: which series it
/// addresses, over which time range, and what it does.
#[derive(Clone, Debug)]
pub struct LogicalPlan {
    pub kind: PlanKind,
    /// Addressed series names, sorted and deduplicated.
    pub paths: Vec<String>,
    /// Time bound; `None` addresses the full axis.
    pub time_interval: Option<TimeInterval>,
    /// Window width of a downsampled aggregate.
    pub precision: Option<i64>,
}

impl LogicalPlan {
    pub fn new(kind: PlanKind, mut paths: Vec<String>, time_interval: Option<TimeInterval>) -> Self {
        paths.sort();
        paths.dedup();
        Self {
            kind,
            paths,
            time_interval,
            precision: None,
        }
    }

    pub fn downsample(
        kind: AggregateKind,
        paths: Vec<String>,
        time_interval: TimeInterval,
        precision: i64,
    ) -> Self {
        let mut plan = Self::new(PlanKind::Downsample(kind), paths, Some(time_interval));
        plan.precision = Some(precision);
        plan
    }

    /// The series region this plan addresses. The upper bound is exclusive,
    /// so the last path is bumped by a NUL to stay inside.
    pub fn series_interval(&self) -> Option<TimeSeriesInterval> {
        let first = self.paths.first()?;
        let last = self.paths.last()?;
        Some(TimeSeriesInterval::bounded(
            Some(first.clone()),
            Some(format!("{}\u{0}", last)),
        ))
    }

    pub fn time_interval_or_full(&self) -> TimeInterval {
        self.time_interval
            .unwrap_or_else(|| TimeInterval::new(0, TIME_MAX))
    }
}

/// One unit of work addressed at a single storage unit: the intersection of
/// a fragment with the plan, plus the replica target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitInfo {
    pub time_interval: TimeInterval,
    pub series_interval: TimeSeriesInterval,
    pub storage_unit_id: StorageUnitId,
    pub kind: PlanKind,
    /// Set on downsample shards only.
    pub combine_group: Option<u64>,
}

impl SplitInfo {
    pub fn new(
        time_interval: TimeInterval,
        series_interval: TimeSeriesInterval,
        storage_unit_id: impl Into<StorageUnitId>,
        kind: PlanKind,
    ) -> Self {
        Self {
            time_interval,
            series_interval,
            storage_unit_id: storage_unit_id.into(),
            kind,
            combine_group: None,
        }
    }
}

/// Timestamp helper for plan construction from raw samples.
pub fn time_interval_of_samples(timestamps: &[Timestamp]) -> Option<TimeInterval> {
    let min = *timestamps.iter().min()?;
    let max = *timestamps.iter().max()?;
    Some(TimeInterval::new(min, max + 1))
}
