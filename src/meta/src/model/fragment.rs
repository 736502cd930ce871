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

use chronowave_common::types::{TimeInterval, TimeSeriesInterval, Timestamp};
use serde::{Deserialize, Serialize};

use super::{MetaKey, MetadataModel, NodeId, StorageUnitId};

/// Column family name for fragments.
const FRAGMENT_CF_NAME: &str = "cf/fragment";

/// A rectangle in (series, time) space assigned to one master storage unit.
///
/// Fragments never reference their storage unit by object, only by id; the
/// unit is resolved through the cache when needed. A fragment with an
/// open-ended time interval is the "latest" fragment of its series interval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub series_interval: TimeSeriesInterval,
    pub time_interval: TimeInterval,
    pub master_storage_unit_id: StorageUnitId,
    pub created_by: NodeId,
    pub updated_by: NodeId,
    /// Set iff the fragment was created by the cluster-bootstrap path.
    pub initial: bool,
}

impl Fragment {
    pub fn new(
        series_interval: TimeSeriesInterval,
        time_interval: TimeInterval,
        master_storage_unit_id: impl Into<StorageUnitId>,
    ) -> Self {
        Self {
            series_interval,
            time_interval,
            master_storage_unit_id: master_storage_unit_id.into(),
            created_by: 0,
            updated_by: 0,
            initial: false,
        }
    }

    pub fn is_open_ended(&self) -> bool {
        self.time_interval.is_open_ended()
    }

    /// Close this fragment at `end_time`, recording the updating node.
    /// Closing an open fragment sets its end exactly to the start time of
    /// its successor.
    pub fn close(&mut self, end_time: Timestamp, updated_by: NodeId) {
        self.time_interval.end = end_time;
        self.updated_by = updated_by;
    }
}

/// Identity of a fragment within the store: its series interval plus start
/// time. End-time updates (closing) keep the key stable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentKey {
    pub series_interval: TimeSeriesInterval,
    pub start_time: Timestamp,
}

impl MetaKey for FragmentKey {
    fn encode(&self) -> Vec<u8> {
        // Struct field order makes the JSON encoding deterministic.
        serde_json::to_vec(self).expect("fragment key serialization cannot fail")
    }
}

impl MetadataModel for Fragment {
    type KeyType = FragmentKey;

    fn cf_name() -> String {
        FRAGMENT_CF_NAME.to_string()
    }

    fn key(&self) -> FragmentKey {
        FragmentKey {
            series_interval: self.series_interval.clone(),
            start_time: self.time_interval.start,
        }
    }
}
