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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::RwLock;

use crate::model::{NodeId, StorageUnitId};
use crate::storage::{MetaStore, MetaStoreError, DEFAULT_COLUMN_FAMILY};
use crate::MetaResult;

pub const ID_PREALLOCATE_INTERVAL: u64 = 1000;

pub type Id = u64;

/// [`StoredIdGenerator`] hands out cluster-unique monotonic ids, burning
/// through ranges preallocated in the meta store so most calls stay local.
pub struct StoredIdGenerator<S: MetaStore> {
    meta_store: Arc<S>,
    category_gen_key: String,
    current_id: AtomicU64,
    next_allocate_id: RwLock<Id>,
}

impl<S: MetaStore> StoredIdGenerator<S> {
    pub async fn new(meta_store: Arc<S>, category: &str, start: Option<Id>) -> MetaResult<Self> {
        let category_gen_key = format!("{}_id_next_generator", category);
        let current_id = match meta_store
            .get_cf(DEFAULT_COLUMN_FAMILY, category_gen_key.as_bytes())
            .await
        {
            Ok(value) => serde_json::from_slice(&value).map_err(MetaStoreError::Serde)?,
            Err(MetaStoreError::ItemNotFound(_)) => start.unwrap_or(0),
            Err(err) => return Err(err.into()),
        };

        let next_allocate_id = current_id + ID_PREALLOCATE_INTERVAL;
        meta_store
            .put_cf(
                DEFAULT_COLUMN_FAMILY,
                category_gen_key.clone().into_bytes(),
                serde_json::to_vec(&next_allocate_id).map_err(MetaStoreError::Serde)?,
            )
            .await?;

        Ok(StoredIdGenerator {
            meta_store,
            category_gen_key,
            current_id: AtomicU64::new(current_id),
            next_allocate_id: RwLock::new(next_allocate_id),
        })
    }

    /// Generate a batch of identities; the valid range is
    /// `[result, result + interval)`.
    pub async fn generate_interval(&self, interval: u64) -> MetaResult<Id> {
        let id = self.current_id.fetch_add(interval, Ordering::Relaxed);
        let next_allocate_id = { *self.next_allocate_id.read().await };
        let request_id = id + interval;
        if request_id > next_allocate_id {
            let mut next = self.next_allocate_id.write().await;
            if request_id > *next {
                let weight = (request_id - *next).div_ceil(ID_PREALLOCATE_INTERVAL);
                let next_allocate_id = *next + ID_PREALLOCATE_INTERVAL * weight;
                self.meta_store
                    .put_cf(
                        DEFAULT_COLUMN_FAMILY,
                        self.category_gen_key.clone().into_bytes(),
                        serde_json::to_vec(&next_allocate_id).map_err(MetaStoreError::Serde)?,
                    )
                    .await?;
                *next = next_allocate_id;
            }
        }
        Ok(id)
    }

    pub async fn generate(&self) -> MetaResult<Id> {
        self.generate_interval(1).await
    }
}

pub type IdCategoryType = u8;

#[expect(non_snake_case, non_upper_case_globals)]
pub mod IdCategory {
    use super::IdCategoryType;

    #[cfg(test)]
    pub const Test: IdCategoryType = 0;
    pub const Node: IdCategoryType = 1;
    pub const StorageEngine: IdCategoryType = 2;
    pub const StorageUnit: IdCategoryType = 3;
}

pub type IdGeneratorManagerRef<S> = Arc<IdGeneratorManager<S>>;

/// [`IdGeneratorManager`] bundles one stored generator per id category.
pub struct IdGeneratorManager<S: MetaStore> {
    #[cfg(test)]
    test: StoredIdGenerator<S>,
    node: StoredIdGenerator<S>,
    storage_engine: StoredIdGenerator<S>,
    storage_unit: StoredIdGenerator<S>,
}

impl<S: MetaStore> IdGeneratorManager<S> {
    pub async fn new(meta_store: Arc<S>) -> MetaResult<Self> {
        Ok(Self {
            #[cfg(test)]
            test: StoredIdGenerator::new(meta_store.clone(), "test", None).await?,
            node: StoredIdGenerator::new(meta_store.clone(), "node", Some(1)).await?,
            storage_engine: StoredIdGenerator::new(meta_store.clone(), "storage_engine", Some(1))
                .await?,
            storage_unit: StoredIdGenerator::new(meta_store, "storage_unit", Some(1)).await?,
        })
    }

    const fn get<const C: IdCategoryType>(&self) -> &StoredIdGenerator<S> {
        match C {
            #[cfg(test)]
            IdCategory::Test => &self.test,
            IdCategory::Node => &self.node,
            IdCategory::StorageEngine => &self.storage_engine,
            IdCategory::StorageUnit => &self.storage_unit,
            _ => unreachable!(),
        }
    }

    pub async fn generate<const C: IdCategoryType>(&self) -> MetaResult<Id> {
        self.get::<C>().generate().await
    }
}

/// Render a reserved storage-unit counter value as the opaque unit id used
/// everywhere else.
pub fn format_storage_unit_id(id: Id) -> StorageUnitId {
    format!("unit{:08}", id)
}

const SNOWFLAKE_EPOCH_MILLIS: i64 = 1_577_836_800_000; // 2020-01-01T00:00:00Z
const SNOWFLAKE_NODE_BITS: u32 = 10;
const SNOWFLAKE_SEQUENCE_BITS: u32 = 12;

/// Snowflake-style generator for locally-originated object ids: a 41-bit
/// millisecond timestamp, the low bits of the owning node id, and a
/// per-millisecond sequence. Seeded once the node identity is known.
#[derive(Debug)]
pub struct SnowflakeIdGenerator {
    node_id: u64,
    /// (last timestamp, sequence within that millisecond).
    state: Mutex<(i64, u64)>,
}

impl SnowflakeIdGenerator {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id: node_id & ((1 << SNOWFLAKE_NODE_BITS) - 1),
            state: Mutex::new((0, 0)),
        }
    }

    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        let mut now = current_millis();
        // A clock step backwards must not reissue ids.
        if now < state.0 {
            now = state.0;
        }
        if now == state.0 {
            state.1 += 1;
            if state.1 >= (1 << SNOWFLAKE_SEQUENCE_BITS) {
                now += 1;
                state.0 = now;
                state.1 = 0;
            }
        } else {
            state.0 = now;
            state.1 = 0;
        }
        (((now - SNOWFLAKE_EPOCH_MILLIS) as u64)
            << (SNOWFLAKE_NODE_BITS + SNOWFLAKE_SEQUENCE_BITS))
            | (self.node_id << SNOWFLAKE_SEQUENCE_BITS)
            | state.1
    }
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before unix epoch")
        .as_millis() as i64
}
