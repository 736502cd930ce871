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
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::OwnedMutexGuard;

use super::meta_store::{
    MetaStore, MetaStoreError, MetaStoreEvent, MetaStoreResult, Operation,
};

type ColumnFamily = String;
type Key = Vec<u8>;
type Value = Vec<u8>;

/// Shared storage core of the in-process backends: the column-family maps
/// plus the subscriber fan-out. Mutations broadcast their event while the
/// core lock is held so every subscriber observes the same total order.
#[derive(Default)]
pub(super) struct StoreCore {
    cfs: HashMap<ColumnFamily, BTreeMap<Key, Value>>,
    subscribers: Vec<UnboundedSender<MetaStoreEvent>>,
}

impl StoreCore {
    pub(super) fn list(&self, cf: &str) -> Vec<Vec<u8>> {
        self.cfs
            .get(cf)
            .map(|cf| cf.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(super) fn get(&self, cf: &str, key: &[u8]) -> MetaStoreResult<Vec<u8>> {
        self.cfs
            .get(cf)
            .and_then(|cf| cf.get(key))
            .cloned()
            .ok_or_else(|| {
                MetaStoreError::ItemNotFound(format!("{}/{}", cf, hex::encode(key)))
            })
    }

    pub(super) fn put(&mut self, cf: &str, key: Vec<u8>, value: Vec<u8>) {
        self.cfs
            .entry(cf.to_string())
            .or_default()
            .insert(key.clone(), value.clone());
        self.broadcast(MetaStoreEvent {
            op: Operation::Put,
            cf: cf.to_string(),
            key,
            value: Some(value),
        });
    }

    pub(super) fn delete(&mut self, cf: &str, key: &[u8]) {
        let existed = self
            .cfs
            .get_mut(cf)
            .map(|cf| cf.remove(key).is_some())
            .unwrap_or(false);
        if existed {
            self.broadcast(MetaStoreEvent {
                op: Operation::Delete,
                cf: cf.to_string(),
                key: key.to_vec(),
                value: None,
            });
        }
    }

    pub(super) fn subscribe(&mut self) -> UnboundedReceiver<MetaStoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub(super) fn snapshot(&self) -> &HashMap<ColumnFamily, BTreeMap<Key, Value>> {
        &self.cfs
    }

    pub(super) fn restore(&mut self, cfs: HashMap<ColumnFamily, BTreeMap<Key, Value>>) {
        self.cfs = cfs;
    }

    fn broadcast(&mut self, event: MetaStoreEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// In-process advisory locks shared by the mem and file backends. The file
/// backend therefore coordinates concurrent tasks of one process only.
#[derive(Default)]
pub(super) struct AdvisoryLocks {
    registry: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    held: Mutex<HashMap<String, OwnedMutexGuard<()>>>,
}

impl AdvisoryLocks {
    pub(super) async fn lock(&self, name: &str) {
        let entry = self
            .registry
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        let guard = entry.lock_owned().await;
        self.held.lock().insert(name.to_string(), guard);
    }

    pub(super) fn unlock(&self, name: &str) -> MetaStoreResult<()> {
        match self.held.lock().remove(name) {
            Some(_guard) => Ok(()),
            None => Err(MetaStoreError::Internal(anyhow::anyhow!(
                "advisory lock {} is not held",
                name
            ))),
        }
    }
}

/// In-memory [`MetaStore`]. The test backend; a single instance may be
/// shared (via `Arc`) by several managers to exercise multi-node
/// coordination in one process.
#[derive(Default)]
pub struct MemStore {
    core: Mutex<StoreCore>,
    locks: AdvisoryLocks,
}

impl MemStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl MetaStore for MemStore {
    async fn list_cf(&self, cf: &str) -> MetaStoreResult<Vec<Vec<u8>>> {
        Ok(self.core.lock().list(cf))
    }

    async fn get_cf(&self, cf: &str, key: &[u8]) -> MetaStoreResult<Vec<u8>> {
        self.core.lock().get(cf, key)
    }

    async fn put_cf(&self, cf: &str, key: Vec<u8>, value: Vec<u8>) -> MetaStoreResult<()> {
        self.core.lock().put(cf, key, value);
        Ok(())
    }

    async fn delete_cf(&self, cf: &str, key: &[u8]) -> MetaStoreResult<()> {
        self.core.lock().delete(cf, key);
        Ok(())
    }

    async fn subscribe(&self) -> MetaStoreResult<UnboundedReceiver<MetaStoreEvent>> {
        Ok(self.core.lock().subscribe())
    }

    async fn lock(&self, name: &str) -> MetaStoreResult<()> {
        self.locks.lock(name).await;
        Ok(())
    }

    async fn unlock(&self, name: &str) -> MetaStoreResult<()> {
        self.locks.unlock(name)
    }
}
