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
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use super::mem::{AdvisoryLocks, StoreCore};
use super::meta_store::{MetaStore, MetaStoreError, MetaStoreEvent, MetaStoreResult};

/// Local-file [`MetaStore`]: the fallback backend for single-node
/// deployments. Semantics match [`super::MemStore`] with every mutation
/// snapshotted to a JSON file (write-then-rename, so a torn write leaves the
/// previous snapshot intact). It offers no multi-node coordination; the
/// advisory locks only exclude tasks of this process.
pub struct FileStore {
    core: Mutex<StoreCore>,
    locks: AdvisoryLocks,
    /// Serializes mutation + snapshot pairs so the file never regresses.
    persist: tokio::sync::Mutex<()>,
    path: PathBuf,
}

/// Hex-encoded snapshot layout. Keys and values are arbitrary bytes; hex
/// keeps the JSON valid regardless of content.
type Snapshot = HashMap<String, BTreeMap<String, String>>;

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> MetaStoreResult<Self> {
        let path = path.into();
        let mut core = StoreCore::default();
        if path.exists() {
            let raw = std::fs::read(&path).map_err(|e| {
                MetaStoreError::Internal(anyhow::anyhow!(e).context(format!(
                    "failed to read meta snapshot {}",
                    path.display()
                )))
            })?;
            let snapshot: Snapshot = serde_json::from_slice(&raw)?;
            core.restore(decode_snapshot(snapshot)?);
        }
        Ok(Self {
            core: Mutex::new(core),
            locks: AdvisoryLocks::default(),
            persist: tokio::sync::Mutex::new(()),
            path,
        })
    }

    async fn write_snapshot(&self, raw: Vec<u8>) -> MetaStoreResult<()> {
        let tmp = self.path.with_extension("tmp");
        let io_err = |e: std::io::Error, path: &Path| {
            MetaStoreError::Internal(
                anyhow::anyhow!(e).context(format!("failed to persist {}", path.display())),
            )
        };
        tokio::fs::write(&tmp, raw).await.map_err(|e| io_err(e, &tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_err(e, &self.path))?;
        Ok(())
    }

    fn encode_current(&self) -> MetaStoreResult<Vec<u8>> {
        let core = self.core.lock();
        let snapshot: Snapshot = core
            .snapshot()
            .iter()
            .map(|(cf, entries)| {
                (
                    cf.clone(),
                    entries
                        .iter()
                        .map(|(k, v)| (hex::encode(k), hex::encode(v)))
                        .collect(),
                )
            })
            .collect();
        Ok(serde_json::to_vec(&snapshot)?)
    }
}

fn decode_snapshot(
    snapshot: Snapshot,
) -> MetaStoreResult<HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>> {
    let decode = |raw: &str| {
        hex::decode(raw).map_err(|e| {
            MetaStoreError::Internal(anyhow::anyhow!("corrupt meta snapshot entry: {}", e))
        })
    };
    let mut cfs = HashMap::with_capacity(snapshot.len());
    for (cf, entries) in snapshot {
        let mut decoded = BTreeMap::new();
        for (k, v) in entries {
            decoded.insert(decode(&k)?, decode(&v)?);
        }
        cfs.insert(cf, decoded);
    }
    Ok(cfs)
}

#[async_trait]
impl MetaStore for FileStore {
    async fn list_cf(&self, cf: &str) -> MetaStoreResult<Vec<Vec<u8>>> {
        Ok(self.core.lock().list(cf))
    }

    async fn get_cf(&self, cf: &str, key: &[u8]) -> MetaStoreResult<Vec<u8>> {
        self.core.lock().get(cf, key)
    }

    async fn put_cf(&self, cf: &str, key: Vec<u8>, value: Vec<u8>) -> MetaStoreResult<()> {
        let _persist = self.persist.lock().await;
        self.core.lock().put(cf, key, value);
        let raw = self.encode_current()?;
        self.write_snapshot(raw).await
    }

    async fn delete_cf(&self, cf: &str, key: &[u8]) -> MetaStoreResult<()> {
        let _persist = self.persist.lock().await;
        self.core.lock().delete(cf, key);
        let raw = self.encode_current()?;
        self.write_snapshot(raw).await
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");

        {
            let store = FileStore::open(&path).unwrap();
            store
                .put_cf("cf/test", b"a".to_vec(), b"1".to_vec())
                .await
                .unwrap();
            store
                .put_cf("cf/test", b"b".to_vec(), b"2".to_vec())
                .await
                .unwrap();
            store.delete_cf("cf/test", b"a").await.unwrap();
        }

        // A fresh instance sees the surviving state.
        let store = FileStore::open(&path).unwrap();
        assert!(store.get_cf("cf/test", b"a").await.is_err());
        assert_eq!(store.get_cf("cf/test", b"b").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_file_store_open_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("absent.json")).unwrap();
        assert!(store.list_cf("cf/test").await.unwrap().is_empty());
    }
}
