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

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

/// Column family for values that do not belong to an entity model, such as
/// id-generator cursors.
pub const DEFAULT_COLUMN_FAMILY: &str = "cf/default";

/// Name of the cluster-wide advisory lock guarding fragment batches.
pub const FRAGMENT_LOCK: &str = "fragment";
/// Name of the cluster-wide advisory lock guarding storage-unit batches.
/// Canonical order: [`FRAGMENT_LOCK`] is taken first, released last.
pub const STORAGE_UNIT_LOCK: &str = "storage_unit";

#[derive(Error, Debug)]
pub enum MetaStoreError {
    #[error("item not found: {0}")]
    ItemNotFound(String),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Internal(anyhow::Error),
}

pub type MetaStoreResult<T> = std::result::Result<T, MetaStoreError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Put,
    Delete,
}

/// One mutation observed on the store. The feed carries every change,
/// including the subscriber's own writes; echo suppression happens in the
/// change dispatcher by creator/updater node id.
#[derive(Clone, Debug)]
pub struct MetaStoreEvent {
    pub op: Operation,
    pub cf: String,
    pub key: Vec<u8>,
    /// `None` for deletions.
    pub value: Option<Vec<u8>>,
}

/// Durable namespace for cluster metadata: a column-family keyed byte store
/// with a change feed and cluster-wide advisory locks.
///
/// Implementations back this with a coordination service (etcd) or a local
/// file; the file backend degrades to single-process operation. All methods
/// are suspension points and may fail with [`MetaStoreError`].
#[async_trait]
pub trait MetaStore: Sync + Send + 'static {
    async fn list_cf(&self, cf: &str) -> MetaStoreResult<Vec<Vec<u8>>>;
    async fn get_cf(&self, cf: &str, key: &[u8]) -> MetaStoreResult<Vec<u8>>;
    async fn put_cf(&self, cf: &str, key: Vec<u8>, value: Vec<u8>) -> MetaStoreResult<()>;
    async fn delete_cf(&self, cf: &str, key: &[u8]) -> MetaStoreResult<()>;

    /// Subscribe to the change feed. Only mutations applied after the call
    /// are delivered. The receiver may be driven from any task; subscribers
    /// must tolerate events arriving before their initial bulk load
    /// completes.
    async fn subscribe(&self) -> MetaStoreResult<UnboundedReceiver<MetaStoreEvent>>;

    /// Acquire a cluster-wide advisory exclusive lock, blocking until it is
    /// granted. Re-entry by the holder is not supported. Lock loss on
    /// session expiry is the coordination service's concern.
    async fn lock(&self, name: &str) -> MetaStoreResult<()>;
    async fn unlock(&self, name: &str) -> MetaStoreResult<()>;
}

/// Type-erased store handle, so one manager type serves every configured
/// backend.
pub type BoxedMetaStore = Box<dyn MetaStore>;

#[async_trait]
impl MetaStore for BoxedMetaStore {
    async fn list_cf(&self, cf: &str) -> MetaStoreResult<Vec<Vec<u8>>> {
        self.as_ref().list_cf(cf).await
    }

    async fn get_cf(&self, cf: &str, key: &[u8]) -> MetaStoreResult<Vec<u8>> {
        self.as_ref().get_cf(cf, key).await
    }

    async fn put_cf(&self, cf: &str, key: Vec<u8>, value: Vec<u8>) -> MetaStoreResult<()> {
        self.as_ref().put_cf(cf, key, value).await
    }

    async fn delete_cf(&self, cf: &str, key: &[u8]) -> MetaStoreResult<()> {
        self.as_ref().delete_cf(cf, key).await
    }

    async fn subscribe(&self) -> MetaStoreResult<UnboundedReceiver<MetaStoreEvent>> {
        self.as_ref().subscribe().await
    }

    async fn lock(&self, name: &str) -> MetaStoreResult<()> {
        self.as_ref().lock(name).await
    }

    async fn unlock(&self, name: &str) -> MetaStoreResult<()> {
        self.as_ref().unlock(name).await
    }
}
