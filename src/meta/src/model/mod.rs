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

mod cluster;
mod fragment;
mod user;

use async_trait::async_trait;
pub use cluster::*;
pub use fragment::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
pub use user::*;

use crate::storage::{MetaStore, MetaStoreError};
use crate::MetaResult;

pub type NodeId = u64;
pub type EngineId = u64;
/// Storage-unit ids are opaque strings minted from a store-backed counter.
pub type StorageUnitId = String;

/// Encoding of a record key within its column family.
pub trait MetaKey {
    fn encode(&self) -> Vec<u8>;
}

impl MetaKey for u64 {
    fn encode(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

impl MetaKey for String {
    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

/// `MetadataModel` defines basic model operations in CRUD.
///
/// Records serialize as JSON; the store sees opaque bytes only.
#[async_trait]
pub trait MetadataModel: Sized + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Record key type.
    type KeyType: MetaKey + Send + Sync;

    /// Column family for this model.
    fn cf_name() -> String;

    /// Current record key.
    fn key(&self) -> Self::KeyType;

    fn encode(&self) -> MetaResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> MetaResult<Self> {
        Ok(serde_json::from_slice(bytes).map_err(MetaStoreError::Serde)?)
    }

    /// `list` returns all records in this model.
    async fn list<S>(store: &S) -> MetaResult<Vec<Self>>
    where
        S: MetaStore,
    {
        let bytes_vec = store.list_cf(&Self::cf_name()).await?;
        bytes_vec.iter().map(|bytes| Self::decode(bytes)).collect()
    }

    /// `insert` inserts a new record in the meta store, replacing it if the
    /// record already exists.
    async fn insert<S>(&self, store: &S) -> MetaResult<()>
    where
        S: MetaStore,
    {
        store
            .put_cf(&Self::cf_name(), self.key().encode(), self.encode()?)
            .await
            .map_err(Into::into)
    }

    /// `delete` drops the record with the associated key from the meta store.
    async fn delete<S>(store: &S, key: &Self::KeyType) -> MetaResult<()>
    where
        S: MetaStore,
    {
        store
            .delete_cf(&Self::cf_name(), &key.encode())
            .await
            .map_err(Into::into)
    }

    /// `select` queries the record with the associated key.
    async fn select<S>(store: &S, key: &Self::KeyType) -> MetaResult<Option<Self>>
    where
        S: MetaStore,
    {
        let bytes = match store.get_cf(&Self::cf_name(), &key.encode()).await {
            Ok(bytes) => bytes,
            Err(MetaStoreError::ItemNotFound(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(Self::decode(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use futures::future;

    use super::*;
    use crate::storage::MemStore;

    #[tokio::test]
    async fn test_model_crud() -> MetaResult<()> {
        let store = MemStore::default();
        assert!(FrontendNode::list(&store).await?.is_empty());
        assert!(FrontendNode::select(&store, &17).await?.is_none());

        future::join_all((0..10u64).map(|id| {
            let store = &store;
            async move {
                FrontendNode {
                    id,
                    host: "localhost".to_string(),
                    port: 6888 + id as u16,
                }
                .insert(store)
                .await
            }
        }))
        .await
        .into_iter()
        .collect::<MetaResult<Vec<_>>>()?;

        assert_eq!(FrontendNode::list(&store).await?.len(), 10);
        let node = FrontendNode::select(&store, &3).await?.unwrap();
        assert_eq!(node.port, 6891);

        // Insert with an existing key replaces.
        FrontendNode {
            id: 3,
            host: "10.0.0.1".to_string(),
            port: 7000,
        }
        .insert(&store)
        .await?;
        assert_eq!(FrontendNode::list(&store).await?.len(), 10);
        assert_eq!(
            FrontendNode::select(&store, &3).await?.unwrap().host,
            "10.0.0.1"
        );

        FrontendNode::delete(&store, &3).await?;
        assert!(FrontendNode::select(&store, &3).await?.is_none());
        Ok(())
    }
}
