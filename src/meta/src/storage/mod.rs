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

mod etcd;
mod file;
mod mem;
mod meta_store;

use std::path::PathBuf;

use chronowave_common::config::MetaConfig;
pub use etcd::EtcdStore;
pub use file::FileStore;
pub use mem::MemStore;
pub use meta_store::{
    BoxedMetaStore, MetaStore, MetaStoreError, MetaStoreEvent, MetaStoreResult, Operation,
    DEFAULT_COLUMN_FAMILY, FRAGMENT_LOCK, STORAGE_UNIT_LOCK,
};

use crate::{MetaError, MetaResult};

/// Which coordination service backs the metadata, resolved from the
/// `meta_storage` configuration key. Empty or unknown values fall back to
/// the file backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaStoreBackend {
    Etcd { endpoints: Vec<String> },
    File { path: PathBuf },
    Mem,
}

impl MetaStoreBackend {
    pub fn from_config(config: &MetaConfig) -> MetaResult<Self> {
        match config.meta_storage.as_str() {
            "etcd" => {
                if config.meta_storage_endpoints.is_empty() {
                    return Err(MetaError::unsupported(
                        "meta_storage = \"etcd\" requires meta_storage_endpoints",
                    ));
                }
                Ok(Self::Etcd {
                    endpoints: config.meta_storage_endpoints.clone(),
                })
            }
            // The original front-end also spoke ZooKeeper; this port does
            // not ship a ZK client.
            "zookeeper" => Err(MetaError::unsupported(
                "the zookeeper meta storage backend is not available in this build",
            )),
            "file" => Ok(Self::File {
                path: config.file_data_path.clone().into(),
            }),
            other => {
                if !other.is_empty() {
                    tracing::warn!(
                        meta_storage = other,
                        "unknown meta_storage backend, falling back to file"
                    );
                }
                Ok(Self::File {
                    path: config.file_data_path.clone().into(),
                })
            }
        }
    }

    /// Open the selected backend behind a type-erased handle.
    pub async fn open(self) -> MetaResult<BoxedMetaStore> {
        Ok(match self {
            MetaStoreBackend::Etcd { endpoints } => Box::new(EtcdStore::connect(endpoints).await?),
            MetaStoreBackend::File { path } => Box::new(FileStore::open(path)?),
            MetaStoreBackend::Mem => Box::new(MemStore::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_config() {
        let mut config = MetaConfig::default();
        assert!(matches!(
            MetaStoreBackend::from_config(&config).unwrap(),
            MetaStoreBackend::File { .. }
        ));

        config.meta_storage = "sled".to_string();
        assert!(matches!(
            MetaStoreBackend::from_config(&config).unwrap(),
            MetaStoreBackend::File { .. }
        ));

        config.meta_storage = "zookeeper".to_string();
        assert!(MetaStoreBackend::from_config(&config).is_err());

        config.meta_storage = "etcd".to_string();
        assert!(MetaStoreBackend::from_config(&config).is_err());
        config.meta_storage_endpoints = vec!["http://127.0.0.1:2379".to_string()];
        assert_eq!(
            MetaStoreBackend::from_config(&config).unwrap(),
            MetaStoreBackend::Etcd {
                endpoints: vec!["http://127.0.0.1:2379".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_backend_open() {
        let store = MetaStoreBackend::Mem.open().await.unwrap();
        store
            .put_cf("cf/test", b"k".to_vec(), b"v".to_vec())
            .await
            .unwrap();
        assert_eq!(store.get_cf("cf/test", b"k").await.unwrap(), b"v");

        let dir = tempfile::tempdir().unwrap();
        let backend = MetaStoreBackend::File {
            path: dir.path().join("meta.json"),
        };
        let store = backend.open().await.unwrap();
        assert!(store.list_cf("cf/test").await.unwrap().is_empty());
    }
}
