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
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType, GetOptions, WatchOptions};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::meta_store::{
    MetaStore, MetaStoreError, MetaStoreEvent, MetaStoreResult, Operation,
};

/// Namespace under which all metadata keys live in etcd.
const KEY_PREFIX: &str = "cw/";
/// Namespace for the advisory lock names.
const LOCK_PREFIX: &str = "cw-lock/";

fn encode_key(cf: &str, key: &[u8]) -> Vec<u8> {
    format!("{}{}/{}", KEY_PREFIX, cf, hex::encode(key)).into_bytes()
}

/// Inverse of [`encode_key`]. Column-family names may contain `/`, so the
/// split is taken at the last separator (the hex tail contains none).
fn decode_key(raw: &[u8]) -> Option<(String, Vec<u8>)> {
    let raw = std::str::from_utf8(raw).ok()?;
    let rest = raw.strip_prefix(KEY_PREFIX)?;
    let (cf, hex_key) = rest.rsplit_once('/')?;
    Some((cf.to_string(), hex::decode(hex_key).ok()?))
}

fn transport_err(err: etcd_client::Error) -> MetaStoreError {
    MetaStoreError::Internal(anyhow::Error::new(err))
}

/// [`MetaStore`] backed by an etcd cluster: keys under a shared namespace,
/// the change feed from a prefix watch, advisory locks from the etcd lock
/// service. Session and crash-release handling are etcd's own.
pub struct EtcdStore {
    client: Client,
    /// Ownership keys returned by the lock service, per advisory lock name.
    lock_keys: Mutex<HashMap<String, Vec<u8>>>,
    subscribers: Arc<Mutex<Vec<UnboundedSender<MetaStoreEvent>>>>,
}

impl EtcdStore {
    pub async fn connect(endpoints: Vec<String>) -> MetaStoreResult<Self> {
        let client = Client::connect(
            endpoints,
            Some(
                ConnectOptions::default()
                    .with_keep_alive(Duration::from_secs(3), Duration::from_secs(5)),
            ),
        )
        .await
        .map_err(transport_err)?;

        let store = Self {
            client,
            lock_keys: Mutex::new(HashMap::new()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        };
        store.start_watch_task().await?;
        Ok(store)
    }

    /// One watch over the whole namespace, fanned out to local subscribers.
    async fn start_watch_task(&self) -> MetaStoreResult<()> {
        let mut watch_client = self.client.watch_client();
        let (_watcher, mut stream) = watch_client
            .watch(
                KEY_PREFIX.as_bytes().to_vec(),
                Some(WatchOptions::new().with_prefix()),
            )
            .await
            .map_err(transport_err)?;

        let subscribers = self.subscribers.clone();
        tokio::spawn(async move {
            // Keep the watcher alive for the lifetime of the stream.
            let _watcher = _watcher;
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        for event in resp.events() {
                            let Some(kv) = event.kv() else {
                                continue;
                            };
                            let Some((cf, key)) = decode_key(kv.key()) else {
                                continue;
                            };
                            let meta_event = match event.event_type() {
                                EventType::Put => MetaStoreEvent {
                                    op: Operation::Put,
                                    cf,
                                    key,
                                    value: Some(kv.value().to_vec()),
                                },
                                EventType::Delete => MetaStoreEvent {
                                    op: Operation::Delete,
                                    cf,
                                    key,
                                    value: None,
                                },
                            };
                            subscribers
                                .lock()
                                .retain(|tx| tx.send(meta_event.clone()).is_ok());
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("etcd watch stream closed");
                        return;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "etcd watch stream failed");
                        return;
                    }
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl MetaStore for EtcdStore {
    async fn list_cf(&self, cf: &str) -> MetaStoreResult<Vec<Vec<u8>>> {
        let prefix = format!("{}{}/", KEY_PREFIX, cf).into_bytes();
        let resp = self
            .client
            .kv_client()
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(transport_err)?;
        Ok(resp.kvs().iter().map(|kv| kv.value().to_vec()).collect())
    }

    async fn get_cf(&self, cf: &str, key: &[u8]) -> MetaStoreResult<Vec<u8>> {
        let resp = self
            .client
            .kv_client()
            .get(encode_key(cf, key), None)
            .await
            .map_err(transport_err)?;
        match resp.kvs().first() {
            Some(kv) => Ok(kv.value().to_vec()),
            None => Err(MetaStoreError::ItemNotFound(format!(
                "{}/{}",
                cf,
                hex::encode(key)
            ))),
        }
    }

    async fn put_cf(&self, cf: &str, key: Vec<u8>, value: Vec<u8>) -> MetaStoreResult<()> {
        self.client
            .kv_client()
            .put(encode_key(cf, &key), value, None)
            .await
            .map_err(transport_err)?;
        Ok(())
    }

    async fn delete_cf(&self, cf: &str, key: &[u8]) -> MetaStoreResult<()> {
        self.client
            .kv_client()
            .delete(encode_key(cf, key), None)
            .await
            .map_err(transport_err)?;
        Ok(())
    }

    async fn subscribe(&self) -> MetaStoreResult<UnboundedReceiver<MetaStoreEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        Ok(rx)
    }

    async fn lock(&self, name: &str) -> MetaStoreResult<()> {
        let resp = self
            .client
            .lock_client()
            .lock(format!("{}{}", LOCK_PREFIX, name), None)
            .await
            .map_err(transport_err)?;
        self.lock_keys
            .lock()
            .insert(name.to_string(), resp.key().to_vec());
        Ok(())
    }

    async fn unlock(&self, name: &str) -> MetaStoreResult<()> {
        let key = self.lock_keys.lock().remove(name).ok_or_else(|| {
            MetaStoreError::Internal(anyhow::anyhow!("advisory lock {} is not held", name))
        })?;
        self.client
            .lock_client()
            .unlock(key)
            .await
            .map_err(transport_err)?;
        Ok(())
    }
}
