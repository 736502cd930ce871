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

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror_ext::AsReport;
use tokio::task::JoinHandle;

use super::cache::MetaCache;
use super::cluster::ClusterManagerRef;
use super::env::MetaSrvEnv;
use super::fragment::FragmentManagerRef;
use crate::model::{
    Fragment, FrontendNode, MetadataModel, SchemaMapping, StorageEngine, StorageUnit, UserInfo,
};
use crate::storage::{MetaStore, MetaStoreEvent, Operation};
use crate::MetaResult;

/// Hook invoked on surviving remote storage-engine events. Runs on the
/// dispatcher worker and must not block; failures are logged and do not
/// stop the fan-out.
pub type StorageEngineChangeHook = Box<dyn Fn(&StorageEngine) -> anyhow::Result<()> + Send + Sync>;

/// [`ChangeDispatcher`] owns the store subscription: one worker task reduces
/// the remote change feed into cache mutations, applying the skip-self /
/// skip-initial / pre-bootstrap filters, and fans engine events out to the
/// registered hooks in order.
///
/// The worker never takes a meta-store advisory lock, so it cannot deadlock
/// against batch creation paths holding them.
pub struct ChangeDispatcher {
    hooks: Arc<RwLock<Vec<StorageEngineChangeHook>>>,
    handle: JoinHandle<()>,
}

impl ChangeDispatcher {
    pub async fn start<S: MetaStore>(
        env: MetaSrvEnv<S>,
        cache: Arc<MetaCache>,
        cluster: ClusterManagerRef<S>,
        fragment: FragmentManagerRef<S>,
    ) -> MetaResult<Self> {
        let mut rx = env.meta_store().subscribe().await?;
        let hooks: Arc<RwLock<Vec<StorageEngineChangeHook>>> = Arc::new(RwLock::new(Vec::new()));

        let worker_hooks = hooks.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatch(&cache, &cluster, &fragment, &worker_hooks, event);
            }
        });
        Ok(Self { hooks, handle })
    }

    /// Append an engine-change hook to the ordered fan-out list.
    pub fn register_storage_engine_change_hook(&self, hook: StorageEngineChangeHook) {
        self.hooks.write().push(hook);
    }
}

impl Drop for ChangeDispatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn dispatch<S: MetaStore>(
    cache: &MetaCache,
    cluster: &ClusterManagerRef<S>,
    fragment: &FragmentManagerRef<S>,
    hooks: &RwLock<Vec<StorageEngineChangeHook>>,
    event: MetaStoreEvent,
) {
    let cf = event.cf.as_str();
    if cf == FrontendNode::cf_name() {
        match decoded::<FrontendNode>(&event) {
            Some(node) => cluster.apply_node_update(node),
            None => {
                if event.op == Operation::Delete {
                    if let Ok(raw) = <[u8; 8]>::try_from(event.key.as_slice()) {
                        cluster.apply_node_delete(u64::from_be_bytes(raw));
                    }
                }
            }
        }
    } else if cf == StorageEngine::cf_name() {
        match decoded::<StorageEngine>(&event) {
            Some(engine) => {
                if let Some(engine) = cluster.apply_storage_engine_event(engine) {
                    for hook in hooks.read().iter() {
                        if let Err(err) = hook(&engine) {
                            tracing::warn!(error = ?err, "storage engine change hook failed");
                        }
                    }
                }
            }
            // Engines are never destroyed in the core.
            None => tracing::warn!("ignoring storage engine removal event"),
        }
    } else if cf == StorageUnit::cf_name() {
        match decoded::<StorageUnit>(&event) {
            Some(unit) => cluster.apply_storage_unit_event(unit),
            None => tracing::warn!("ignoring storage unit removal event"),
        }
    } else if cf == Fragment::cf_name() {
        match decoded::<Fragment>(&event) {
            Some(fragment_event) => {
                let is_create = !cache.contains_fragment(&fragment_event.key());
                fragment.apply_fragment_event(fragment_event, is_create);
            }
            None => tracing::warn!("ignoring fragment removal event"),
        }
    } else if cf == UserInfo::cf_name() {
        // User writes carry no originating node; reapplying a local echo is
        // an idempotent overwrite.
        match decoded::<UserInfo>(&event) {
            Some(user) => cache.install_user(user),
            None => {
                if let Ok(username) = std::str::from_utf8(&event.key) {
                    cache.remove_user(username);
                }
            }
        }
    } else if cf == SchemaMapping::cf_name() {
        match decoded::<SchemaMapping>(&event) {
            Some(SchemaMapping { name, mapping }) => {
                cache.add_or_update_schema_mapping(&name, mapping)
            }
            None => {
                if let Ok(name) = std::str::from_utf8(&event.key) {
                    cache.remove_schema_mapping(name);
                }
            }
        }
    }
    // Anything else (id-generator cursors and other bookkeeping) is not an
    // entity change.
}

/// Decode the event payload; `None` for deletions or undecodable values
/// (logged).
fn decoded<M: MetadataModel>(event: &MetaStoreEvent) -> Option<M> {
    let value = event.value.as_ref()?;
    match M::decode(value) {
        Ok(model) => Some(model),
        Err(err) => {
            tracing::warn!(
                error = %err.as_report(),
                cf = %event.cf,
                "failed to decode change event",
            );
            None
        }
    }
}
