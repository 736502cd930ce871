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

use super::cache::MetaCache;
use super::env::MetaSrvEnv;
use crate::model::{MetadataModel, SchemaMapping, SCHEMA_MAPPING_ABSENT};
use crate::storage::MetaStore;
use crate::MetaResult;

/// [`SchemaMappingManager`] maintains the named key → integer mappings the
/// upper layers use for schema translation.
pub struct SchemaMappingManager<S: MetaStore> {
    env: MetaSrvEnv<S>,
    cache: Arc<MetaCache>,
}

impl<S: MetaStore> SchemaMappingManager<S> {
    pub async fn new(env: MetaSrvEnv<S>, cache: Arc<MetaCache>) -> MetaResult<Self> {
        for SchemaMapping { name, mapping } in SchemaMapping::list(env.meta_store()).await? {
            cache.add_or_update_schema_mapping(&name, mapping);
        }
        Ok(Self { env, cache })
    }

    /// Replace a whole mapping; `None` removes it.
    pub async fn add_or_update_schema_mapping(
        &self,
        name: &str,
        mapping: Option<HashMap<String, i64>>,
    ) -> MetaResult<()> {
        match mapping {
            Some(mapping) => {
                SchemaMapping {
                    name: name.to_string(),
                    mapping: mapping.clone(),
                }
                .insert(self.env.meta_store())
                .await?;
                self.cache.add_or_update_schema_mapping(name, mapping);
            }
            None => {
                SchemaMapping::delete(self.env.meta_store(), &name.to_string()).await?;
                self.cache.remove_schema_mapping(name);
            }
        }
        Ok(())
    }

    /// Update one entry of a mapping, creating the mapping on first use.
    /// The value [`SCHEMA_MAPPING_ABSENT`] removes the key; the mapping
    /// itself stays, possibly empty.
    pub async fn add_or_update_schema_mapping_item(
        &self,
        name: &str,
        key: &str,
        value: i64,
    ) -> MetaResult<()> {
        let mut mapping = self.cache.get_schema_mapping(name).unwrap_or_default();
        if value == SCHEMA_MAPPING_ABSENT {
            mapping.remove(key);
        } else {
            mapping.insert(key.to_string(), value);
        }
        SchemaMapping {
            name: name.to_string(),
            mapping: mapping.clone(),
        }
        .insert(self.env.meta_store())
        .await?;
        self.cache.add_or_update_schema_mapping(name, mapping);
        Ok(())
    }

    pub fn get_schema_mapping(&self, name: &str) -> Option<HashMap<String, i64>> {
        self.cache.get_schema_mapping(name)
    }

    /// The value mapped for `key`, or [`SCHEMA_MAPPING_ABSENT`].
    pub fn get_schema_mapping_item(&self, name: &str, key: &str) -> i64 {
        self.cache
            .get_schema_mapping(name)
            .and_then(|m| m.get(key).copied())
            .unwrap_or(SCHEMA_MAPPING_ABSENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_item_update_and_remove() {
        let env = MetaSrvEnv::for_test().await;
        let cache = Arc::new(MetaCache::default());
        let manager = SchemaMappingManager::new(env.clone(), cache).await.unwrap();

        manager
            .add_or_update_schema_mapping_item("s", "k", 42)
            .await
            .unwrap();
        assert_eq!(manager.get_schema_mapping_item("s", "k"), 42);

        // The tombstone value removes the key but keeps the mapping.
        manager
            .add_or_update_schema_mapping_item("s", "k", SCHEMA_MAPPING_ABSENT)
            .await
            .unwrap();
        assert_eq!(manager.get_schema_mapping_item("s", "k"), SCHEMA_MAPPING_ABSENT);
        assert!(manager.get_schema_mapping("s").unwrap().is_empty());

        // The store holds the mapping without the key.
        let persisted = SchemaMapping::select(env.meta_store(), &"s".to_string())
            .await
            .unwrap()
            .unwrap();
        assert!(!persisted.mapping.contains_key("k"));
    }

    #[tokio::test]
    async fn test_whole_mapping_replace_and_remove() {
        let env = MetaSrvEnv::for_test().await;
        let cache = Arc::new(MetaCache::default());
        let manager = SchemaMappingManager::new(env.clone(), cache).await.unwrap();

        manager
            .add_or_update_schema_mapping("s", Some(HashMap::from([("a".to_string(), 1)])))
            .await
            .unwrap();
        assert_eq!(manager.get_schema_mapping_item("s", "a"), 1);

        manager.add_or_update_schema_mapping("s", None).await.unwrap();
        assert!(manager.get_schema_mapping("s").is_none());
        assert!(SchemaMapping::select(env.meta_store(), &"s".to_string())
            .await
            .unwrap()
            .is_none());

        // Mappings survive a reload through a fresh manager.
        manager
            .add_or_update_schema_mapping_item("t", "x", 7)
            .await
            .unwrap();
        let cache = Arc::new(MetaCache::default());
        let reloaded = SchemaMappingManager::new(env, cache).await.unwrap();
        assert_eq!(reloaded.get_schema_mapping_item("t", "x"), 7);
    }
}
