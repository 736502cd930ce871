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

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("malformed storage engine entry {entry:?}: {reason}")]
    MalformedEngine { entry: String, reason: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Configuration of one front-end process, read once at construction.
///
/// All fields have defaults so a bare `[meta]` section boots a single-node
/// file-backed instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaConfig {
    /// Advertised address of this front-end node.
    #[serde(default = "default::host")]
    pub host: String,
    #[serde(default = "default::port")]
    pub port: u16,

    /// Which coordination-service backend stores the durable metadata.
    /// One of `"etcd"`, `"file"`, `"zookeeper"` or empty; empty or unknown
    /// values fall back to the file backend.
    #[serde(default)]
    pub meta_storage: String,
    /// Endpoints of the coordination service, e.g. `["http://etcd-0:2379"]`.
    #[serde(default)]
    pub meta_storage_endpoints: Vec<String>,
    /// Data file used by the file backend.
    #[serde(default = "default::file_data_path")]
    pub file_data_path: String,

    /// Number of replicas per fragment in addition to the master. Fragments
    /// are placed on `1 + replica_num` storage engines, sampled uniformly
    /// when more engines exist.
    #[serde(default = "default::replica_num")]
    pub replica_num: usize,
    /// Fragments created per storage engine when rebalancing.
    #[serde(default = "default::fragment_per_engine")]
    pub fragment_per_engine: usize,
    /// Number of recorded series-prefix observations that triggers a flush
    /// of the workload statistics. Grows by the same amount on every flush.
    #[serde(default = "default::prefix_flush_threshold")]
    pub prefix_flush_threshold: usize,

    /// Statically configured storage engines, entered as
    /// `host#port#kind#key=value#...`, comma separated.
    #[serde(default)]
    pub storage_engine_list: String,

    #[serde(default = "default::admin_username")]
    pub admin_username: String,
    #[serde(default = "default::admin_password")]
    pub admin_password: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        toml::from_str("").unwrap()
    }
}

mod default {
    pub fn host() -> String {
        "127.0.0.1".to_string()
    }

    pub fn port() -> u16 {
        6888
    }

    pub fn file_data_path() -> String {
        "./chronowave-meta.json".to_string()
    }

    pub fn replica_num() -> usize {
        1
    }

    pub fn fragment_per_engine() -> usize {
        10
    }

    pub fn prefix_flush_threshold() -> usize {
        100
    }

    pub fn admin_username() -> String {
        "root".to_string()
    }

    pub fn admin_password() -> String {
        "root".to_string()
    }
}

/// One entry parsed out of [`MetaConfig::storage_engine_list`]. The `kind`
/// stays a string here; the metadata layer maps it onto its engine enum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEngineConfig {
    pub host: String,
    pub port: u16,
    pub kind: String,
    pub parameters: HashMap<String, String>,
}

impl MetaConfig {
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Parse the static storage engine list. Fields are `#`-separated with
    /// `key=value` (or legacy `key"value`) parameter entries after the
    /// mandatory host, port and kind fields.
    pub fn storage_engines(&self) -> ConfigResult<Vec<StorageEngineConfig>> {
        let mut engines = Vec::new();
        for entry in self
            .storage_engine_list
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
        {
            let mut fields = entry.split('#');
            let (host, port, kind) = match (fields.next(), fields.next(), fields.next()) {
                (Some(h), Some(p), Some(k)) if !h.is_empty() && !k.is_empty() => {
                    let port = p.parse::<u16>().map_err(|_| ConfigError::MalformedEngine {
                        entry: entry.to_string(),
                        reason: format!("invalid port {p:?}"),
                    })?;
                    (h.to_string(), port, k.to_string())
                }
                _ => {
                    return Err(ConfigError::MalformedEngine {
                        entry: entry.to_string(),
                        reason: "expected at least host#port#kind".to_string(),
                    })
                }
            };
            let mut parameters = HashMap::new();
            for field in fields {
                let (key, value) = field
                    .split_once('=')
                    .or_else(|| field.split_once('"'))
                    .ok_or_else(|| ConfigError::MalformedEngine {
                        entry: entry.to_string(),
                        reason: format!("parameter {field:?} has no separator"),
                    })?;
                parameters.insert(key.to_string(), value.to_string());
            }
            engines.push(StorageEngineConfig {
                host,
                port,
                kind,
                parameters,
            });
        }
        Ok(engines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MetaConfig::default();
        assert_eq!(config.port, 6888);
        assert_eq!(config.replica_num, 1);
        assert!(config.meta_storage.is_empty());
        assert!(config.storage_engines().unwrap().is_empty());
    }

    #[test]
    fn test_parse_engine_list() {
        let config = MetaConfig {
            storage_engine_list:
                "db-0#8086#influxdb#token=abc#org=cw, db-1#8086#influxdb, ts-2#5432#timescaledb#sslmode\"require"
                    .to_string(),
            ..Default::default()
        };
        let engines = config.storage_engines().unwrap();
        assert_eq!(engines.len(), 3);
        assert_eq!(engines[0].host, "db-0");
        assert_eq!(engines[0].port, 8086);
        assert_eq!(engines[0].kind, "influxdb");
        assert_eq!(engines[0].parameters["token"], "abc");
        assert_eq!(engines[0].parameters["org"], "cw");
        assert!(engines[1].parameters.is_empty());
        // Legacy quote separator.
        assert_eq!(engines[2].parameters["sslmode"], "require");
    }

    #[test]
    fn test_parse_engine_list_errors() {
        let bad_port = MetaConfig {
            storage_engine_list: "db-0#eighty#influxdb".to_string(),
            ..Default::default()
        };
        assert!(bad_port.storage_engines().is_err());

        let missing_kind = MetaConfig {
            storage_engine_list: "db-0#8086".to_string(),
            ..Default::default()
        };
        assert!(missing_kind.storage_engines().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = MetaConfig::from_toml_str(
            r#"
            host = "10.0.0.3"
            meta_storage = "etcd"
            meta_storage_endpoints = ["http://etcd-0:2379"]
            replica_num = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "10.0.0.3");
        assert_eq!(config.meta_storage, "etcd");
        assert_eq!(config.replica_num, 2);
        // Unchanged defaults are still filled in.
        assert_eq!(config.fragment_per_engine, 10);
    }
}
