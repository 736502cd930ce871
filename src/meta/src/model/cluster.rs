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
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{EngineId, MetadataModel, NodeId, StorageUnitId};
use crate::MetaError;

/// Column family name for front-end nodes.
const NODE_CF_NAME: &str = "cf/node";
/// Column family name for storage engines.
const STORAGE_ENGINE_CF_NAME: &str = "cf/storage_engine";
/// Column family name for storage units.
const STORAGE_UNIT_CF_NAME: &str = "cf/storage_unit";

/// One front-end process participating in the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendNode {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

impl MetadataModel for FrontendNode {
    type KeyType = NodeId;

    fn cf_name() -> String {
        NODE_CF_NAME.to_string()
    }

    fn key(&self) -> NodeId {
        self.id
    }
}

/// Kind of physical backend database an engine endpoint speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    InfluxDb,
    TimescaleDb,
    /// In-memory engine used by tests and demos.
    Memory,
}

impl FromStr for EngineKind {
    type Err = MetaError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "influxdb" => Ok(EngineKind::InfluxDb),
            "timescaledb" => Ok(EngineKind::TimescaleDb),
            "memory" | "mem" => Ok(EngineKind::Memory),
            other => Err(MetaError::unsupported(format!(
                "unknown storage engine kind {other:?}"
            ))),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineKind::InfluxDb => "influxdb",
            EngineKind::TimescaleDb => "timescaledb",
            EngineKind::Memory => "memory",
        };
        write!(f, "{}", name)
    }
}

/// A physical storage backend instance. Engines are created by operator
/// command and never destroyed by the metadata core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEngine {
    pub id: EngineId,
    pub host: String,
    pub port: u16,
    pub kind: EngineKind,
    pub parameters: HashMap<String, String>,
    pub created_by: NodeId,
}

impl StorageEngine {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl MetadataModel for StorageEngine {
    type KeyType = EngineId;

    fn cf_name() -> String {
        STORAGE_ENGINE_CF_NAME.to_string()
    }

    fn key(&self) -> EngineId {
        self.id
    }
}

/// A logical slot inside a storage engine. A unit is a master iff
/// `master_id == id`; masters carry the ids of their replicas, replicas
/// point back at their master. Units reference each other by id only — the
/// cache owns the object graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub id: StorageUnitId,
    pub engine_id: EngineId,
    pub master_id: StorageUnitId,
    /// Ids of the replicas, master only.
    pub replicas: Vec<StorageUnitId>,
    /// Set iff the unit was created by the cluster-bootstrap path.
    pub initial: bool,
    pub created_by: NodeId,
}

impl StorageUnit {
    /// A master proposal with a caller-chosen placeholder id; real ids are
    /// assigned when the batch is published.
    pub fn new_master(id: impl Into<StorageUnitId>, engine_id: EngineId) -> Self {
        let id = id.into();
        Self {
            master_id: id.clone(),
            id,
            engine_id,
            replicas: Vec::new(),
            initial: false,
            created_by: 0,
        }
    }

    pub fn new_replica(
        id: impl Into<StorageUnitId>,
        engine_id: EngineId,
        master_id: impl Into<StorageUnitId>,
    ) -> Self {
        Self {
            id: id.into(),
            engine_id,
            master_id: master_id.into(),
            replicas: Vec::new(),
            initial: false,
            created_by: 0,
        }
    }

    pub fn is_master(&self) -> bool {
        self.id == self.master_id
    }
}

impl MetadataModel for StorageUnit {
    type KeyType = StorageUnitId;

    fn cf_name() -> String {
        STORAGE_UNIT_CF_NAME.to_string()
    }

    fn key(&self) -> StorageUnitId {
        self.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("InfluxDB".parse::<EngineKind>().unwrap(), EngineKind::InfluxDb);
        assert_eq!("mem".parse::<EngineKind>().unwrap(), EngineKind::Memory);
        assert!("leveldb".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_unit_roles() {
        let master = StorageUnit::new_master("unit00000001", 1);
        assert!(master.is_master());
        let replica = StorageUnit::new_replica("unit00000002", 2, "unit00000001");
        assert!(!replica.is_master());
        assert_eq!(replica.master_id, master.id);
    }
}
