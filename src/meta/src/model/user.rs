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

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::MetadataModel;

/// Column family name for users.
const USER_CF_NAME: &str = "cf/user";
/// Column family name for schema mappings.
const SCHEMA_MAPPING_CF_NAME: &str = "cf/schema_mapping";

/// Value returned for a schema-mapping key that is absent; writing it
/// removes the key.
pub const SCHEMA_MAPPING_ABSENT: i64 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    Administrator,
    Normal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Auth {
    Read,
    Write,
    Admin,
    Cluster,
}

impl Auth {
    pub fn all() -> HashSet<Auth> {
        HashSet::from([Auth::Read, Auth::Write, Auth::Admin, Auth::Cluster])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    pub password: String,
    pub kind: UserKind,
    pub auths: HashSet<Auth>,
}

impl MetadataModel for UserInfo {
    type KeyType = String;

    fn cf_name() -> String {
        USER_CF_NAME.to_string()
    }

    fn key(&self) -> String {
        self.username.clone()
    }
}

/// A named mapping from string keys to integers, maintained by upper layers
/// for schema translation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMapping {
    pub name: String,
    pub mapping: HashMap<String, i64>,
}

impl MetadataModel for SchemaMapping {
    type KeyType = String;

    fn cf_name() -> String {
        SCHEMA_MAPPING_CF_NAME.to_string()
    }

    fn key(&self) -> String {
        self.name.clone()
    }
}
