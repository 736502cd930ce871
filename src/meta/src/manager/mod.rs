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

mod cache;
mod cluster;
mod env;
mod fragment;
mod id;
mod meta_manager;
mod notification;
mod schema;
mod user;

pub use cache::MetaCache;
pub use cluster::{ClusterManager, ClusterManagerRef};
pub use env::{MetaOpts, MetaSrvEnv};
pub use fragment::{FragmentManager, FragmentManagerRef};
pub use id::{
    format_storage_unit_id, IdCategory, IdCategoryType, IdGeneratorManager, IdGeneratorManagerRef,
    SnowflakeIdGenerator, StoredIdGenerator,
};
pub use meta_manager::{MetaManager, MetaManagerRef};
pub use notification::{ChangeDispatcher, StorageEngineChangeHook};
pub use schema::SchemaMappingManager;
pub use user::UserManager;
