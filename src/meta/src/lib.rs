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

//! Cluster metadata coordination core of the ChronoWave front-end.
//!
//! Holds the authoritative in-memory view of the cluster topology —
//! front-end nodes, storage engines, storage units and time-series
//! fragments — durably backed by a pluggable coordination-service store,
//! and splits logical read/write plans onto the replicas owning the
//! addressed (series, time) regions.

mod error;
pub mod manager;
pub mod model;
pub mod split;
pub mod storage;

pub use error::{MetaError, MetaResult};
