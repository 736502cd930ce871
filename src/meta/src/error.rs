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

use thiserror::Error;

use crate::storage::MetaStoreError;

pub type MetaResult<T> = std::result::Result<T, MetaError>;

#[derive(Error, Debug)]
pub enum MetaError {
    /// Transport, serialization, session or lock failure in the backing
    /// coordination service.
    #[error("meta store error: {0}")]
    MetaStore(#[from] MetaStoreError),

    /// A cache-consistency anomaly. Surfaced to callers only where the
    /// operation cannot proceed; otherwise logged at the detection site.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Reserved; not currently raised.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("{kind} {name} already exists")]
    Duplicated { kind: &'static str, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl MetaError {
    pub fn invariant_violation(msg: impl Into<String>) -> Self {
        MetaError::InvariantViolation(msg.into())
    }

    pub fn duplicated(kind: &'static str, name: impl Into<String>) -> Self {
        MetaError::Duplicated {
            kind,
            name: name.into(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        MetaError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        MetaError::Unsupported(msg.into())
    }
}

impl From<serde_json::Error> for MetaError {
    fn from(err: serde_json::Error) -> Self {
        MetaError::MetaStore(MetaStoreError::from(err))
    }
}
