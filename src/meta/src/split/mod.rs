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

mod downsample;
mod plan;
mod splitter;

pub use downsample::{split_downsample_intervals, DownsampleShard};
pub use plan::{
    time_interval_of_samples, AggregateKind, LogicalPlan, PlanKind, SplitInfo,
};
pub use splitter::{DefaultFragmentGenerator, FragmentGenerator, PlanSplitter};
