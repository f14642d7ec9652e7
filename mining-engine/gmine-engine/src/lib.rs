// Copyright 2022 The Gmine Authors
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

//! Out-of-core graph-mining execution engine.
//!
//! A mining workload is a sequence of phases that grow and shuffle vertex
//! tuples over a partitioned on-disk labeled graph. Each phase streams the
//! per-partition update files from disk, joins tuples against an in-memory
//! edge index, and re-partitions the results to disk for the next phase.

pub mod config;
pub mod mining_phase;
pub mod partition;
pub mod pattern;
pub mod tuple;

pub use config::EngineConfig;
pub use gmine_commons::{EngineError, Result};
pub use mining_phase::{MiningEngine, StreamId};
