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

//! Shared plumbing for the mining engine: the crate-wide error type,
//! positional file I/O, the partition task queue and the global shuffle
//! buffers drained by writer threads.

pub mod error;
pub mod io;
pub mod shuffle_buffer;
pub mod task_queue;

pub use error::{EngineError, Result};
