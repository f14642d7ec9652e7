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

use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Error type shared by the engine crates. A phase has no partial success:
/// the first error aborts the whole phase.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid meta file: {0}")]
    InvalidMeta(String),

    /// An on-disk stream violated a tuple integrity invariant, which points
    /// at corruption in the phase that produced it.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    /// A shuffle buffer was aborted while this thread was blocked on it,
    /// meaning a writer already failed and the phase is going down.
    #[error("shuffle buffer aborted")]
    BufferAborted,
}
