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

//! Engine construction parameters.

use std::path::PathBuf;

use gmine_commons::{EngineError, Result};

pub const DEFAULT_IO_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Static configuration of one engine instance. No environment variables,
/// no CLI at this layer.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base path of the partitioned graph: `{base}.meta`, `{base}.{p}` and
    /// `{base}.{p}.update_stream_{U}` all derive from it.
    pub base_path: PathBuf,
    pub num_partitions: usize,
    pub num_exec_threads: usize,
    pub num_write_threads: usize,
    /// Streaming window and shuffle-buffer size, in bytes.
    pub io_size: usize,
    pub page_size: usize,
}

impl EngineConfig {
    pub fn new(base_path: impl Into<PathBuf>, num_partitions: usize) -> Self {
        Self {
            base_path: base_path.into(),
            num_partitions,
            num_exec_threads: 3,
            num_write_threads: 1,
            io_size: DEFAULT_IO_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_partitions == 0 {
            return Err(EngineError::InvalidConfig(
                "num_partitions must be positive".into(),
            ));
        }
        if self.num_exec_threads == 0 || self.num_write_threads == 0 {
            return Err(EngineError::InvalidConfig(
                "producer and writer thread counts must be positive".into(),
            ));
        }
        if self.page_size == 0 || self.io_size == 0 || self.io_size % self.page_size != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "io_size {} must be a positive multiple of page_size {}",
                self.io_size, self.page_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::new("graph", 4).validate().is_ok());
    }

    #[test]
    fn misaligned_io_size_is_rejected() {
        let mut config = EngineConfig::new("graph", 4);
        config.io_size = 1000;
        assert!(config.validate().is_err());

        config.io_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_partitions_are_rejected() {
        assert!(EngineConfig::new("graph", 0).validate().is_err());
    }
}
