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

//! Per-partition shuffle buffers shared by all producers and all writers of
//! one phase.
//!
//! A buffer holds one io-size window of encoded tuples. Producers `insert`
//! whole tuples and block while the buffer is full; writers `flush` full
//! buffers during the phase and `flush_end` every buffer exactly once after
//! the producers have terminated. Every inserted byte reaches the partition
//! file exactly once; ordering within a partition is not guaranteed.

use std::fs::{File, OpenOptions};
use std::path::Path;

use parking_lot::{Condvar, Mutex};

use crate::error::{EngineError, Result};
use crate::io;

struct BufState {
    data: Vec<u8>,
    aborted: bool,
}

pub struct ShuffleBuffer {
    /// Byte capacity, normalized to a whole number of tuples.
    capacity: usize,
    state: Mutex<BufState>,
    not_full: Condvar,
    /// Serializes file appends so a concurrent `flush` and `flush_end` can
    /// never interleave bytes within the partition file.
    flush_lock: Mutex<()>,
}

impl ShuffleBuffer {
    pub fn new(io_size: usize, tuple_width: usize) -> Self {
        debug_assert!(tuple_width > 0 && io_size >= tuple_width);
        let capacity = io_size - io_size % tuple_width;
        Self {
            capacity,
            state: Mutex::new(BufState {
                data: Vec::with_capacity(capacity),
                aborted: false,
            }),
            not_full: Condvar::new(),
            flush_lock: Mutex::new(()),
        }
    }

    /// Append one encoded tuple, blocking while the buffer is full.
    pub fn insert(&self, bytes: &[u8]) -> Result<()> {
        debug_assert!(!bytes.is_empty() && bytes.len() <= self.capacity);
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Err(EngineError::BufferAborted);
            }
            if state.data.len() + bytes.len() <= self.capacity {
                break;
            }
            self.not_full.wait(&mut state);
        }
        state.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Drain the buffer to `path` if it is full, swapping its storage so
    /// blocked producers resume while the swapped bytes are written out.
    /// Returns whether anything was written.
    pub fn flush(&self, path: &Path) -> Result<bool> {
        let _flush = self.flush_lock.lock();
        let swapped = {
            let mut state = self.state.lock();
            if state.data.len() < self.capacity {
                return Ok(false);
            }
            std::mem::replace(&mut state.data, Vec::with_capacity(self.capacity))
        };
        self.not_full.notify_all();
        log::debug!("flushing {} bytes to {}", swapped.len(), path.display());
        io::append(&self.open_output(path)?, &swapped)?;
        Ok(true)
    }

    /// Unconditional terminal drain. Must be called exactly once per buffer
    /// after all producers have terminated; releases the storage and creates
    /// the partition file even when nothing is left to write.
    pub fn flush_end(&self, path: &Path) -> Result<()> {
        let _flush = self.flush_lock.lock();
        let swapped = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.data)
        };
        io::append(&self.open_output(path)?, &swapped)?;
        Ok(())
    }

    /// Poison the buffer and wake all blocked inserters. Used by writers on
    /// the error path so producers do not wait forever on a buffer nobody
    /// will drain.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.not_full.notify_all();
    }

    pub fn buffered_bytes(&self) -> usize {
        self.state.lock().data.len()
    }

    fn open_output(&self, path: &Path) -> Result<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }
}

/// Buffer manager: allocates the per-phase array of shuffle buffers, one per
/// output partition, each sized to one io window of `tuple_width`-byte
/// tuples.
pub fn alloc_shuffle_buffers(
    num_partitions: usize,
    tuple_width: usize,
    io_size: usize,
) -> Vec<ShuffleBuffer> {
    (0..num_partitions)
        .map(|_| ShuffleBuffer::new(io_size, tuple_width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn flush_skips_non_full_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.0");
        let buffer = ShuffleBuffer::new(64, 8);

        buffer.insert(&[1u8; 8]).unwrap();
        assert!(!buffer.flush(&path).unwrap());
        assert!(!path.exists());
        assert_eq!(buffer.buffered_bytes(), 8);
    }

    #[test]
    fn flush_drains_full_buffer_and_frees_room() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.0");
        let buffer = ShuffleBuffer::new(16, 8);

        buffer.insert(&[1u8; 8]).unwrap();
        buffer.insert(&[2u8; 8]).unwrap();
        assert!(buffer.flush(&path).unwrap());
        assert_eq!(buffer.buffered_bytes(), 0);

        buffer.insert(&[3u8; 8]).unwrap();
        buffer.flush_end(&path).unwrap();

        let mut expected = vec![1u8; 8];
        expected.extend_from_slice(&[2u8; 8]);
        expected.extend_from_slice(&[3u8; 8]);
        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }

    #[test]
    fn flush_end_creates_empty_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.0");
        let buffer = ShuffleBuffer::new(16, 8);
        buffer.flush_end(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 0);
    }

    #[test]
    fn capacity_rounds_down_to_whole_tuples() {
        let buffer = ShuffleBuffer::new(20, 8);
        buffer.insert(&[0u8; 8]).unwrap();
        buffer.insert(&[0u8; 8]).unwrap();
        // 16 of 20 bytes used; a third tuple must not fit
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.0");
        assert!(buffer.flush(&path).unwrap());
    }

    #[test]
    fn abort_unblocks_a_waiting_inserter() {
        let buffer = ShuffleBuffer::new(8, 8);
        buffer.insert(&[0u8; 8]).unwrap();

        std::thread::scope(|scope| {
            let inserter = scope.spawn(|| buffer.insert(&[1u8; 8]));
            std::thread::sleep(std::time::Duration::from_millis(50));
            buffer.abort();
            let result = inserter.join().unwrap();
            assert!(matches!(result, Err(EngineError::BufferAborted)));
        });
    }

    /// Many producers inserting against one concurrently flushing writer:
    /// every byte must land on disk exactly once.
    #[test]
    fn concurrent_inserts_lose_nothing() {
        const TUPLE_WIDTH: usize = 16;
        const PRODUCERS: usize = 4;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.0");
        let buffer = ShuffleBuffer::new(8 * TUPLE_WIDTH, TUPLE_WIDTH);
        let live = AtomicUsize::new(PRODUCERS);
        let total = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for producer in 0..PRODUCERS {
                let buffer = &buffer;
                let live = &live;
                let total = &total;
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(producer as u64);
                    let count = 100 + rng.random_range(0..100usize);
                    for _ in 0..count {
                        let tuple = [rng.random::<u8>(); TUPLE_WIDTH];
                        buffer.insert(&tuple).unwrap();
                    }
                    total.fetch_add(count * TUPLE_WIDTH, Ordering::Release);
                    live.fetch_sub(1, Ordering::Release);
                });
            }

            let writer = scope.spawn(|| {
                while live.load(Ordering::Acquire) > 0 {
                    if !buffer.flush(&path).unwrap() {
                        std::thread::yield_now();
                    }
                }
                buffer.flush_end(&path).unwrap();
            });
            writer.join().unwrap();
        });

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), total.load(Ordering::Acquire));
    }
}
