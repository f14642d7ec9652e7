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

//! Bounded MPMC queue of task descriptors.
//!
//! The queue is fully populated before worker threads start, so an empty
//! `try_pop` is the terminal signal for a worker. Ordering between poppers
//! is unspecified.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::error::{EngineError, Result};

pub struct TaskQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> TaskQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// Enqueue one task. Succeeds while capacity remains.
    pub fn push(&self, task: T) -> Result<()> {
        self.tx.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => {
                EngineError::InvalidConfig("task queue pushed over capacity".into())
            }
            // the queue owns both endpoints
            TrySendError::Disconnected(_) => {
                EngineError::InvalidConfig("task queue disconnected".into())
            }
        })
    }

    /// Non-blocking pop; `None` iff the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_everything_then_reports_empty() {
        let queue = TaskQueue::with_capacity(4);
        for partition in 0..4 {
            queue.push(partition).unwrap();
        }
        assert_eq!(queue.len(), 4);

        let mut popped = Vec::new();
        while let Some(task) = queue.try_pop() {
            popped.push(task);
        }
        popped.sort_unstable();
        assert_eq!(popped, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn push_over_capacity_fails() {
        let queue = TaskQueue::with_capacity(1);
        queue.push(0).unwrap();
        assert!(queue.push(1).is_err());
    }
}
