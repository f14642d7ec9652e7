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

//! The mining-phase pipeline.
//!
//! Every primitive shares one skeleton: a task queue holding all partition
//! IDs, one shuffle buffer per output partition, `num_exec_threads`
//! streaming producers and `num_write_threads` writers. Producers pop a
//! partition, build its edge index, stream its update file in io-size
//! windows and push result tuples into the shuffle buffers; writers flush
//! full buffers while producers are live and drain every buffer exactly
//! once afterwards. A phase blocks until both pools are done.

use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::thread;

use smallvec::SmallVec;

use gmine_commons::io;
use gmine_commons::shuffle_buffer::{ShuffleBuffer, alloc_shuffle_buffers};
use gmine_commons::task_queue::TaskQueue;
use gmine_commons::{EngineError, Result};

use crate::config::EngineConfig;
use crate::partition::{GraphMeta, graph_file};
use crate::pattern::is_automorphism;
use crate::tuple::{
    EDGE_WIDTH, ELEMENT_WIDTH, EdgeHashmap, Element, LabeledEdge, VertexId, decode_tuple,
    encode_tuple,
};

/// Identifier of an update stream: the set of per-partition files
/// `{base}.{p}.update_stream_{U}` written by one phase. Minted from a
/// monotonic counter that lives as long as the engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Atomic counters coordinating one phase; rebuilt at every phase entry.
struct PhaseState {
    /// Live producer threads; zero moves writers to the terminal drain.
    num_producers: AtomicUsize,
    /// Round-robin cursor of the concurrent-flush loop.
    flush_cursor: AtomicUsize,
    /// Terminal-drain cursor, seeded at `num_partitions`; predecrement hands
    /// each partition to exactly one writer.
    drain_cursor: AtomicI64,
}

/// Everything a producer or writer of one phase needs to share.
struct PhaseContext<'a> {
    config: &'a EngineConfig,
    meta: &'a GraphMeta,
    buffers: &'a [ShuffleBuffer],
    out_stream: StreamId,
    in_width: usize,
    out_width: usize,
}

impl PhaseContext<'_> {
    fn out_path(&self, partition: usize) -> PathBuf {
        graph_file(
            &self.config.base_path,
            &format!(".{partition}.update_stream_{}", self.out_stream),
        )
    }

    fn in_path(&self, partition: usize, in_stream: StreamId) -> PathBuf {
        graph_file(
            &self.config.base_path,
            &format!(".{partition}.update_stream_{in_stream}"),
        )
    }

    fn edge_path(&self, partition: usize) -> PathBuf {
        graph_file(&self.config.base_path, &format!(".{partition}"))
    }
}

/// The out-of-core mining engine over one partitioned labeled graph.
///
/// All five primitives are synchronous: they return once every producer and
/// writer of the phase has terminated, with the freshly minted stream ID.
/// There is no partial success; the first error aborts the phase.
pub struct MiningEngine {
    config: EngineConfig,
    meta: GraphMeta,
    /// Width in bytes of the tuples of the stream most recently produced;
    /// zero until the system is seeded.
    sizeof_in_tuple: usize,
    update_count: u64,
}

impl MiningEngine {
    pub fn try_new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let meta = GraphMeta::load(&config.base_path)?;
        if meta.num_partitions() != config.num_partitions {
            return Err(EngineError::InvalidMeta(format!(
                "meta declares {} partitions, config expects {}",
                meta.num_partitions(),
                config.num_partitions
            )));
        }
        if meta.edge_unit != EDGE_WIDTH {
            return Err(EngineError::InvalidMeta(format!(
                "mining requires {EDGE_WIDTH}-byte labeled edge records, meta declares {}",
                meta.edge_unit
            )));
        }
        Ok(Self {
            config,
            meta,
            sizeof_in_tuple: 0,
            update_count: 0,
        })
    }

    pub fn meta(&self) -> &GraphMeta {
        &self.meta
    }

    pub fn num_partitions(&self) -> usize {
        self.config.num_partitions
    }

    /// Width in bytes of the tuples of the most recent output stream.
    pub fn tuple_width(&self) -> usize {
        self.sizeof_in_tuple
    }

    /// Path of one partition file of an update stream.
    pub fn update_stream_path(&self, partition: usize, stream: StreamId) -> PathBuf {
        graph_file(
            &self.config.base_path,
            &format!(".{partition}.update_stream_{stream}"),
        )
    }

    /// Seed the system from the raw edge files: every labeled edge becomes a
    /// 2-element tuple, shuffled on both of its keys.
    pub fn init_shuffle_all_keys(&mut self) -> Result<StreamId> {
        self.run_phase("init_shuffle_all_keys", None, 2 * ELEMENT_WIDTH, init_producer)
    }

    /// Extend every tuple from its current key vertex without re-keying.
    /// Extensions surviving the automorphism check are handed to
    /// `filter_join`; a `true` verdict prunes the extension.
    pub fn join_mining<F>(&mut self, in_stream: StreamId, filter_join: F) -> Result<StreamId>
    where
        F: Fn(&[Element]) -> bool + Sync,
    {
        let out_width = self.sizeof_in_tuple + ELEMENT_WIDTH;
        self.run_phase(
            "join_mining",
            Some(in_stream),
            out_width,
            move |ctx, partition| join_mining_producer(ctx, partition, in_stream, &filter_join),
        )
    }

    /// Extend every tuple from its current key vertex, then expose the
    /// extension under all of its keys for the next phase.
    pub fn join_all_keys(&mut self, in_stream: StreamId) -> Result<StreamId> {
        let out_width = self.sizeof_in_tuple + ELEMENT_WIDTH;
        self.run_phase(
            "join_all_keys",
            Some(in_stream),
            out_width,
            move |ctx, partition| join_all_keys_producer(ctx, partition, in_stream),
        )
    }

    /// Re-emit every tuple into the partition of each distinct vertex it
    /// contains, each copy keyed on that vertex.
    pub fn shuffle_all_keys(&mut self, in_stream: StreamId) -> Result<StreamId> {
        let out_width = self.sizeof_in_tuple;
        self.run_phase(
            "shuffle_all_keys",
            Some(in_stream),
            out_width,
            move |ctx, partition| shuffle_producer(ctx, partition, in_stream),
        )
    }

    /// Pass tuples not pruned by `filter_collect` through unchanged,
    /// producing the result stream of a user algorithm.
    pub fn collect<F>(&mut self, in_stream: StreamId, filter_collect: F) -> Result<StreamId>
    where
        F: Fn(&[Element]) -> bool + Sync,
    {
        let out_width = self.sizeof_in_tuple;
        self.run_phase(
            "collect",
            Some(in_stream),
            out_width,
            move |ctx, partition| collect_producer(ctx, partition, in_stream, &filter_collect),
        )
    }

    fn run_phase<F>(
        &mut self,
        name: &str,
        in_stream: Option<StreamId>,
        out_width: usize,
        producer_body: F,
    ) -> Result<StreamId>
    where
        F: Fn(&PhaseContext<'_>, usize) -> Result<()> + Sync,
    {
        let in_width = self.sizeof_in_tuple;
        if in_stream.is_some() {
            if in_width == 0 {
                return Err(EngineError::InvalidConfig(
                    "no input tuple width; seed the system with init_shuffle_all_keys".into(),
                ));
            }
            if self.config.io_size % in_width != 0 {
                return Err(EngineError::InvalidConfig(format!(
                    "io_size {} is not a multiple of the input tuple width {in_width}",
                    self.config.io_size
                )));
            }
        }
        debug_assert!(out_width > 0 && out_width % ELEMENT_WIDTH == 0);
        if out_width / ELEMENT_WIDTH > u8::MAX as usize {
            return Err(EngineError::InvalidConfig(
                "tuples are limited to 255 elements".into(),
            ));
        }
        if self.config.io_size < out_width {
            return Err(EngineError::InvalidConfig(format!(
                "io_size {} cannot hold a single {out_width}-byte tuple",
                self.config.io_size
            )));
        }

        let out_stream = StreamId(self.update_count);
        self.update_count += 1;
        let num_partitions = self.config.num_partitions;
        log::info!(
            "{name} starts: in={:?} out={out_stream} out_width={out_width}",
            in_stream
        );

        let task_queue = TaskQueue::with_capacity(num_partitions);
        for partition in 0..num_partitions {
            task_queue.push(partition)?;
        }

        let buffers = alloc_shuffle_buffers(num_partitions, out_width, self.config.io_size);
        let state = PhaseState {
            num_producers: AtomicUsize::new(self.config.num_exec_threads),
            flush_cursor: AtomicUsize::new(0),
            drain_cursor: AtomicI64::new(num_partitions as i64),
        };
        let ctx = PhaseContext {
            config: &self.config,
            meta: &self.meta,
            buffers: &buffers,
            out_stream,
            in_width,
            out_width,
        };

        // fresh output files, even for partitions that stay empty
        for partition in 0..num_partitions {
            File::create(ctx.out_path(partition))?;
        }

        thread::scope(|scope| {
            let mut workers = Vec::with_capacity(
                self.config.num_exec_threads + self.config.num_write_threads,
            );
            for _ in 0..self.config.num_exec_threads {
                workers.push(scope.spawn(|| produce(&ctx, &task_queue, &state, &producer_body)));
            }
            for _ in 0..self.config.num_write_threads {
                workers.push(scope.spawn(|| write_out(&ctx, &state)));
            }

            let mut first_err = None;
            for worker in workers {
                match worker.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => first_err = first_err.or(Some(err)),
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
            match first_err {
                None => Ok(()),
                Some(err) => Err(err),
            }
        })?;

        self.sizeof_in_tuple = out_width;
        log::info!("{name} complete: stream {out_stream}");
        Ok(out_stream)
    }
}

/// Decrements the live-producer count on every exit path, so writers reach
/// the terminal drain even when a producer fails.
struct ProducerGuard<'a>(&'a AtomicUsize);

impl Drop for ProducerGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

fn produce<F>(
    ctx: &PhaseContext<'_>,
    task_queue: &TaskQueue<usize>,
    state: &PhaseState,
    producer_body: &F,
) -> Result<()>
where
    F: Fn(&PhaseContext<'_>, usize) -> Result<()> + Sync,
{
    let _live = ProducerGuard(&state.num_producers);
    while let Some(partition) = task_queue.try_pop() {
        log::debug!("producer takes partition {partition}");
        producer_body(ctx, partition)?;
    }
    Ok(())
}

fn write_out(ctx: &PhaseContext<'_>, state: &PhaseState) -> Result<()> {
    let result = drain_buffers(ctx, state);
    if result.is_err() {
        // release producers blocked on buffers nobody will drain
        for buffer in ctx.buffers {
            buffer.abort();
        }
    }
    result
}

fn drain_buffers(ctx: &PhaseContext<'_>, state: &PhaseState) -> Result<()> {
    let num_partitions = ctx.buffers.len();

    // concurrent flush while producers are still emitting
    while state.num_producers.load(Ordering::Acquire) > 0 {
        let partition = state.flush_cursor.fetch_add(1, Ordering::Relaxed) % num_partitions;
        if !ctx.buffers[partition].flush(&ctx.out_path(partition))? {
            thread::yield_now();
        }
    }

    // terminal drain: each partition goes to exactly one writer
    loop {
        let partition = state.drain_cursor.fetch_sub(1, Ordering::AcqRel) - 1;
        if partition < 0 {
            break;
        }
        let partition = partition as usize;
        ctx.buffers[partition].flush_end(&ctx.out_path(partition))?;
        log::debug!("writer drained partition {partition}");
    }
    Ok(())
}

fn init_producer(ctx: &PhaseContext<'_>, partition: usize) -> Result<()> {
    let edge_bytes = read_whole_file(&ctx.edge_path(partition), ctx.config.io_size)?;
    if edge_bytes.len() % EDGE_WIDTH != 0 {
        return Err(EngineError::CorruptStream(format!(
            "edge file of partition {partition} is not a whole number of edge records"
        )));
    }

    let mut tuple = Vec::with_capacity(2);
    let mut scratch = Vec::with_capacity(ctx.out_width);
    for record in edge_bytes.chunks_exact(EDGE_WIDTH) {
        let edge = LabeledEdge::decode(record);
        tuple.clear();
        tuple.push(Element::new(edge.src, edge.edge_label, edge.src_label));
        tuple.push(Element::new(edge.target, edge.edge_label, edge.target_label));
        shuffle_on_all_keys(ctx, &mut tuple, &mut scratch)?;
    }
    Ok(())
}

fn join_mining_producer<F>(
    ctx: &PhaseContext<'_>,
    partition: usize,
    in_stream: StreamId,
    filter_join: &F,
) -> Result<()>
where
    F: Fn(&[Element]) -> bool,
{
    let edges = load_edge_hashmap(ctx, partition)?;
    let mut scratch = Vec::with_capacity(ctx.out_width);
    for_each_input_tuple(ctx, partition, in_stream, |tuple| {
        let key_index = key_index_of(tuple)?;
        let key = tuple[key_index].vertex_id;
        // tuples sit in the partition of their current key
        if ctx.meta.partition_of(key) != partition {
            return Err(EngineError::CorruptStream(format!(
                "tuple keyed on vertex {key} found in partition {partition}"
            )));
        }
        let neighbors = edges.neighbors(key).ok_or_else(|| {
            EngineError::CorruptStream(format!(
                "key vertex {key} outside the interval of partition {partition}"
            ))
        })?;
        for &neighbor in neighbors {
            tuple.push(extension(neighbor, key_index));
            if !is_automorphism(tuple) && !filter_join(tuple) {
                encode_tuple(tuple, &mut scratch);
                ctx.buffers[partition].insert(&scratch)?;
            }
            tuple.pop();
        }
        Ok(())
    })
}

fn join_all_keys_producer(
    ctx: &PhaseContext<'_>,
    partition: usize,
    in_stream: StreamId,
) -> Result<()> {
    let edges = load_edge_hashmap(ctx, partition)?;
    let mut scratch = Vec::with_capacity(ctx.out_width);
    for_each_input_tuple(ctx, partition, in_stream, |tuple| {
        let key_index = key_index_of(tuple)?;
        let key = tuple[key_index].vertex_id;
        let neighbors = edges.neighbors(key).ok_or_else(|| {
            EngineError::CorruptStream(format!(
                "key vertex {key} outside the interval of partition {partition}"
            ))
        })?;
        for &neighbor in neighbors {
            tuple.push(extension(neighbor, key_index));
            if !is_automorphism(tuple) {
                shuffle_on_all_keys(ctx, tuple, &mut scratch)?;
            }
            tuple.pop();
        }
        Ok(())
    })
}

fn shuffle_producer(ctx: &PhaseContext<'_>, partition: usize, in_stream: StreamId) -> Result<()> {
    let mut scratch = Vec::with_capacity(ctx.out_width);
    for_each_input_tuple(ctx, partition, in_stream, |tuple| {
        shuffle_on_all_keys(ctx, tuple, &mut scratch)
    })
}

fn collect_producer<F>(
    ctx: &PhaseContext<'_>,
    partition: usize,
    in_stream: StreamId,
    filter_collect: &F,
) -> Result<()>
where
    F: Fn(&[Element]) -> bool,
{
    let mut scratch = Vec::with_capacity(ctx.out_width);
    for_each_input_tuple(ctx, partition, in_stream, |tuple| {
        if !filter_collect(tuple) {
            encode_tuple(tuple, &mut scratch);
            ctx.buffers[partition].insert(&scratch)?;
        }
        Ok(())
    })
}

/// Deposit `tuple` into the shuffle buffer of every partition owning one of
/// its distinct vertices, each copy keyed on that vertex.
fn shuffle_on_all_keys(
    ctx: &PhaseContext<'_>,
    tuple: &mut [Element],
    scratch: &mut Vec<u8>,
) -> Result<()> {
    let mut seen: SmallVec<[VertexId; 8]> = SmallVec::new();
    for i in 0..tuple.len() {
        let vertex = tuple[i].vertex_id;
        if seen.contains(&vertex) {
            continue;
        }
        seen.push(vertex);
        tuple[0].key_index = i as u8;
        encode_tuple(tuple, scratch);
        ctx.buffers[ctx.meta.partition_of(vertex)].insert(scratch)?;
    }
    Ok(())
}

/// Stream one partition's update file in io-size windows, decoding each
/// tuple into a reused buffer and handing it to `body`.
fn for_each_input_tuple(
    ctx: &PhaseContext<'_>,
    partition: usize,
    in_stream: StreamId,
    mut body: impl FnMut(&mut Vec<Element>) -> Result<()>,
) -> Result<()> {
    let path = ctx.in_path(partition, in_stream);
    let file = File::open(&path)?;
    let file_size = io::file_size(&file)? as usize;
    if file_size % ctx.in_width != 0 {
        return Err(EngineError::CorruptStream(format!(
            "{}: size {file_size} is not a multiple of the tuple width {}",
            path.display(),
            ctx.in_width
        )));
    }

    let io_size = ctx.config.io_size;
    let windows = file_size / io_size + 1;
    let mut buf = vec![0u8; io_size.min(file_size)];
    let mut tuple = Vec::with_capacity(ctx.in_width / ELEMENT_WIDTH);
    let mut offset = 0u64;

    for window in 0..windows {
        let valid = if window + 1 == windows {
            // a zero-byte tail shows up when the size is an exact multiple
            file_size - io_size * (windows - 1)
        } else {
            io_size
        };
        if valid == 0 {
            break;
        }
        debug_assert_eq!(valid % ctx.in_width, 0);

        let read = io::read_at(&file, &mut buf[..valid], offset, io_size)?;
        if read != valid {
            return Err(EngineError::CorruptStream(format!(
                "{}: short read of {read} bytes, expected {valid}",
                path.display()
            )));
        }
        offset += valid as u64;

        for bytes in buf[..valid].chunks_exact(ctx.in_width) {
            decode_tuple(bytes, &mut tuple);
            validate_history(&tuple, &path)?;
            body(&mut tuple)?;
        }
    }
    Ok(())
}

fn load_edge_hashmap(ctx: &PhaseContext<'_>, partition: usize) -> Result<EdgeHashmap> {
    let edge_bytes = read_whole_file(&ctx.edge_path(partition), ctx.config.io_size)?;
    EdgeHashmap::build(&edge_bytes, ctx.meta.intervals[partition])
}

fn read_whole_file(path: &std::path::Path, io_size: usize) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let size = io::file_size(&file)? as usize;
    let mut bytes = vec![0u8; size];
    let read = io::read_at(&file, &mut bytes, 0, io_size)?;
    if read != size {
        return Err(EngineError::CorruptStream(format!(
            "{}: short read of {read} bytes, expected {size}",
            path.display()
        )));
    }
    Ok(bytes)
}

fn key_index_of(tuple: &[Element]) -> Result<usize> {
    let key_index = tuple[0].key_index as usize;
    if key_index >= tuple.len() {
        return Err(EngineError::CorruptStream(format!(
            "key index {key_index} out of range for a {}-element tuple",
            tuple.len()
        )));
    }
    Ok(key_index)
}

fn validate_history(tuple: &[Element], path: &std::path::Path) -> Result<()> {
    for (i, element) in tuple.iter().enumerate().skip(1) {
        if element.history_info as usize >= i {
            return Err(EngineError::CorruptStream(format!(
                "{}: element {i} connects from position {} ahead of it",
                path.display(),
                element.history_info
            )));
        }
    }
    Ok(())
}

/// The element appended by a join: the candidate neighbor, connected from
/// the key position of the tuple it extends.
fn extension(neighbor: Element, key_index: usize) -> Element {
    Element {
        history_info: key_index as u8,
        ..neighbor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids_render_as_bare_counters() {
        assert_eq!(StreamId(3).to_string(), "3");
    }

    #[test]
    fn extension_records_the_key_position() {
        let neighbor = Element::new(9, 2, 5);
        let element = extension(neighbor, 3);
        assert_eq!(element.vertex_id, 9);
        assert_eq!(element.edge_label, 2);
        assert_eq!(element.vertex_label, 5);
        assert_eq!(element.history_info, 3);
    }

    #[test]
    fn key_index_must_stay_in_range() {
        let mut tuple = vec![Element::new(1, 0, 0), Element::new(2, 0, 0)];
        tuple[0].key_index = 1;
        assert_eq!(key_index_of(&tuple).unwrap(), 1);
        tuple[0].key_index = 2;
        assert!(key_index_of(&tuple).is_err());
    }
}
