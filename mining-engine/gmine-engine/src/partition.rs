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

//! Partitioned-graph metadata written by the preprocessor, and the vertex
//! partitioner derived from it.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use gmine_commons::{EngineError, Result};

use crate::tuple::VertexId;

/// Build a sibling path of the graph base path, e.g. `{base}.meta` or
/// `{base}.3.update_stream_1`.
pub(crate) fn graph_file(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    NoWeight,
    Weighted,
}

/// Contents of the `{base}.meta` file: tab-separated text with the edge
/// record shape on line 1, vertex counts on line 2 and one inclusive vertex
/// interval per partition on the remaining lines.
#[derive(Debug, Clone)]
pub struct GraphMeta {
    pub edge_type: EdgeType,
    pub edge_unit: usize,
    pub num_vertices: u32,
    pub num_vertices_per_part: u32,
    /// Inclusive per-partition vertex intervals, 0-based.
    pub intervals: Vec<(VertexId, VertexId)>,
}

impl GraphMeta {
    /// Derive the metadata of a labeled graph split into `num_partitions`
    /// equal vertex ranges, the remainder absorbed by the last partition.
    pub fn labeled(num_vertices: u32, num_partitions: usize) -> Self {
        assert!(num_partitions > 0 && num_vertices as usize >= num_partitions);
        let per_part = num_vertices / num_partitions as u32;
        let mut intervals = Vec::with_capacity(num_partitions);
        let mut start = 0;
        for partition in 0..num_partitions as u32 {
            let end = if partition == num_partitions as u32 - 1 {
                num_vertices - 1
            } else {
                start + per_part - 1
            };
            intervals.push((start, end));
            start = end + 1;
        }
        Self {
            edge_type: EdgeType::NoWeight,
            edge_unit: crate::tuple::EDGE_WIDTH,
            num_vertices,
            num_vertices_per_part: per_part,
            intervals,
        }
    }

    pub fn load(base: &Path) -> Result<Self> {
        let path = graph_file(base, ".meta");
        let text = fs::read_to_string(&path)?;
        let mut lines = text.lines();

        let (edge_type, edge_unit) = {
            let line = lines
                .next()
                .ok_or_else(|| invalid(&path, "missing edge type line"))?;
            let (edge_type, edge_unit) = split_pair(line, &path)?;
            let edge_type = match edge_type {
                0 => EdgeType::NoWeight,
                1 => EdgeType::Weighted,
                other => {
                    return Err(invalid(&path, &format!("unknown edge type {other}")));
                }
            };
            if edge_unit != 8 && edge_unit != 12 {
                return Err(invalid(&path, &format!("unsupported edge unit {edge_unit}")));
            }
            (edge_type, edge_unit as usize)
        };

        let (num_vertices, num_vertices_per_part) = {
            let line = lines
                .next()
                .ok_or_else(|| invalid(&path, "missing vertex count line"))?;
            split_pair(line, &path)?
        };
        if num_vertices_per_part == 0 {
            return Err(invalid(&path, "vertices per partition must be positive"));
        }

        let mut intervals = Vec::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let (start, end) = split_pair(line, &path)?;
            if start > end {
                return Err(invalid(&path, &format!("empty interval {start}..{end}")));
            }
            intervals.push((start, end));
        }
        if intervals.is_empty() {
            return Err(invalid(&path, "no partition intervals"));
        }

        Ok(Self {
            edge_type,
            edge_unit,
            num_vertices,
            num_vertices_per_part,
            intervals,
        })
    }

    /// Write `{base}.meta` in the preprocessor's format.
    pub fn write(&self, base: &Path) -> Result<()> {
        let mut text = String::new();
        let edge_type = match self.edge_type {
            EdgeType::NoWeight => 0,
            EdgeType::Weighted => 1,
        };
        let _ = writeln!(text, "{edge_type}\t{}", self.edge_unit);
        let _ = writeln!(text, "{}\t{}", self.num_vertices, self.num_vertices_per_part);
        for (start, end) in &self.intervals {
            let _ = writeln!(text, "{start}\t{end}");
        }
        fs::write(graph_file(base, ".meta"), text)?;
        Ok(())
    }

    pub fn num_partitions(&self) -> usize {
        self.intervals.len()
    }

    /// The partition owning vertex `v`; the final partition absorbs the
    /// remainder when the vertex count does not divide evenly.
    pub fn partition_of(&self, v: VertexId) -> usize {
        let partition = (v / self.num_vertices_per_part) as usize;
        partition.min(self.num_partitions() - 1)
    }
}

fn invalid(path: &Path, reason: &str) -> EngineError {
    EngineError::InvalidMeta(format!("{}: {reason}", path.display()))
}

fn split_pair(line: &str, path: &Path) -> Result<(u32, u32)> {
    let mut fields = line.split('\t');
    let first = fields.next().and_then(|f| f.trim().parse().ok());
    let second = fields.next().and_then(|f| f.trim().parse().ok());
    match (first, second) {
        (Some(first), Some(second)) => Ok((first, second)),
        _ => Err(invalid(path, &format!("malformed line {line:?}"))),
    }
}
