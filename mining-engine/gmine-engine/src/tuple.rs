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

//! Fixed-width codec for tuple elements and labeled edge records, plus the
//! per-partition edge hashmap producers join against.

use byteorder::{ByteOrder, LittleEndian};

use gmine_commons::{EngineError, Result};

pub type VertexId = u32;

/// On-disk width of one tuple element.
pub const ELEMENT_WIDTH: usize = 8;

/// On-disk width of one labeled edge record.
pub const EDGE_WIDTH: usize = 12;

/// One element of a vertex tuple. On disk it is exactly 8 bytes:
///
/// `vertex_id(4, LE) | key_index(1) | edge_label(1) | vertex_label(1) | history_info(1)`
///
/// `key_index` is meaningful only in element 0, where it names the position
/// of the tuple's current shuffle key. `history_info` of element `i > 0`
/// names the earlier position this element was connected from, recording the
/// subgraph structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Element {
    pub vertex_id: VertexId,
    pub key_index: u8,
    pub edge_label: u8,
    pub vertex_label: u8,
    pub history_info: u8,
}

impl Element {
    pub fn new(vertex_id: VertexId, edge_label: u8, vertex_label: u8) -> Self {
        Self {
            vertex_id,
            key_index: 0,
            edge_label,
            vertex_label,
            history_info: 0,
        }
    }

    pub fn decode(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), ELEMENT_WIDTH);
        Self {
            vertex_id: LittleEndian::read_u32(&bytes[..4]),
            key_index: bytes[4],
            edge_label: bytes[5],
            vertex_label: bytes[6],
            history_info: bytes[7],
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut id = [0u8; 4];
        LittleEndian::write_u32(&mut id, self.vertex_id);
        out.extend_from_slice(&id);
        out.push(self.key_index);
        out.push(self.edge_label);
        out.push(self.vertex_label);
        out.push(self.history_info);
    }
}

/// Decode `bytes.len() / 8` elements into `tuple`, reusing its storage.
pub fn decode_tuple(bytes: &[u8], tuple: &mut Vec<Element>) {
    debug_assert_eq!(bytes.len() % ELEMENT_WIDTH, 0);
    tuple.clear();
    tuple.extend(bytes.chunks_exact(ELEMENT_WIDTH).map(Element::decode));
}

/// Encode a tuple back-to-back into `out`, reusing its storage.
pub fn encode_tuple(tuple: &[Element], out: &mut Vec<u8>) {
    out.clear();
    for element in tuple {
        element.encode_into(out);
    }
}

/// On-disk edge record of a partition's edge file:
///
/// `src(4, LE) | target(4, LE) | edge_label(1) | src_label(1) | target_label(1) | pad(1)`
///
/// The edge file of partition `p` contains exactly the edges whose `src`
/// lies in `p`'s vertex interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabeledEdge {
    pub src: VertexId,
    pub target: VertexId,
    pub edge_label: u8,
    pub src_label: u8,
    pub target_label: u8,
}

impl LabeledEdge {
    pub fn decode(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), EDGE_WIDTH);
        Self {
            src: LittleEndian::read_u32(&bytes[..4]),
            target: LittleEndian::read_u32(&bytes[4..8]),
            edge_label: bytes[8],
            src_label: bytes[9],
            target_label: bytes[10],
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut id = [0u8; 4];
        LittleEndian::write_u32(&mut id, self.src);
        out.extend_from_slice(&id);
        LittleEndian::write_u32(&mut id, self.target);
        out.extend_from_slice(&id);
        out.push(self.edge_label);
        out.push(self.src_label);
        out.push(self.target_label);
        out.push(0);
    }
}

/// Per-producer transient index over one partition's edge file: an array
/// indexed by `src - vertex_start` whose slots carry the candidate extension
/// elements `(target, edge_label, target_label)`. Built once per partition
/// and discarded when the producer moves on.
pub struct EdgeHashmap {
    vertex_start: VertexId,
    slots: Vec<Vec<Element>>,
}

impl EdgeHashmap {
    /// Parse a whole edge file and index it over the partition's inclusive
    /// vertex interval.
    pub fn build(edge_bytes: &[u8], interval: (VertexId, VertexId)) -> Result<Self> {
        let (start, end) = interval;
        if edge_bytes.len() % EDGE_WIDTH != 0 {
            return Err(EngineError::CorruptStream(format!(
                "edge file size {} is not a multiple of the {EDGE_WIDTH}-byte edge record",
                edge_bytes.len()
            )));
        }
        let mut slots = vec![Vec::new(); (end - start + 1) as usize];
        for record in edge_bytes.chunks_exact(EDGE_WIDTH) {
            let edge = LabeledEdge::decode(record);
            if edge.src < start || edge.src > end {
                return Err(EngineError::CorruptStream(format!(
                    "edge source {} outside partition interval [{start}, {end}]",
                    edge.src
                )));
            }
            slots[(edge.src - start) as usize].push(Element::new(
                edge.target,
                edge.edge_label,
                edge.target_label,
            ));
        }
        Ok(Self {
            vertex_start: start,
            slots,
        })
    }

    /// Candidate extensions of `v`, or `None` when `v` is outside the
    /// partition interval.
    pub fn neighbors(&self, v: VertexId) -> Option<&[Element]> {
        let slot = v.checked_sub(self.vertex_start)? as usize;
        self.slots.get(slot).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_layout_is_bit_exact() {
        let bytes = [0x39, 0x05, 0x00, 0x00, 0x02, 0x07, 0x03, 0x01];
        let element = Element::decode(&bytes);
        assert_eq!(element.vertex_id, 1337);
        assert_eq!(element.key_index, 2);
        assert_eq!(element.edge_label, 7);
        assert_eq!(element.vertex_label, 3);
        assert_eq!(element.history_info, 1);

        let mut out = Vec::new();
        element.encode_into(&mut out);
        assert_eq!(out, bytes);
    }

    #[test]
    fn edge_record_layout_is_bit_exact() {
        let bytes = [0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x05, 0x06, 0x07, 0x00];
        let edge = LabeledEdge::decode(&bytes);
        assert_eq!(edge.src, 1);
        assert_eq!(edge.target, 256);
        assert_eq!(edge.edge_label, 5);
        assert_eq!(edge.src_label, 6);
        assert_eq!(edge.target_label, 7);

        let mut out = Vec::new();
        edge.encode_into(&mut out);
        assert_eq!(out, bytes);
    }

    #[test]
    fn decode_tuple_reuses_storage() {
        let mut bytes = Vec::new();
        Element::new(4, 1, 0).encode_into(&mut bytes);
        Element::new(9, 2, 1).encode_into(&mut bytes);

        let mut tuple = vec![Element::new(99, 0, 0)];
        decode_tuple(&bytes, &mut tuple);
        assert_eq!(tuple.len(), 2);
        assert_eq!(tuple[0].vertex_id, 4);
        assert_eq!(tuple[1].vertex_id, 9);
        assert_eq!(tuple[1].edge_label, 2);
    }

    #[test]
    fn edge_hashmap_indexes_by_source() {
        let mut bytes = Vec::new();
        for &(src, target, label) in &[(3u32, 5u32, 1u8), (3, 7, 2), (4, 3, 0)] {
            LabeledEdge {
                src,
                target,
                edge_label: label,
                src_label: 0,
                target_label: 9,
            }
            .encode_into(&mut bytes);
        }

        let map = EdgeHashmap::build(&bytes, (3, 5)).unwrap();
        let neighbors = map.neighbors(3).unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].vertex_id, 5);
        assert_eq!(neighbors[0].edge_label, 1);
        assert_eq!(neighbors[0].vertex_label, 9);
        assert!(map.neighbors(5).unwrap().is_empty());
        assert!(map.neighbors(6).is_none());
        assert!(map.neighbors(2).is_none());
    }

    #[test]
    fn edge_hashmap_rejects_foreign_sources() {
        let mut bytes = Vec::new();
        LabeledEdge {
            src: 9,
            target: 1,
            edge_label: 0,
            src_label: 0,
            target_label: 0,
        }
        .encode_into(&mut bytes);
        assert!(EdgeHashmap::build(&bytes, (0, 3)).is_err());
    }

    #[test]
    fn edge_hashmap_rejects_truncated_files() {
        assert!(EdgeHashmap::build(&[0u8; 13], (0, 3)).is_err());
    }
}
