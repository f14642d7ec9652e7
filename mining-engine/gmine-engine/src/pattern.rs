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

//! Automorphism suppression for tuple enumeration.
//!
//! A tuple encodes a growth sequence of a subgraph: element `i > 0` adds the
//! edge between its vertex and the vertex at position `history_info`. Joins
//! enumerate every growth sequence of every subgraph they reach, so all but
//! one sequence per subgraph must be suppressed. The surviving sequence is
//! the lexicographically minimal one over steps
//! `(vertex_id, first position of the attachment vertex, edge_label)`.

use std::cmp::Ordering;

use itertools::Itertools;
use smallvec::SmallVec;

use crate::tuple::{Element, VertexId};

/// One step of a growth sequence; the first step carries zeros for the
/// attachment fields.
type Step = (VertexId, u8, u8);

struct GrowthEdge {
    a: VertexId,
    b: VertexId,
    label: u8,
}

/// True iff `tuple` is a non-canonical growth sequence of the subgraph it
/// induces. Pure and deterministic; callers must have validated the history
/// indices (element `i` connects from a position `< i`).
pub fn is_automorphism(tuple: &[Element]) -> bool {
    if tuple.len() < 2 {
        return false;
    }
    debug_assert!(
        tuple
            .iter()
            .enumerate()
            .skip(1)
            .all(|(i, e)| (e.history_info as usize) < i)
    );

    let edges = tuple[1..]
        .iter()
        .map(|element| GrowthEdge {
            a: tuple[element.history_info as usize].vertex_id,
            b: element.vertex_id,
            label: element.edge_label,
        })
        .collect_vec();

    // re-walking an edge already in the tuple never yields a new subgraph
    if has_duplicate_edge(&edges) {
        return true;
    }

    let own = own_sequence(tuple);
    smaller_sequence_exists(&edges, &own)
}

fn own_sequence(tuple: &[Element]) -> Vec<Step> {
    let mut sequence = Vec::with_capacity(tuple.len());
    sequence.push((tuple[0].vertex_id, 0, 0));
    for element in &tuple[1..] {
        sequence.push((element.vertex_id, element.history_info, element.edge_label));
    }
    sequence
}

fn has_duplicate_edge(edges: &[GrowthEdge]) -> bool {
    edges
        .iter()
        .map(|edge| (edge.a.min(edge.b), edge.a.max(edge.b), edge.label))
        .sorted_unstable()
        .tuple_windows()
        .any(|(x, y)| x == y)
}

/// Whether some valid growth sequence of `edges` compares strictly below
/// `own`. The subgraph is connected, so any connected prefix completes to a
/// full sequence; a prefix that drops below `own` therefore decides
/// immediately, and a prefix above `own` can be pruned.
fn smaller_sequence_exists(edges: &[GrowthEdge], own: &[Step]) -> bool {
    let starts = edges
        .iter()
        .flat_map(|edge| [edge.a, edge.b])
        .sorted_unstable()
        .dedup()
        .collect_vec();

    let mut used = vec![false; edges.len()];
    let mut verts = Vec::with_capacity(own.len());
    for start in starts {
        match (start, 0u8, 0u8).cmp(&own[0]) {
            Ordering::Less => return true,
            Ordering::Equal => {
                verts.push(start);
                if extend_below(edges, &mut used, &mut verts, own) {
                    return true;
                }
                verts.pop();
            }
            Ordering::Greater => {}
        }
    }
    false
}

fn extend_below(
    edges: &[GrowthEdge],
    used: &mut [bool],
    verts: &mut Vec<VertexId>,
    own: &[Step],
) -> bool {
    let pos = verts.len();
    if pos == own.len() {
        // completed a sequence equal to the tuple's own
        return false;
    }
    for i in 0..edges.len() {
        if used[i] {
            continue;
        }
        let edge = &edges[i];
        let a_at = verts.iter().position(|&v| v == edge.a);
        let b_at = verts.iter().position(|&v| v == edge.b);

        // (first position of the attachment vertex, vertex added)
        let mut choices: SmallVec<[(usize, VertexId); 2]> = SmallVec::new();
        if let Some(from) = a_at {
            choices.push((from, edge.b));
        }
        if let Some(from) = b_at {
            choices.push((from, edge.a));
        }

        for (from, vertex) in choices {
            match (vertex, from as u8, edge.label).cmp(&own[pos]) {
                Ordering::Less => return true,
                Ordering::Equal => {
                    used[i] = true;
                    verts.push(vertex);
                    if extend_below(edges, used, verts, own) {
                        return true;
                    }
                    verts.pop();
                    used[i] = false;
                }
                Ordering::Greater => {}
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(vertex_id: VertexId) -> Element {
        Element::new(vertex_id, 0, 0)
    }

    fn grown(vertex_id: VertexId, history: u8) -> Element {
        Element {
            history_info: history,
            ..Element::new(vertex_id, 0, 0)
        }
    }

    fn grown_labeled(vertex_id: VertexId, history: u8, label: u8) -> Element {
        Element {
            history_info: history,
            ..Element::new(vertex_id, label, 0)
        }
    }

    #[test]
    fn minimal_path_ordering_is_canonical() {
        // path 0-1-2 grown in vertex order
        assert!(!is_automorphism(&[seed(0), grown(1, 0), grown(2, 1)]));
    }

    #[test]
    fn reordered_paths_are_suppressed() {
        assert!(is_automorphism(&[seed(2), grown(1, 0), grown(0, 1)]));
        assert!(is_automorphism(&[seed(1), grown(0, 0), grown(2, 0)]));
        assert!(is_automorphism(&[seed(0), grown(2, 0), grown(1, 0)]));
        // 0-2 then 2-1 is the minimal sequence for that path, not a relabeling
        assert!(!is_automorphism(&[seed(0), grown(2, 0), grown(1, 1)]));
    }

    #[test]
    fn rewalking_an_edge_is_suppressed() {
        assert!(is_automorphism(&[seed(0), grown(1, 0), grown(1, 0)]));
        assert!(is_automorphism(&[seed(0), grown(1, 0), grown(0, 1)]));
    }

    #[test]
    fn exactly_one_triangle_closure_is_canonical() {
        // triangle on {0, 1, 2}: edges 0-1 and 0-2 first, then close 1-2 by
        // attaching vertex 1 from position 2
        assert!(!is_automorphism(&[
            seed(0),
            grown(1, 0),
            grown(2, 0),
            grown(1, 2),
        ]));
        // the same subgraph grown through the 0-1-2 path is suppressed
        assert!(is_automorphism(&[
            seed(0),
            grown(1, 0),
            grown(2, 1),
            grown(2, 0),
        ]));
        assert!(is_automorphism(&[
            seed(0),
            grown(2, 0),
            grown(1, 0),
            grown(2, 2),
        ]));
    }

    #[test]
    fn parallel_edges_with_distinct_labels_are_not_duplicates() {
        // labels 1 and 2 between the same endpoints form a real multigraph;
        // its canonical sequence closes back onto vertex 0
        assert!(!is_automorphism(&[
            seed(0),
            grown_labeled(1, 0, 1),
            grown_labeled(0, 1, 2),
        ]));
        assert!(is_automorphism(&[
            seed(0),
            grown_labeled(1, 0, 1),
            grown_labeled(1, 0, 2),
        ]));
    }

    #[test]
    fn single_edges_compare_by_endpoint() {
        assert!(!is_automorphism(&[seed(0), grown(1, 0)]));
        assert!(is_automorphism(&[seed(1), grown(0, 0)]));
    }
}
