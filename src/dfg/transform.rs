// SplitMap: compile-time mapping for dual-path CGRAs
// Copyright (C) 2024 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Reshapes the freshly parsed DFG until it satisfies the degree and path
//! constraints of the grid: in-degree checking, inter-iteration route
//! insertion, fan-out capping, path padding, split-join phi elision and
//! merged-peer marking.

use log::{debug, info};
use rand::{seq::SliceRandom, Rng};

use super::{DepKind, Dfg, NodeId, OpKind, PathTag};
use crate::mapping::MapError;

/// Apply the degree constraints: fail on excessive fan-in, then relieve
/// inter-iteration register pressure and cap the fan-out with route nodes.
pub fn preprocess(
    dfg: &mut Dfg,
    max_in_degree: u32,
    max_out_degree: u32,
    rng: &mut impl Rng,
) -> Result<(), MapError> {
    check_in_degree(dfg, max_in_degree)?;
    insert_inter_iteration_routes(dfg);
    cap_out_degree(dfg, max_out_degree, rng);
    Ok(())
}

/// Reject any node whose data fan-in on a single path exceeds what a PE can
/// receive. The constraint applies to the maximum over the paths.
pub fn check_in_degree(dfg: &Dfg, max_in_degree: u32) -> Result<(), MapError> {
    for id in dfg.node_ids() {
        if dfg.operand_count(id) > max_in_degree {
            return Err(MapError::InDegree {
                node: id,
                limit: max_in_degree,
            });
        }
    }
    Ok(())
}

/// Give every producer at most one direct next-iteration consumer. A node
/// with several carried successors gets one route node at the minimum
/// carried distance; the remaining consumers hang off the route with their
/// distances reduced accordingly, shifting the register pressure onto the
/// route.
pub fn insert_inter_iteration_routes(dfg: &mut Dfg) {
    for id in dfg.node_ids() {
        let carried = dfg.succs_next_iter(id);
        if carried.len() <= 1 {
            continue;
        }
        let min_dist = carried
            .iter()
            .filter_map(|s| dfg.arc_between(id, *s))
            .map(|a| a.distance)
            .min()
            .unwrap_or(0);
        let path = dfg.node(id).path;
        let route = dfg.add_route(id, path);
        debug!("node {id}: routing {} carried successors through {route}", carried.len());
        dfg.make_arc(id, route, min_dist, DepKind::True, 0, arc_path(dfg, id, route));
        for succ in carried {
            let old = *dfg.arc_between(id, succ).unwrap();
            dfg.remove_arc(old.id);
            dfg.make_arc(
                route,
                succ,
                old.distance - min_dist,
                old.dep,
                old.operand,
                old.path,
            );
        }
    }
}

/// Cap the same-iteration fan-out of every node per path. The relevant
/// count for a tagged path is its own consumers plus the common ones; when
/// it exceeds the limit, excess consumers move onto a fresh route node,
/// taken preferentially from the larger bucket.
pub fn cap_out_degree(dfg: &mut Dfg, max_out_degree: u32, rng: &mut impl Rng) {
    for id in dfg.node_ids() {
        for path in PathTag::ALL {
            let counts = dfg.succ_same_iter_counts(id);
            let common = counts.get(&PathTag::None).copied().unwrap_or(0);
            let count = match path {
                PathTag::None => common,
                tagged => common + counts.get(&tagged).copied().unwrap_or(0),
            };
            if count <= max_out_degree {
                continue;
            }
            let excess = count - max_out_degree;
            let none_bucket = dfg.succs_same_iter_dep_on(id, PathTag::None);
            let path_bucket = if path == PathTag::None {
                Vec::new()
            } else {
                dfg.succs_same_iter_dep_on(id, path)
            };
            // moving k consumers only relieves k - 1, as the route node
            // itself becomes a consumer
            let (move_none, move_path) = if none_bucket.len() > path_bucket.len() {
                if excess as usize > none_bucket.len() - 1 {
                    let mn = none_bucket.len() as u32;
                    (mn, excess - mn + 1)
                } else {
                    (excess + 1, 0)
                }
            } else if excess as usize > path_bucket.len().saturating_sub(1) {
                let mp = path_bucket.len() as u32;
                (excess - mp + 1, mp)
            } else {
                (0, excess + 1)
            };
            debug!(
                "node {id}: fan-out {count} on path {path:?}, moving {move_none} common and {move_path} tagged consumers"
            );
            relieve_bucket(dfg, id, PathTag::None, none_bucket, move_none, rng);
            relieve_bucket(dfg, id, path, path_bucket, move_path, rng);
        }
    }
}

/// Move `count` randomly chosen consumers from `bucket` onto a fresh route
/// node on `path`, preserving each arc's dependency, distance and operand.
fn relieve_bucket(
    dfg: &mut Dfg,
    id: NodeId,
    path: PathTag,
    mut bucket: Vec<NodeId>,
    count: u32,
    rng: &mut impl Rng,
) {
    if count == 0 {
        return;
    }
    let route = dfg.add_route(id, path);
    dfg.make_arc(id, route, 0, DepKind::True, 0, arc_path(dfg, id, route));
    bucket.shuffle(rng);
    for succ in bucket.into_iter().take(count as usize) {
        let old = *dfg.arc_between(id, succ).unwrap();
        dfg.remove_arc(old.id);
        dfg.make_arc(route, succ, old.distance, old.dep, old.operand, old.path);
    }
}

/// Make every tagged arc originate at a tagged producer: an arc with a path
/// tag whose producer is common gets a route node of that path spliced in,
/// keeping the placement path bookkeeping local.
pub fn pad_paths(dfg: &mut Dfg) {
    for arc_id in dfg.arc_ids() {
        let arc = match dfg.arc(arc_id) {
            Some(a) => *a,
            None => continue,
        };
        if arc.path == PathTag::None || arc.dep.is_mem_pair() {
            continue;
        }
        if dfg.node(arc.from).path != PathTag::None {
            continue;
        }
        let route = dfg.add_route(arc.from, arc.path);
        debug!(
            "padding arc {} → {} with route {route} on path {:?}",
            arc.from, arc.to, arc.path
        );
        dfg.make_arc(arc.from, route, 0, DepKind::True, 0, arc.path);
        dfg.remove_arc(arc.id);
        dfg.make_arc(route, arc.to, arc.distance, arc.dep, arc.operand, arc.path);
    }
}

/// Delete phi nodes that join the two paths: when the two producers of a
/// phi carry opposite tags, only one of them fires at runtime, so the
/// consumers can take both producers directly through path-tagged arcs.
/// Phis with an out-of-loop operand (loop-carried variables) stay.
pub fn merge_join_phis(dfg: &mut Dfg) {
    for id in dfg.node_ids() {
        if dfg.get_node(id).map(|n| n.op) != Some(OpKind::Phi) {
            continue;
        }
        let producers: Vec<_> = dfg
            .pred_arcs(id)
            .filter(|a| a.dep == DepKind::True)
            .map(|a| a.from)
            .collect();
        let [a, b] = producers.as_slice() else {
            continue;
        };
        let (pa, pb) = (dfg.node(*a).path, dfg.node(*b).path);
        if pa == PathTag::None || pb.opposite() != Some(pa) {
            continue;
        }
        info!("eliding path-join phi {id}");
        let consumers: Vec<_> = dfg.succ_arcs(id).copied().collect();
        let producers = [*a, *b];
        for arc in dfg
            .pred_arcs(id)
            .chain(dfg.succ_arcs(id))
            .map(|a| a.id)
            .collect::<Vec<_>>()
        {
            dfg.remove_arc(arc);
        }
        for producer in producers {
            let path = dfg.node(producer).path;
            for cons in &consumers {
                dfg.make_arc(producer, cons.to, cons.distance, cons.dep, cons.operand, path);
            }
        }
        dfg.remove_node(id);
    }
}

/// Mark the nodes of the two paths that must share a PE: two producers of
/// opposite paths feeding the same consumer at the same operand order
/// become merged peers.
pub fn merge_peers(dfg: &mut Dfg) {
    for id in dfg.node_ids() {
        for operand in 0..3u8 {
            let producers: Vec<NodeId> = dfg
                .pred_arcs(id)
                .filter(|a| a.dep == DepKind::True && a.operand == operand)
                .map(|a| a.from)
                .collect();
            let [a, b] = producers.as_slice() else {
                continue;
            };
            let (pa, pb) = (dfg.node(*a).path, dfg.node(*b).path);
            if pa != PathTag::None && pb.opposite() == Some(pa) {
                debug!("merging peers {a} and {b} feeding {id} operand {operand}");
                dfg.node_mut(*a).merged_with = Some(*b);
                dfg.node_mut(*b).merged_with = Some(*a);
            }
        }
    }
}

/// Path tag of an arc between two nodes: the producer's path when tagged,
/// otherwise the consumer's.
fn arc_path(dfg: &Dfg, from: NodeId, to: NodeId) -> PathTag {
    match dfg.node(from).path {
        PathTag::None => dfg.node(to).path,
        tagged => tagged,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dfg::Node;
    use cgra_isa::Datatype;
    use rand::{rngs::StdRng, SeedableRng};

    /// Build a node with defaults for tests.
    fn node(id: NodeId, op: OpKind) -> Node {
        Node::new(id, op, Datatype::Int32, format!("n{id}"), PathTag::None, None)
    }

    /// A fixed-seed RNG for reproducible tests.
    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn excessive_in_degree_is_fatal() {
        let mut dfg = Dfg::new();
        for id in 1..=4 {
            dfg.insert_node(node(id, OpKind::Add));
        }
        for from in 1..=3 {
            dfg.make_arc(from, 4, 0, DepKind::True, from as u8 - 1, PathTag::None);
        }
        assert!(matches!(
            check_in_degree(&dfg, 2),
            Err(MapError::InDegree { node: 4, limit: 2 })
        ));
        assert!(check_in_degree(&dfg, 3).is_ok());
    }

    #[test]
    fn carried_successors_share_one_route() {
        let mut dfg = Dfg::new();
        for id in 1..=4 {
            dfg.insert_node(node(id, OpKind::Add));
        }
        dfg.make_arc(1, 2, 1, DepKind::True, 0, PathTag::None);
        dfg.make_arc(1, 3, 2, DepKind::True, 0, PathTag::None);
        dfg.make_arc(1, 4, 3, DepKind::True, 1, PathTag::None);
        insert_inter_iteration_routes(&mut dfg);

        let carried = dfg.succs_next_iter(1);
        assert_eq!(carried.len(), 1);
        let route = carried[0];
        assert_eq!(dfg.node(route).op, OpKind::Route);
        assert_eq!(dfg.arc_between(1, route).unwrap().distance, 1);
        // distances are rebased on the route node
        assert_eq!(dfg.arc_between(route, 2).unwrap().distance, 0);
        assert_eq!(dfg.arc_between(route, 3).unwrap().distance, 1);
        let moved = dfg.arc_between(route, 4).unwrap();
        assert_eq!(moved.distance, 2);
        assert_eq!(moved.operand, 1);
    }

    #[test]
    fn fan_out_capped_with_single_route() {
        // fan-out 8 with a limit of 5: one route node, both sides within 5
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        for id in 2..=9 {
            dfg.insert_node(node(id, OpKind::Sub));
            dfg.make_arc(1, id, 0, DepKind::True, 0, PathTag::None);
        }
        cap_out_degree(&mut dfg, 5, &mut rng());

        let succs = dfg.succs_same_iter(1);
        assert_eq!(succs.len(), 5);
        let route = *succs
            .iter()
            .find(|s| dfg.node(**s).op == OpKind::Route)
            .expect("a route node must be inserted");
        assert_eq!(dfg.succs_same_iter(route).len(), 4);
        assert_eq!(dfg.node_count(), 10);
    }

    #[test]
    fn tagged_arc_from_common_producer_is_padded() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        let mut consumer = node(2, OpKind::Sub);
        consumer.path = PathTag::True;
        dfg.insert_node(consumer);
        dfg.make_arc(1, 2, 0, DepKind::True, 1, PathTag::True);
        pad_paths(&mut dfg);

        assert!(dfg.arc_between(1, 2).is_none());
        let succs = dfg.succs_same_iter(1);
        assert_eq!(succs.len(), 1);
        let route = succs[0];
        assert_eq!(dfg.node(route).op, OpKind::Route);
        assert_eq!(dfg.node(route).path, PathTag::True);
        let rewired = dfg.arc_between(route, 2).unwrap();
        assert_eq!(rewired.operand, 1);
    }

    #[test]
    fn join_phi_elided() {
        let mut dfg = Dfg::new();
        let mut t = node(1, OpKind::Add);
        t.path = PathTag::True;
        dfg.insert_node(t);
        let mut f = node(2, OpKind::Sub);
        f.path = PathTag::False;
        dfg.insert_node(f);
        dfg.insert_node(node(3, OpKind::Phi));
        dfg.insert_node(node(4, OpKind::Mult));
        dfg.make_arc(1, 3, 0, DepKind::True, 0, PathTag::True);
        dfg.make_arc(2, 3, 0, DepKind::True, 0, PathTag::False);
        dfg.make_arc(3, 4, 0, DepKind::True, 1, PathTag::None);
        merge_join_phis(&mut dfg);

        assert!(!dfg.has_node(3));
        let a = dfg.arc_between(1, 4).unwrap();
        assert_eq!((a.operand, a.path), (1, PathTag::True));
        let b = dfg.arc_between(2, 4).unwrap();
        assert_eq!((b.operand, b.path), (1, PathTag::False));
    }

    #[test]
    fn loop_carried_phi_kept() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Phi));
        dfg.insert_node(node(2, OpKind::Add));
        dfg.make_arc(1, 2, 0, DepKind::True, 0, PathTag::None);
        dfg.make_arc(2, 1, 1, DepKind::True, 0, PathTag::None);
        merge_join_phis(&mut dfg);
        assert!(dfg.has_node(1));
    }

    #[test]
    fn opposite_producers_marked_merged() {
        let mut dfg = Dfg::new();
        let mut t = node(1, OpKind::Add);
        t.path = PathTag::True;
        dfg.insert_node(t);
        let mut f = node(2, OpKind::Sub);
        f.path = PathTag::False;
        dfg.insert_node(f);
        dfg.insert_node(node(3, OpKind::Mult));
        dfg.make_arc(1, 3, 0, DepKind::True, 0, PathTag::True);
        dfg.make_arc(2, 3, 0, DepKind::True, 0, PathTag::False);
        merge_peers(&mut dfg);
        assert_eq!(dfg.node(1).merged_with, Some(2));
        assert_eq!(dfg.node(2).merged_with, Some(1));
    }

    #[test]
    fn different_operands_not_merged() {
        let mut dfg = Dfg::new();
        let mut t = node(1, OpKind::Add);
        t.path = PathTag::True;
        dfg.insert_node(t);
        let mut f = node(2, OpKind::Sub);
        f.path = PathTag::False;
        dfg.insert_node(f);
        dfg.insert_node(node(3, OpKind::Mult));
        dfg.make_arc(1, 3, 0, DepKind::True, 0, PathTag::True);
        dfg.make_arc(2, 3, 0, DepKind::True, 1, PathTag::False);
        merge_peers(&mut dfg);
        assert_eq!(dfg.node(1).merged_with, None);
        assert_eq!(dfg.node(2).merged_with, None);
    }
}
