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

//! Bridges the cycle gaps of a successful modulo schedule: whenever a value
//! becomes ready before its consumer needs it, a chain of single-cycle
//! route nodes carries it forward, one per gap cycle. Consumers are served
//! in ascending need time so later consumers reuse the front of the chain.

use log::{debug, trace};

use super::schedule::ModuloSchedule;
use super::MapError;
use crate::dfg::{DepKind, Dfg, NodeId, PathTag};

/// Insert route chains for every producer whose value outlives its ready
/// cycle. Returns `false` when a route node finds no free PE at its cycle;
/// the caller then discards the modulo schedule and retries.
pub fn insert_routes(dfg: &mut Dfg, modulo: &mut ModuloSchedule) -> Result<bool, MapError> {
    debug!("route insertion started");
    let ii = modulo.ii();
    for id in dfg.node_ids() {
        let node_time = modulo.time(id).ok_or_else(|| {
            MapError::Internal(format!("node {id} missing from the modulo schedule"))
        })?;
        let ready_time = node_time + dfg.node(id).latency;
        let partner = dfg.node(id).mem_partner();

        // all successors that need the value later than it is ready,
        // earliest need first
        let mut needs: Vec<(NodeId, i64)> = Vec::new();
        for arc in dfg.succ_arcs(id).copied().collect::<Vec<_>>() {
            if partner == Some(arc.to) {
                continue;
            }
            let succ_time = modulo.time(arc.to).ok_or_else(|| {
                MapError::Internal(format!("node {} missing from the modulo schedule", arc.to))
            })?;
            let need_time = succ_time + arc.distance * ii;
            if need_time < ready_time {
                return Err(MapError::Internal(format!(
                    "value of node {id} (ready {ready_time}) needed by {} at {need_time}",
                    arc.to
                )));
            }
            if need_time > ready_time {
                needs.push((arc.to, need_time));
            }
        }
        if needs.is_empty() {
            continue;
        }
        needs.sort_by_key(|(_, t)| *t);
        trace!("node {id} ready at {ready_time} routes to {needs:?}");

        let mut cur_node = id;
        let mut cur_ready = ready_time;
        for (idx, (need_node, need_time)) in needs.iter().copied().enumerate() {
            // the chain inherits a tagged producer's path; a common
            // producer adopts the consumers' path only when the remaining
            // consumers agree on one
            let mut route_path = dfg.node(need_node).path;
            if dfg.node(cur_node).path != PathTag::None {
                route_path = dfg.node(cur_node).path;
            } else {
                for (later, _) in &needs[idx..] {
                    let later_path = dfg.node(*later).path;
                    if later_path == PathTag::None || later_path != route_path {
                        route_path = PathTag::None;
                        break;
                    }
                }
            }

            while cur_ready < need_time {
                if !modulo.res_available(route_path, cur_ready) {
                    debug!("no PE free for a route node at cycle {cur_ready}");
                    return Ok(false);
                }
                let route = dfg.add_route(cur_node, route_path);
                dfg.make_arc(cur_node, route, 0, DepKind::True, 0, PathTag::None);
                modulo.schedule_op(dfg.node(route), cur_ready);
                trace!("route node {route} at cycle {cur_ready} on path {route_path:?}");
                cur_node = route;
                cur_ready += dfg.node(route).latency;
            }

            let old = *dfg
                .arc_between(id, need_node)
                .ok_or_else(|| MapError::Internal(format!("lost arc {id} → {need_node}")))?;
            dfg.remove_arc(old.id);
            dfg.make_arc(cur_node, need_node, old.distance, old.dep, old.operand, old.path);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dfg::{Node, OpKind};
    use cgra_isa::Datatype;

    /// Build a node with defaults for tests.
    fn node(id: NodeId, op: OpKind) -> Node {
        Node::new(id, op, Datatype::Int32, format!("n{id}"), PathTag::None, None)
    }

    #[test]
    fn adjacent_consumer_needs_no_route() {
        // a → b with distance 1 at II 1: need time equals ready time
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        dfg.insert_node(node(2, OpKind::Sub));
        dfg.make_arc(1, 2, 1, DepKind::True, 0, PathTag::None);
        let mut ms = ModuloSchedule::new(4, 4, 2);
        ms.set_ii(1);
        ms.schedule_op(dfg.node(1), 0);
        ms.schedule_op(dfg.node(2), 0);
        assert!(insert_routes(&mut dfg, &mut ms).unwrap());
        assert_eq!(dfg.node_count(), 2);
        assert!(dfg.arc_between(1, 2).is_some());
    }

    #[test]
    fn gap_filled_with_route_chain() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        dfg.insert_node(node(2, OpKind::Sub));
        dfg.make_arc(1, 2, 0, DepKind::True, 1, PathTag::None);
        let mut ms = ModuloSchedule::new(4, 4, 4);
        ms.set_ii(4);
        ms.schedule_op(dfg.node(1), 0);
        ms.schedule_op(dfg.node(2), 3);
        assert!(insert_routes(&mut dfg, &mut ms).unwrap());

        // two route nodes bridge ready time 1 to need time 3
        assert_eq!(dfg.node_count(), 4);
        assert!(dfg.arc_between(1, 2).is_none());
        let mut cur = 1;
        for expect_t in [1, 2] {
            let succs = dfg.succs(cur);
            assert_eq!(succs.len(), 1);
            cur = succs[0];
            assert_eq!(dfg.node(cur).op, OpKind::Route);
            assert_eq!(ms.time(cur), Some(expect_t));
        }
        // the final hop keeps the original operand order
        let last = dfg.arc_between(cur, 2).unwrap();
        assert_eq!(last.operand, 1);
    }

    #[test]
    fn chain_inherits_tagged_producer_path() {
        let mut dfg = Dfg::new();
        let mut producer = node(1, OpKind::Add);
        producer.path = PathTag::True;
        dfg.insert_node(producer);
        let mut consumer = node(2, OpKind::Sub);
        consumer.path = PathTag::True;
        dfg.insert_node(consumer);
        dfg.make_arc(1, 2, 0, DepKind::True, 0, PathTag::True);
        let mut ms = ModuloSchedule::new(4, 4, 3);
        ms.set_ii(3);
        ms.schedule_op(dfg.node(1), 0);
        ms.schedule_op(dfg.node(2), 2);
        assert!(insert_routes(&mut dfg, &mut ms).unwrap());
        let route = dfg.succs(1)[0];
        assert_eq!(dfg.node(route).path, PathTag::True);
    }

    #[test]
    fn mixed_path_consumers_route_on_common_path() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        let mut t = node(2, OpKind::Sub);
        t.path = PathTag::True;
        dfg.insert_node(t);
        let mut f = node(3, OpKind::Mult);
        f.path = PathTag::False;
        dfg.insert_node(f);
        dfg.make_arc(1, 2, 0, DepKind::True, 0, PathTag::True);
        dfg.make_arc(1, 3, 0, DepKind::True, 0, PathTag::False);
        let mut ms = ModuloSchedule::new(4, 4, 4);
        ms.set_ii(4);
        ms.schedule_op(dfg.node(1), 0);
        ms.schedule_op(dfg.node(2), 2);
        ms.schedule_op(dfg.node(3), 2);
        assert!(insert_routes(&mut dfg, &mut ms).unwrap());
        // consumers on both paths force the shared route onto the common path
        let route = dfg.succs(1)[0];
        assert_eq!(dfg.node(route).path, PathTag::None);
    }

    #[test]
    fn full_cycle_fails_softly() {
        // a 1×1 grid with the only PE of the gap cycle already taken
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        dfg.insert_node(node(2, OpKind::Sub));
        dfg.insert_node(node(3, OpKind::Mult));
        dfg.make_arc(1, 2, 0, DepKind::True, 0, PathTag::None);
        let mut ms = ModuloSchedule::new(1, 1, 3);
        ms.set_ii(3);
        ms.schedule_op(dfg.node(1), 0);
        ms.schedule_op(dfg.node(3), 1);
        ms.schedule_op(dfg.node(2), 2);
        assert!(!insert_routes(&mut dfg, &mut ms).unwrap());
    }
}
