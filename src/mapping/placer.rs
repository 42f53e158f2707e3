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

//! Randomized placement of the modulo-scheduled DFG onto the time-extended
//! grid: breadth-first from a random start node, with three escalating
//! remap strategies when a node finds no position: remapping its placed
//! neighbors, evicting its whole cycle, and evicting the cycles of all its
//! neighbors.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, trace};
use rand::{seq::SliceRandom, Rng};

use super::grid::TimeGrid;
use super::schedule::ModuloSchedule;
use super::MapError;
use crate::arch::MappingPolicy;
use crate::dfg::{Dfg, MemRole, NodeId};

/// Place every node of the DFG. Returns `false` when all attempts are
/// exhausted; the caller then increments the II.
pub fn place(
    dfg: &Dfg,
    grid: &mut TimeGrid,
    modulo: &ModuloSchedule,
    policy: &MappingPolicy,
    rng: &mut impl Rng,
) -> Result<bool, MapError> {
    debug!("placement started");
    for attempt in 0..policy.max_mapping_attempts {
        trace!("placement attempt {attempt}");
        let mut to_map: BTreeSet<NodeId> = dfg.node_ids().into_iter().collect();
        let mut found = true;
        'bfs: while !to_map.is_empty() {
            // mapping mode 0: pick the start node uniformly at random
            let pool: Vec<NodeId> = to_map.iter().copied().collect();
            let start = pool[rng.gen_range(0..pool.len())];
            trace!("start node {start}");
            to_map.remove(&start);

            let mut queue = VecDeque::from([start]);
            while let Some(id) = queue.pop_front() {
                let node = dfg.node(id);
                if grid.placed_pe(id).is_some() {
                    // revisit: look for a better spot
                    grid.remove(node);
                }
                let positions = potential_positions(dfg, id, grid, modulo)?;
                if positions.is_empty() {
                    debug!("no position for node {id}, remapping");
                    let mut ok = remap_basic(dfg, id, grid, modulo, rng)?;
                    if !ok {
                        ok = remap_current_t(dfg, id, grid, modulo, policy, rng)?;
                    }
                    if !ok {
                        ok = remap_adjacent_t(dfg, id, grid, modulo, policy, rng)?;
                    }
                    if !ok {
                        to_map.insert(id);
                        while let Some(n) = queue.pop_front() {
                            to_map.insert(n);
                        }
                        found = false;
                        debug!("placement attempt failed with {} nodes left", to_map.len());
                        break 'bfs;
                    }
                } else {
                    let pe = positions[rng.gen_range(0..positions.len())];
                    grid.place(node, pe, modulo.iter_of(id));
                    trace!(
                        "node {id} placed at ({}, {}, {})",
                        grid.pe(pe).x,
                        grid.pe(pe).y,
                        grid.pe(pe).t
                    );
                }
                for succ in dfg.succs(id) {
                    if to_map.remove(&succ) {
                        queue.push_back(succ);
                    }
                }
            }
        }
        if found {
            debug!("placement succeeded at attempt {attempt}");
            return Ok(true);
        }
        grid.clear();
    }
    debug!("placement failed after all attempts");
    Ok(false)
}

/// All PEs where a node could go right now: free at its cycle for its path
/// and iteration, on its partner's row for memory nodes, reachable from
/// every placed predecessor and into every placed successor, and pinned to
/// its merged peer's PE when that peer is placed. The node's own current
/// placement is ignored during the computation and restored afterwards.
fn potential_positions(
    dfg: &Dfg,
    id: NodeId,
    grid: &mut TimeGrid,
    modulo: &ModuloSchedule,
) -> Result<Vec<usize>, MapError> {
    let node = dfg.node(id);
    let restore = grid.placed_pe(id);
    if restore.is_some() {
        grid.remove(node);
    }

    let mapped_preds: Vec<NodeId> = dfg
        .preds(id)
        .into_iter()
        .filter(|p| grid.placed_pe(*p).is_some())
        .collect();
    let mapped_succs: Vec<NodeId> = dfg
        .succs(id)
        .into_iter()
        .filter(|s| grid.placed_pe(*s).is_some())
        .collect();

    let iter = modulo.iter_of(id);
    let path = node.path;
    let mod_t = modulo
        .mod_time(id)
        .ok_or_else(|| MapError::Internal(format!("node {id} has no modulo slot")))?;

    let mut positions: Vec<usize> = Vec::new();
    match node.mem_role() {
        Some(role @ (MemRole::LoadAddress | MemRole::StoreAddress)) => {
            // the row is pinned by the placed data node, otherwise any row
            // with a free address bus works
            let partner_pe = mapped_succs.first().map(|s| grid.placed_pe(*s).unwrap());
            if role == MemRole::LoadAddress && mapped_succs.len() > 1 {
                return Err(MapError::Internal(format!(
                    "load address generator {id} with several placed successors"
                )));
            }
            let rows: Vec<u32> = match partner_pe {
                Some(pe) => vec![grid.pe(pe).x],
                None => (0..grid.x()).collect(),
            };
            for x in rows {
                let row = grid.row_index(x, mod_t);
                if grid.row_addr_available(row, path, iter) {
                    for pe in grid.pes_at_row(x, mod_t) {
                        if grid.pe_available(pe, path, iter) {
                            positions.push(pe);
                        }
                    }
                }
            }
            retain_reachable_from_preds(grid, &mut positions, &mapped_preds);
        }
        Some(MemRole::LoadData) => {
            if mapped_preds.len() > 1 {
                return Err(MapError::Internal(format!(
                    "load data read {id} with several placed predecessors"
                )));
            }
            let rows: Vec<u32> = match mapped_preds.first() {
                Some(addr) => vec![grid.pe(grid.placed_pe(*addr).unwrap()).x],
                None => (0..grid.x()).collect(),
            };
            for x in rows {
                let row = grid.row_index(x, mod_t);
                if grid.row_data_available(row, path, iter) {
                    for pe in grid.pes_at_row(x, mod_t) {
                        if grid.pe_available(pe, path, iter) {
                            positions.push(pe);
                        }
                    }
                }
            }
            retain_reachable_to_succs(grid, &mut positions, &mapped_succs);
        }
        Some(MemRole::StoreData) => {
            // one predecessor is the address generator fixing the row, the
            // other provides the value and constrains reachability
            let mut addr_pred = None;
            let mut data_pred = None;
            for pred in &mapped_preds {
                if dfg.node(*pred).mem_role() == Some(MemRole::StoreAddress) {
                    addr_pred = Some(*pred);
                } else {
                    data_pred = Some(*pred);
                }
            }
            let rows: Vec<u32> = match addr_pred {
                Some(addr) => vec![grid.pe(grid.placed_pe(addr).unwrap()).x],
                None => (0..grid.x()).collect(),
            };
            for x in rows {
                let row = grid.row_index(x, mod_t);
                if grid.row_data_available(row, path, iter) {
                    for pe in grid.pes_at_row(x, mod_t) {
                        if grid.pe_available(pe, path, iter) {
                            positions.push(pe);
                        }
                    }
                }
            }
            if let Some(data) = data_pred {
                retain_reachable_from_preds(grid, &mut positions, &[data]);
            }
            if !mapped_succs.is_empty() {
                return Err(MapError::Internal(format!(
                    "store data write {id} with a placed successor"
                )));
            }
        }
        None => {
            for pe in grid.pes_at_time(mod_t) {
                if grid.pe_available(pe, path, iter) {
                    positions.push(pe);
                }
            }
            retain_reachable_from_preds(grid, &mut positions, &mapped_preds);
            retain_reachable_to_succs(grid, &mut positions, &mapped_succs);
        }
    }

    // a placed merged peer pins the position to its own PE
    if let Some(peer) = node.merged_with {
        if let Some(peer_pe) = grid.placed_pe(peer) {
            positions.retain(|pe| *pe == peer_pe);
        }
    }

    trace!("node {id}: {} potential positions", positions.len());
    if let Some(pe) = restore {
        grid.place(node, pe, iter);
    }
    Ok(positions)
}

/// Drop candidate positions not reachable from every placed predecessor.
fn retain_reachable_from_preds(grid: &TimeGrid, positions: &mut Vec<usize>, preds: &[NodeId]) {
    positions.retain(|pos| {
        preds
            .iter()
            .all(|p| grid.is_reachable(grid.placed_pe(*p).unwrap(), *pos))
    });
}

/// Drop candidate positions from which some placed successor is not
/// reachable.
fn retain_reachable_to_succs(grid: &TimeGrid, positions: &mut Vec<usize>, succs: &[NodeId]) {
    positions.retain(|pos| {
        succs
            .iter()
            .all(|s| grid.is_reachable(*pos, grid.placed_pe(*s).unwrap()))
    });
}

/// Unplace the failed node's placed neighbors and search a compatible
/// composition of their positions by backtracking; on the first
/// composition that leaves room for the failed node, place it. Restores
/// all original positions on failure.
fn remap_basic(
    dfg: &Dfg,
    failed: NodeId,
    grid: &mut TimeGrid,
    modulo: &ModuloSchedule,
    rng: &mut impl Rng,
) -> Result<bool, MapError> {
    debug!("basic remap of node {failed}");
    let mut constraints: Vec<NodeId> = Vec::new();
    let mut original: BTreeMap<NodeId, usize> = BTreeMap::new();
    for n in dfg.preds(failed).into_iter().chain(dfg.succs(failed)) {
        if let Some(pe) = grid.placed_pe(n) {
            if original.insert(n, pe).is_none() {
                constraints.push(n);
                grid.remove(dfg.node(n));
            }
        }
    }
    if constraints.is_empty() {
        // nothing to rearrange: the node is unconstrained yet has no slot
        return Ok(false);
    }
    constraints.shuffle(rng);

    let mut positions_left: Vec<Vec<usize>> = Vec::new();
    let mut use_left = false;
    let mut idx: isize = 0;
    while idx >= 0 {
        let constraint = constraints[idx as usize];
        let mut positions = if use_left {
            let positions = positions_left.pop().expect("left positions follow idx");
            grid.remove(dfg.node(constraint));
            positions
        } else {
            let mut positions = potential_positions(dfg, constraint, grid, modulo)?;
            positions.shuffle(rng);
            positions
        };
        if let Some(pe) = positions.pop() {
            grid.place(dfg.node(constraint), pe, modulo.iter_of(constraint));
            positions_left.push(positions);
            idx += 1;
            use_left = false;
        } else {
            idx -= 1;
            use_left = true;
            continue;
        }
        if idx as usize == constraints.len() {
            let remap = potential_positions(dfg, failed, grid, modulo)?;
            if let Some(pe) = remap.as_slice().choose(rng) {
                grid.place(dfg.node(failed), *pe, modulo.iter_of(failed));
                debug!("basic remap of {failed} succeeded");
                return Ok(true);
            }
            idx -= 1;
            use_left = true;
        }
    }
    debug!("basic remap of {failed} failed, restoring");
    for constraint in constraints {
        if grid.placed_pe(constraint).is_some() {
            grid.remove(dfg.node(constraint));
        }
        grid.place(
            dfg.node(constraint),
            original[&constraint],
            modulo.iter_of(constraint),
        );
    }
    Ok(false)
}

/// Remap after evicting every node sharing the failed node's cycle:
/// perform a basic remap in the emptied cycle, then randomly re-place the
/// evicted nodes. Restores everything on failure.
fn remap_current_t(
    dfg: &Dfg,
    failed: NodeId,
    grid: &mut TimeGrid,
    modulo: &ModuloSchedule,
    policy: &MappingPolicy,
    rng: &mut impl Rng,
) -> Result<bool, MapError> {
    let mod_t = modulo
        .mod_time(failed)
        .ok_or_else(|| MapError::Internal(format!("node {failed} has no modulo slot")))?;
    debug!("current-cycle remap of node {failed} at slot {mod_t}");
    remap_with_evicted_slots(dfg, failed, grid, modulo, policy, rng, &[mod_t])
}

/// Remap after evicting the failed node's cycle and the cycles of every
/// placed neighbor. Restores everything on failure.
fn remap_adjacent_t(
    dfg: &Dfg,
    failed: NodeId,
    grid: &mut TimeGrid,
    modulo: &ModuloSchedule,
    policy: &MappingPolicy,
    rng: &mut impl Rng,
) -> Result<bool, MapError> {
    let mut slots: BTreeSet<i64> = BTreeSet::new();
    for n in dfg.preds(failed).into_iter().chain(dfg.succs(failed)) {
        if grid.placed_pe(n).is_some() {
            if let Some(t) = modulo.mod_time(n) {
                slots.insert(t);
            }
        }
    }
    slots.extend(modulo.mod_time(failed));
    let slots: Vec<i64> = slots.into_iter().collect();
    debug!("adjacent-cycle remap of node {failed} over slots {slots:?}");
    remap_with_evicted_slots(dfg, failed, grid, modulo, policy, rng, &slots)
}

/// Shared escalation machinery: evict all nodes of the given time slots
/// (keeping the failed node's direct constraints placed), run a basic
/// remap, then randomly re-place the evicted nodes with bounded retries.
fn remap_with_evicted_slots(
    dfg: &Dfg,
    failed: NodeId,
    grid: &mut TimeGrid,
    modulo: &ModuloSchedule,
    policy: &MappingPolicy,
    rng: &mut impl Rng,
    slots: &[i64],
) -> Result<bool, MapError> {
    // detach the direct constraints first so the eviction sweep skips them
    let mut constraints: Vec<NodeId> = Vec::new();
    let mut constraint_pos: BTreeMap<NodeId, usize> = BTreeMap::new();
    for n in dfg.preds(failed).into_iter().chain(dfg.succs(failed)) {
        if let Some(pe) = grid.placed_pe(n) {
            if constraint_pos.insert(n, pe).is_none() {
                constraints.push(n);
                grid.remove(dfg.node(n));
            }
        }
    }
    if constraints.is_empty() {
        return Ok(false);
    }

    // evict everything in the chosen slots
    let mut evicted: Vec<NodeId> = Vec::new();
    let mut original: BTreeMap<NodeId, usize> = BTreeMap::new();
    for slot in slots {
        for pe in grid.pes_at_time(*slot) {
            for path in crate::dfg::PathTag::ALL {
                if let Some((node, _)) = grid.pe(pe).entry(path) {
                    evicted.push(node);
                    original.insert(node, pe);
                    grid.remove(dfg.node(node));
                }
            }
        }
    }

    // the constraints go back before the basic remap runs
    for c in &constraints {
        grid.place(dfg.node(*c), constraint_pos[c], modulo.iter_of(*c));
    }

    if remap_basic(dfg, failed, grid, modulo, rng)? {
        debug!("re-placing {} evicted nodes", evicted.len());
        for attempt in 0..policy.max_mapping_attempts {
            let mut replaced = true;
            evicted.shuffle(rng);
            for node in evicted.iter().copied() {
                let positions = potential_positions(dfg, node, grid, modulo)?;
                match positions.as_slice().choose(rng) {
                    Some(pe) => grid.place(dfg.node(node), *pe, modulo.iter_of(node)),
                    None => {
                        trace!("re-place attempt {attempt} failed at node {node}");
                        for n in evicted.iter() {
                            if grid.placed_pe(*n).is_some() {
                                grid.remove(dfg.node(*n));
                            }
                        }
                        replaced = false;
                        if !evicted.is_empty() && attempt as usize % evicted.len() == 0 {
                            // shake the failed node to open new compositions
                            grid.remove(dfg.node(failed));
                            remap_basic(dfg, failed, grid, modulo, rng)?;
                        }
                        break;
                    }
                }
            }
            if replaced {
                debug!("re-placement succeeded at attempt {attempt}");
                return Ok(true);
            }
        }
        debug!("re-placement failed, restoring");
        grid.remove(dfg.node(failed));
        // undo the constraint moves of the successful basic remap
        for c in &constraints {
            if grid.placed_pe(*c).is_some() {
                grid.remove(dfg.node(*c));
            }
            grid.place(dfg.node(*c), constraint_pos[c], modulo.iter_of(*c));
        }
    }

    // restore the evicted nodes at their original PEs
    for node in evicted {
        if grid.placed_pe(node).is_some() {
            grid.remove(dfg.node(node));
        }
        grid.place(dfg.node(node), original[&node], modulo.iter_of(node));
    }
    Ok(false)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dfg::{DepKind, Node, OpKind, PathTag};
    use crate::mapping::scheduler;
    use crate::mapping::schedule::Schedule;
    use cgra_isa::Datatype;
    use rand::{rngs::StdRng, SeedableRng};

    /// Build a node with defaults for tests.
    fn node(id: NodeId, op: OpKind) -> Node {
        Node::new(id, op, Datatype::Int32, format!("n{id}"), PathTag::None, None)
    }

    /// Modulo-schedule a DFG at the smallest feasible II for a 4×4 grid.
    fn schedule(dfg: &mut Dfg, ii: i64) -> ModuloSchedule {
        dfg.compute_cycles();
        let mut asap_s = Schedule::new(4, 4);
        let length =
            scheduler::asap_feasible(dfg, &mut asap_s, &crate::arch::MappingPolicy::default())
                .unwrap();
        let mut alap_s = Schedule::new(4, 4);
        scheduler::alap_feasible(dfg, length, &mut alap_s, &asap_s).unwrap();
        let sorted = scheduler::sorted_nodes(dfg, &asap_s);
        let mut ms = ModuloSchedule::new(4, 4, length);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(
            scheduler::modulo(dfg, &sorted, ii, &mut ms, &asap_s, &alap_s, &mut rng).unwrap()
        );
        ms
    }

    #[test]
    fn chain_placement_respects_reachability() {
        let mut dfg = Dfg::new();
        for id in 1..=3 {
            dfg.insert_node(node(id, OpKind::Add));
        }
        dfg.make_arc(1, 2, 0, DepKind::True, 0, PathTag::None);
        dfg.make_arc(2, 3, 0, DepKind::True, 0, PathTag::None);
        let ms = schedule(&mut dfg, 3);

        let mut grid = TimeGrid::new(4, 4, 3);
        let mut rng = StdRng::seed_from_u64(5);
        let ok = place(
            &dfg,
            &mut grid,
            &ms,
            &crate::arch::MappingPolicy::default(),
            &mut rng,
        )
        .unwrap();
        assert!(ok);
        for arc in dfg.all_arcs() {
            let from = grid.placed_pe(arc.from).unwrap();
            let to = grid.placed_pe(arc.to).unwrap();
            assert!(grid.is_reachable(from, to));
        }
    }

    #[test]
    fn memory_pair_lands_on_one_row() {
        let mut dfg = Dfg::new();
        let mut addr = node(1, OpKind::LoadAddress);
        addr.set_load_address(2);
        dfg.insert_node(addr);
        let mut data = node(2, OpKind::LoadData);
        data.set_load_data(1);
        dfg.insert_node(data);
        dfg.make_arc(1, 2, 0, DepKind::Load, 0, PathTag::None);
        let ms = schedule(&mut dfg, 2);

        let mut grid = TimeGrid::new(4, 4, 2);
        let mut rng = StdRng::seed_from_u64(9);
        let ok = place(
            &dfg,
            &mut grid,
            &ms,
            &crate::arch::MappingPolicy::default(),
            &mut rng,
        )
        .unwrap();
        assert!(ok);
        let addr_pe = grid.pe(grid.placed_pe(1).unwrap());
        let data_pe = grid.pe(grid.placed_pe(2).unwrap());
        assert_eq!(addr_pe.x, data_pe.x);
    }

    #[test]
    fn merged_peers_share_a_pe() {
        let mut dfg = Dfg::new();
        let mut t = node(1, OpKind::Add);
        t.path = PathTag::True;
        t.merged_with = Some(2);
        dfg.insert_node(t);
        let mut f = node(2, OpKind::Sub);
        f.path = PathTag::False;
        f.merged_with = Some(1);
        dfg.insert_node(f);
        dfg.insert_node(node(3, OpKind::Mult));
        dfg.make_arc(1, 3, 0, DepKind::True, 0, PathTag::True);
        dfg.make_arc(2, 3, 0, DepKind::True, 0, PathTag::False);
        let ms = schedule(&mut dfg, 2);

        let mut grid = TimeGrid::new(4, 4, 2);
        let mut rng = StdRng::seed_from_u64(13);
        let ok = place(
            &dfg,
            &mut grid,
            &ms,
            &crate::arch::MappingPolicy::default(),
            &mut rng,
        )
        .unwrap();
        assert!(ok);
        assert_eq!(grid.placed_pe(1), grid.placed_pe(2));
    }

    #[test]
    fn single_node_placement_trivial() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        let ms = schedule(&mut dfg, 1);
        let mut grid = TimeGrid::new(4, 4, 1);
        let mut rng = StdRng::seed_from_u64(2);
        assert!(place(
            &dfg,
            &mut grid,
            &ms,
            &crate::arch::MappingPolicy::default(),
            &mut rng
        )
        .unwrap());
        assert!(grid.placed_pe(1).is_some());
    }
}
