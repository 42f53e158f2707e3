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

//! The four list schedulers and the modulo scheduler. ASAP and ALAP ignore
//! resources and bound the scheduling window; their feasible variants skip
//! to the next cycle whenever PEs or memory buses run out. The modulo
//! scheduler walks the nodes bottom-up by slack, randomizing the candidate
//! cycle inside each node's valid window.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, trace};
use rand::{seq::SliceRandom, Rng};

use super::schedule::{ModuloSchedule, Schedule};
use super::MapError;
use crate::arch::MappingPolicy;
use crate::dfg::{Dfg, MemRole, NodeId};

/// Unconstrained as-soon-as-possible schedule. Returns the schedule length
/// and the cycle of every node; start nodes sit at cycle 0.
pub fn asap(dfg: &Dfg) -> Result<(i64, BTreeMap<NodeId, i64>), MapError> {
    debug!("ASAP schedule started");
    let mut schedule: BTreeMap<NodeId, i64> = BTreeMap::new();
    let mut latest = 0;
    for node in dfg.start_nodes() {
        schedule.insert(node, 0);
    }
    let mut rest: BTreeSet<NodeId> = dfg.node_ids().into_iter().collect();
    rest.retain(|n| !schedule.contains_key(n));

    while !rest.is_empty() {
        let mut placed = Vec::new();
        for node in rest.iter().copied() {
            let mut time = 0;
            let mut ready = true;
            for pred in dfg.preds_same_iter(node) {
                match schedule.get(&pred) {
                    Some(t) => time = time.max(t + dfg.node(pred).latency),
                    None => {
                        ready = false;
                        break;
                    }
                }
            }
            if ready {
                schedule.insert(node, time);
                placed.push(node);
                latest = latest.max(time);
            }
        }
        if placed.is_empty() {
            return Err(MapError::Internal(
                "ASAP made no progress; the same-iteration dependencies are cyclic".into(),
            ));
        }
        for node in placed {
            rest.remove(&node);
        }
    }
    Ok((latest + 1, schedule))
}

/// Unconstrained as-late-as-possible schedule of the given length; end
/// nodes sit at the last cycle.
pub fn alap(dfg: &Dfg, length: i64) -> Result<BTreeMap<NodeId, i64>, MapError> {
    debug!("ALAP schedule started");
    let mut schedule: BTreeMap<NodeId, i64> = BTreeMap::new();
    for node in dfg.end_nodes() {
        schedule.insert(node, length - 1);
    }
    let mut rest: BTreeSet<NodeId> = dfg.node_ids().into_iter().collect();
    rest.retain(|n| !schedule.contains_key(n));

    while !rest.is_empty() {
        let mut placed = Vec::new();
        for node in rest.iter().copied() {
            let mut time = length;
            let mut ready = true;
            for succ in dfg.succs_same_iter(node) {
                match schedule.get(&succ) {
                    Some(t) => time = time.min(t - dfg.node(node).latency),
                    None => {
                        ready = false;
                        break;
                    }
                }
            }
            if ready {
                schedule.insert(node, time);
                placed.push(node);
            }
        }
        if placed.is_empty() {
            return Err(MapError::Internal(
                "ALAP made no progress; the same-iteration dependencies are cyclic".into(),
            ));
        }
        for node in placed {
            rest.remove(&node);
        }
    }
    Ok(schedule)
}

/// Earliest cycle a node may take in a feasible ASAP schedule, bounded by
/// its scheduled same-iteration predecessors (memory pairing excluded).
/// Returns `None` while a predecessor is missing.
fn check_asap(dfg: &Dfg, node: NodeId, schedule: &Schedule) -> Option<i64> {
    let mut time = 0;
    for pred in dfg.preds_same_iter_ex_mem(node) {
        let t = schedule.time(pred)?;
        time = time.max(t + dfg.node(pred).latency);
    }
    Some(time)
}

/// Latest cycle a node may take in a feasible ALAP schedule of the given
/// length, bounded by its scheduled same-iteration successors. Returns
/// `None` while a successor is missing.
fn check_alap(dfg: &Dfg, node: NodeId, length: i64, schedule: &Schedule) -> Option<i64> {
    let mut time = length - 1;
    for succ in dfg.succs_same_iter_ex_mem(node) {
        let t = schedule.time(succ)?;
        time = time.min(t - dfg.node(node).latency);
    }
    Some(time)
}

/// Whether the live-out constraint blocks scheduling a live-out node at
/// `time`: live-outs must come strictly after the loop control. Returns
/// `None` while the loop control exists but has no cycle yet; a loop
/// without a control node leaves its live-outs unconstrained.
fn live_out_blocked(dfg: &Dfg, schedule: &Schedule, time: i64) -> Option<bool> {
    match dfg.loop_ctrl_node() {
        None => Some(false),
        Some(lc) => schedule.time(lc).map(|t| time <= t),
    }
}

/// Resource-feasible ASAP schedule. Stores are placed first, then regular
/// operations, then loads (address and data together). Returns the
/// schedule length.
pub fn asap_feasible(
    dfg: &Dfg,
    schedule: &mut Schedule,
    policy: &MappingPolicy,
) -> Result<i64, MapError> {
    debug!("feasible ASAP schedule started");
    let mut latest = 0;
    let mut rest: BTreeSet<NodeId> = dfg.node_ids().into_iter().collect();

    // start nodes first; stores and live-outs wait for the main phases
    for id in dfg.start_nodes() {
        let node = dfg.node(id);
        match node.mem_role() {
            Some(MemRole::LoadAddress) => {
                let data = node.mem_partner().expect("memory pair is linked");
                if schedule.is_scheduled(data) {
                    return Err(MapError::Internal(format!(
                        "load data {data} scheduled before its address generator {id}"
                    )));
                }
                let mut placed = false;
                for t in 0..policy.max_latency {
                    if schedule.mem_ld_available(node.path, t) {
                        schedule.schedule_ld(node, dfg.node(data), t);
                        trace!("load pair ({id}, {data}) scheduled at ({t}, {})", t + 1);
                        rest.remove(&id);
                        rest.remove(&data);
                        latest = latest.max(t + 1);
                        placed = true;
                        break;
                    }
                }
                if !placed {
                    return Err(MapError::ScheduleLength { node: id });
                }
            }
            Some(MemRole::StoreAddress) => continue,
            Some(MemRole::LoadData) => {
                return Err(MapError::Internal(format!(
                    "load data {id} cannot be a start node"
                )))
            }
            _ => {
                if node.live_out {
                    continue;
                }
                let mut placed = false;
                for t in 0..policy.max_latency {
                    if schedule.res_available(node.path, t) {
                        schedule.schedule_op(node, t);
                        trace!("node {id} scheduled at {t}");
                        rest.remove(&id);
                        latest = latest.max(t);
                        placed = true;
                        break;
                    }
                }
                if !placed {
                    return Err(MapError::ScheduleLength { node: id });
                }
            }
        }
    }

    // partition the remaining nodes by priority class
    let mut store_left = BTreeSet::new();
    let mut load_left = BTreeSet::new();
    let mut reg_left = BTreeSet::new();
    for id in rest.iter().copied() {
        match dfg.node(id).mem_role() {
            Some(MemRole::StoreAddress) | Some(MemRole::StoreData) => store_left.insert(id),
            Some(MemRole::LoadAddress) | Some(MemRole::LoadData) => load_left.insert(id),
            _ => reg_left.insert(id),
        };
    }

    while !rest.is_empty() {
        let mut scheduled = Vec::new();

        // stores first
        for id in store_left.iter().copied() {
            let node = dfg.node(id);
            let partner = node.mem_partner().expect("memory pair is linked");
            let (Some(t0), Some(t1)) = (
                check_asap(dfg, id, schedule),
                check_asap(dfg, partner, schedule),
            ) else {
                continue;
            };
            for t in t0.max(t1)..policy.max_latency {
                if node.live_out || dfg.node(partner).live_out {
                    match live_out_blocked(dfg, schedule, t) {
                        None => break,
                        Some(true) => continue,
                        Some(false) => {}
                    }
                }
                if schedule.mem_st_available(node.path, t) {
                    schedule.schedule_st(node, dfg.node(partner), t);
                    trace!("store pair ({id}, {partner}) scheduled at {t}");
                    scheduled.push(id);
                    scheduled.push(partner);
                    latest = latest.max(t);
                    break;
                }
            }
            if !scheduled.is_empty() {
                break;
            }
        }
        if !scheduled.is_empty() {
            for id in scheduled {
                rest.remove(&id);
                store_left.remove(&id);
            }
            continue;
        }

        // then regular operations
        for id in reg_left.iter().copied() {
            let node = dfg.node(id);
            let Some(t0) = check_asap(dfg, id, schedule) else {
                continue;
            };
            for t in t0..policy.max_latency {
                if node.live_out {
                    match live_out_blocked(dfg, schedule, t) {
                        None => break,
                        Some(true) => continue,
                        Some(false) => {}
                    }
                }
                if schedule.res_available(node.path, t) {
                    schedule.schedule_op(node, t);
                    trace!("node {id} scheduled at {t}");
                    scheduled.push(id);
                    latest = latest.max(t);
                    break;
                }
            }
            if !scheduled.is_empty() {
                break;
            }
        }
        if !scheduled.is_empty() {
            for id in scheduled {
                rest.remove(&id);
                reg_left.remove(&id);
            }
            continue;
        }

        // loads last
        for id in load_left.iter().copied() {
            let node = dfg.node(id);
            let partner = node.mem_partner().expect("memory pair is linked");
            let (addr, data) = match node.mem_role() {
                Some(MemRole::LoadAddress) => (id, partner),
                _ => (partner, id),
            };
            let (Some(t_addr), Some(t_data)) = (
                check_asap(dfg, addr, schedule),
                check_asap(dfg, data, schedule),
            ) else {
                continue;
            };
            let start = t_addr.max(t_data - 1);
            for t in start..policy.max_latency {
                if schedule.mem_ld_available(dfg.node(addr).path, t) {
                    schedule.schedule_ld(dfg.node(addr), dfg.node(data), t);
                    trace!("load pair ({addr}, {data}) scheduled at ({t}, {})", t + 1);
                    scheduled.push(addr);
                    scheduled.push(data);
                    latest = latest.max(t + 1);
                    break;
                }
            }
            if !scheduled.is_empty() {
                break;
            }
        }
        if scheduled.is_empty() {
            let node = *rest.iter().next().expect("rest is non-empty");
            return Err(MapError::ScheduleLength { node });
        }
        for id in scheduled {
            rest.remove(&id);
            load_left.remove(&id);
        }
    }
    Ok(latest + 1)
}

/// Resource-feasible ALAP schedule of the given length. The loop control
/// is additionally forced strictly before every live-out (judged by their
/// feasible ASAP cycles).
pub fn alap_feasible(
    dfg: &Dfg,
    length: i64,
    schedule: &mut Schedule,
    asap_schedule: &Schedule,
) -> Result<(), MapError> {
    debug!("feasible ALAP schedule started");
    let mut rest: BTreeSet<NodeId> = dfg.node_ids().into_iter().collect();

    /// Whether the loop-control node must avoid cycle `t` to stay before
    /// the live-outs.
    fn loop_ctrl_blocked(dfg: &Dfg, asap_schedule: &Schedule, t: i64) -> bool {
        dfg.live_out_nodes()
            .into_iter()
            .any(|lo| asap_schedule.time(lo).map(|alo| alo <= t).unwrap_or(true))
    }

    // end nodes first, from the last cycle downward
    for id in dfg.end_nodes() {
        let node = dfg.node(id);
        let mut placed = false;
        match node.mem_role() {
            Some(MemRole::LoadData) => {
                let addr = node.mem_partner().expect("memory pair is linked");
                for t in (0..length).rev() {
                    if schedule.mem_ld_available(dfg.node(addr).path, t - 1) {
                        schedule.schedule_ld(dfg.node(addr), node, t - 1);
                        rest.remove(&id);
                        rest.remove(&addr);
                        placed = true;
                        break;
                    }
                }
            }
            Some(MemRole::StoreData) => {
                let addr = node.mem_partner().expect("memory pair is linked");
                for t in (0..length).rev() {
                    if schedule.mem_st_available(node.path, t) {
                        schedule.schedule_st(dfg.node(addr), node, t);
                        rest.remove(&id);
                        rest.remove(&addr);
                        placed = true;
                        break;
                    }
                }
            }
            _ => {
                for t in (0..length).rev() {
                    if node.loop_ctrl && loop_ctrl_blocked(dfg, asap_schedule, t) {
                        continue;
                    }
                    if schedule.res_available(node.path, t) {
                        schedule.schedule_op(node, t);
                        rest.remove(&id);
                        placed = true;
                        break;
                    }
                }
            }
        }
        if !placed {
            return Err(MapError::ScheduleLength { node: id });
        }
    }

    while !rest.is_empty() {
        let mut scheduled = Vec::new();
        for id in rest.iter().copied() {
            if scheduled.contains(&id) {
                continue;
            }
            let node = dfg.node(id);
            match node.mem_role() {
                Some(MemRole::StoreAddress) | Some(MemRole::StoreData) => {
                    let partner = node.mem_partner().expect("memory pair is linked");
                    let (Some(t0), Some(t1)) = (
                        check_alap(dfg, id, length, schedule),
                        check_alap(dfg, partner, length, schedule),
                    ) else {
                        continue;
                    };
                    for t in (0..=t0.min(t1)).rev() {
                        if schedule.mem_st_available(node.path, t) {
                            schedule.schedule_st(node, dfg.node(partner), t);
                            scheduled.push(id);
                            scheduled.push(partner);
                            break;
                        }
                    }
                }
                Some(MemRole::LoadAddress) | Some(MemRole::LoadData) => {
                    let partner = node.mem_partner().expect("memory pair is linked");
                    let (addr, data) = match node.mem_role() {
                        Some(MemRole::LoadAddress) => (id, partner),
                        _ => (partner, id),
                    };
                    let (Some(t_addr), Some(t_data)) = (
                        check_alap(dfg, addr, length, schedule),
                        check_alap(dfg, data, length, schedule),
                    ) else {
                        continue;
                    };
                    for t in (0..=t_addr.min(t_data - 1)).rev() {
                        if schedule.mem_ld_available(dfg.node(addr).path, t) {
                            schedule.schedule_ld(dfg.node(addr), dfg.node(data), t);
                            scheduled.push(addr);
                            scheduled.push(data);
                            break;
                        }
                    }
                }
                _ => {
                    let Some(t0) = check_alap(dfg, id, length, schedule) else {
                        continue;
                    };
                    for t in (0..=t0).rev() {
                        if node.loop_ctrl && loop_ctrl_blocked(dfg, asap_schedule, t) {
                            continue;
                        }
                        if schedule.res_available(node.path, t) {
                            schedule.schedule_op(node, t);
                            scheduled.push(id);
                            break;
                        }
                    }
                }
            }
        }
        if scheduled.is_empty() {
            let node = *rest.iter().next().expect("rest is non-empty");
            return Err(MapError::ScheduleLength { node });
        }
        for id in scheduled {
            rest.remove(&id);
        }
    }
    Ok(())
}

/// Whether `source` reaches any node in `dest` forward through
/// same-iteration successors.
fn down_reachable(dfg: &Dfg, source: NodeId, dest: &BTreeSet<NodeId>) -> bool {
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::from([source]);
    while let Some(node) = queue.pop_front() {
        if !visited.insert(node) {
            continue;
        }
        for succ in dfg.succs_same_iter(node) {
            if visited.contains(&succ) {
                continue;
            }
            if dest.contains(&succ) {
                return true;
            }
            queue.push_back(succ);
        }
    }
    false
}

/// Whether `source` reaches any node in `dest` backward through
/// same-iteration predecessors.
fn up_reachable(dfg: &Dfg, source: NodeId, dest: &BTreeSet<NodeId>) -> bool {
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::from([source]);
    while let Some(node) = queue.pop_front() {
        if !visited.insert(node) {
            continue;
        }
        for pred in dfg.preds_same_iter(node) {
            if visited.contains(&pred) {
                continue;
            }
            if dest.contains(&pred) {
                return true;
            }
            queue.push_back(pred);
        }
    }
    false
}

/// The connector nodes between `source` and `dest`: every node on a
/// same-iteration chain leaving `source` that still reaches `dest`, found
/// by one downward and one upward sweep.
fn nodes_between(dfg: &Dfg, source: &BTreeSet<NodeId>, dest: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
    let mut between = BTreeSet::new();

    // downward sweep
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<NodeId> = source
        .iter()
        .copied()
        .filter(|n| down_reachable(dfg, *n, dest))
        .collect();
    while let Some(node) = queue.pop_front() {
        if !visited.insert(node) {
            continue;
        }
        for succ in dfg.succs_same_iter(node) {
            if visited.contains(&succ) || dest.contains(&succ) || source.contains(&succ) {
                continue;
            }
            if down_reachable(dfg, succ, dest) {
                between.insert(succ);
                queue.push_back(succ);
            }
        }
    }

    // upward sweep
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<NodeId> = source
        .iter()
        .copied()
        .filter(|n| up_reachable(dfg, *n, dest))
        .collect();
    while let Some(node) = queue.pop_front() {
        if !visited.insert(node) {
            continue;
        }
        for pred in dfg.preds_same_iter(node) {
            if visited.contains(&pred) || dest.contains(&pred) || source.contains(&pred) {
                continue;
            }
            if up_reachable(dfg, pred, dest) {
                between.insert(pred);
                queue.push_back(pred);
            }
        }
    }
    between
}

/// Order the nodes for the modulo scheduler: cycles first (highest II
/// ratio first), each preceded by its connectors to already-ordered nodes,
/// then the remaining acyclic nodes; each group is sorted by feasible ASAP
/// cycle, latest first.
pub fn sorted_nodes(dfg: &Dfg, asap_schedule: &Schedule) -> Vec<NodeId> {
    let mut groups: Vec<BTreeSet<NodeId>> = Vec::new();
    let mut visited: BTreeSet<NodeId> = BTreeSet::new();
    for (cycle, _) in dfg.cycles() {
        if cycle.len() == 1 {
            continue;
        }
        let between = nodes_between(dfg, cycle, &visited);
        visited.extend(between.iter().copied());
        groups.push(between);
        visited.extend(cycle.iter().copied());
        groups.push(cycle.clone());
    }
    let leftover: BTreeSet<NodeId> = dfg
        .node_ids()
        .into_iter()
        .filter(|n| !visited.contains(n))
        .collect();
    groups.push(leftover);

    let mut sorted = Vec::new();
    for group in groups {
        let mut nodes: Vec<NodeId> = group.into_iter().collect();
        nodes.sort_by_key(|n| std::cmp::Reverse(asap_schedule.time(*n).unwrap_or(0)));
        sorted.extend(nodes);
    }
    trace!("modulo scheduling order: {sorted:?}");
    sorted
}

/// Latest cycle a node may take in the modulo schedule: its feasible ALAP
/// cycle, tightened by every modulo-scheduled same-iteration successor.
/// Returns `None` while a successor is missing.
fn check_modulo(
    dfg: &Dfg,
    node: NodeId,
    modulo: &ModuloSchedule,
    alap_schedule: &Schedule,
) -> Option<i64> {
    let mut time = alap_schedule
        .time(node)
        .expect("feasible ALAP covers every node");
    for succ in dfg.succs_same_iter_ex_mem(node) {
        let t = modulo.time(succ)?;
        time = time.min(t - dfg.node(node).latency);
    }
    Some(time)
}

/// Earliest cycle allowed by the modulo-scheduled same-iteration
/// predecessors, or the feasible ASAP cycle when none is scheduled yet.
fn mod_constrained_time(
    dfg: &Dfg,
    node: NodeId,
    modulo: &ModuloSchedule,
    asap_schedule: &Schedule,
) -> i64 {
    let mut constrained = None;
    for pred in dfg.preds_same_iter(node) {
        if let Some(t) = modulo.time(pred) {
            let earliest = t + dfg.node(pred).latency;
            constrained = Some(constrained.map_or(earliest, |c: i64| c.max(earliest)));
        }
    }
    constrained.unwrap_or_else(|| {
        asap_schedule
            .time(node)
            .expect("feasible ASAP covers every node")
    })
}

/// One modulo-scheduling attempt at the given II. Nodes are taken
/// ready-first (all same-iteration successors scheduled), lowest slack
/// first, and each is tried at random cycles inside its valid window; the
/// split condition is forced to its earliest cycle to minimize the
/// speculation window. Returns `false` when the attempt dead-ends.
pub fn modulo(
    dfg: &Dfg,
    sorted: &[NodeId],
    ii: i64,
    modulo_schedule: &mut ModuloSchedule,
    asap_schedule: &Schedule,
    alap_schedule: &Schedule,
    rng: &mut impl Rng,
) -> Result<bool, MapError> {
    debug!("modulo schedule attempt at II {ii}");
    modulo_schedule.clear();
    modulo_schedule.set_ii(ii);
    let mut to_schedule: Vec<NodeId> = sorted.to_vec();

    while !to_schedule.is_empty() {
        // pick the ready node with the lowest slack, ties broken by the
        // sort order
        let mut pick: Option<(NodeId, i64)> = None;
        for id in to_schedule.iter().copied() {
            let node = dfg.node(id);
            if matches!(
                node.mem_role(),
                Some(MemRole::LoadAddress) | Some(MemRole::StoreAddress)
            ) {
                continue;
            }
            if node.is_mem() {
                let partner = node.mem_partner().expect("memory pair is linked");
                if check_modulo(dfg, partner, modulo_schedule, alap_schedule).is_none() {
                    continue;
                }
            }
            let Some(latest) = check_modulo(dfg, id, modulo_schedule, alap_schedule) else {
                continue;
            };
            let slack = latest
                - asap_schedule
                    .time(id)
                    .expect("feasible ASAP covers every node");
            if pick.map(|(_, s)| slack < s).unwrap_or(true) {
                pick = Some((id, slack));
            }
        }
        let Some((id, _)) = pick else {
            debug!(
                "no schedulable node with {} left: {to_schedule:?}",
                to_schedule.len()
            );
            return Ok(false);
        };
        let node = dfg.node(id);

        let mut start = mod_constrained_time(dfg, id, modulo_schedule, asap_schedule);
        for pred in dfg.carried_preds_dep(id) {
            // carried predecessors already scheduled push the window down
            if let Some(t) = modulo_schedule.time(pred) {
                let distance = dfg
                    .arc_between(pred, id)
                    .map(|a| a.distance)
                    .unwrap_or_default();
                start = start.max(t + dfg.node(pred).latency - distance * ii);
            }
        }
        let end = check_modulo(dfg, id, modulo_schedule, alap_schedule)
            .expect("the picked node is ready");
        trace!("scheduling node {id} in window [{start}, {end}]");
        if start > end {
            debug!("empty window for node {id}");
            return Ok(false);
        }

        let mut candidates: Vec<i64> = (start..=end).collect();
        candidates.shuffle(rng);
        if node.split_cond {
            // keep the speculation window as small as possible
            candidates = vec![start];
        }

        let mut scheduled = false;
        for t in candidates {
            match node.mem_role() {
                Some(MemRole::LoadData) => {
                    let addr = node.mem_partner().expect("memory pair is linked");
                    let latest_addr = check_modulo(dfg, addr, modulo_schedule, alap_schedule)
                        .expect("partner readiness was checked");
                    if latest_addr < t - 1 {
                        continue;
                    }
                    if modulo_schedule.mem_ld_available(dfg.node(addr).path, t - 1) {
                        modulo_schedule.schedule_ld(dfg.node(addr), node, t - 1);
                        to_schedule.retain(|n| *n != id && *n != addr);
                        trace!("load pair ({addr}, {id}) at ({}, {t})", t - 1);
                        scheduled = true;
                        break;
                    }
                }
                Some(MemRole::StoreData) => {
                    let addr = node.mem_partner().expect("memory pair is linked");
                    let latest_addr = check_modulo(dfg, addr, modulo_schedule, alap_schedule)
                        .expect("partner readiness was checked");
                    if latest_addr < t {
                        continue;
                    }
                    if modulo_schedule.mem_st_available(dfg.node(addr).path, t) {
                        modulo_schedule.schedule_st(dfg.node(addr), node, t);
                        to_schedule.retain(|n| *n != id && *n != addr);
                        trace!("store pair ({addr}, {id}) at {t}");
                        scheduled = true;
                        break;
                    }
                }
                _ => {
                    if modulo_schedule.res_available(node.path, t) {
                        modulo_schedule.schedule_op(node, t);
                        to_schedule.retain(|n| *n != id);
                        trace!("node {id} at {t} (mod {})", t.rem_euclid(ii));
                        scheduled = true;
                        break;
                    }
                }
            }
        }
        if !scheduled {
            debug!("no candidate cycle left for node {id}");
            return Ok(false);
        }
    }
    Ok(true)
}
