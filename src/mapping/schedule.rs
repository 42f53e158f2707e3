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

//! Per-cycle resource accounting for the schedulers. A [`Schedule`] tracks,
//! for every (path, time), how many PEs and how many address/data bus slots
//! are claimed; a [`ModuloSchedule`] additionally aggregates the counts of
//! all cycles that share a slot modulo the II.
//!
//! The dual-path rule is applied throughout: the two tagged paths never
//! execute together, so the effective usage at a time slot is the common
//! usage plus the maximum over the two paths.

use std::collections::BTreeMap;

use crate::dfg::{Node, NodeId, PathTag};

/// Usage counters keyed by (path, time).
type Usage = BTreeMap<(PathTag, i64), u32>;

/// Claimed resources per path and time slot.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
struct ResourceLedger {
    /// PEs claimed.
    pe: Usage,
    /// Address-bus slots claimed.
    addr: Usage,
    /// Data-bus slots claimed.
    data: Usage,
}

/// Usage of a counter at `time`, as seen by a common-path operation: the
/// common usage plus the larger of the two tagged paths.
fn combined(usage: &Usage, time: i64) -> u32 {
    let none = usage.get(&(PathTag::None, time)).copied().unwrap_or(0);
    let t = usage.get(&(PathTag::True, time)).copied().unwrap_or(0);
    let f = usage.get(&(PathTag::False, time)).copied().unwrap_or(0);
    none + t.max(f)
}

/// Usage of a counter at `time`, as seen by an operation on `path`: its own
/// path plus the common usage (or [`combined`] for the common path).
fn seen_by(usage: &Usage, path: PathTag, time: i64) -> u32 {
    match path {
        PathTag::None => combined(usage, time),
        tagged => {
            usage.get(&(tagged, time)).copied().unwrap_or(0)
                + usage.get(&(PathTag::None, time)).copied().unwrap_or(0)
        }
    }
}

/// Bump a counter.
fn claim(usage: &mut Usage, path: PathTag, time: i64, amount: u32) {
    *usage.entry((path, time)).or_insert(0) += amount;
}

/// A resource-feasible schedule over absolute cycles.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Schedule {
    /// Number of rows.
    x: u32,
    /// Total number of PEs.
    cgra_size: u32,
    /// Memory operations per row and cycle.
    per_row_mem: u32,
    /// Assigned cycle per node.
    times: BTreeMap<NodeId, i64>,
    /// Claimed resources.
    ledger: ResourceLedger,
}

impl Schedule {
    /// An empty schedule for an `x × y` grid.
    pub fn new(x: u32, y: u32) -> Self {
        Self {
            x,
            cgra_size: x * y,
            per_row_mem: 1,
            times: BTreeMap::new(),
            ledger: ResourceLedger::default(),
        }
    }

    /// Whether the node has been assigned a cycle.
    pub fn is_scheduled(&self, node: NodeId) -> bool {
        self.times.contains_key(&node)
    }

    /// The cycle assigned to the node.
    pub fn time(&self, node: NodeId) -> Option<i64> {
        self.times.get(&node).copied()
    }

    /// Whether a regular operation on `path` fits at `time`.
    pub fn res_available(&self, path: PathTag, time: i64) -> bool {
        seen_by(&self.ledger.pe, path, time) < self.cgra_size
    }

    /// Whether a load fits with its address at `time` and its data read at
    /// `time + 1`: one address-bus slot, one data-bus slot, and a PE in
    /// each of the two cycles.
    pub fn mem_ld_available(&self, path: PathTag, time: i64) -> bool {
        seen_by(&self.ledger.addr, path, time) < self.per_row_mem * self.x
            && seen_by(&self.ledger.data, path, time + 1) < self.per_row_mem * self.x
            && seen_by(&self.ledger.pe, path, time) < self.cgra_size
            && seen_by(&self.ledger.pe, path, time + 1) < self.cgra_size
    }

    /// Whether a store fits at `time`: address bus, data bus, and two PEs
    /// in the same cycle.
    pub fn mem_st_available(&self, path: PathTag, time: i64) -> bool {
        seen_by(&self.ledger.addr, path, time) < self.per_row_mem * self.x
            && seen_by(&self.ledger.data, path, time) < self.per_row_mem * self.x
            && seen_by(&self.ledger.pe, path, time) < self.cgra_size - 1
    }

    /// Claim a PE for a regular operation at `time`.
    pub fn schedule_op(&mut self, node: &Node, time: i64) {
        debug_assert!(self.res_available(node.path, time));
        claim(&mut self.ledger.pe, node.path, time, 1);
        self.times.insert(node.id, time);
    }

    /// Claim the load resources: the address generator at `time`, the data
    /// read at `time + 1`.
    pub fn schedule_ld(&mut self, addr: &Node, data: &Node, time: i64) {
        debug_assert_eq!(addr.path, data.path);
        debug_assert!(self.mem_ld_available(addr.path, time));
        claim(&mut self.ledger.addr, addr.path, time, 1);
        claim(&mut self.ledger.data, addr.path, time + 1, 1);
        claim(&mut self.ledger.pe, addr.path, time, 1);
        claim(&mut self.ledger.pe, addr.path, time + 1, 1);
        self.times.insert(addr.id, time);
        self.times.insert(data.id, time + 1);
    }

    /// Claim the store resources: both halves at `time`.
    pub fn schedule_st(&mut self, addr: &Node, data: &Node, time: i64) {
        debug_assert_eq!(addr.path, data.path);
        debug_assert!(self.mem_st_available(addr.path, time));
        claim(&mut self.ledger.addr, addr.path, time, 1);
        claim(&mut self.ledger.data, addr.path, time, 1);
        claim(&mut self.ledger.pe, addr.path, time, 2);
        self.times.insert(addr.id, time);
        self.times.insert(data.id, time);
    }

    /// The latest cycle with a scheduled node.
    pub fn max_time(&self) -> Option<i64> {
        self.times.values().copied().max()
    }
}

/// A modulo schedule: cycles are still absolute, but resource checks
/// aggregate every cycle of the schedule that shares the slot modulo II.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ModuloSchedule {
    /// Number of rows.
    x: u32,
    /// Total number of PEs.
    cgra_size: u32,
    /// Memory operations per row and cycle.
    per_row_mem: u32,
    /// Length of the flat schedule being folded.
    length: i64,
    /// The initiation interval.
    ii: i64,
    /// Assigned absolute cycle per node.
    times: BTreeMap<NodeId, i64>,
    /// Assigned cycle modulo II per node.
    mod_times: BTreeMap<NodeId, i64>,
    /// Claimed resources, keyed by absolute cycle.
    ledger: ResourceLedger,
}

impl ModuloSchedule {
    /// An empty modulo schedule for an `x × y` grid folding a flat schedule
    /// of `length` cycles.
    pub fn new(x: u32, y: u32, length: i64) -> Self {
        Self {
            x,
            cgra_size: x * y,
            per_row_mem: 1,
            length,
            ii: 1,
            times: BTreeMap::new(),
            mod_times: BTreeMap::new(),
            ledger: ResourceLedger::default(),
        }
    }

    /// Set the II for the following attempt.
    pub fn set_ii(&mut self, ii: i64) {
        self.ii = ii;
    }

    /// The current II.
    pub fn ii(&self) -> i64 {
        self.ii
    }

    /// Drop all assignments and claims.
    pub fn clear(&mut self) {
        self.times.clear();
        self.mod_times.clear();
        self.ledger = ResourceLedger::default();
    }

    /// Whether the node has been assigned a cycle.
    pub fn is_scheduled(&self, node: NodeId) -> bool {
        self.times.contains_key(&node)
    }

    /// The absolute cycle assigned to the node.
    pub fn time(&self, node: NodeId) -> Option<i64> {
        self.times.get(&node).copied()
    }

    /// The cycle modulo II assigned to the node.
    pub fn mod_time(&self, node: NodeId) -> Option<i64> {
        self.mod_times.get(&node).copied()
    }

    /// The iteration index of the node in the flat schedule.
    pub fn iter_of(&self, node: NodeId) -> i64 {
        self.times.get(&node).map(|t| t / self.ii).unwrap_or(-1)
    }

    /// All scheduled nodes with their cycle modulo II.
    pub fn mod_times(&self) -> &BTreeMap<NodeId, i64> {
        &self.mod_times
    }

    /// PE usage visible at `time` once folded: every other cycle congruent
    /// to it contributes its combined usage.
    fn folded(&self, usage: &Usage, path: PathTag, time: i64) -> u32 {
        let slot = time.rem_euclid(self.ii);
        let mut used = 0;
        for t in 0..self.length {
            if t.rem_euclid(self.ii) == slot && t != time {
                used += combined(usage, t);
            }
        }
        used + seen_by(usage, path, time)
    }

    /// Whether a regular operation on `path` fits at `time` considering the
    /// modulo overlap with all congruent cycles.
    pub fn res_available(&self, path: PathTag, time: i64) -> bool {
        self.folded(&self.ledger.pe, path, time) < self.cgra_size
    }

    /// Whether a load fits with its address at `time` and its data read at
    /// `time + 1`, considering the modulo overlap.
    pub fn mem_ld_available(&self, path: PathTag, time: i64) -> bool {
        self.folded(&self.ledger.addr, path, time) < self.per_row_mem * self.x
            && self.folded(&self.ledger.data, path, time + 1) < self.per_row_mem * self.x
            && self.folded(&self.ledger.pe, path, time) < self.cgra_size
            && self.folded(&self.ledger.pe, path, time + 1) < self.cgra_size
    }

    /// Whether a store fits at `time`, considering the modulo overlap.
    pub fn mem_st_available(&self, path: PathTag, time: i64) -> bool {
        self.folded(&self.ledger.addr, path, time) < self.per_row_mem * self.x
            && self.folded(&self.ledger.data, path, time) < self.per_row_mem * self.x
            && self.folded(&self.ledger.pe, path, time) < self.cgra_size - 1
    }

    /// Claim a PE for a regular operation at `time`.
    pub fn schedule_op(&mut self, node: &Node, time: i64) {
        debug_assert!(self.res_available(node.path, time));
        claim(&mut self.ledger.pe, node.path, time, 1);
        self.times.insert(node.id, time);
        self.mod_times.insert(node.id, time.rem_euclid(self.ii));
    }

    /// Claim the load resources: the address generator at `time`, the data
    /// read at `time + 1`.
    pub fn schedule_ld(&mut self, addr: &Node, data: &Node, time: i64) {
        debug_assert_eq!(addr.path, data.path);
        debug_assert!(self.mem_ld_available(addr.path, time));
        claim(&mut self.ledger.addr, addr.path, time, 1);
        claim(&mut self.ledger.data, addr.path, time + 1, 1);
        claim(&mut self.ledger.pe, addr.path, time, 1);
        claim(&mut self.ledger.pe, addr.path, time + 1, 1);
        self.times.insert(addr.id, time);
        self.times.insert(data.id, time + 1);
        self.mod_times.insert(addr.id, time.rem_euclid(self.ii));
        self.mod_times
            .insert(data.id, (time + 1).rem_euclid(self.ii));
    }

    /// Claim the store resources: both halves at `time`.
    pub fn schedule_st(&mut self, addr: &Node, data: &Node, time: i64) {
        debug_assert_eq!(addr.path, data.path);
        debug_assert!(self.mem_st_available(addr.path, time));
        claim(&mut self.ledger.addr, addr.path, time, 1);
        claim(&mut self.ledger.data, addr.path, time, 1);
        claim(&mut self.ledger.pe, addr.path, time, 2);
        self.times.insert(addr.id, time);
        self.times.insert(data.id, time);
        self.mod_times.insert(addr.id, time.rem_euclid(self.ii));
        self.mod_times.insert(data.id, time.rem_euclid(self.ii));
    }

    /// The largest iteration index over all scheduled nodes.
    pub fn max_iter(&self) -> i64 {
        self.times.values().map(|t| t / self.ii).max().unwrap_or(-1)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dfg::{Node, OpKind};
    use cgra_isa::Datatype;

    /// Build a node on the given path for tests.
    fn node(id: NodeId, path: PathTag) -> Node {
        let mut n = Node::new(id, OpKind::Add, Datatype::Int32, "n", path, None);
        n.latency = 1;
        n
    }

    #[test]
    fn opposite_paths_share_slots() {
        // a 1×2 grid has two PEs; the two tagged paths overlay, so a true
        // and a false op leave room for one more common op
        let mut s = Schedule::new(1, 2);
        s.schedule_op(&node(1, PathTag::True), 0);
        s.schedule_op(&node(2, PathTag::False), 0);
        assert!(s.res_available(PathTag::None, 0));
        s.schedule_op(&node(3, PathTag::None), 0);
        assert!(!s.res_available(PathTag::None, 0));
        assert!(!s.res_available(PathTag::True, 0));
    }

    #[test]
    fn store_reserves_two_pes() {
        let mut s = Schedule::new(1, 2);
        assert!(s.mem_st_available(PathTag::None, 0));
        let mut addr = node(1, PathTag::None);
        addr.set_store_address(2);
        let mut data = node(2, PathTag::None);
        data.set_store_data(1);
        s.schedule_st(&addr, &data, 0);
        assert!(!s.res_available(PathTag::None, 0));
    }

    #[test]
    fn load_splits_across_two_cycles() {
        let mut s = Schedule::new(2, 2);
        let mut addr = node(1, PathTag::None);
        addr.set_load_address(2);
        let mut data = node(2, PathTag::None);
        data.set_load_data(1);
        s.schedule_ld(&addr, &data, 3);
        assert_eq!(s.time(1), Some(3));
        assert_eq!(s.time(2), Some(4));
    }

    #[test]
    fn modulo_counts_congruent_cycles() {
        // 1×1 grid, length 4, II 2: cycles 0 and 2 fold together
        let mut m = ModuloSchedule::new(1, 1, 4);
        m.set_ii(2);
        m.schedule_op(&node(1, PathTag::None), 0);
        assert!(!m.res_available(PathTag::None, 2));
        assert!(m.res_available(PathTag::None, 1));
        assert_eq!(m.mod_time(1), Some(0));
        assert_eq!(m.iter_of(1), 0);
    }

    #[test]
    fn iteration_index_from_absolute_time() {
        let mut m = ModuloSchedule::new(2, 2, 9);
        m.set_ii(3);
        m.schedule_op(&node(1, PathTag::None), 7);
        assert_eq!(m.mod_time(1), Some(1));
        assert_eq!(m.iter_of(1), 2);
        assert_eq!(m.max_iter(), 2);
    }

    #[test]
    fn clear_resets_claims() {
        let mut m = ModuloSchedule::new(1, 1, 2);
        m.set_ii(1);
        m.schedule_op(&node(1, PathTag::None), 0);
        assert!(!m.res_available(PathTag::None, 1));
        m.clear();
        assert!(m.res_available(PathTag::None, 1));
        assert!(!m.is_scheduled(1));
    }
}
