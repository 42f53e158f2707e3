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

//! The time-extended toroidal PE grid: `x × y` processing elements unrolled
//! over II cycles, plus the per-row memory-bus bookkeeping. Every slot
//! holds up to three entries keyed by path; a common entry excludes the
//! tagged ones, and the two tagged entries may share a slot only within the
//! same iteration.

use std::collections::BTreeMap;

use crate::dfg::{Node, NodeId, PathTag};

/// One slot entry: the node occupying it and its iteration index.
type SlotEntry = Option<(NodeId, i64)>;

/// Path-keyed occupancy of one resource (PE or bus side of a row).
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
struct PathSlots([SlotEntry; 3]);

impl PathSlots {
    /// Whether a node on `path` in iteration `iter` may claim this
    /// resource: the common slot excludes everything, and the opposite
    /// tagged slot is only compatible within the same iteration.
    fn available(&self, path: PathTag, iter: i64) -> bool {
        if self.0[PathTag::None.index()].is_some() {
            return false;
        }
        let opposite = match path {
            PathTag::None => {
                return self.0[PathTag::True.index()].is_none()
                    && self.0[PathTag::False.index()].is_none()
            }
            tagged => tagged.opposite().expect("tagged paths have an opposite"),
        };
        if self.0[path.index()].is_some() {
            return false;
        }
        match self.0[opposite.index()] {
            None => true,
            Some((_, other_iter)) => other_iter == iter,
        }
    }

    /// Entry of the given path.
    fn get(&self, path: PathTag) -> SlotEntry {
        self.0[path.index()]
    }

    /// Claim the slot of the given path.
    fn set(&mut self, path: PathTag, node: NodeId, iter: i64) {
        self.0[path.index()] = Some((node, iter));
    }

    /// Release the slot holding `node`, if any.
    fn unset(&mut self, node: NodeId) -> bool {
        for entry in self.0.iter_mut() {
            if entry.map(|(n, _)| n) == Some(node) {
                *entry = None;
                return true;
            }
        }
        false
    }

    /// Whether any slot is taken.
    fn occupied(&self) -> bool {
        self.0.iter().any(Option::is_some)
    }
}

/// One processing element of the time-extended grid.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Pe {
    /// Row of this PE.
    pub x: u32,
    /// Column of this PE within its row.
    pub y: u32,
    /// Cycle of this PE in the time extension.
    pub t: i64,
    /// Path-keyed occupancy.
    slots: PathSlots,
}

impl Pe {
    /// The node occupying the slot of `path`, with its iteration.
    pub fn entry(&self, path: PathTag) -> SlotEntry {
        self.slots.get(path)
    }

    /// Whether any path slot is taken.
    pub fn occupied(&self) -> bool {
        self.slots.occupied()
    }

    /// The iteration index of this PE: the entries agree by construction,
    /// so the first occupied slot decides. `None` when empty.
    pub fn iteration(&self) -> Option<i64> {
        PathTag::ALL
            .into_iter()
            .find_map(|p| self.slots.get(p).map(|(_, iter)| iter))
    }
}

/// The memory-bus bookkeeping of one row at one cycle.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Row {
    /// Row index.
    pub x: u32,
    /// Cycle in the time extension.
    pub t: i64,
    /// Address-bus occupancy.
    addr: PathSlots,
    /// Data-bus occupancy.
    data: PathSlots,
}

/// The time-extended grid with its placement state.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TimeGrid {
    /// Number of rows.
    x: u32,
    /// Number of PEs per row.
    y: u32,
    /// Number of cycles (the II).
    ii: i64,
    /// PEs in (t, x, y) row-major order.
    pes: Vec<Pe>,
    /// Rows in (t, x) row-major order.
    rows: Vec<Row>,
    /// Placed nodes and the index of their PE.
    placed: BTreeMap<NodeId, usize>,
}

impl TimeGrid {
    /// An empty grid of `x × y` PEs extended over `ii` cycles.
    pub fn new(x: u32, y: u32, ii: i64) -> Self {
        let mut pes = Vec::with_capacity((x * y) as usize * ii as usize);
        let mut rows = Vec::with_capacity(x as usize * ii as usize);
        for t in 0..ii {
            for xi in 0..x {
                rows.push(Row {
                    x: xi,
                    t,
                    addr: PathSlots::default(),
                    data: PathSlots::default(),
                });
                for yi in 0..y {
                    pes.push(Pe {
                        x: xi,
                        y: yi,
                        t,
                        slots: PathSlots::default(),
                    });
                }
            }
        }
        Self {
            x,
            y,
            ii,
            pes,
            rows,
            placed: BTreeMap::new(),
        }
    }

    /// Number of rows.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Number of PEs per row.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Number of cycles.
    pub fn ii(&self) -> i64 {
        self.ii
    }

    /// Index of the PE at (x, y, t).
    pub fn pe_index(&self, x: u32, y: u32, t: i64) -> usize {
        debug_assert!(x < self.x && y < self.y && t < self.ii);
        t as usize * (self.x * self.y) as usize + (x * self.y + y) as usize
    }

    /// The PE at the given index.
    pub fn pe(&self, index: usize) -> &Pe {
        &self.pes[index]
    }

    /// Indices of every PE at cycle `t`.
    pub fn pes_at_time(&self, t: i64) -> std::ops::Range<usize> {
        let size = (self.x * self.y) as usize;
        let start = t as usize * size;
        start..start + size
    }

    /// Indices of every PE of row `x` at cycle `t`.
    pub fn pes_at_row(&self, x: u32, t: i64) -> std::ops::Range<usize> {
        let start = self.pe_index(x, 0, t);
        start..start + self.y as usize
    }

    /// Index of the row bookkeeping of row `x` at cycle `t`.
    pub fn row_index(&self, x: u32, t: i64) -> usize {
        debug_assert!(x < self.x && t < self.ii);
        t as usize * self.x as usize + x as usize
    }

    /// The row at the given index.
    pub fn row(&self, index: usize) -> &Row {
        &self.rows[index]
    }

    /// The PE index a node is placed on, if any.
    pub fn placed_pe(&self, node: NodeId) -> Option<usize> {
        self.placed.get(&node).copied()
    }

    /// Whether a node on `path` in iteration `iter` can claim the PE.
    pub fn pe_available(&self, index: usize, path: PathTag, iter: i64) -> bool {
        self.pes[index].slots.available(path, iter)
    }

    /// Whether the address bus of the row is free for `path` in `iter`.
    pub fn row_addr_available(&self, index: usize, path: PathTag, iter: i64) -> bool {
        self.rows[index].addr.available(path, iter)
    }

    /// Whether the data bus of the row is free for `path` in `iter`.
    pub fn row_data_available(&self, index: usize, path: PathTag, iter: i64) -> bool {
        self.rows[index].data.available(path, iter)
    }

    /// Whether a value produced on `from` can be consumed on `to`: the
    /// consumer sits one cycle later (mod II) on the same PE or a toroidal
    /// neighbor.
    pub fn is_reachable(&self, from: usize, to: usize) -> bool {
        let f = &self.pes[from];
        let t = &self.pes[to];
        if (f.t + 1).rem_euclid(self.ii) != t.t {
            return false;
        }
        if f.x == t.x {
            f.y == t.y || (f.y + 1) % self.y == t.y || (t.y + 1) % self.y == f.y
        } else if f.y == t.y {
            (f.x + 1) % self.x == t.x || (t.x + 1) % self.x == f.x
        } else {
            false
        }
    }

    /// Place a node on the PE, claiming the row bus for memory nodes.
    pub fn place(&mut self, node: &Node, index: usize, iter: i64) {
        self.pes[index].slots.set(node.path, node.id, iter);
        self.placed.insert(node.id, index);
        if let Some(role) = node.mem_role() {
            let row = self.row_index(self.pes[index].x, self.pes[index].t);
            let slots = if role.is_address() {
                &mut self.rows[row].addr
            } else {
                &mut self.rows[row].data
            };
            slots.set(node.path, node.id, iter);
        }
    }

    /// Remove a node from the grid, releasing its row bus claim.
    pub fn remove(&mut self, node: &Node) {
        let Some(index) = self.placed.remove(&node.id) else {
            return;
        };
        self.pes[index].slots.unset(node.id);
        if let Some(role) = node.mem_role() {
            let row = self.row_index(self.pes[index].x, self.pes[index].t);
            let slots = if role.is_address() {
                &mut self.rows[row].addr
            } else {
                &mut self.rows[row].data
            };
            slots.unset(node.id);
        }
    }

    /// Release every slot.
    pub fn clear(&mut self) {
        for pe in &mut self.pes {
            pe.slots = PathSlots::default();
        }
        for row in &mut self.rows {
            row.addr = PathSlots::default();
            row.data = PathSlots::default();
        }
        self.placed.clear();
    }

    /// Whether every node of `nodes` has a PE.
    pub fn all_placed(&self, nodes: &[NodeId]) -> bool {
        nodes.iter().all(|n| self.placed.contains_key(n))
    }
}
