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

//! The dataflow graph of one innermost loop: nodes (operations), arcs
//! (dependencies with an iteration distance), constants, and the recurrence
//! analysis on top of them. The graph is built by [`builder`], reshaped by
//! [`transform`], and read-only from the scheduler onward.

use std::collections::{BTreeMap, BTreeSet};

use cgra_isa::{CondOpCode, Datatype, OpCode};
use petgraph::{algo::tarjan_scc, graph::DiGraph};

pub mod builder;
pub mod transform;

/// Identifier of a node within one DFG.
pub type NodeId = u32;
/// Identifier of an arc within one DFG.
pub type ArcId = u32;

/// Which branch of a split loop an element belongs to. `None` elements
/// execute regardless of the branch decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PathTag {
    /// Common to both paths.
    None,
    /// Only executed when the split condition is true.
    True,
    /// Only executed when the split condition is false.
    False,
}

impl PathTag {
    /// All three tags, in slot order.
    pub const ALL: [PathTag; 3] = [PathTag::None, PathTag::True, PathTag::False];

    /// The opposite tagged path; `None` has no opposite.
    pub fn opposite(self) -> Option<PathTag> {
        match self {
            PathTag::None => None,
            PathTag::True => Some(PathTag::False),
            PathTag::False => Some(PathTag::True),
        }
    }

    /// Slot index of this tag on a PE or row.
    pub fn index(self) -> usize {
        match self {
            PathTag::None => 0,
            PathTag::True => 1,
            PathTag::False => 2,
        }
    }

    /// Parse the numeric tag of the node stream (0/1/2).
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(PathTag::None),
            1 => Some(PathTag::True),
            2 => Some(PathTag::False),
            _ => None,
        }
    }
}

/// Dependency class of an arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DepKind {
    /// Data dependency.
    True,
    /// Predicate dependency.
    Pred,
    /// Pairs a load address generator with its data-bus read; imposes one
    /// cycle between them.
    Load,
    /// Pairs a store address generator with its data-bus write; the two are
    /// coincident.
    Store,
    /// Memory-ordering dependency.
    Memory,
    /// Loop-control dependency.
    LoopControl,
    /// Use of a live-in value.
    LiveIn,
    /// Definition of a live-out value.
    LiveOut,
}

impl DepKind {
    /// Whether this arc carries a scheduling dependency between two compute
    /// slots (as opposed to pairing the two halves of a memory operation).
    pub fn is_data_or_pred(self) -> bool {
        matches!(self, DepKind::True | DepKind::Pred | DepKind::LiveIn)
    }

    /// Whether this arc pairs the two halves of a memory operation.
    pub fn is_mem_pair(self) -> bool {
        matches!(self, DepKind::Load | DepKind::Store)
    }
}

/// Operation kind of a node. The discriminants match the numeric codes of
/// the external node stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OpKind {
    /// Addition
    Add = 0,
    /// Subtraction
    Sub = 1,
    /// Multiplication
    Mult = 2,
    /// Division
    Div = 3,
    /// Arithmetic shift left
    Asl = 4,
    /// Arithmetic shift right
    Asr = 5,
    /// Bitwise and
    And = 6,
    /// Bitwise or
    Or = 7,
    /// Bitwise xor
    Xor = 8,
    /// Signed greater-than comparison
    CmpSgt = 9,
    /// Equality comparison
    CmpEq = 10,
    /// Inequality comparison
    CmpNeq = 11,
    /// Signed less-than comparison
    CmpSlt = 12,
    /// Signed less-or-equal comparison
    CmpSle = 13,
    /// Signed greater-or-equal comparison
    CmpSge = 14,
    /// Unsigned greater-than comparison
    CmpUgt = 15,
    /// Unsigned less-than comparison
    CmpUlt = 16,
    /// Unsigned less-or-equal comparison
    CmpUle = 17,
    /// Unsigned greater-or-equal comparison
    CmpUge = 18,
    /// Load address generator
    LoadAddress = 19,
    /// Load data-bus read
    LoadData = 20,
    /// Store address generator
    StoreAddress = 21,
    /// Store data-bus write
    StoreData = 22,
    /// Conditional load address generator
    CondLoadAddress = 23,
    /// Conditional load data-bus read
    CondLoadData = 24,
    /// Loop control comparison
    LoopControl = 25,
    /// Conditional select
    CondSelect = 26,
    /// Routing operation inserted by the mapper
    Route = 27,
    /// Routing operation inserted by the front-end
    FrontendRoute = 28,
    /// Phi at the loop header or a path join
    Phi = 29,
    /// Constant value
    Constant = 30,
    /// Remainder
    Rem = 31,
    /// Sign extension
    SignExtend = 32,
    /// Bit cast
    BitCast = 33,
    /// Logical shift right
    Lshr = 34,
    /// Any operation the grid cannot express
    Other = 35,
}

impl OpKind {
    /// Parse the numeric operation code of the node stream.
    pub fn from_code(code: u32) -> Option<Self> {
        use OpKind::*;
        Some(match code {
            0 => Add,
            1 => Sub,
            2 => Mult,
            3 => Div,
            4 => Asl,
            5 => Asr,
            6 => And,
            7 => Or,
            8 => Xor,
            9 => CmpSgt,
            10 => CmpEq,
            11 => CmpNeq,
            12 => CmpSlt,
            13 => CmpSle,
            14 => CmpSge,
            15 => CmpUgt,
            16 => CmpUlt,
            17 => CmpUle,
            18 => CmpUge,
            19 => LoadAddress,
            20 => LoadData,
            21 => StoreAddress,
            22 => StoreData,
            23 => CondLoadAddress,
            24 => CondLoadData,
            25 => LoopControl,
            26 => CondSelect,
            27 => Route,
            28 => FrontendRoute,
            29 => Phi,
            30 => Constant,
            31 => Rem,
            32 => SignExtend,
            33 => BitCast,
            34 => Lshr,
            35 => Other,
            _ => return None,
        })
    }

    /// Whether this operation is a comparison.
    pub fn is_compare(self) -> bool {
        (9..=18).contains(&(self as u32))
    }

    /// The condition-instruction opcode of a comparison. Signed and
    /// unsigned variants share an encoding; ordered comparisons with
    /// equality have no C-type counterpart.
    pub fn cond_opcode(self) -> Option<CondOpCode> {
        match self {
            OpKind::CmpEq => Some(CondOpCode::CmpEq),
            OpKind::CmpNeq => Some(CondOpCode::CmpNeq),
            OpKind::CmpSgt | OpKind::CmpUgt => Some(CondOpCode::CmpGt),
            OpKind::CmpSlt | OpKind::CmpUlt => Some(CondOpCode::CmpLt),
            _ => None,
        }
    }

    /// The regular-instruction opcode of this operation, if it maps to one.
    pub fn regular_opcode(self) -> Option<OpCode> {
        match self {
            OpKind::Add => Some(OpCode::Add),
            OpKind::Sub => Some(OpCode::Sub),
            OpKind::Mult => Some(OpCode::Mult),
            OpKind::Div => Some(OpCode::Div),
            OpKind::Asl => Some(OpCode::Asl),
            OpKind::Asr => Some(OpCode::Asr),
            OpKind::And => Some(OpCode::And),
            OpKind::Or => Some(OpCode::Or),
            OpKind::Xor => Some(OpCode::Xor),
            OpKind::Rem => Some(OpCode::Rem),
            OpKind::Lshr => Some(OpCode::Lshr),
            OpKind::CmpEq => Some(OpCode::Eq),
            OpKind::CmpNeq => Some(OpCode::Neq),
            OpKind::CmpSgt | OpKind::CmpUgt => Some(OpCode::Gt),
            OpKind::CmpSlt | OpKind::CmpUlt => Some(OpCode::Lt),
            _ => None,
        }
    }
}

/// Role of a node within a memory-operation pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MemRole {
    /// Drives the row address bus for a load.
    LoadAddress,
    /// Reads the row data bus one cycle after its address generator.
    LoadData,
    /// Drives the row address bus for a store.
    StoreAddress,
    /// Drives the row data bus in the same cycle as its address generator.
    StoreData,
}

impl MemRole {
    /// Whether this role drives the address bus.
    pub fn is_address(self) -> bool {
        matches!(self, MemRole::LoadAddress | MemRole::StoreAddress)
    }

    /// Whether this role belongs to a load.
    pub fn is_load(self) -> bool {
        matches!(self, MemRole::LoadAddress | MemRole::LoadData)
    }
}

/// One operation of the loop body.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Node {
    /// Unique id within the DFG.
    pub id: NodeId,
    /// Operation kind.
    pub op: OpKind,
    /// Operand datatype.
    pub datatype: Datatype,
    /// Name given by the front end.
    pub name: String,
    /// Cycles until the result is available.
    pub latency: i64,
    /// Branch path this node belongs to.
    pub path: PathTag,
    /// Branch this comparison governs, if any.
    pub cond_branch: Option<u32>,
    /// Data alignment in bytes (memory nodes only).
    pub alignment: i32,
    /// Memory role and partner node of a memory pair.
    pub mem: Option<(MemRole, NodeId)>,
    /// The value of this node leaves the loop.
    pub live_out: bool,
    /// This node controls the loop (live-outs must come strictly after it).
    pub loop_ctrl: bool,
    /// This comparison is the loop exit.
    pub loop_exit: bool,
    /// This comparison is the split condition.
    pub split_cond: bool,
    /// For route nodes: the node whose value this route carries.
    pub route_origin: Option<NodeId>,
    /// Peer of the opposite path that must share this node's PE.
    pub merged_with: Option<NodeId>,
    /// Self-loop arc, stored on the node itself.
    pub self_arc: Option<Arc>,
    /// Incoming arcs.
    preds: Vec<ArcId>,
    /// Outgoing arcs.
    succs: Vec<ArcId>,
}

impl Node {
    /// Create a node with the default latency of one cycle.
    pub fn new(
        id: NodeId,
        op: OpKind,
        datatype: Datatype,
        name: impl Into<String>,
        path: PathTag,
        cond_branch: Option<u32>,
    ) -> Self {
        Self {
            id,
            op,
            datatype,
            name: name.into(),
            latency: 1,
            path,
            cond_branch,
            alignment: 0,
            mem: None,
            live_out: false,
            loop_ctrl: false,
            loop_exit: false,
            split_cond: false,
            route_origin: None,
            merged_with: None,
            self_arc: None,
            preds: Vec::new(),
            succs: Vec::new(),
        }
    }

    /// Whether this node is half of a memory pair.
    pub fn is_mem(&self) -> bool {
        self.mem.is_some()
    }

    /// Memory role of this node, if any.
    pub fn mem_role(&self) -> Option<MemRole> {
        self.mem.map(|(role, _)| role)
    }

    /// Partner node of the memory pair, if any.
    pub fn mem_partner(&self) -> Option<NodeId> {
        self.mem.map(|(_, partner)| partner)
    }

    /// Whether the node has an arc to itself.
    pub fn has_self_loop(&self) -> bool {
        self.self_arc.is_some()
    }

    /// Mark this node as a load address generator paired with `data`.
    pub fn set_load_address(&mut self, data: NodeId) {
        self.mem = Some((MemRole::LoadAddress, data));
        self.latency = 1;
    }

    /// Mark this node as a load data-bus read paired with `addr`.
    pub fn set_load_data(&mut self, addr: NodeId) {
        self.mem = Some((MemRole::LoadData, addr));
        self.latency = 1;
    }

    /// Mark this node as a store address generator paired with `data`. The
    /// address assertion completes within its own cycle.
    pub fn set_store_address(&mut self, data: NodeId) {
        self.mem = Some((MemRole::StoreAddress, data));
        self.latency = 0;
    }

    /// Mark this node as a store data-bus write paired with `addr`.
    pub fn set_store_data(&mut self, addr: NodeId) {
        self.mem = Some((MemRole::StoreData, addr));
        self.latency = 1;
    }
}

/// One dependency between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Arc {
    /// Unique id within the DFG.
    pub id: ArcId,
    /// Producer node.
    pub from: NodeId,
    /// Consumer node.
    pub to: NodeId,
    /// Iteration distance; 0 is intra-iteration, k crosses from iteration i
    /// to iteration i + k.
    pub distance: i64,
    /// Dependency class.
    pub dep: DepKind,
    /// Operand slot at the consumer (0, 1 or 2).
    pub operand: u8,
    /// Branch path of the dependency; `None` is common.
    pub path: PathTag,
}

/// A constant operand of the loop, kept outside the schedulable node set.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ConstNode {
    /// Unique id shared with the node stream.
    pub id: NodeId,
    /// Name given by the front end.
    pub name: String,
    /// Immediate value, when the name encodes one.
    pub value: Option<i32>,
    /// This constant stands for a live-in value loaded into a register.
    pub live_in: bool,
}

/// Reference from a constant to the operand slot it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ConstArc {
    /// The constant (or live-in) node.
    pub from: NodeId,
    /// The consumer node.
    pub to: NodeId,
    /// Operand slot at the consumer.
    pub operand: u8,
}

/// A cycle of the DFG together with its II ratio (Σ latency / Σ distance).
pub type Cycle = (BTreeSet<NodeId>, f64);

/// The dataflow graph of one loop.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Dfg {
    /// Schedulable nodes by id.
    nodes: BTreeMap<NodeId, Node>,
    /// Arcs by id (self-loop arcs are stored on their node instead).
    arcs: BTreeMap<ArcId, Arc>,
    /// Constants by id.
    constants: BTreeMap<NodeId, ConstNode>,
    /// Arcs whose producer is a constant or live-in.
    const_arcs: Vec<ConstArc>,
    /// Cycles with their II ratios, highest first; filled once after
    /// transformation.
    cycles: Vec<Cycle>,
    /// Number of branch paths (2 for a split DFG).
    path_count: u32,
    /// Largest node id handed out so far.
    max_node_id: NodeId,
    /// Largest arc id handed out so far.
    max_arc_id: ArcId,
}

impl Dfg {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            path_count: 2,
            ..Default::default()
        }
    }

    /// Whether a schedulable node with this id exists.
    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Whether a constant with this id exists.
    pub fn has_constant(&self, id: NodeId) -> bool {
        self.constants.contains_key(&id)
    }

    /// Insert a node, separating constants into the constants set.
    pub fn insert_node(&mut self, node: Node) {
        self.max_node_id = self.max_node_id.max(node.id);
        if node.op == OpKind::Constant {
            self.constants.insert(
                node.id,
                ConstNode {
                    id: node.id,
                    value: parse_const_value(&node.name),
                    name: node.name,
                    live_in: false,
                },
            );
        } else {
            self.nodes.insert(node.id, node);
        }
    }

    /// Create a route node carrying the value of `origin` on `path` and
    /// insert it. Returns the fresh id.
    pub fn add_route(&mut self, origin: NodeId, path: PathTag) -> NodeId {
        let id = self.max_node_id + 1;
        let datatype = self.nodes[&origin].datatype;
        let mut route = Node::new(id, OpKind::Route, datatype, "route", path, None);
        route.route_origin = Some(origin);
        self.insert_node(route);
        id
    }

    /// Access a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[&id]
    }

    /// Access a node mutably.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes.get_mut(&id).unwrap()
    }

    /// Access a node, failing gracefully.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Access a constant.
    pub fn constant(&self, id: NodeId) -> Option<&ConstNode> {
        self.constants.get(&id)
    }

    /// Access a constant mutably.
    pub fn constant_mut(&mut self, id: NodeId) -> Option<&mut ConstNode> {
        self.constants.get_mut(&id)
    }

    /// All constants.
    pub fn constants(&self) -> impl Iterator<Item = &ConstNode> {
        self.constants.values()
    }

    /// All constant arcs.
    pub fn const_arcs(&self) -> &[ConstArc] {
        &self.const_arcs
    }

    /// Record an arc whose producer is a constant or live-in.
    pub fn make_const_arc(&mut self, from: NodeId, to: NodeId, operand: u8) {
        self.const_arcs.push(ConstArc { from, to, operand });
    }

    /// Connect two nodes. Duplicate (from, to) pairs are ignored, and an
    /// arc from a node to itself is stored on the node.
    pub fn make_arc(
        &mut self,
        from: NodeId,
        to: NodeId,
        distance: i64,
        dep: DepKind,
        operand: u8,
        path: PathTag,
    ) {
        if self.connected(from, to) {
            return;
        }
        self.max_arc_id += 1;
        let arc = Arc {
            id: self.max_arc_id,
            from,
            to,
            distance,
            dep,
            operand,
            path,
        };
        if from == to {
            self.node_mut(from).self_arc = Some(arc);
        } else {
            self.node_mut(from).succs.push(arc.id);
            self.node_mut(to).preds.push(arc.id);
            self.arcs.insert(arc.id, arc);
        }
    }

    /// Whether an arc `from → to` already exists.
    pub fn connected(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return self.nodes[&from].has_self_loop();
        }
        self.nodes[&from]
            .succs
            .iter()
            .any(|a| self.arcs[a].to == to)
    }

    /// The arc `from → to`, if any.
    pub fn arc_between(&self, from: NodeId, to: NodeId) -> Option<&Arc> {
        if from == to {
            return self.nodes.get(&from)?.self_arc.as_ref();
        }
        self.nodes[&from]
            .succs
            .iter()
            .map(|a| &self.arcs[a])
            .find(|a| a.to == to)
    }

    /// Access an arc by id.
    pub fn arc(&self, id: ArcId) -> Option<&Arc> {
        self.arcs.get(&id)
    }

    /// Remove a node together with every arc and constant reference that
    /// touches it.
    pub fn remove_node(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            log::warn!("attempting to remove non-existing node {id}");
            return;
        };
        let arcs: Vec<ArcId> = node.preds.iter().chain(node.succs.iter()).copied().collect();
        for arc in arcs {
            self.remove_arc(arc);
        }
        self.nodes.remove(&id);
        self.const_arcs.retain(|a| a.to != id);
    }

    /// Remove an arc, disconnecting its endpoints.
    pub fn remove_arc(&mut self, id: ArcId) {
        let Some(arc) = self.arcs.remove(&id) else {
            log::warn!("attempting to remove non-existing arc {id}");
            return;
        };
        self.node_mut(arc.from).succs.retain(|a| *a != id);
        self.node_mut(arc.to).preds.retain(|a| *a != id);
    }

    /// Number of schedulable nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Ids of all schedulable nodes.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Ids of all arcs.
    pub fn arc_ids(&self) -> Vec<ArcId> {
        self.arcs.keys().copied().collect()
    }

    /// All arcs, including the self-loop arcs stored on nodes.
    pub fn all_arcs(&self) -> Vec<Arc> {
        self.arcs
            .values()
            .copied()
            .chain(self.nodes.values().filter_map(|n| n.self_arc))
            .collect()
    }

    /// Incoming arcs of a node.
    pub fn pred_arcs(&self, id: NodeId) -> impl Iterator<Item = &Arc> {
        self.nodes[&id].preds.iter().map(move |a| &self.arcs[a])
    }

    /// Outgoing arcs of a node.
    pub fn succ_arcs(&self, id: NodeId) -> impl Iterator<Item = &Arc> {
        self.nodes[&id].succs.iter().map(move |a| &self.arcs[a])
    }

    /// All predecessors.
    pub fn preds(&self, id: NodeId) -> Vec<NodeId> {
        self.pred_arcs(id).map(|a| a.from).collect()
    }

    /// All successors.
    pub fn succs(&self, id: NodeId) -> Vec<NodeId> {
        self.succ_arcs(id).map(|a| a.to).collect()
    }

    /// Predecessors in the same iteration (any dependency class).
    pub fn preds_same_iter(&self, id: NodeId) -> Vec<NodeId> {
        self.pred_arcs(id)
            .filter(|a| a.distance == 0)
            .map(|a| a.from)
            .collect()
    }

    /// Same-iteration predecessors excluding memory pairing arcs.
    pub fn preds_same_iter_ex_mem(&self, id: NodeId) -> Vec<NodeId> {
        self.pred_arcs(id)
            .filter(|a| a.distance == 0 && !a.dep.is_mem_pair())
            .map(|a| a.from)
            .collect()
    }

    /// Successors in the same iteration (any dependency class).
    pub fn succs_same_iter(&self, id: NodeId) -> Vec<NodeId> {
        self.succ_arcs(id)
            .filter(|a| a.distance == 0)
            .map(|a| a.to)
            .collect()
    }

    /// Same-iteration successors excluding memory pairing arcs.
    pub fn succs_same_iter_ex_mem(&self, id: NodeId) -> Vec<NodeId> {
        self.succ_arcs(id)
            .filter(|a| a.distance == 0 && !a.dep.is_mem_pair())
            .map(|a| a.to)
            .collect()
    }

    /// Same-iteration successors over data and predicate dependencies.
    pub fn succs_same_iter_dep(&self, id: NodeId) -> Vec<NodeId> {
        self.succ_arcs(id)
            .filter(|a| a.distance == 0 && a.dep.is_data_or_pred())
            .map(|a| a.to)
            .collect()
    }

    /// Same-iteration dependency successor count per consumer path.
    pub fn succ_same_iter_counts(&self, id: NodeId) -> BTreeMap<PathTag, u32> {
        let mut counts = BTreeMap::new();
        for arc in self.succ_arcs(id) {
            if arc.distance == 0 && arc.dep.is_data_or_pred() {
                *counts.entry(self.nodes[&arc.to].path).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Same-iteration dependency successors on the given consumer path.
    pub fn succs_same_iter_dep_on(&self, id: NodeId, path: PathTag) -> Vec<NodeId> {
        self.succ_arcs(id)
            .filter(|a| a.distance == 0 && a.dep.is_data_or_pred())
            .filter(|a| self.nodes[&a.to].path == path)
            .map(|a| a.to)
            .collect()
    }

    /// Successors in later iterations (any dependency class).
    pub fn succs_next_iter(&self, id: NodeId) -> Vec<NodeId> {
        self.succ_arcs(id)
            .filter(|a| a.distance > 0)
            .map(|a| a.to)
            .collect()
    }

    /// Carried predecessors over data and predicate dependencies.
    pub fn carried_preds_dep(&self, id: NodeId) -> Vec<NodeId> {
        self.pred_arcs(id)
            .filter(|a| a.distance > 0 && a.dep.is_data_or_pred())
            .map(|a| a.from)
            .collect()
    }

    /// Number of data operands a node receives, taken as the maximum over
    /// the producer paths.
    pub fn operand_count(&self, id: NodeId) -> u32 {
        let mut counts: BTreeMap<PathTag, u32> = BTreeMap::new();
        for arc in self.pred_arcs(id) {
            if arc.dep == DepKind::True {
                *counts.entry(self.nodes[&arc.from].path).or_insert(0) += 1;
            }
        }
        counts.values().copied().max().unwrap_or(0)
    }

    /// Nodes without a same-iteration predecessor.
    pub fn start_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .keys()
            .copied()
            .filter(|n| self.preds_same_iter(*n).is_empty())
            .collect()
    }

    /// Nodes without a same-iteration successor.
    pub fn end_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .keys()
            .copied()
            .filter(|n| self.succs_same_iter(*n).is_empty())
            .collect()
    }

    /// The loop-control node, if marked.
    pub fn loop_ctrl_node(&self) -> Option<NodeId> {
        self.nodes.values().find(|n| n.loop_ctrl).map(|n| n.id)
    }

    /// All live-out nodes.
    pub fn live_out_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.live_out)
            .map(|n| n.id)
            .collect()
    }

    /// The split-condition node, if any.
    pub fn split_cond_node(&self) -> Option<NodeId> {
        self.nodes.values().find(|n| n.split_cond).map(|n| n.id)
    }

    /// Number of load operations (data reads).
    pub fn load_op_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.mem_role() == Some(MemRole::LoadData))
            .count()
    }

    /// Number of store operations (data writes).
    pub fn store_op_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.mem_role() == Some(MemRole::StoreData))
            .count()
    }

    /// Whether the graph carries both branch paths.
    pub fn can_split(&self) -> bool {
        self.nodes.values().any(|n| n.path != PathTag::None)
    }

    /// Number of branch paths.
    pub fn path_count(&self) -> u32 {
        self.path_count
    }

    /// Set the number of branch paths.
    pub fn set_path_count(&mut self, count: u32) {
        self.path_count = count;
    }

    /// The cycles of this graph with their II ratios, highest ratio first.
    /// [`Dfg::compute_cycles`] must have run.
    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// Find all dependency cycles and their II ratios. Called once after
    /// transformation; the set is invalidated by any arc mutation.
    pub fn compute_cycles(&mut self) {
        let mut graph = DiGraph::<NodeId, ()>::new();
        let mut index = BTreeMap::new();
        for id in self.nodes.keys() {
            index.insert(*id, graph.add_node(*id));
        }
        for arc in self.arcs.values() {
            if arc.dep.is_data_or_pred() {
                graph.add_edge(index[&arc.from], index[&arc.to], ());
            }
        }
        let mut cycles = Vec::new();
        for scc in tarjan_scc(&graph) {
            let members: BTreeSet<NodeId> = scc.iter().map(|ix| graph[*ix]).collect();
            if members.len() == 1 {
                let id = *members.iter().next().unwrap();
                if let Some(arc) = self.nodes[&id].self_arc {
                    let ratio = self.nodes[&id].latency as f64 / arc.distance as f64;
                    cycles.push((members, ratio));
                }
                continue;
            }
            let latency: i64 = members.iter().map(|id| self.nodes[id].latency).sum();
            let distance: i64 = self
                .arcs
                .values()
                .filter(|a| members.contains(&a.from) && members.contains(&a.to))
                .map(|a| a.distance)
                .sum();
            if distance > 0 {
                cycles.push((members, latency as f64 / distance as f64));
            }
        }
        cycles.sort_by(|a, b| b.1.total_cmp(&a.1));
        self.cycles = cycles;
    }

    /// Walk backwards from `current` to `dest` over data and predicate
    /// dependencies, returning the (latency, distance) of the path with the
    /// highest II ratio, if one exists. Visits every candidate predecessor.
    fn path_max_ii(
        &self,
        current: NodeId,
        dest: NodeId,
        visited: &BTreeSet<NodeId>,
        acc_latency: i64,
        acc_distance: i64,
    ) -> Option<(i64, i64)> {
        let mut best: Option<(f64, i64, i64)> = None;
        for arc in self.pred_arcs(current) {
            if !arc.dep.is_data_or_pred() {
                continue;
            }
            let prev = arc.from;
            if visited.contains(&prev) {
                continue;
            }
            let found = if prev == dest {
                Some((
                    self.nodes[&prev].latency + acc_latency,
                    arc.distance + acc_distance,
                ))
            } else {
                let mut path = visited.clone();
                path.insert(prev);
                self.path_max_ii(
                    prev,
                    dest,
                    &path,
                    self.nodes[&prev].latency + acc_latency,
                    arc.distance + acc_distance,
                )
            };
            if let Some((latency, distance)) = found {
                let ratio = latency as f64 / distance as f64;
                if best.map(|(r, _, _)| ratio > r).unwrap_or(true) {
                    best = Some((ratio, latency, distance));
                }
            }
        }
        best.map(|(_, l, d)| (l, d))
    }

    /// The recurrence-constrained minimum II: for every carried arc, the
    /// highest ⌈Σ latency / Σ distance⌉ over any dependency path closing
    /// the cycle. Pure; the graph is not mutated.
    pub fn calculate_rec_mii(&self) -> i64 {
        let mut rec_mii = 0;
        for arc in self.all_arcs() {
            if arc.distance <= 0 {
                continue;
            }
            let current = if arc.from == arc.to {
                let node = &self.nodes[&arc.from];
                div_ceil(node.latency, arc.distance)
            } else {
                let mut visited = BTreeSet::new();
                visited.insert(arc.from);
                match self.path_max_ii(
                    arc.from,
                    arc.to,
                    &visited,
                    self.nodes[&arc.from].latency,
                    arc.distance,
                ) {
                    Some((latency, distance)) => div_ceil(latency, distance),
                    None => 0,
                }
            };
            rec_mii = rec_mii.max(current);
        }
        rec_mii
    }

    /// Project the graph onto its two paths: the returned graphs keep the
    /// common nodes and the true-path (resp. false-path) nodes. Used for
    /// computing per-path II lower bounds.
    pub fn split_paths(&self) -> (Dfg, Dfg) {
        let mut true_dfg = self.clone();
        true_dfg.remove_path(PathTag::False);
        let mut false_dfg = self.clone();
        false_dfg.remove_path(PathTag::True);
        (true_dfg, false_dfg)
    }

    /// Remove every node of the given path together with its arcs.
    fn remove_path(&mut self, path: PathTag) {
        let doomed: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.path == path)
            .map(|n| n.id)
            .collect();
        for id in doomed {
            let arcs: Vec<ArcId> = self.nodes[&id]
                .preds
                .iter()
                .chain(self.nodes[&id].succs.iter())
                .copied()
                .collect();
            for arc in arcs {
                self.remove_arc(arc);
            }
            self.nodes.remove(&id);
            self.const_arcs.retain(|a| a.to != id);
        }
    }
}

/// Ceiling division for nonnegative operands.
fn div_ceil(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

/// Parse the immediate value out of a front-end constant name.
fn parse_const_value(name: &str) -> Option<i32> {
    name.strip_prefix("ConstInt").and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod test {
    use super::*;

    /// Build a node with defaults for tests.
    fn node(id: NodeId, op: OpKind) -> Node {
        Node::new(id, op, Datatype::Int32, format!("n{id}"), PathTag::None, None)
    }

    #[test]
    fn self_loop_stored_on_node() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        dfg.make_arc(1, 1, 1, DepKind::True, 0, PathTag::None);
        assert!(dfg.node(1).has_self_loop());
        assert!(dfg.arc_ids().is_empty());
        // a second self arc is ignored
        dfg.make_arc(1, 1, 2, DepKind::True, 0, PathTag::None);
        assert_eq!(dfg.node(1).self_arc.unwrap().distance, 1);
    }

    #[test]
    fn duplicate_arcs_ignored() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        dfg.insert_node(node(2, OpKind::Sub));
        dfg.make_arc(1, 2, 0, DepKind::True, 0, PathTag::None);
        dfg.make_arc(1, 2, 1, DepKind::True, 1, PathTag::None);
        assert_eq!(dfg.arc_ids().len(), 1);
        assert_eq!(dfg.arc_between(1, 2).unwrap().distance, 0);
    }

    #[test]
    fn rec_mii_of_self_loop_is_latency() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        dfg.make_arc(1, 1, 1, DepKind::True, 0, PathTag::None);
        assert_eq!(dfg.calculate_rec_mii(), 1);

        let mut dfg = Dfg::new();
        let mut slow = node(1, OpKind::Div);
        slow.latency = 3;
        dfg.insert_node(slow);
        dfg.make_arc(1, 1, 1, DepKind::True, 0, PathTag::None);
        assert_eq!(dfg.calculate_rec_mii(), 3);
    }

    #[test]
    fn rec_mii_of_two_node_cycle() {
        // 1 → 2 (dist 0), 2 → 1 (dist 1): Σlat = 2, Σdist = 1
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        dfg.insert_node(node(2, OpKind::Sub));
        dfg.make_arc(1, 2, 0, DepKind::True, 0, PathTag::None);
        dfg.make_arc(2, 1, 1, DepKind::True, 0, PathTag::None);
        assert_eq!(dfg.calculate_rec_mii(), 2);
    }

    #[test]
    fn rec_mii_is_pure() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        dfg.insert_node(node(2, OpKind::Sub));
        dfg.make_arc(1, 2, 0, DepKind::True, 0, PathTag::None);
        dfg.make_arc(2, 1, 1, DepKind::True, 0, PathTag::None);
        let arcs_before = dfg.arc_ids();
        dfg.calculate_rec_mii();
        assert_eq!(arcs_before, dfg.arc_ids());
    }

    #[test]
    fn cycles_sorted_by_ratio() {
        let mut dfg = Dfg::new();
        for id in 1..=5 {
            dfg.insert_node(node(id, OpKind::Add));
        }
        // slow cycle: 1 → 2 → 1 with distance 1 (ratio 2)
        dfg.make_arc(1, 2, 0, DepKind::True, 0, PathTag::None);
        dfg.make_arc(2, 1, 1, DepKind::True, 0, PathTag::None);
        // fast cycle: 3 → 4 → 3 with distance 2 (ratio 1)
        dfg.make_arc(3, 4, 0, DepKind::True, 0, PathTag::None);
        dfg.make_arc(4, 3, 2, DepKind::True, 0, PathTag::None);
        dfg.compute_cycles();
        let cycles = dfg.cycles();
        assert_eq!(cycles.len(), 2);
        assert!(cycles[0].0.contains(&1) && cycles[0].0.contains(&2));
        assert!(cycles[0].1 > cycles[1].1);
        // node 5 is in no cycle
        assert!(cycles.iter().all(|(c, _)| !c.contains(&5)));
    }

    #[test]
    fn constants_separated() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        dfg.insert_node(Node::new(
            7,
            OpKind::Constant,
            Datatype::Int32,
            "ConstInt42",
            PathTag::None,
            None,
        ));
        assert!(dfg.has_constant(7));
        assert!(!dfg.has_node(7));
        assert_eq!(dfg.constant(7).unwrap().value, Some(42));
        assert_eq!(dfg.node_count(), 1);
    }

    #[test]
    fn split_projections_keep_common_nodes() {
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
        let (true_dfg, false_dfg) = dfg.split_paths();
        assert_eq!(true_dfg.node_count(), 2);
        assert!(true_dfg.has_node(1) && true_dfg.has_node(2));
        assert_eq!(false_dfg.node_count(), 2);
        assert!(false_dfg.has_node(1) && false_dfg.has_node(3));
    }

    #[test]
    fn operand_count_per_path() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        let mut t = node(2, OpKind::Sub);
        t.path = PathTag::True;
        dfg.insert_node(t);
        let mut f = node(3, OpKind::Mult);
        f.path = PathTag::False;
        dfg.insert_node(f);
        dfg.insert_node(node(4, OpKind::Or));
        dfg.make_arc(2, 4, 0, DepKind::True, 0, PathTag::True);
        dfg.make_arc(3, 4, 0, DepKind::True, 0, PathTag::False);
        dfg.make_arc(1, 4, 0, DepKind::True, 1, PathTag::None);
        // one operand from each tagged path plus a common one: max is 2
        assert_eq!(dfg.operand_count(4), 2);
    }
}
