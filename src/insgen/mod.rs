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

//! Turns a finished placement into instruction words: resolves where every
//! operand comes from (a neighbor direction, an immediate, or a live-in
//! register), assigns the live-value registers per column, and encodes one
//! (true, false, prologue) word triple per time-extended PE, plus the
//! live-in load preamble and live-out store postamble streams.

use std::collections::BTreeMap;

use cgra_isa::{
    fits_imm26, noop_word, CondWord, PeInputMux, PredOpCode, PredWord, RegularWord,
    ADDRESS_BUS_PMUX, LOOP_EXIT_BROFFSET,
};
use log::{debug, info, trace};

use crate::arch::CgraArch;
use crate::dfg::{builder::LoopInput, Dfg, Node, NodeId, OpKind, PathTag};
use crate::mapping::{grid::TimeGrid, MapError, Mapping};

pub mod emit;

/// Where one operand of a placed node comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Unused operand slot.
    None,
    /// A neighboring (or the same) PE, one cycle earlier.
    Dir(PeInputMux),
    /// An immediate constant.
    Const(i32),
    /// A live-in value held in a register.
    LiveIn(NodeId),
}

impl Source {
    /// The input mux this source selects.
    fn mux(self) -> Option<PeInputMux> {
        match self {
            Source::None => None,
            Source::Dir(d) => Some(d),
            Source::Const(_) => Some(PeInputMux::Immediate),
            Source::LiveIn(_) => Some(PeInputMux::Register),
        }
    }
}

/// The fully generated instruction streams of one loop.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Program {
    /// Kernel words of the true channel, in (t, x, y) row-major order.
    pub true_words: Vec<u64>,
    /// Kernel words of the false channel.
    pub false_words: Vec<u64>,
    /// Prologue words (phi slots only, NOOP elsewhere).
    pub prologue_words: Vec<u64>,
    /// Iteration index per time-extended PE, -1 for empty slots.
    pub iters: Vec<i32>,
    /// Number of overlapped iterations (largest index plus one).
    pub max_iter: i32,
    /// The live-in load preamble.
    pub live_in: Vec<u64>,
    /// The live-out store postamble.
    pub live_out: Vec<u64>,
    /// The achieved II.
    pub ii: i64,
}

/// Per-column register tables: live-in and live-out registers of one
/// physical (x, y) position.
#[derive(Debug, Clone, Default)]
struct ColumnRegs {
    /// Register of each live-in id reaching the column.
    live_in: BTreeMap<NodeId, u8>,
    /// Register of each live-out node leaving from the column.
    live_out: BTreeMap<NodeId, u8>,
}

/// Generate the instruction streams for a finished mapping.
pub fn generate(
    mapping: &Mapping,
    input: &LoopInput,
    arch: &CgraArch,
) -> Result<Program, MapError> {
    info!("instruction generation started");
    let dfg = &mapping.dfg;
    let grid = &mapping.grid;

    let sources = resolve_sources(dfg, grid)?;
    let regs = assign_registers(dfg, grid, arch, &sources)?;

    let slots = (arch.x * arch.y) as usize * mapping.ii as usize;
    let mut true_words = vec![noop_word(); slots];
    let mut false_words = vec![noop_word(); slots];
    let mut prologue_words = vec![noop_word(); slots];
    let mut iters = vec![-1i32; slots];
    let mut max_iter = -1i32;

    for index in 0..slots {
        let pe = grid.pe(index);
        let column = (pe.x, pe.y);
        let mut words: BTreeMap<PathTag, u64> = BTreeMap::new();
        for path in PathTag::ALL {
            if let Some((id, _)) = pe.entry(path) {
                let node = dfg.node(id);
                words.insert(path, encode_node(input, node, &sources, &regs, column)?);
                if node.op == OpKind::Phi {
                    if path != PathTag::None {
                        return Err(MapError::Internal(format!(
                            "phi node {id} placed on a tagged path"
                        )));
                    }
                    prologue_words[index] =
                        encode_prologue(node, &sources, &regs, column)?;
                }
            }
        }
        if let Some(word) = words.get(&PathTag::None) {
            true_words[index] = *word;
            false_words[index] = *word;
        } else {
            true_words[index] = words.get(&PathTag::True).copied().unwrap_or(noop_word());
            false_words[index] = words.get(&PathTag::False).copied().unwrap_or(noop_word());
        }
        if let Some(iter) = pe.iteration() {
            iters[index] = iter as i32;
            max_iter = max_iter.max(iter as i32);
        }
    }

    let live_in = generate_live_in(input, arch, &regs)?;
    let live_out = generate_live_out(input, arch, &regs)?;

    Ok(Program {
        true_words,
        false_words,
        prologue_words,
        iters,
        max_iter: max_iter + 1,
        live_in,
        live_out,
        ii: mapping.ii,
    })
}

/// Compute the operand sources of every placed node: neighbor directions
/// from the placement, immediates from the constant table, registers from
/// the live-in table.
fn resolve_sources(
    dfg: &Dfg,
    grid: &TimeGrid,
) -> Result<BTreeMap<NodeId, [Source; 3]>, MapError> {
    let mut sources: BTreeMap<NodeId, [Source; 3]> = BTreeMap::new();
    for id in dfg.node_ids() {
        sources.insert(id, [Source::None; 3]);
    }

    // constants and live-ins
    for ca in dfg.const_arcs() {
        if !dfg.has_node(ca.to) {
            continue;
        }
        let c = dfg.constant(ca.from).ok_or_else(|| {
            MapError::Internal(format!("constant {} missing from the table", ca.from))
        })?;
        let source = if c.live_in {
            Source::LiveIn(c.id)
        } else {
            let value = c.value.ok_or_else(|| MapError::Parse {
                file: "node.sch".into(),
                line: 0,
                reason: format!("constant {} carries no value and is not live-in", c.id),
            })?;
            Source::Const(value)
        };
        *entry(&mut sources, ca.to, ca.operand)? = source;
    }

    // producers on the grid; merged operand pairs resolve to one direction
    let mut operand_arcs: BTreeMap<(NodeId, u8), Vec<NodeId>> = BTreeMap::new();
    for arc in dfg.all_arcs() {
        if arc.from == arc.to {
            // a self-loop reads the PE's own output of the previous round
            *entry(&mut sources, arc.to, arc.operand)? = Source::Dir(PeInputMux::Same);
            continue;
        }
        if !arc.dep.is_data_or_pred() {
            continue;
        }
        operand_arcs
            .entry((arc.to, arc.operand))
            .or_default()
            .push(arc.from);
    }
    for ((to, operand), producers) in operand_arcs {
        let consumer_pe = grid
            .placed_pe(to)
            .ok_or_else(|| MapError::Internal(format!("node {to} is not placed")))?;
        let producer = producers[0];
        let producer_pe = grid
            .placed_pe(producer)
            .ok_or_else(|| MapError::Internal(format!("node {producer} is not placed")))?;
        if let Some(other) = producers.get(1) {
            // the two paths must have been merged onto one PE
            if dfg.node(producer).merged_with != Some(*other)
                || grid.placed_pe(*other) != Some(producer_pe)
            {
                return Err(MapError::Internal(format!(
                    "operand {operand} of node {to} fed by unmerged producers {producer} and {other}"
                )));
            }
        }
        let dir = direction(grid, producer_pe, consumer_pe)?;
        *entry(&mut sources, to, operand)? = Source::Dir(dir);
    }
    Ok(sources)
}

/// Mutable access to one operand slot.
fn entry<'a>(
    sources: &'a mut BTreeMap<NodeId, [Source; 3]>,
    node: NodeId,
    operand: u8,
) -> Result<&'a mut Source, MapError> {
    sources
        .get_mut(&node)
        .and_then(|s| s.get_mut(operand as usize))
        .ok_or_else(|| MapError::Internal(format!("operand {operand} of node {node} out of range")))
}

/// The input mux of a consumer reading a producer placed one cycle earlier
/// on the toroidal grid. Any other relative position is a bug.
fn direction(grid: &TimeGrid, from: usize, to: usize) -> Result<PeInputMux, MapError> {
    let f = grid.pe(from);
    let t = grid.pe(to);
    if (f.t + 1).rem_euclid(grid.ii()) != t.t {
        return Err(MapError::Internal(format!(
            "producer at cycle {} feeds consumer at non-adjacent cycle {}",
            f.t, t.t
        )));
    }
    if f.x == t.x {
        if f.y == t.y {
            Ok(PeInputMux::Same)
        } else if f.y == (t.y + 1) % grid.y() {
            Ok(PeInputMux::Right)
        } else if t.y == (f.y + 1) % grid.y() {
            Ok(PeInputMux::Left)
        } else {
            Err(MapError::Internal(format!(
                "PEs ({}, {}) and ({}, {}) are not connected",
                f.x, f.y, t.x, t.y
            )))
        }
    } else if f.y == t.y {
        if f.x == (t.x + 1) % grid.x() {
            Ok(PeInputMux::Down)
        } else if t.x == (f.x + 1) % grid.x() {
            Ok(PeInputMux::Up)
        } else {
            Err(MapError::Internal(format!(
                "PEs ({}, {}) and ({}, {}) are not connected",
                f.x, f.y, t.x, t.y
            )))
        }
    } else {
        Err(MapError::Internal(format!(
            "PEs ({}, {}) and ({}, {}) are not connected",
            f.x, f.y, t.x, t.y
        )))
    }
}

/// Assign dense register numbers per physical column: live-ins first
/// (union over all cycles of the column), live-outs directly after.
fn assign_registers(
    dfg: &Dfg,
    grid: &TimeGrid,
    arch: &CgraArch,
    sources: &BTreeMap<NodeId, [Source; 3]>,
) -> Result<BTreeMap<(u32, u32), ColumnRegs>, MapError> {
    let mut regs: BTreeMap<(u32, u32), ColumnRegs> = BTreeMap::new();

    for (id, node_sources) in sources {
        let Some(pe) = grid.placed_pe(*id) else {
            continue;
        };
        let column = (grid.pe(pe).x, grid.pe(pe).y);
        for s in node_sources {
            if let Source::LiveIn(live_in) = s {
                regs.entry(column).or_default().live_in.insert(*live_in, 0);
            }
        }
    }
    for (column, col_regs) in regs.iter_mut() {
        let mut next = 0u8;
        for reg in col_regs.live_in.values_mut() {
            *reg = next;
            next += 1;
        }
        trace!("column {column:?} holds {next} live-in registers");
    }

    for id in dfg.live_out_nodes() {
        let pe = grid
            .placed_pe(id)
            .ok_or_else(|| MapError::Internal(format!("live-out node {id} is not placed")))?;
        let column = (grid.pe(pe).x, grid.pe(pe).y);
        let col_regs = regs.entry(column).or_default();
        let reg = (col_regs.live_in.len() + col_regs.live_out.len()) as u8;
        col_regs.live_out.insert(id, reg);
    }

    for (column, col_regs) in &regs {
        let used = col_regs.live_in.len() + col_regs.live_out.len();
        if used > arch.reg_file_size as usize {
            return Err(MapError::RegisterPressure {
                x: column.0,
                y: column.1,
            });
        }
    }
    Ok(regs)
}

/// The live-in register feeding one operand of a node, when that operand
/// reads a register.
fn live_in_reg(
    regs: &BTreeMap<(u32, u32), ColumnRegs>,
    column: (u32, u32),
    source: Source,
) -> Result<u8, MapError> {
    let Source::LiveIn(id) = source else {
        return Ok(0);
    };
    regs.get(&column)
        .and_then(|r| r.live_in.get(&id))
        .copied()
        .ok_or_else(|| {
            MapError::Internal(format!("no register for live-in {id} at column {column:?}"))
        })
}

/// The immediate of the two data operands, if either is a constant. Both
/// being constants is a front-end error.
fn immediate_of(node: &Node, s0: Source, s1: Source) -> Result<i32, MapError> {
    match (s0, s1) {
        (Source::Const(_), Source::Const(_)) => Err(MapError::Internal(format!(
            "both operands of node {} are immediates",
            node.id
        ))),
        (Source::Const(v), _) | (_, Source::Const(v)) => Ok(v),
        _ => Ok(0),
    }
}

/// The write-register fields of a node: live-outs write their column
/// register every iteration.
fn write_reg(
    node: &Node,
    regs: &BTreeMap<(u32, u32), ColumnRegs>,
    column: (u32, u32),
) -> Result<(u8, bool), MapError> {
    if !node.live_out {
        return Ok((0, false));
    }
    regs.get(&column)
        .and_then(|r| r.live_out.get(&node.id))
        .map(|reg| (*reg, true))
        .ok_or_else(|| {
            MapError::Internal(format!(
                "no register for live-out {} at column {column:?}",
                node.id
            ))
        })
}

/// Encode the kernel word of one placed node.
fn encode_node(
    input: &LoopInput,
    node: &Node,
    sources: &BTreeMap<NodeId, [Source; 3]>,
    regs: &BTreeMap<(u32, u32), ColumnRegs>,
    column: (u32, u32),
) -> Result<u64, MapError> {
    let s = sources[&node.id];
    debug!("encoding node {} ({:?}) with sources {s:?}", node.id, node.op);

    // condition words govern the split or the loop exit
    if node.cond_branch.is_some() || node.loop_exit {
        let opcode = node.op.cond_opcode().ok_or_else(|| {
            MapError::Internal(format!(
                "condition node {} has non-comparison op {:?}",
                node.id, node.op
            ))
        })?;
        let (loop_exit, split_cond, br_offset) = if node.loop_exit {
            (true, input.control.exit_direction, LOOP_EXIT_BROFFSET)
        } else {
            (false, node.split_cond, 0)
        };
        let lmux = s[0].mux().unwrap_or(PeInputMux::Same);
        let rmux = s[1].mux().unwrap_or(PeInputMux::Same);
        let immediate = immediate_of(node, s[0], s[1])?;
        if !fits_imm26(immediate) {
            return Err(MapError::ImmediateOverflow {
                node: node.id,
                value: immediate,
            });
        }
        let (regw, write_enable) = write_reg(node, regs, column)?;
        return Ok(CondWord {
            datatype: node.datatype,
            opcode,
            split_cond,
            loop_exit,
            lmux,
            rmux,
            reg1: live_in_reg(regs, column, s[0])?,
            reg2: live_in_reg(regs, column, s[1])?,
            regw,
            write_enable,
            br_offset,
            immediate,
        }
        .encode());
    }

    match node.op {
        // predicate words
        OpKind::LoadAddress | OpKind::StoreAddress | OpKind::CondLoadAddress => {
            let lmux = s[0].mux().unwrap_or(PeInputMux::Same);
            Ok(PredWord {
                datatype: node.datatype,
                opcode: PredOpCode::AddressGenerator,
                lmux,
                rmux: PeInputMux::Immediate,
                pmux: ADDRESS_BUS_PMUX,
                reg1: live_in_reg(regs, column, s[0])?,
                reg2: 0,
                regp: 0,
                immediate: node.alignment,
            }
            .encode())
        }
        OpKind::CondSelect => {
            let pmux = match s[2] {
                Source::Dir(d) => d,
                Source::LiveIn(_) => PeInputMux::Register,
                _ => {
                    return Err(MapError::Internal(format!(
                        "predicate of select {} must come from a PE or register",
                        node.id
                    )))
                }
            };
            let regp = live_in_reg(regs, column, s[2])?;
            Ok(PredWord {
                datatype: node.datatype,
                opcode: PredOpCode::Sel,
                lmux: s[0].mux().unwrap_or(PeInputMux::Same),
                rmux: s[1].mux().unwrap_or(PeInputMux::Same),
                pmux,
                reg1: live_in_reg(regs, column, s[0])?,
                reg2: live_in_reg(regs, column, s[1])?,
                regp,
                immediate: immediate_of(node, s[0], s[1])?,
            }
            .encode())
        }
        OpKind::SignExtend => Ok(PredWord {
            datatype: node.datatype,
            opcode: PredOpCode::SignExtend,
            lmux: s[0].mux().unwrap_or(PeInputMux::Same),
            rmux: PeInputMux::Immediate,
            pmux: PeInputMux::Same,
            reg1: live_in_reg(regs, column, s[0])?,
            reg2: 0,
            regp: 0,
            // operand 1 carries the target bit width
            immediate: match s[1] {
                Source::Const(v) => v,
                _ => 0,
            },
        }
        .encode()),

        // a phi is an OR with zero from its in-loop source; the prologue
        // word covers the first iteration
        OpKind::Phi => {
            let lmux = match (s[0], s[1]) {
                (Source::Dir(d), _) => d,
                (_, Source::Dir(d)) => d,
                _ => {
                    return Err(MapError::Internal(format!(
                        "phi {} has no in-loop source",
                        node.id
                    )))
                }
            };
            Ok(or_word(node, lmux, 0, 0, false, false, true))
        }

        // memory data halves are OR transfers over the row buses
        OpKind::LoadData | OpKind::CondLoadData => {
            let (regw, write_enable) = write_reg(node, regs, column)?;
            let mut word = RegularWord {
                lmux: PeInputMux::DataBus,
                regw,
                write_enable,
                ..or_template(node)
            };
            word.rmux = PeInputMux::Immediate;
            Ok(word.encode())
        }
        OpKind::StoreData => {
            let lmux = match s[1] {
                Source::Dir(d) => d,
                Source::LiveIn(_) => PeInputMux::Register,
                _ => {
                    return Err(MapError::Internal(format!(
                        "store data {} has no routed value operand",
                        node.id
                    )))
                }
            };
            let mut word = RegularWord {
                lmux,
                reg1: live_in_reg(regs, column, s[1])?,
                data_bus: true,
                ..or_template(node)
            };
            word.rmux = PeInputMux::Immediate;
            Ok(word.encode())
        }

        OpKind::Route | OpKind::FrontendRoute => {
            let lmux = match s[0] {
                Source::Dir(d) => d,
                Source::LiveIn(_) => PeInputMux::Register,
                _ => {
                    return Err(MapError::Internal(format!(
                        "route {} carries no routed value",
                        node.id
                    )))
                }
            };
            let (regw, write_enable) = write_reg(node, regs, column)?;
            Ok(or_word(
                node,
                lmux,
                live_in_reg(regs, column, s[0])?,
                regw,
                write_enable,
                false,
                false,
            ))
        }

        // plain arithmetic and logic
        _ => {
            let opcode = node.op.regular_opcode().ok_or_else(|| {
                MapError::Internal(format!(
                    "operation {:?} of node {} has no grid encoding",
                    node.op, node.id
                ))
            })?;
            let lmux = s[0].mux().unwrap_or(PeInputMux::Same);
            let rmux = s[1].mux().unwrap_or(PeInputMux::Same);
            let (regw, write_enable) = write_reg(node, regs, column)?;
            Ok(RegularWord {
                datatype: node.datatype,
                opcode,
                lmux,
                rmux,
                reg1: live_in_reg(regs, column, s[0])?,
                reg2: live_in_reg(regs, column, s[1])?,
                regw,
                write_enable,
                addr_bus: false,
                data_bus: false,
                phi: false,
                immediate: immediate_of(node, s[0], s[1])?,
            }
            .encode())
        }
    }
}

/// An OR-with-zero template for transfers (routes, bus moves, phis).
fn or_template(node: &Node) -> RegularWord {
    let mut word = RegularWord::noop();
    word.datatype = node.datatype;
    word.opcode = cgra_isa::OpCode::Or;
    word.immediate = 0;
    word
}

/// An OR-with-zero word moving the left input through.
fn or_word(
    node: &Node,
    lmux: PeInputMux,
    reg1: u8,
    regw: u8,
    write_enable: bool,
    data_bus: bool,
    phi: bool,
) -> u64 {
    RegularWord {
        lmux,
        rmux: PeInputMux::Immediate,
        reg1,
        regw,
        write_enable,
        data_bus,
        phi,
        ..or_template(node)
    }
    .encode()
}

/// Encode the prologue word of a phi: an OR with zero taking the
/// out-of-loop source (immediate constant or live-in register).
fn encode_prologue(
    node: &Node,
    sources: &BTreeMap<NodeId, [Source; 3]>,
    regs: &BTreeMap<(u32, u32), ColumnRegs>,
    column: (u32, u32),
) -> Result<u64, MapError> {
    let s = sources[&node.id];
    let outside = [s[0], s[1]]
        .into_iter()
        .find(|s| matches!(s, Source::Const(_) | Source::LiveIn(_)))
        .ok_or_else(|| {
            MapError::Internal(format!("phi {} has no out-of-loop source", node.id))
        })?;
    let word = match outside {
        Source::Const(v) => RegularWord {
            lmux: PeInputMux::Immediate,
            immediate: v,
            ..or_template(node)
        },
        Source::LiveIn(_) => RegularWord {
            lmux: PeInputMux::Register,
            reg1: live_in_reg(regs, column, outside)?,
            ..or_template(node)
        },
        _ => unreachable!("filtered above"),
    };
    let mut word = word;
    word.rmux = PeInputMux::Immediate;
    Ok(word.encode())
}

/// Build the live-in load preamble: per column with live-ins, triples of
/// cycles (address provide, address generate, data read into the
/// register). Rows run independently; the stream is as long as the busiest
/// row.
fn generate_live_in(
    input: &LoopInput,
    arch: &CgraArch,
    regs: &BTreeMap<(u32, u32), ColumnRegs>,
) -> Result<Vec<u64>, MapError> {
    let per_row = collect_row_values(arch, regs, |r| &r.live_in);
    let longest = per_row.values().map(Vec::len).max().unwrap_or(0);
    if longest == 0 {
        return Ok(Vec::new());
    }
    let size = (arch.x * arch.y) as usize;
    let mut stream = vec![noop_word(); 3 * longest * size];
    for (x, loads) in per_row {
        let mut t = 0usize;
        for (id, y, reg) in loads {
            let symbol = input.io.live_in(id).ok_or_else(|| {
                MapError::Internal(format!("live-in {id} missing from the symbol table"))
            })?;
            let slot = |t: usize| t * size + (x * arch.y + y) as usize;
            stream[slot(t)] = RegularWord {
                lmux: PeInputMux::Immediate,
                rmux: PeInputMux::Immediate,
                immediate: symbol.address as i32,
                ..or_template_plain()
            }
            .encode();
            stream[slot(t + 1)] = PredWord {
                datatype: cgra_isa::Datatype::Int32,
                opcode: PredOpCode::AddressGenerator,
                lmux: PeInputMux::Same,
                rmux: PeInputMux::Immediate,
                pmux: ADDRESS_BUS_PMUX,
                reg1: 0,
                reg2: 0,
                regp: 0,
                immediate: symbol.alignment,
            }
            .encode();
            stream[slot(t + 2)] = RegularWord {
                lmux: PeInputMux::DataBus,
                rmux: PeInputMux::Immediate,
                regw: reg,
                write_enable: true,
                ..or_template_plain()
            }
            .encode();
            t += 3;
        }
    }
    Ok(stream)
}

/// Build the live-out store postamble: per live-out, a cycle pair. The
/// address is provided and generated at the neighboring column
/// (x, (y+1) mod Y) while the value leaves from its own column with the
/// data bus asserted.
fn generate_live_out(
    input: &LoopInput,
    arch: &CgraArch,
    regs: &BTreeMap<(u32, u32), ColumnRegs>,
) -> Result<Vec<u64>, MapError> {
    let per_row = collect_row_values(arch, regs, |r| &r.live_out);
    let longest = per_row.values().map(Vec::len).max().unwrap_or(0);
    if longest == 0 {
        return Ok(Vec::new());
    }
    let size = (arch.x * arch.y) as usize;
    let mut stream = vec![noop_word(); 2 * longest * size];
    for (x, stores) in per_row {
        let mut t = 0usize;
        for (id, y, reg) in stores {
            let symbol = input.io.live_out(id).ok_or_else(|| {
                MapError::Internal(format!("live-out {id} missing from the symbol table"))
            })?;
            let neighbor = (y + 1) % arch.y;
            let slot = |t: usize, y: u32| t * size + (x * arch.y + y) as usize;
            stream[slot(t, neighbor)] = RegularWord {
                lmux: PeInputMux::Immediate,
                rmux: PeInputMux::Immediate,
                immediate: symbol.address as i32,
                ..or_template_plain()
            }
            .encode();
            stream[slot(t + 1, neighbor)] = PredWord {
                datatype: cgra_isa::Datatype::Int32,
                opcode: PredOpCode::AddressGenerator,
                lmux: PeInputMux::Same,
                rmux: PeInputMux::Immediate,
                pmux: ADDRESS_BUS_PMUX,
                reg1: 0,
                reg2: 0,
                regp: 0,
                immediate: symbol.alignment,
            }
            .encode();
            stream[slot(t + 1, y)] = RegularWord {
                lmux: PeInputMux::Register,
                rmux: PeInputMux::Immediate,
                reg1: reg,
                data_bus: true,
                ..or_template_plain()
            }
            .encode();
            t += 2;
        }
    }
    Ok(stream)
}

/// An OR-with-zero template outside any node context.
fn or_template_plain() -> RegularWord {
    let mut word = RegularWord::noop();
    word.opcode = cgra_isa::OpCode::Or;
    word
}

/// Gather, per row, the live values of its columns as (id, y, register).
fn collect_row_values(
    arch: &CgraArch,
    regs: &BTreeMap<(u32, u32), ColumnRegs>,
    select: impl Fn(&ColumnRegs) -> &BTreeMap<NodeId, u8>,
) -> BTreeMap<u32, Vec<(NodeId, u32, u8)>> {
    let mut rows: BTreeMap<u32, Vec<(NodeId, u32, u8)>> = BTreeMap::new();
    for x in 0..arch.x {
        let mut row = Vec::new();
        for y in 0..arch.y {
            if let Some(col) = regs.get(&(x, y)) {
                for (id, reg) in select(col) {
                    row.push((*id, y, *reg));
                }
            }
        }
        if !row.is_empty() {
            rows.insert(x, row);
        }
    }
    rows
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dfg::{DepKind, Node};
    use cgra_isa::Datatype;

    /// Build a node with defaults for tests.
    fn node(id: NodeId, op: OpKind) -> Node {
        Node::new(id, op, Datatype::Int32, format!("n{id}"), PathTag::None, None)
    }

    #[test]
    fn directions_follow_the_torus() {
        let grid = TimeGrid::new(4, 4, 2);
        let from = grid.pe_index(1, 1, 0);
        let same = grid.pe_index(1, 1, 1);
        assert_eq!(direction(&grid, from, same).unwrap(), PeInputMux::Same);
        assert_eq!(
            direction(&grid, from, grid.pe_index(1, 2, 1)).unwrap(),
            PeInputMux::Left
        );
        assert_eq!(
            direction(&grid, from, grid.pe_index(1, 0, 1)).unwrap(),
            PeInputMux::Right
        );
        assert_eq!(
            direction(&grid, from, grid.pe_index(2, 1, 1)).unwrap(),
            PeInputMux::Up
        );
        assert_eq!(
            direction(&grid, from, grid.pe_index(0, 1, 1)).unwrap(),
            PeInputMux::Down
        );
        // wrapping: the producer at the bottom edge feeds the top row
        let edge = grid.pe_index(3, 1, 0);
        assert_eq!(
            direction(&grid, edge, grid.pe_index(0, 1, 1)).unwrap(),
            PeInputMux::Up
        );
    }

    #[test]
    fn non_adjacent_cycles_are_a_bug() {
        let grid = TimeGrid::new(4, 4, 3);
        let from = grid.pe_index(0, 0, 0);
        let to = grid.pe_index(0, 0, 2);
        assert!(matches!(
            direction(&grid, from, to),
            Err(MapError::Internal(_))
        ));
    }

    #[test]
    fn registers_are_dense_per_column() {
        let mut dfg = Dfg::new();
        let mut consumer = node(1, OpKind::Add);
        consumer.live_out = true;
        dfg.insert_node(consumer);
        let mut grid = TimeGrid::new(2, 2, 2);
        let pe = grid.pe_index(1, 0, 0);
        grid.place(dfg.node(1), pe, 0);

        // two live-ins reach the node's column
        let mut sources: BTreeMap<NodeId, [Source; 3]> = BTreeMap::new();
        sources.insert(1, [Source::LiveIn(10), Source::LiveIn(11), Source::None]);

        let arch = CgraArch {
            x: 2,
            y: 2,
            ..Default::default()
        };
        let regs = assign_registers(&dfg, &grid, &arch, &sources).unwrap();
        let col = &regs[&(1, 0)];
        assert_eq!(col.live_in[&10], 0);
        assert_eq!(col.live_in[&11], 1);
        // the live-out register starts right after the live-ins
        assert_eq!(col.live_out[&1], 2);
    }

    #[test]
    fn register_file_overflow_is_an_error() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        let mut grid = TimeGrid::new(2, 2, 1);
        grid.place(dfg.node(1), grid.pe_index(0, 0, 0), 0);

        let mut sources: BTreeMap<NodeId, [Source; 3]> = BTreeMap::new();
        sources.insert(
            1,
            [Source::LiveIn(10), Source::LiveIn(11), Source::LiveIn(12)],
        );
        let arch = CgraArch {
            x: 2,
            y: 2,
            reg_file_size: 2,
            ..Default::default()
        };
        assert!(matches!(
            assign_registers(&dfg, &grid, &arch, &sources),
            Err(MapError::RegisterPressure { x: 0, y: 0 })
        ));
    }

    #[test]
    fn merged_operands_must_share_a_pe() {
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

        // place the two producers on different PEs without merging
        let mut grid = TimeGrid::new(2, 2, 2);
        grid.place(dfg.node(1), grid.pe_index(0, 0, 0), 0);
        grid.place(dfg.node(2), grid.pe_index(0, 1, 0), 0);
        grid.place(dfg.node(3), grid.pe_index(0, 0, 1), 0);
        assert!(matches!(
            resolve_sources(&dfg, &grid),
            Err(MapError::Internal(_))
        ));
    }
}
