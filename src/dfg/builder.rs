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

//! Reads the textual loop description produced by the front end (node
//! stream, edge stream, control metadata and live-value symbol tables) and
//! builds the [`Dfg`] from it. All rejection of malformed input happens
//! here, with the file and line of the offending entry.

use std::{
    fs,
    path::{Path, PathBuf},
};

use cgra_isa::Datatype;
use log::{debug, info};

use super::{DepKind, Dfg, Node, NodeId, OpKind, PathTag};
use crate::mapping::MapError;

/// Loop-control metadata from `control_node.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LoopControl {
    /// The node whose comparison exits the loop, when it is part of the
    /// kernel.
    pub loop_exit: Option<NodeId>,
    /// Branch direction taken to leave the loop.
    pub exit_direction: bool,
    /// Branch id of the conditional split, if the loop has one.
    pub split_branch: Option<u32>,
}

/// One live-in or live-out symbol with its externally resolved address.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct IoSymbol {
    /// The DFG node carrying the value (the external constant for a
    /// live-in, the producing node for a live-out).
    pub node: NodeId,
    /// Symbol name.
    pub name: String,
    /// Datatype of the value.
    pub datatype: Datatype,
    /// Data alignment in bytes.
    pub alignment: i32,
    /// Byte address of the symbol, resolved by the external linker pass.
    pub address: u32,
}

/// Live-in and live-out symbol tables of one loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LoopIo {
    /// Values flowing into the loop.
    pub live_ins: Vec<IoSymbol>,
    /// Values flowing out of the loop.
    pub live_outs: Vec<IoSymbol>,
}

impl LoopIo {
    /// The live-in symbol with the given node id.
    pub fn live_in(&self, node: NodeId) -> Option<&IoSymbol> {
        self.live_ins.iter().find(|s| s.node == node)
    }

    /// The live-out symbol with the given node id.
    pub fn live_out(&self, node: NodeId) -> Option<&IoSymbol> {
        self.live_outs.iter().find(|s| s.node == node)
    }
}

/// Everything the mapper needs about one loop.
#[derive(Debug, Clone)]
pub struct LoopInput {
    /// The dataflow graph.
    pub dfg: Dfg,
    /// Loop-control metadata.
    pub control: LoopControl,
    /// Live-value symbol tables.
    pub io: LoopIo,
}

/// Read one loop from its directory. The node and edge streams are given
/// explicitly (they are CLI arguments); the remaining files are found next
/// to the node stream.
pub fn read_loop(node_file: &Path, edge_file: &Path) -> Result<LoopInput, MapError> {
    let dir = node_file.parent().unwrap_or(Path::new("."));
    info!("parsing loop description in {}", dir.display());

    let mut dfg = Dfg::new();
    let node_text = read(node_file)?;
    parse_nodes(&node_text, &mut dfg, &node_file.display().to_string())?;
    let edge_text = read(edge_file)?;
    parse_edges(&edge_text, &mut dfg, &edge_file.display().to_string())?;

    let control_path = dir.join("control_node.txt");
    let control_text = read(&control_path)?;
    let control = parse_control(&control_text, &control_path.display().to_string())?;

    let mut io = LoopIo::default();
    let livein_path = dir.join("livein_node.txt");
    if livein_path.exists() {
        let text = read(&livein_path)?;
        io.live_ins = parse_io_symbols(&text, &livein_path.display().to_string())?;
    } else {
        debug!("no live-in table, assuming none");
    }
    let liveout_path = dir.join("liveout_node.txt");
    if liveout_path.exists() {
        let text = read(&liveout_path)?;
        io.live_outs = parse_io_symbols(&text, &liveout_path.display().to_string())?;
    } else {
        debug!("no live-out table, assuming none");
    }

    apply_control(&mut dfg, &control, &io)?;

    info!(
        "parsed DFG with {} nodes, {} live-ins, {} live-outs",
        dfg.node_count(),
        io.live_ins.len(),
        io.live_outs.len()
    );
    Ok(LoopInput { dfg, control, io })
}

/// Read the grid dimensions from `CGRA_config.txt` in the loop directory,
/// if present (two lines: X, then Y).
pub fn read_grid_config(dir: &Path) -> Result<Option<(u32, u32)>, MapError> {
    let path = dir.join("CGRA_config.txt");
    if !path.exists() {
        return Ok(None);
    }
    let text = read(&path)?;
    let file = path.display().to_string();
    let mut lines = text.lines();
    let x = parse_field(lines.next().unwrap_or("").trim(), &file, 1, "X dimension")?;
    let y = parse_field(lines.next().unwrap_or("").trim(), &file, 2, "Y dimension")?;
    Ok(Some((x, y)))
}

/// Read a whole file, attaching the path to any failure.
fn read(path: &Path) -> Result<String, MapError> {
    fs::read_to_string(path).map_err(|source| MapError::Io {
        path: PathBuf::from(path),
        source,
    })
}

/// Parse one whitespace-separated field.
fn parse_field<T: std::str::FromStr>(
    token: &str,
    file: &str,
    line: usize,
    what: &str,
) -> Result<T, MapError> {
    token.parse().map_err(|_| MapError::Parse {
        file: file.into(),
        line,
        reason: format!("invalid {what}: {token:?}"),
    })
}

/// Parse the node stream: one node per line as
/// `id op name alignment datatype path cond_branch_id`.
fn parse_nodes(text: &str, dfg: &mut Dfg, file: &str) -> Result<(), MapError> {
    for (lineno, line) in text.lines().enumerate() {
        let lineno = lineno + 1;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let mut next = |what: &str| {
            fields.next().ok_or_else(|| MapError::Parse {
                file: file.into(),
                line: lineno,
                reason: format!("missing {what}"),
            })
        };
        let id: NodeId = parse_field(next("node id")?, file, lineno, "node id")?;
        let op_code: u32 = parse_field(next("op kind")?, file, lineno, "op kind")?;
        let name = next("name")?.to_string();
        let alignment: i32 = parse_field(next("alignment")?, file, lineno, "alignment")?;
        let dt_code: u32 = parse_field(next("datatype")?, file, lineno, "datatype")?;
        let path_code: u32 = parse_field(next("path")?, file, lineno, "path")?;
        let cond: i64 = parse_field(next("cond branch id")?, file, lineno, "cond branch id")?;

        let op = OpKind::from_code(op_code).ok_or_else(|| MapError::Parse {
            file: file.into(),
            line: lineno,
            reason: format!("unknown op kind {op_code}"),
        })?;
        let datatype = datatype_from_code(dt_code).ok_or_else(|| MapError::Parse {
            file: file.into(),
            line: lineno,
            reason: format!("unknown datatype {dt_code}"),
        })?;
        let path = PathTag::from_code(path_code).ok_or_else(|| MapError::Parse {
            file: file.into(),
            line: lineno,
            reason: format!("unknown path tag {path_code}"),
        })?;
        let cond_branch = if cond < 0 { None } else { Some(cond as u32) };

        if !dfg.has_node(id) && !dfg.has_constant(id) {
            let mut node = Node::new(id, op, datatype, name, path, cond_branch);
            node.alignment = alignment;
            dfg.insert_node(node);
        }
    }
    Ok(())
}

/// Parse the edge stream: one arc per line as
/// `from to distance kind operand_order` with
/// `kind ∈ {TRU, PRE, LRE, SRE, MEM, LCE, LIV}`.
fn parse_edges(text: &str, dfg: &mut Dfg, file: &str) -> Result<(), MapError> {
    for (lineno, line) in text.lines().enumerate() {
        let lineno = lineno + 1;
        if line.trim().is_empty() {
            continue;
        }
        let err = |reason: String| MapError::Parse {
            file: file.into(),
            line: lineno,
            reason,
        };
        let mut fields = line.split_whitespace();
        let mut next = |what: &str| {
            fields.next().ok_or_else(|| MapError::Parse {
                file: file.into(),
                line: lineno,
                reason: format!("missing {what}"),
            })
        };
        let from: NodeId = parse_field(next("from node")?, file, lineno, "from node")?;
        let to: NodeId = parse_field(next("to node")?, file, lineno, "to node")?;
        let distance: i64 = parse_field(next("distance")?, file, lineno, "distance")?;
        let kind = next("edge kind")?.to_string();
        let operand: u8 = parse_field(next("operand order")?, file, lineno, "operand order")?;

        if distance < 0 {
            return Err(err(format!("negative distance {distance}")));
        }
        if operand > 2 {
            return Err(err(format!("operand order {operand} out of range")));
        }

        // arcs touching the constants set are only recorded by operand
        if dfg.has_constant(from) || dfg.has_constant(to) {
            match kind.as_str() {
                "TRU" => dfg.make_const_arc(from, to, operand),
                "LIV" => {
                    if let Some(c) = dfg.constant_mut(from) {
                        c.live_in = true;
                    } else {
                        return Err(err(format!("live-in source {from} is not external")));
                    }
                    dfg.make_const_arc(from, to, operand);
                }
                "PRE" | "LRE" | "SRE" | "MEM" | "LCE" => {}
                _ => return Err(err(format!("unknown edge kind {kind:?}"))),
            }
            continue;
        }

        if !dfg.has_node(from) {
            return Err(err(format!("from node {from} does not exist")));
        }
        if !dfg.has_node(to) {
            return Err(err(format!("to node {to} does not exist")));
        }
        let arc_path = if dfg.node(from).path != PathTag::None {
            dfg.node(from).path
        } else {
            dfg.node(to).path
        };

        match kind.as_str() {
            "TRU" => dfg.make_arc(from, to, distance, DepKind::True, operand, arc_path),
            "PRE" => dfg.make_arc(from, to, distance, DepKind::Pred, operand, arc_path),
            "MEM" => dfg.make_arc(from, to, distance, DepKind::Memory, operand, arc_path),
            "LRE" => {
                dfg.node_mut(from).set_load_address(to);
                dfg.node_mut(to).set_load_data(from);
                dfg.make_arc(from, to, 0, DepKind::Load, 0, arc_path);
            }
            "SRE" => {
                dfg.node_mut(from).set_store_address(to);
                dfg.node_mut(to).set_store_data(from);
                dfg.make_arc(from, to, 0, DepKind::Store, 0, arc_path);
            }
            "LCE" => {
                dfg.node_mut(from).loop_ctrl = true;
                dfg.node_mut(to).live_out = true;
            }
            "LIV" => dfg.make_arc(from, to, distance, DepKind::LiveIn, operand, arc_path),
            _ => return Err(err(format!("unknown edge kind {kind:?}"))),
        }
    }
    Ok(())
}

/// Parse `control_node.txt`: three lines holding the loop-exit node id, the
/// exit direction, and the split branch id (-1 when the loop has no split).
fn parse_control(text: &str, file: &str) -> Result<LoopControl, MapError> {
    let mut lines = text.lines();
    let exit: i64 = parse_field(lines.next().unwrap_or("").trim(), file, 1, "loop exit node")?;
    let dir: u32 = parse_field(lines.next().unwrap_or("").trim(), file, 2, "exit direction")?;
    let split: i64 = parse_field(lines.next().unwrap_or("").trim(), file, 3, "split branch")?;
    Ok(LoopControl {
        loop_exit: if exit < 0 { None } else { Some(exit as NodeId) },
        exit_direction: dir != 0,
        split_branch: if split < 0 { None } else { Some(split as u32) },
    })
}

/// Parse a live-value symbol table: one symbol per line as
/// `id name datatype alignment address` with the address in hexadecimal.
fn parse_io_symbols(text: &str, file: &str) -> Result<Vec<IoSymbol>, MapError> {
    let mut symbols = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let lineno = lineno + 1;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let mut next = |what: &str| {
            fields.next().ok_or_else(|| MapError::Parse {
                file: file.into(),
                line: lineno,
                reason: format!("missing {what}"),
            })
        };
        let node = parse_field(next("node id")?, file, lineno, "node id")?;
        let name = next("name")?.to_string();
        let dt_code: u32 = parse_field(next("datatype")?, file, lineno, "datatype")?;
        let alignment = parse_field(next("alignment")?, file, lineno, "alignment")?;
        let addr_token = next("address")?;
        let address = u32::from_str_radix(addr_token.trim_start_matches("0x"), 16).map_err(
            |_| MapError::Parse {
                file: file.into(),
                line: lineno,
                reason: format!("invalid address {addr_token:?}"),
            },
        )?;
        let datatype = datatype_from_code(dt_code).ok_or_else(|| MapError::Parse {
            file: file.into(),
            line: lineno,
            reason: format!("unknown datatype {dt_code}"),
        })?;
        symbols.push(IoSymbol {
            node,
            name,
            datatype,
            alignment,
            address,
        });
    }
    Ok(symbols)
}

/// Apply the control metadata to the graph: mark the loop exit, tag the
/// split-condition comparison (which must be unique), and mark the live-in
/// constants named by the symbol table.
fn apply_control(dfg: &mut Dfg, control: &LoopControl, io: &LoopIo) -> Result<(), MapError> {
    if let Some(exit) = control.loop_exit {
        if dfg.has_node(exit) {
            dfg.node_mut(exit).loop_exit = true;
        } else {
            return Err(MapError::Parse {
                file: "control_node.txt".into(),
                line: 1,
                reason: format!("loop exit node {exit} does not exist"),
            });
        }
    }

    if let Some(branch) = control.split_branch {
        let conds: Vec<NodeId> = dfg
            .node_ids()
            .into_iter()
            .filter(|id| dfg.node(*id).cond_branch == Some(branch))
            .collect();
        match conds.as_slice() {
            [cond] => dfg.node_mut(*cond).split_cond = true,
            [] => {
                return Err(MapError::Parse {
                    file: "control_node.txt".into(),
                    line: 3,
                    reason: format!("no condition node governs split branch {branch}"),
                })
            }
            _ => {
                return Err(MapError::Parse {
                    file: "control_node.txt".into(),
                    line: 3,
                    reason: format!("split branch {branch} has several condition nodes"),
                })
            }
        }
    }

    for sym in &io.live_ins {
        if let Some(c) = dfg.constant_mut(sym.node) {
            c.live_in = true;
        }
    }
    for sym in &io.live_outs {
        if dfg.has_node(sym.node) {
            dfg.node_mut(sym.node).live_out = true;
        }
    }
    Ok(())
}

/// Translate the numeric datatype codes of the input streams.
fn datatype_from_code(code: u32) -> Option<Datatype> {
    match code {
        0 => Some(Datatype::Character),
        1 => Some(Datatype::Int32),
        2 => Some(Datatype::Int16),
        3 => Some(Datatype::Float32),
        4 => Some(Datatype::Float64),
        5 => Some(Datatype::Float16),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dfg::MemRole;

    #[test]
    fn parse_simple_nodes() {
        let mut dfg = Dfg::new();
        let text = "1 0 add1 0 1 0 -1\n2 30 ConstInt5 0 1 0 -1\n";
        parse_nodes(text, &mut dfg, "node.sch").unwrap();
        assert!(dfg.has_node(1));
        assert_eq!(dfg.node(1).op, OpKind::Add);
        assert_eq!(dfg.constant(2).unwrap().value, Some(5));
    }

    #[test]
    fn unknown_op_rejected() {
        let mut dfg = Dfg::new();
        let res = parse_nodes("1 99 x 0 1 0 -1\n", &mut dfg, "node.sch");
        assert!(matches!(res, Err(MapError::Parse { line: 1, .. })));
    }

    #[test]
    fn negative_distance_rejected() {
        let mut dfg = Dfg::new();
        parse_nodes("1 0 a 0 1 0 -1\n2 0 b 0 1 0 -1\n", &mut dfg, "n").unwrap();
        let res = parse_edges("1 2 -1 TRU 0\n", &mut dfg, "edge.sch");
        assert!(matches!(res, Err(MapError::Parse { .. })));
    }

    #[test]
    fn operand_out_of_range_rejected() {
        let mut dfg = Dfg::new();
        parse_nodes("1 0 a 0 1 0 -1\n2 0 b 0 1 0 -1\n", &mut dfg, "n").unwrap();
        let res = parse_edges("1 2 0 TRU 3\n", &mut dfg, "edge.sch");
        assert!(matches!(res, Err(MapError::Parse { .. })));
    }

    #[test]
    fn missing_endpoint_rejected() {
        let mut dfg = Dfg::new();
        parse_nodes("1 0 a 0 1 0 -1\n", &mut dfg, "n").unwrap();
        let res = parse_edges("1 9 0 TRU 0\n", &mut dfg, "edge.sch");
        assert!(matches!(res, Err(MapError::Parse { .. })));
    }

    #[test]
    fn load_pair_linked() {
        let mut dfg = Dfg::new();
        parse_nodes("1 19 addr 4 1 0 -1\n2 20 data 4 1 0 -1\n", &mut dfg, "n").unwrap();
        parse_edges("1 2 0 LRE 0\n", &mut dfg, "e").unwrap();
        assert_eq!(dfg.node(1).mem_role(), Some(MemRole::LoadAddress));
        assert_eq!(dfg.node(2).mem_role(), Some(MemRole::LoadData));
        assert_eq!(dfg.node(1).mem_partner(), Some(2));
        let arc = dfg.arc_between(1, 2).unwrap();
        assert_eq!(arc.dep, DepKind::Load);
        assert_eq!(arc.distance, 0);
    }

    #[test]
    fn store_address_has_zero_latency() {
        let mut dfg = Dfg::new();
        parse_nodes("1 21 addr 4 1 0 -1\n2 22 data 4 1 0 -1\n", &mut dfg, "n").unwrap();
        parse_edges("1 2 0 SRE 0\n", &mut dfg, "e").unwrap();
        assert_eq!(dfg.node(1).latency, 0);
        assert_eq!(dfg.node(2).latency, 1);
    }

    #[test]
    fn loop_control_edge_sets_flags_without_arc() {
        let mut dfg = Dfg::new();
        parse_nodes("1 25 lc 0 1 0 -1\n2 0 out 0 1 0 -1\n", &mut dfg, "n").unwrap();
        parse_edges("1 2 0 LCE 0\n", &mut dfg, "e").unwrap();
        assert!(dfg.node(1).loop_ctrl);
        assert!(dfg.node(2).live_out);
        assert!(dfg.arc_between(1, 2).is_none());
    }

    #[test]
    fn const_arcs_recorded_by_operand() {
        let mut dfg = Dfg::new();
        parse_nodes("1 0 a 0 1 0 -1\n7 30 ConstInt3 0 1 0 -1\n", &mut dfg, "n").unwrap();
        parse_edges("7 1 0 TRU 1\n", &mut dfg, "e").unwrap();
        assert_eq!(dfg.const_arcs().len(), 1);
        assert_eq!(dfg.const_arcs()[0].operand, 1);
        assert!(dfg.arc_between(7, 1).is_none());
    }

    #[test]
    fn liv_edge_marks_live_in() {
        let mut dfg = Dfg::new();
        parse_nodes("1 0 a 0 1 0 -1\n7 30 base 0 1 0 -1\n", &mut dfg, "n").unwrap();
        parse_edges("7 1 0 LIV 0\n", &mut dfg, "e").unwrap();
        assert!(dfg.constant(7).unwrap().live_in);
        assert_eq!(dfg.const_arcs().len(), 1);
    }

    #[test]
    fn unknown_edge_kind_rejected() {
        let mut dfg = Dfg::new();
        parse_nodes("1 0 a 0 1 0 -1\n2 0 b 0 1 0 -1\n", &mut dfg, "n").unwrap();
        let res = parse_edges("1 2 0 XYZ 0\n", &mut dfg, "e");
        assert!(matches!(res, Err(MapError::Parse { .. })));
    }

    #[test]
    fn control_file_parsed() {
        let ctrl = parse_control("4\n1\n-1\n", "control_node.txt").unwrap();
        assert_eq!(ctrl.loop_exit, Some(4));
        assert!(ctrl.exit_direction);
        assert_eq!(ctrl.split_branch, None);

        let ctrl = parse_control("4\n0\n2\n", "control_node.txt").unwrap();
        assert_eq!(ctrl.split_branch, Some(2));
    }

    #[test]
    fn io_symbols_parsed() {
        let syms = parse_io_symbols("3 base 1 4 0x1000\n", "livein_node.txt").unwrap();
        assert_eq!(syms.len(), 1);
        assert_eq!(syms[0].node, 3);
        assert_eq!(syms[0].address, 0x1000);
        assert_eq!(syms[0].alignment, 4);
    }

    #[test]
    fn read_loop_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("node.sch"),
            "1 0 add1 0 1 0 -1\n2 10 cmp 0 1 0 -1\n3 30 ConstInt1 0 1 0 -1\n",
        )
        .unwrap();
        fs::write(dir.path().join("edge.sch"), "1 2 0 TRU 0\n3 1 0 TRU 1\n").unwrap();
        fs::write(dir.path().join("control_node.txt"), "2\n0\n-1\n").unwrap();
        let input = read_loop(&dir.path().join("node.sch"), &dir.path().join("edge.sch")).unwrap();
        assert_eq!(input.dfg.node_count(), 2);
        assert!(input.dfg.node(2).loop_exit);
        assert!(input.io.live_ins.is_empty());
    }

    #[test]
    fn split_branch_tags_unique_condition() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("node.sch"),
            "1 10 cmp 0 1 0 5\n2 0 a 0 1 1 -1\n3 0 b 0 1 2 -1\n4 11 exit 0 1 0 -1\n",
        )
        .unwrap();
        fs::write(dir.path().join("edge.sch"), "1 2 0 PRE 2\n1 3 0 PRE 2\n").unwrap();
        fs::write(dir.path().join("control_node.txt"), "4\n0\n5\n").unwrap();
        let input = read_loop(&dir.path().join("node.sch"), &dir.path().join("edge.sch")).unwrap();
        assert!(input.dfg.node(1).split_cond);
        assert_eq!(input.dfg.split_cond_node(), Some(1));
    }
}
