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

//! Formatting things: the placed grid as a fixed-width table and the
//! modulo schedule as a Graphviz graph.

use std::fmt;

use itertools::Itertools;

use crate::dfg::{DepKind, Dfg, OpKind, PathTag};
use crate::mapping::{schedule::ModuloSchedule, Mapping};

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in 0..self.grid.ii() {
            writeln!(f, "Time: {t}")?;
            for x in 0..self.grid.x() {
                let row = (0..self.grid.y())
                    .map(|y| {
                        let pe = self.grid.pe(self.grid.pe_index(x, y, t));
                        let mut cell = String::new();
                        for (path, marker) in
                            [(PathTag::None, 'N'), (PathTag::True, 'T'), (PathTag::False, 'F')]
                        {
                            if let Some((node, iter)) = pe.entry(path) {
                                cell.push_str(&format!("{node}({marker}{iter})"));
                            }
                        }
                        if cell.is_empty() {
                            cell.push('S');
                        }
                        format!("{cell:>15}")
                    })
                    .join("");
                writeln!(f, "{row}")?;
            }
        }
        Ok(())
    }
}

/// Render a modulo schedule over its DFG as a dot graph: nodes ranked by
/// their cycle modulo II, memory nodes in blue, routes in green, the two
/// paths filled in their own colors.
pub fn modulo_dot(dfg: &Dfg, modulo: &ModuloSchedule) -> String {
    let mut out = String::from("digraph Modulo_Schedule { \n{\n");
    for id in dfg.node_ids() {
        let node = dfg.node(id);
        let iter = modulo.iter_of(id);
        out.push_str(&format!("{id} [label=\"{id}({iter})\"]"));
        if node.is_mem() {
            out.push_str(" [color=blue]");
        } else if node.op == OpKind::Route {
            out.push_str(" [color=green]");
        } else {
            out.push_str(" [color=red]");
        }
        match node.path {
            PathTag::True => out.push_str(" [style=filled, fillcolor=lightblue];\n"),
            PathTag::False => out.push_str(" [style=filled, fillcolor=lightcoral];\n"),
            PathTag::None => out.push_str(";\n"),
        }
    }
    out.push('\n');

    for arc in dfg.all_arcs() {
        out.push_str(&format!("{} -> {}", arc.from, arc.to));
        match arc.dep {
            DepKind::True | DepKind::Pred | DepKind::LiveIn if arc.distance != 0 => {
                out.push_str(&format!(" [style=bold, label={}]", arc.distance));
            }
            DepKind::Load | DepKind::Store => out.push_str(" [style=dotted, label=mem]"),
            _ => {}
        }
        match arc.path {
            PathTag::True => out.push_str(" [color=blue]\n"),
            PathTag::False => out.push_str(" [color=red]\n"),
            PathTag::None => out.push_str(" [color=black]\n"),
        }
    }
    out.push_str("}\n");

    let ii = modulo.ii();
    out.push_str("\n{\nnode [shape=plaintext]; \nT0");
    for t in 1..ii {
        out.push_str(&format!(" -> T{t}"));
    }
    out.push_str(" -> T0;\n}\n{\nrank = source; \nT0;\n} \n");
    for t in 0..ii {
        out.push_str("{\nrank = same; \n");
        for (id, mod_t) in modulo.mod_times() {
            if *mod_t == t {
                out.push_str(&format!("{id}; "));
            }
        }
        out.push_str(&format!("T{t};\n}}\n"));
    }
    out.push_str("\n} \n");
    out
}
