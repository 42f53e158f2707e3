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

//! A dual-path diamond: a comparison splits the body, one operation per
//! side, and a phi joins the two values again.

use cgra_isa::{noop_word, Word};
use test_log::test;

use super::{read_kernel, write_loop, LoopFiles};
use crate::arch::{CgraArch, MappingPolicy};
use crate::compile_loop;
use crate::dfg::PathTag;

/// A counter drives a comparison governing branch 0; the true side adds,
/// the false side subtracts, and a phi joins the two into a consumer.
const FILES: LoopFiles = LoopFiles {
    nodes: "1 9 cmp 0 1 0 0\n\
            2 0 then 0 1 1 -1\n\
            3 1 else 0 1 2 -1\n\
            4 7 ctr 0 1 0 -1\n\
            5 29 join 0 1 0 -1\n\
            6 8 use 0 1 0 -1\n\
            7 30 ConstInt10 0 1 0 -1\n\
            8 30 ConstInt1 0 1 0 -1\n",
    edges: "4 4 1 TRU 0\n8 4 0 TRU 1\n\
            4 1 0 TRU 0\n7 1 0 TRU 1\n\
            4 2 0 TRU 0\n8 2 0 TRU 1\n\
            4 3 0 TRU 0\n8 3 0 TRU 1\n\
            1 2 0 PRE 2\n1 3 0 PRE 2\n\
            2 5 0 TRU 0\n3 5 0 TRU 0\n\
            5 6 0 TRU 0\n8 6 0 TRU 1\n",
    control: "-1\n0\n0\n",
    live_in: None,
    live_out: None,
};

#[test]
fn diamond_merges_the_two_sides() {
    let (dir, node, edge) = write_loop(&FILES);
    let mapping = compile_loop(
        &node,
        &edge,
        &CgraArch::default(),
        &MappingPolicy::default(),
        Some(3),
    )
    .unwrap();

    // the join phi is gone; its two producers became merged peers
    assert!(!mapping.dfg.has_node(5));
    assert_eq!(mapping.dfg.node(2).merged_with, Some(3));
    assert_eq!(mapping.dfg.node(3).merged_with, Some(2));
    assert_eq!(mapping.dfg.node(2).path, PathTag::True);
    assert_eq!(mapping.dfg.node(3).path, PathTag::False);
    assert_eq!(mapping.grid.placed_pe(2), mapping.grid.placed_pe(3));
    assert_eq!(mapping.modulo.time(2), mapping.modulo.time(3));

    // the shared PE carries distinct words per channel and no prologue
    let kernel = read_kernel(&dir.path().join("kernel.bin"));
    let pe = mapping.grid.placed_pe(2).unwrap();
    let (true_word, false_word, prologue) = kernel[pe];
    assert_ne!(true_word, noop_word());
    assert_ne!(false_word, noop_word());
    assert_ne!(true_word, false_word);
    assert_eq!(prologue, noop_word());

    // the split condition announces itself with SP set
    let cmp_pe = mapping.grid.placed_pe(1).unwrap();
    let Word::Cond(word) = Word::decode(kernel[cmp_pe].0).unwrap() else {
        panic!("the split condition must encode as a condition word");
    };
    assert!(word.split_cond);
    assert!(!word.loop_exit);
    assert_eq!(word.opcode, cgra_isa::CondOpCode::CmpGt);
    assert_eq!(word.br_offset, 0);
}

#[test]
fn tagged_consumers_read_tagged_producers() {
    let (_dir, node, edge) = write_loop(&FILES);
    let mapping = compile_loop(
        &node,
        &edge,
        &CgraArch::default(),
        &MappingPolicy::default(),
        Some(3),
    )
    .unwrap();
    // path padding keeps the placement bookkeeping local: every operand of
    // the two sides arrives from a node of the same side
    for side in [2, 3] {
        for arc in mapping.dfg.all_arcs() {
            if arc.to == side && arc.dep.is_data_or_pred() {
                assert_ne!(mapping.dfg.node(arc.from).path, PathTag::None);
            }
        }
    }
}
