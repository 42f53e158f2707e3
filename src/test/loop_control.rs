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

//! A counted loop: an induction variable, its exit comparison, and an
//! accumulator leaving the loop.

use cgra_isa::{Word, LOOP_EXIT_BROFFSET};
use test_log::test;

use super::{read_kernel, write_loop, LoopFiles};
use crate::arch::{CgraArch, MappingPolicy};
use crate::compile_loop;

/// `for (i = 0; i < 100; i++) sum += 2` with `sum` live-out.
const FILES: LoopFiles = LoopFiles {
    nodes: "1 0 i 0 1 0 -1\n2 12 exit 0 1 0 -1\n3 0 sum 0 1 0 -1\n\
            4 30 ConstInt1 0 1 0 -1\n5 30 ConstInt100 0 1 0 -1\n6 30 ConstInt2 0 1 0 -1\n",
    edges: "1 1 1 TRU 0\n4 1 0 TRU 1\n\
            1 2 0 TRU 0\n5 2 0 TRU 1\n\
            3 3 1 TRU 0\n6 3 0 TRU 1\n\
            2 3 0 LCE 0\n",
    control: "2\n1\n-1\n",
    live_in: None,
    live_out: Some("3 sum 1 4 0x5000\n"),
};

#[test]
fn live_out_follows_the_loop_control() {
    let (_dir, node, edge) = write_loop(&FILES);
    let mapping = compile_loop(
        &node,
        &edge,
        &CgraArch::default(),
        &MappingPolicy::default(),
        Some(11),
    )
    .unwrap();
    // the live-out accumulator commits strictly after the exit decision
    let exit_t = mapping.modulo.time(2).unwrap();
    let sum_t = mapping.modulo.time(3).unwrap();
    assert!(sum_t > exit_t);
}

#[test]
fn loop_exit_word_bits() {
    let (dir, node, edge) = write_loop(&FILES);
    let mapping = compile_loop(
        &node,
        &edge,
        &CgraArch::default(),
        &MappingPolicy::default(),
        Some(11),
    )
    .unwrap();
    let kernel = read_kernel(&dir.path().join("kernel.bin"));
    let pe = mapping.grid.placed_pe(2).unwrap();
    let Word::Cond(word) = Word::decode(kernel[pe].0).unwrap() else {
        panic!("the loop exit must encode as a condition word");
    };
    assert!(word.loop_exit);
    assert_eq!(word.br_offset, LOOP_EXIT_BROFFSET);
    // SP carries the exit direction of the loop-exit word
    assert!(word.split_cond);
    assert_eq!(word.opcode, cgra_isa::CondOpCode::CmpLt);
    assert_eq!(word.immediate, 100);
}
