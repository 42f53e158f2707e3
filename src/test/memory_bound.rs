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

//! A loop bound by the memory buses: four loads and one store on a
//! two-column grid.

use cgra_isa::{PeInputMux, Word};
use test_log::test;

use super::{read_kernel, write_loop, LoopFiles};
use crate::arch::{CgraArch, MappingPolicy};
use crate::compile_loop;
use crate::dfg::MemRole;

/// Four loads indexed by a counter, one store of the first value.
/// Nodes 1/2, 3/4, 5/6, 7/8 are the load pairs, 9/10 the store pair,
/// 11 the address counter.
const FILES: LoopFiles = LoopFiles {
    nodes: "1 19 ld0a 4 1 0 -1\n2 20 ld0d 4 1 0 -1\n\
            3 19 ld1a 4 1 0 -1\n4 20 ld1d 4 1 0 -1\n\
            5 19 ld2a 4 1 0 -1\n6 20 ld2d 4 1 0 -1\n\
            7 19 ld3a 4 1 0 -1\n8 20 ld3d 4 1 0 -1\n\
            9 21 sta 4 1 0 -1\n10 22 std 4 1 0 -1\n\
            11 0 idx 0 1 0 -1\n12 30 ConstInt4 0 1 0 -1\n",
    edges: "1 2 0 LRE 0\n3 4 0 LRE 0\n5 6 0 LRE 0\n7 8 0 LRE 0\n\
            9 10 0 SRE 0\n\
            11 11 1 TRU 0\n12 11 0 TRU 1\n\
            11 1 0 TRU 0\n11 3 0 TRU 0\n11 5 0 TRU 0\n11 7 0 TRU 0\n11 9 0 TRU 0\n\
            2 10 0 TRU 1\n",
    control: "-1\n0\n-1\n",
    live_in: None,
    live_out: None,
};

#[test]
fn memory_buses_bound_the_ii() {
    let (dir, node, edge) = write_loop(&FILES);
    let arch = CgraArch {
        x: 4,
        y: 2,
        ..Default::default()
    };
    let mapping = compile_loop(&node, &edge, &arch, &MappingPolicy::default(), Some(31)).unwrap();
    // five memory operations over two columns force at least three cycles
    assert!(mapping.ii >= 3);

    // every pair shares its row and keeps its relative timing
    for (addr, data) in [(1, 2), (3, 4), (5, 6), (7, 8), (9, 10)] {
        let addr_pe = mapping.grid.pe(mapping.grid.placed_pe(addr).unwrap());
        let data_pe = mapping.grid.pe(mapping.grid.placed_pe(data).unwrap());
        assert_eq!(addr_pe.x, data_pe.x);
        let addr_t = mapping.modulo.time(addr).unwrap();
        let data_t = mapping.modulo.time(data).unwrap();
        if mapping.dfg.node(addr).mem_role() == Some(MemRole::LoadAddress) {
            assert_eq!(addr_t + 1, data_t);
        } else {
            assert_eq!(addr_t, data_t);
        }
    }

    // address generators assert the address bus, data reads take the bus
    let kernel = read_kernel(&dir.path().join("kernel.bin"));
    let word_of = |id: u32| {
        let pe = mapping.grid.placed_pe(id).unwrap();
        Word::decode(kernel[pe].0).unwrap()
    };
    for addr in [1, 3, 5, 7, 9] {
        let Word::Pred(word) = word_of(addr) else {
            panic!("address generators must encode as predicate words");
        };
        assert_eq!(word.opcode, cgra_isa::PredOpCode::AddressGenerator);
        // PMUX carries WE|AB|DB, with only the address bus asserted
        assert_eq!(word.pmux, cgra_isa::ADDRESS_BUS_PMUX);
        assert_eq!(word.immediate, 4);
    }
    for data in [2, 4, 6, 8] {
        let Word::Regular(word) = word_of(data) else {
            panic!("load data reads must encode as regular words");
        };
        assert_eq!(word.lmux, PeInputMux::DataBus);
    }
    let Word::Regular(store) = word_of(10) else {
        panic!("the store data write must encode as a regular word");
    };
    assert!(store.data_bus);
}
