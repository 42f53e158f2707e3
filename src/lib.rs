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

//! # SplitMap: compile-time mapping for dual-path CGRAs
//!
//! SplitMap turns a single annotated innermost loop into a bit-exact
//! instruction stream for a toroidal CGRA with dual-path (speculative)
//! execution: both sides of one conditional split are scheduled together,
//! and the hardware commits whichever side the branch takes.
//!
//! ## Structure
//! The source code of this program is structured as follows:
//! - The module [`dfg`] holds the dataflow graph of the loop, its builder
//!   for the textual front-end streams ([`dfg::builder`]) and the
//!   reshaping passes ([`dfg::transform`]): degree capping, path padding,
//!   join-phi elision and merged-peer marking.
//! - The module [`mapping`] (function [`mapping::map_loop`] and structure
//!   [`Mapping`]) contains the scheduling and placement pipeline: the list
//!   and modulo schedulers ([`mapping::scheduler`] over
//!   [`mapping::schedule`]), the route inserter ([`mapping::routing`]),
//!   and the randomized placer ([`mapping::placer`]) on the time-extended
//!   grid ([`mapping::grid`]).
//! - The module [`insgen`] encodes the finished placement into
//!   instruction words and [`insgen::emit`] writes the binary bundle.
//! - The module [`arch`] describes the target grid and the search policy.
//! - The instruction contract (word layouts, opcodes, muxes) lives in a
//!   separate crate, `cgra-isa`, shared with the runtime stub and the
//!   simulator.

#![deny(
    missing_docs,
    clippy::missing_docs_in_private_items,
    missing_debug_implementations,
    rust_2018_idioms
)]

use std::path::Path;

use rand::{rngs::StdRng, SeedableRng};

pub mod arch;
pub mod dfg;
pub mod formatter;
pub mod insgen;
pub mod mapping;
#[cfg(test)]
mod test;

pub use mapping::{map_loop, MapError, Mapping};

/// Compile one loop end to end: parse its directory, map it, generate the
/// instruction streams, and write the binary bundle next to the inputs.
/// Returns the mapping for inspection.
pub fn compile_loop(
    node_file: &Path,
    edge_file: &Path,
    arch: &arch::CgraArch,
    policy: &arch::MappingPolicy,
    seed: Option<u64>,
) -> Result<Mapping, MapError> {
    arch.validate()?;
    policy.validate()?;
    let input = dfg::builder::read_loop(node_file, edge_file)?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mapping = mapping::map_loop(&input, arch, policy, &mut rng)?;
    let program = insgen::generate(&mapping, &input, arch)?;
    let dir = node_file.parent().unwrap_or(Path::new("."));
    insgen::emit::write_bundle(dir, &program, arch)?;
    Ok(mapping)
}
