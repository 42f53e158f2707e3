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

//! End-to-end scenarios: write a loop directory, run the full pipeline
//! with a fixed seed, and check the emitted binaries.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

mod loop_control;
mod memory_bound;
mod split_diamond;

/// The textual inputs of one loop.
pub struct LoopFiles {
    /// Content of `node.sch`.
    pub nodes: &'static str,
    /// Content of `edge.sch`.
    pub edges: &'static str,
    /// Content of `control_node.txt`.
    pub control: &'static str,
    /// Content of `livein_node.txt`, if any.
    pub live_in: Option<&'static str>,
    /// Content of `liveout_node.txt`, if any.
    pub live_out: Option<&'static str>,
}

/// Write a loop directory and return it together with the node and edge
/// stream paths.
pub fn write_loop(files: &LoopFiles) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let node = dir.path().join("node.sch");
    let edge = dir.path().join("edge.sch");
    fs::write(&node, files.nodes).unwrap();
    fs::write(&edge, files.edges).unwrap();
    fs::write(dir.path().join("control_node.txt"), files.control).unwrap();
    if let Some(live_in) = files.live_in {
        fs::write(dir.path().join("livein_node.txt"), live_in).unwrap();
    }
    if let Some(live_out) = files.live_out {
        fs::write(dir.path().join("liveout_node.txt"), live_out).unwrap();
    }
    (dir, node, edge)
}

/// Read a u32-counted stream of 64-bit words.
pub fn read_words(path: &Path) -> (u32, Vec<u64>) {
    let bytes = fs::read(path).unwrap();
    let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let words = bytes[4..]
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    (count, words)
}

/// Read the iteration blob: its per-PE entries and the trailing count.
pub fn read_iters(path: &Path) -> (Vec<i32>, i32) {
    let bytes = fs::read(path).unwrap();
    let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let entries: Vec<i32> = bytes[4..4 + 4 * count]
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    let trailer = i32::from_le_bytes(bytes[4 + 4 * count..4 + 4 * count + 4].try_into().unwrap());
    (entries, trailer)
}

/// The kernel triples (true, false, prologue) in (t, x, y) order.
pub fn read_kernel(path: &Path) -> Vec<(u64, u64, u64)> {
    let (count, words) = read_words(path);
    assert_eq!(count as usize, words.len());
    words.chunks_exact(3).map(|c| (c[0], c[1], c[2])).collect()
}
