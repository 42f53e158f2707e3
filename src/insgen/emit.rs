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

//! Writes the binary bundle of one mapped loop: four little-endian blobs
//! (`live_in.bin`, `kernel.bin`, `iter.bin`, `live_out.bin`), each prefixed
//! with its record count, plus the textual `initCGRA.txt` descriptor the
//! runtime stub reads before uploading.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::info;

use super::Program;
use crate::arch::CgraArch;
use crate::mapping::MapError;

/// Write the complete output bundle into the loop directory.
pub fn write_bundle(dir: &Path, program: &Program, arch: &CgraArch) -> Result<(), MapError> {
    info!("writing binary bundle to {}", dir.display());
    write_words(&dir.join("live_in.bin"), &program.live_in)?;
    write_kernel(&dir.join("kernel.bin"), program)?;
    write_iters(&dir.join("iter.bin"), program)?;
    write_words(&dir.join("live_out.bin"), &program.live_out)?;
    write_init(&dir.join("initCGRA.txt"), program, arch)?;
    Ok(())
}

/// Wrap an IO error with its path.
fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> MapError + '_ {
    move |source| MapError::Io {
        path: PathBuf::from(path),
        source,
    }
}

/// Write a u32-counted stream of 64-bit words.
fn write_words(path: &Path, words: &[u64]) -> Result<(), MapError> {
    let mut file = BufWriter::new(File::create(path).map_err(io_err(path))?);
    file.write_all(&(words.len() as u32).to_le_bytes())
        .map_err(io_err(path))?;
    for word in words {
        file.write_all(&word.to_le_bytes()).map_err(io_err(path))?;
    }
    file.flush().map_err(io_err(path))
}

/// Write the kernel: `X·Y·II·3` words as (true, false, prologue) triples in
/// (t, x, y) row-major order.
fn write_kernel(path: &Path, program: &Program) -> Result<(), MapError> {
    let mut file = BufWriter::new(File::create(path).map_err(io_err(path))?);
    let count = (program.true_words.len() * 3) as u32;
    file.write_all(&count.to_le_bytes()).map_err(io_err(path))?;
    for slot in 0..program.true_words.len() {
        file.write_all(&program.true_words[slot].to_le_bytes())
            .map_err(io_err(path))?;
        file.write_all(&program.false_words[slot].to_le_bytes())
            .map_err(io_err(path))?;
        file.write_all(&program.prologue_words[slot].to_le_bytes())
            .map_err(io_err(path))?;
    }
    file.flush().map_err(io_err(path))
}

/// Write the iteration indices: a u32 count, one i32 per time-extended PE,
/// and the trailing iteration count.
fn write_iters(path: &Path, program: &Program) -> Result<(), MapError> {
    let mut file = BufWriter::new(File::create(path).map_err(io_err(path))?);
    file.write_all(&(program.iters.len() as u32).to_le_bytes())
        .map_err(io_err(path))?;
    for iter in &program.iters {
        file.write_all(&iter.to_le_bytes()).map_err(io_err(path))?;
    }
    file.write_all(&program.max_iter.to_le_bytes())
        .map_err(io_err(path))?;
    file.flush().map_err(io_err(path))
}

/// Write the eight-line init descriptor: live-in length (cycles), II,
/// live-out length (cycles), iteration count, then the byte offsets of the
/// four blobs within the concatenated upload image.
fn write_init(path: &Path, program: &Program, arch: &CgraArch) -> Result<(), MapError> {
    let size = (arch.x * arch.y) as usize;
    let live_in_len = program.live_in.len() / size;
    let live_out_len = program.live_out.len() / size;

    let live_in_pc = 0usize;
    let kernel_pc = live_in_pc + program.live_in.len() * 8;
    let iter_pc = kernel_pc + program.true_words.len() * 3 * 8;
    let live_out_pc = iter_pc + program.iters.len() * 4;

    let mut file = BufWriter::new(File::create(path).map_err(io_err(path))?);
    for line in [
        live_in_len as i64,
        program.ii,
        live_out_len as i64,
        program.max_iter as i64,
        live_in_pc as i64,
        kernel_pc as i64,
        iter_pc as i64,
        live_out_pc as i64,
    ] {
        writeln!(file, "{line}").map_err(io_err(path))?;
    }
    file.flush().map_err(io_err(path))
}
