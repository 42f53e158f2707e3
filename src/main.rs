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

use std::path::{Path, PathBuf};

use clap::Parser;
use log::{debug, info};

use splitmap::{
    arch::{CgraArch, MappingPolicy},
    compile_loop,
    dfg::builder::read_grid_config,
    formatter,
};

/// Map one annotated loop onto the CGRA and emit its binary bundle.
#[derive(Debug, Parser)]
struct Cli {
    /// Number of rows of the grid; read from CGRA_config.txt when absent.
    #[clap(short = 'X')]
    x: Option<u32>,
    /// Number of PEs per row; read from CGRA_config.txt when absent.
    #[clap(short = 'Y')]
    y: Option<u32>,
    /// Register file size per PE; 0 disables register-backed live values.
    #[clap(short = 'R', default_value_t = 4)]
    regs: u32,
    /// Node stream of the loop.
    #[clap(long = "NODE")]
    node: PathBuf,
    /// Edge stream of the loop.
    #[clap(long = "EDGE")]
    edge: PathBuf,
    /// Largest II to try before giving up.
    #[clap(long = "MAX_II", default_value_t = 50)]
    max_ii: i64,
    /// Placement restarts per round.
    #[clap(long = "MAX_MAP", default_value_t = 500)]
    max_map: u32,
    /// Fraction of the scheduling space explored per II.
    #[clap(long = "LAMBDA", default_value_t = 0.02)]
    lambda: f64,
    /// Mapping attempts per II.
    #[clap(long = "MAPII", default_value_t = 10)]
    mapii: u32,
    /// Modulo scheduling attempts per outer attempt.
    #[clap(long = "MSA", default_value_t = 1000)]
    msa: u32,
    /// Start-node selection mode of the placer (only 0 is implemented).
    #[clap(long = "MAP_MODE", default_value_t = 0)]
    map_mode: u8,
    /// Seed of the mapper's PRNG; drawn from entropy when absent.
    #[clap(long)]
    seed: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_timed();

    let args = Cli::parse();
    let dir = args.node.parent().unwrap_or(Path::new("."));

    let (x, y) = match (args.x, args.y) {
        (Some(x), Some(y)) => (x, y),
        (x, y) => {
            let config = read_grid_config(dir)?;
            let default = CgraArch::default();
            (
                x.or(config.map(|c| c.0)).unwrap_or(default.x),
                y.or(config.map(|c| c.1)).unwrap_or(default.y),
            )
        }
    };

    let arch = CgraArch {
        x,
        y,
        reg_file_size: args.regs,
        ..Default::default()
    };
    let policy = MappingPolicy {
        max_ii: args.max_ii,
        max_mapping_attempts: args.max_map,
        attempts_per_ii: args.mapii,
        modulo_attempts: args.msa,
        lambda: args.lambda,
        mapping_mode: args.map_mode,
        enable_registers: args.regs > 0,
        ..Default::default()
    };

    info!(
        "mapping {} onto a {x}×{y} grid",
        args.node.display()
    );
    let mapping = compile_loop(&args.node, &args.edge, &arch, &policy, args.seed)?;
    info!("mapping complete at II {}", mapping.ii);
    debug!("final placement:\n{mapping}");
    debug!(
        "modulo schedule:\n{}",
        formatter::modulo_dot(&mapping.dfg, &mapping.modulo)
    );

    Ok(())
}
