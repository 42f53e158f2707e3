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

//! Description of the target CGRA and of the knobs that bound the mapping
//! search. Both structures are filled from the command line and validated
//! once, before the pipeline starts.

use crate::mapping::MapError;

/// The architecture of the target CGRA: an `x × y` toroidal grid of
/// processing elements with one shared address bus and one shared data bus
/// per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CgraArch {
    /// Number of rows.
    pub x: u32,
    /// Number of PEs per row.
    pub y: u32,
    /// Registers per PE register file.
    pub reg_file_size: u32,
    /// Maximum number of data operands a PE can receive in one cycle.
    pub max_in_degree: u32,
    /// Maximum number of consumers a PE output can feed in one cycle.
    pub max_out_degree: u32,
    /// Memory operations a single row can issue per cycle.
    pub per_row_mem: u32,
}

impl Default for CgraArch {
    fn default() -> Self {
        Self {
            x: 4,
            y: 4,
            reg_file_size: 4,
            max_in_degree: 2,
            max_out_degree: 5,
            per_row_mem: 1,
        }
    }
}

impl CgraArch {
    /// Total number of PEs in the grid.
    pub fn size(&self) -> u32 {
        self.x * self.y
    }

    /// Check the architecture parameters.
    pub fn validate(&self) -> Result<(), MapError> {
        if self.x == 0 {
            return Err(MapError::Config("X dimension must be at least 1".into()));
        }
        if self.y < 2 {
            return Err(MapError::Config("Y dimension must be at least 2".into()));
        }
        Ok(())
    }
}

/// Bounds and strategy knobs of the randomized mapping search.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MappingPolicy {
    /// Largest initiation interval to try before giving up.
    pub max_ii: i64,
    /// Upper bound on any feasible schedule length.
    pub max_latency: i64,
    /// Modulo-schedule attempts (including route insertion) per outer
    /// attempt before the II is incremented.
    pub modulo_attempts: u32,
    /// Placement restarts before a placement round is abandoned.
    pub max_mapping_attempts: u32,
    /// Mapping attempts per II.
    pub attempts_per_ii: u32,
    /// Fraction of the scheduling space explored per II; the number of
    /// outer attempts is `lambda · x · y · II · nodes`.
    pub lambda: f64,
    /// How the placer selects its start node (0 = uniformly random; modes
    /// 1-5 are reserved).
    pub mapping_mode: u8,
    /// Whether register-backed live values are allowed.
    pub enable_registers: bool,
}

impl Default for MappingPolicy {
    fn default() -> Self {
        Self {
            max_ii: 50,
            max_latency: 2000,
            modulo_attempts: 1000,
            max_mapping_attempts: 500,
            attempts_per_ii: 10,
            lambda: 0.02,
            mapping_mode: 0,
            enable_registers: true,
        }
    }
}

impl MappingPolicy {
    /// Check the policy parameters. Only mapping mode 0 (uniformly random
    /// start node) is implemented; the other modes of the CLI surface are
    /// reserved.
    pub fn validate(&self) -> Result<(), MapError> {
        if self.lambda > 1.0 || self.lambda <= 0.0 {
            return Err(MapError::Config(
                "LAMBDA is a fraction and must be in (0, 1]".into(),
            ));
        }
        if self.mapping_mode != 0 {
            return Err(MapError::Config(format!(
                "mapping mode {} is reserved, only mode 0 is implemented",
                self.mapping_mode
            )));
        }
        if self.max_ii < 1 {
            return Err(MapError::Config("MAX_II must be at least 1".into()));
        }
        Ok(())
    }

    /// Number of outer mapping attempts for one II, as the explored
    /// fraction of the scheduling space (at least one).
    pub fn attempts_for(&self, cgra_size: u32, ii: i64, nodes: usize) -> u64 {
        ((self.lambda * cgra_size as f64 * ii as f64 * nodes as f64).ceil() as u64).max(1)
    }
}
