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

//! The mapping pipeline: transform the DFG, compute the II lower bound,
//! modulo-schedule, insert routes, and place onto the time-extended grid,
//! retrying with an incremented II until everything fits or the bound is
//! exhausted.

use std::path::PathBuf;

use log::{debug, info};
use rand::Rng;
use thiserror::Error;

use crate::arch::{CgraArch, MappingPolicy};
use crate::dfg::{builder::LoopInput, transform, Dfg, NodeId};

pub mod grid;
pub mod placer;
pub mod routing;
pub mod schedule;
pub mod scheduler;

use grid::TimeGrid;
use schedule::{ModuloSchedule, Schedule};

/// Any error of the mapping pipeline.
#[derive(Debug, Error)]
pub enum MapError {
    /// A file could not be read or written.
    #[error("cannot access {path}: {source}")]
    Io {
        /// The offending path.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// An input file is malformed.
    #[error("{file}:{line}: {reason}")]
    Parse {
        /// The offending file.
        file: String,
        /// The offending line (1-based).
        line: usize,
        /// What went wrong.
        reason: String,
    },
    /// The CLI or architecture parameters are inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A node receives more operands than a PE can take.
    #[error("node {node} exceeds the maximum in-degree of {limit}")]
    InDegree {
        /// The offending node.
        node: NodeId,
        /// The configured limit.
        limit: u32,
    },
    /// A feasible schedule ran past the latency bound.
    #[error("node {node} cannot be scheduled within the latency bound")]
    ScheduleLength {
        /// The node that found no cycle.
        node: NodeId,
    },
    /// No mapping exists up to the configured maximum II.
    #[error("no mapping found up to the maximum II of {max_ii}")]
    IiExceeded {
        /// The configured bound.
        max_ii: i64,
    },
    /// An immediate does not fit its instruction field.
    #[error("immediate {value} of node {node} does not fit the instruction field")]
    ImmediateOverflow {
        /// The node carrying the immediate.
        node: NodeId,
        /// The value that overflows.
        value: i32,
    },
    /// A column needs more live-value registers than the PE register file
    /// holds.
    #[error("register file exhausted at column ({x}, {y})")]
    RegisterPressure {
        /// Row of the column.
        x: u32,
        /// Position of the column.
        y: u32,
    },
    /// A broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The result of mapping one loop: the routed DFG, its modulo schedule,
/// and the placement on the time-extended grid.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Mapping {
    /// The final DFG, with route nodes inserted and peers merged.
    pub dfg: Dfg,
    /// The successful modulo schedule (route nodes included).
    pub modulo: ModuloSchedule,
    /// The placement.
    pub grid: TimeGrid,
    /// The achieved initiation interval.
    pub ii: i64,
}

/// The II lower bound of one DFG: the largest of the recurrence bound, the
/// PE-count bound and the memory-bus bound.
fn mii_bounds(dfg: &Dfg, arch: &CgraArch) -> i64 {
    let rec = dfg.calculate_rec_mii();
    let res = div_ceil(dfg.node_count() as i64, arch.size() as i64);
    let mem = div_ceil(
        (dfg.load_op_count() + dfg.store_op_count()) as i64,
        arch.y as i64,
    );
    debug!("II bounds: recurrence {rec}, resources {res}, memory {mem}");
    rec.max(res).max(mem)
}

/// Ceiling division for nonnegative operands.
fn div_ceil(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

/// Map one loop onto the grid. Consumes the parsed input, reshapes the
/// DFG, and searches II by II for a schedule and placement.
pub fn map_loop(
    input: &LoopInput,
    arch: &CgraArch,
    policy: &MappingPolicy,
    rng: &mut impl Rng,
) -> Result<Mapping, MapError> {
    let mut dfg = input.dfg.clone();

    let split = dfg.can_split();
    if split {
        info!("dual-path DFG: eliding join phis and padding paths");
        transform::merge_join_phis(&mut dfg);
        transform::pad_paths(&mut dfg);
    }
    transform::preprocess(&mut dfg, arch.max_in_degree, arch.max_out_degree, rng)?;
    dfg.compute_cycles();

    // the II lower bound of a split DFG is judged per path projection
    let mii = if split {
        let (true_dfg, false_dfg) = dfg.split_paths();
        mii_bounds(&true_dfg, arch).max(mii_bounds(&false_dfg, arch))
    } else {
        mii_bounds(&dfg, arch)
    }
    .max(1);
    info!("starting the search at the minimum II of {mii}");

    // bounding schedules, computed once
    let (length, _) = scheduler::asap(&dfg)?;
    let _ = scheduler::alap(&dfg, length)?;
    let mut asap_feasible = Schedule::new(arch.x, arch.y);
    let length = scheduler::asap_feasible(&dfg, &mut asap_feasible, policy)?;
    let mut alap_feasible = Schedule::new(arch.x, arch.y);
    scheduler::alap_feasible(&dfg, length, &mut alap_feasible, &asap_feasible)?;
    debug!("feasible schedule length {length}");

    let sorted = scheduler::sorted_nodes(&dfg, &asap_feasible);

    let mut current_ii = mii;
    while current_ii <= policy.max_ii {
        let attempts = policy.attempts_for(arch.size(), current_ii, dfg.node_count());
        info!("mapping at II {current_ii} with {attempts} attempts");
        let mut modulo = ModuloSchedule::new(arch.x, arch.y, length);
        let mut ii_exhausted = false;

        for attempt in 0..attempts {
            debug!("attempt {attempt}/{attempts} at II {current_ii}");

            // modulo schedule until route insertion also goes through
            let mut routed: Option<Dfg> = None;
            for mod_attempt in 0..policy.modulo_attempts {
                if !scheduler::modulo(
                    &dfg,
                    &sorted,
                    current_ii,
                    &mut modulo,
                    &asap_feasible,
                    &alap_feasible,
                    rng,
                )? {
                    debug!("modulo attempt {mod_attempt} failed");
                    continue;
                }
                let mut route_dfg = dfg.clone();
                if routing::insert_routes(&mut route_dfg, &mut modulo)? {
                    routed = Some(route_dfg);
                    break;
                }
                debug!("route insertion failed, retrying the modulo schedule");
            }
            let Some(mut route_dfg) = routed else {
                ii_exhausted = true;
                break;
            };

            // nodes of the two paths feeding the same operand must share
            // their PE
            transform::merge_peers(&mut route_dfg);

            let mut grid = TimeGrid::new(arch.x, arch.y, current_ii);
            if placer::place(&route_dfg, &mut grid, &modulo, policy, rng)? {
                info!("mapping found at II {current_ii}");
                return Ok(Mapping {
                    dfg: route_dfg,
                    modulo,
                    grid,
                    ii: current_ii,
                });
            }
        }
        if ii_exhausted {
            info!("no modulo schedule at II {current_ii}, increasing");
        } else {
            info!("no placement at II {current_ii}, increasing");
        }
        current_ii += 1;
    }
    Err(MapError::IiExceeded {
        max_ii: policy.max_ii,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dfg::{DepKind, Node, OpKind, PathTag};
    use cgra_isa::Datatype;
    use rand::{rngs::StdRng, SeedableRng};

    /// Wrap a DFG into a loop input without split or IO.
    fn input(dfg: Dfg) -> LoopInput {
        LoopInput {
            dfg,
            control: crate::dfg::builder::LoopControl {
                loop_exit: None,
                exit_direction: false,
                split_branch: None,
            },
            io: Default::default(),
        }
    }

    /// Build a node with defaults for tests.
    fn node(id: NodeId, op: OpKind) -> Node {
        Node::new(id, op, Datatype::Int32, format!("n{id}"), PathTag::None, None)
    }

    #[test]
    fn accumulator_maps_at_ii_one() {
        // s ← s + 1 with a self-loop of distance 1
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        dfg.make_arc(1, 1, 1, DepKind::True, 0, PathTag::None);
        let input = input(dfg);

        let arch = CgraArch::default();
        let policy = MappingPolicy::default();
        let mut rng = StdRng::seed_from_u64(17);
        let mapping = map_loop(&input, &arch, &policy, &mut rng).unwrap();
        assert_eq!(mapping.ii, 1);
        assert!(mapping.grid.placed_pe(1).is_some());
    }

    #[test]
    fn chain_with_carried_arc_maps() {
        let mut dfg = Dfg::new();
        dfg.insert_node(node(1, OpKind::Add));
        dfg.insert_node(node(2, OpKind::Sub));
        dfg.make_arc(1, 2, 0, DepKind::True, 0, PathTag::None);
        dfg.make_arc(2, 1, 1, DepKind::True, 0, PathTag::None);
        let input = input(dfg);

        let arch = CgraArch::default();
        let policy = MappingPolicy::default();
        let mut rng = StdRng::seed_from_u64(23);
        let mapping = map_loop(&input, &arch, &policy, &mut rng).unwrap();
        // a two-node cycle with one unit of distance needs II 2
        assert_eq!(mapping.ii, 2);
        for arc in mapping.dfg.all_arcs() {
            let from = mapping.modulo.time(arc.from).unwrap();
            let to = mapping.modulo.time(arc.to).unwrap();
            assert!(from + mapping.dfg.node(arc.from).latency <= to + arc.distance * mapping.ii);
        }
    }

    #[test]
    fn ii_bound_exhaustion_reported() {
        // a recurrence of II 3 cannot map when MAX_II is 2
        let mut dfg = Dfg::new();
        for id in 1..=3 {
            dfg.insert_node(node(id, OpKind::Add));
        }
        dfg.make_arc(1, 2, 0, DepKind::True, 0, PathTag::None);
        dfg.make_arc(2, 3, 0, DepKind::True, 0, PathTag::None);
        dfg.make_arc(3, 1, 1, DepKind::True, 0, PathTag::None);
        let input = input(dfg);

        let arch = CgraArch::default();
        let policy = MappingPolicy {
            max_ii: 2,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(29);
        assert!(matches!(
            map_loop(&input, &arch, &policy, &mut rng),
            Err(MapError::IiExceeded { max_ii: 2 })
        ));
    }
}
