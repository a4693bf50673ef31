// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cost model.
//!
//! A fixed set of cost functions, each identified by a stable id string;
//! the total cost of a solution is the weight-scaled sum over the
//! functions with non-zero weight. The per-function raw values are kept
//! on the solution so hosts can show the breakdown.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use pinplan_mcu::Mcu;

use crate::{AssignmentKind, Solution};

/// SWD/JTAG pins that are expensive to steal from a debugger.
pub const DEBUG_PINS: &[&str] = &["PA13", "PA14", "PA15", "PB3", "PB4"];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CostFn {
    PinCount,
    PortSpread,
    PeripheralCount,
    DebugPinPenalty,
    PinClustering,
    PinProximity,
}

impl CostFn {
    pub const ALL: [CostFn; 6] = [
        CostFn::PinCount,
        CostFn::PortSpread,
        CostFn::PeripheralCount,
        CostFn::DebugPinPenalty,
        CostFn::PinClustering,
        CostFn::PinProximity,
    ];

    pub fn id(self) -> &'static str {
        match self {
            CostFn::PinCount => "pin_count",
            CostFn::PortSpread => "port_spread",
            CostFn::PeripheralCount => "peripheral_count",
            CostFn::DebugPinPenalty => "debug_pin_penalty",
            CostFn::PinClustering => "pin_clustering",
            CostFn::PinProximity => "pin_proximity",
        }
    }

    pub fn compute(self, solution: &Solution, mcu: &Mcu) -> f64 {
        match self {
            CostFn::PinCount => solution.used_pins().len() as f64,
            CostFn::PortSpread => {
                let letters: BTreeSet<char> = solution
                    .used_pins()
                    .iter()
                    .filter_map(|p| gpio_letter_of(mcu, p))
                    .collect();
                letters.len() as f64
            }
            CostFn::PeripheralCount => {
                let instances: BTreeSet<&str> = solution
                    .port_instances
                    .values()
                    .flat_map(|s| s.iter().map(|i| i.as_str()))
                    .collect();
                instances.len() as f64
            }
            CostFn::DebugPinPenalty => {
                let used = solution.used_pins();
                10.0 * DEBUG_PINS.iter().filter(|p| used.contains(*p)).count() as f64
            }
            CostFn::PinClustering => pins_by_port(solution)
                .values()
                .map(|pins| {
                    let letters: BTreeSet<char> = pins
                        .iter()
                        .filter_map(|p| gpio_letter_of(mcu, p))
                        .collect();
                    letters.len().saturating_sub(1) as f64
                })
                .sum(),
            CostFn::PinProximity => pins_by_port(solution)
                .values()
                .map(|pins| {
                    let idx: Vec<usize> =
                        pins.iter().filter_map(|p| mcu.pin_index(p)).collect();
                    let mut sum = 0.0;
                    for i in 0..idx.len() {
                        for j in i + 1..idx.len() {
                            sum += mcu.pin_distance(idx[i], idx[j]);
                        }
                    }
                    sum
                })
                .sum(),
        }
    }
}

fn gpio_letter_of(mcu: &Mcu, pin: &str) -> Option<char> {
    mcu.pin_by_name(pin).and_then(|p| p.gpio_letter())
}

/// Distinct pins per logical port, across all combinations.
fn pins_by_port(solution: &Solution) -> BTreeMap<&str, BTreeSet<&str>> {
    let mut out: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for comb in &solution.combinations {
        for a in &comb.assignments {
            if a.kind == AssignmentKind::Variable {
                out.entry(a.port.as_str()).or_default().insert(a.pin.as_str());
            }
        }
    }
    out
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct CostWeights {
    pub pin_count: f64,
    pub port_spread: f64,
    pub peripheral_count: f64,
    pub debug_pin_penalty: f64,
    pub pin_clustering: f64,
    pub pin_proximity: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        CostWeights {
            pin_count: 1.0,
            port_spread: 1.0,
            peripheral_count: 1.0,
            debug_pin_penalty: 1.0,
            pin_clustering: 1.0,
            pin_proximity: 1.0,
        }
    }
}

impl CostWeights {
    pub fn weight(&self, f: CostFn) -> f64 {
        match f {
            CostFn::PinCount => self.pin_count,
            CostFn::PortSpread => self.port_spread,
            CostFn::PeripheralCount => self.peripheral_count,
            CostFn::DebugPinPenalty => self.debug_pin_penalty,
            CostFn::PinClustering => self.pin_clustering,
            CostFn::PinProximity => self.pin_proximity,
        }
    }
}

/// Fills `solution.costs` with the raw per-function values of the
/// enabled functions and sets the weighted total.
pub fn apply(solution: &mut Solution, mcu: &Mcu, weights: &CostWeights) {
    let mut costs = BTreeMap::new();
    let mut total = 0.0;
    for f in CostFn::ALL {
        let w = weights.weight(f);
        if w == 0.0 {
            continue;
        }
        let value = f.compute(solution, mcu);
        total += w * value;
        costs.insert(f.id().to_string(), value);
    }
    solution.costs = costs;
    solution.total_cost = total;
}
