// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Canonical on-disk form of a solution.
//!
//! The archive flattens the per-combination structure into a sorted list
//! of unique `(port, channel, pin, signal, configuration)` rows plus the
//! port-peripheral sets and the cost breakdown. Ordering is canonical
//! (sorted rows, BTree maps), so serialize → deserialize → serialize
//! yields byte-identical output.
//!
//! Deserialization reconstructs the combinations: rows are grouped by
//! `(port, configuration)`, the Cartesian product of configurations is
//! taken across ports, and pinned rows are injected into every
//! combination. Reserved-pin markers are live-result metadata and are
//! not archived.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context as _, Result};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use pinplan_mcu::decompose_signal;

use crate::{Assignment, AssignmentKind, Combination, Solution, PINNED_SENTINEL};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AssignmentDoc {
    pub port: String,
    pub channel: String,
    pub pin: String,
    pub signal: String,
    pub configuration: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SolutionDoc {
    pub assignments: Vec<AssignmentDoc>,
    pub port_peripherals: BTreeMap<String, BTreeSet<String>>,
    pub costs: BTreeMap<String, f64>,
    pub total_cost: f64,
}

pub fn to_doc(solution: &Solution) -> SolutionDoc {
    let mut rows: Vec<AssignmentDoc> = Vec::new();
    for comb in &solution.combinations {
        for a in &comb.assignments {
            match a.kind {
                AssignmentKind::Variable => rows.push(AssignmentDoc {
                    port: a.port.clone(),
                    channel: a.channel.clone(),
                    pin: a.pin.clone(),
                    signal: a.signal.clone(),
                    configuration: a.config.clone(),
                }),
                AssignmentKind::Pinned => rows.push(AssignmentDoc {
                    port: PINNED_SENTINEL.to_string(),
                    channel: PINNED_SENTINEL.to_string(),
                    pin: a.pin.clone(),
                    signal: a.signal.clone(),
                    configuration: PINNED_SENTINEL.to_string(),
                }),
                AssignmentKind::Reserved => {}
            }
        }
    }
    rows.sort();
    rows.dedup();
    SolutionDoc {
        assignments: rows,
        port_peripherals: solution.port_instances.clone(),
        costs: solution.costs.clone(),
        total_cost: solution.total_cost,
    }
}

pub fn to_bytes(solution: &Solution) -> Vec<u8> {
    serde_json::to_vec(&to_doc(solution)).expect("solution serialization cannot fail")
}

pub fn from_bytes(bytes: &[u8]) -> Result<Solution> {
    let doc: SolutionDoc =
        serde_json::from_slice(bytes).context("failed to decode solution archive")?;
    Ok(from_doc(doc))
}

pub fn from_doc(doc: SolutionDoc) -> Solution {
    let mut pinned: Vec<Assignment> = Vec::new();
    // port -> configuration -> rows, in row (sorted) order.
    let mut per_port: IndexMap<String, IndexMap<String, Vec<AssignmentDoc>>> = IndexMap::new();
    for row in doc.assignments {
        if row.port == PINNED_SENTINEL {
            pinned.push(Assignment {
                kind: AssignmentKind::Pinned,
                port: PINNED_SENTINEL.to_string(),
                channel: PINNED_SENTINEL.to_string(),
                pin: row.pin,
                instance: instance_of(&row.signal),
                signal: row.signal,
                config: PINNED_SENTINEL.to_string(),
            });
        } else {
            per_port
                .entry(row.port.clone())
                .or_default()
                .entry(row.configuration.clone())
                .or_default()
                .push(row);
        }
    }

    let combinations: Vec<Combination> = if per_port.is_empty() {
        vec![Combination {
            configs: IndexMap::new(),
            assignments: pinned.clone(),
        }]
    } else {
        per_port
            .iter()
            .map(|(port, configs)| {
                configs
                    .keys()
                    .map(|cfg| (port.clone(), cfg.clone()))
                    .collect::<Vec<_>>()
            })
            .multi_cartesian_product()
            .map(|choice| {
                let mut configs = IndexMap::new();
                let mut assignments = Vec::new();
                for (port, cfg) in &choice {
                    configs.insert(port.clone(), cfg.clone());
                    for row in &per_port[port][cfg] {
                        assignments.push(Assignment {
                            kind: AssignmentKind::Variable,
                            port: row.port.clone(),
                            channel: row.channel.clone(),
                            pin: row.pin.clone(),
                            instance: instance_of(&row.signal),
                            signal: row.signal.clone(),
                            config: row.configuration.clone(),
                        });
                    }
                }
                assignments.extend(pinned.iter().cloned());
                Combination {
                    configs,
                    assignments,
                }
            })
            .collect()
    };

    Solution {
        id: 0,
        solver: None,
        combinations,
        port_instances: doc.port_peripherals,
        costs: doc.costs,
        total_cost: doc.total_cost,
    }
}

fn instance_of(signal: &str) -> String {
    decompose_signal(signal)
        .first()
        .map(|s| s.instance.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(port: &str, channel: &str, pin: &str, signal: &str, cfg: &str) -> AssignmentDoc {
        AssignmentDoc {
            port: port.to_string(),
            channel: channel.to_string(),
            pin: pin.to_string(),
            signal: signal.to_string(),
            configuration: cfg.to_string(),
        }
    }

    fn doc(rows: Vec<AssignmentDoc>) -> SolutionDoc {
        SolutionDoc {
            assignments: rows,
            port_peripherals: BTreeMap::new(),
            costs: BTreeMap::new(),
            total_cost: 0.0,
        }
    }

    #[test]
    fn round_trip_is_byte_stable() {
        let doc = doc(vec![
            row("CMD", "TX", "PA9", "USART1_TX", "U"),
            row("CMD", "RX", "PA10", "USART1_RX", "U"),
            row("<pinned>", "<pinned>", "PA4", "DAC1_OUT1", "<pinned>"),
        ]);
        let sol = from_doc(doc);
        let bytes = to_bytes(&sol);
        let again = from_bytes(&bytes).unwrap();
        assert_eq!(to_bytes(&again), bytes);
    }

    #[test]
    fn pinned_rows_injected_into_every_combination() {
        let doc = doc(vec![
            row("P", "a", "PA0", "TIM2_CH1", "c1"),
            row("P", "a", "PA1", "TIM2_CH2", "c2"),
            row("<pinned>", "<pinned>", "PA4", "DAC1_OUT1", "<pinned>"),
        ]);
        let sol = from_doc(doc);
        // Two configs of one port: two combinations.
        assert_eq!(sol.combinations.len(), 2);
        for comb in &sol.combinations {
            assert!(comb
                .assignments
                .iter()
                .any(|a| a.kind == AssignmentKind::Pinned && a.pin == "PA4"));
        }
    }

    #[test]
    fn pinned_only_archive_reconstructs_one_combination() {
        let doc = doc(vec![row(
            "<pinned>",
            "<pinned>",
            "PA4",
            "DAC1_OUT1",
            "<pinned>",
        )]);
        let sol = from_doc(doc);
        assert_eq!(sol.combinations.len(), 1);
        assert!(sol.combinations[0].configs.is_empty());
        assert_eq!(sol.combinations[0].assignments.len(), 1);
        assert_eq!(
            sol.combinations[0].assignments[0].instance,
            "DAC1".to_string()
        );
    }

    #[test]
    fn config_product_spans_ports() {
        let doc = doc(vec![
            row("P", "a", "PA0", "TIM2_CH1", "c1"),
            row("P", "a", "PA1", "TIM2_CH2", "c2"),
            row("Q", "b", "PA2", "USART2_TX", "d"),
        ]);
        let sol = from_doc(doc);
        assert_eq!(sol.combinations.len(), 2);
        for comb in &sol.combinations {
            assert_eq!(comb.configs["Q"], "d");
            assert!(comb.configs.contains_key("P"));
        }
    }

    fn row_strategy() -> impl Strategy<Value = AssignmentDoc> {
        (
            "[AB]",
            "[xy]",
            "P[AB][0-9]",
            prop_oneof![
                Just("USART1_TX".to_string()),
                Just("TIM2_CH1".to_string()),
                Just("DAC1_OUT1".to_string()),
            ],
            "c[12]",
        )
            .prop_map(|(port, channel, pin, signal, configuration)| AssignmentDoc {
                port,
                channel,
                pin,
                signal,
                configuration,
            })
    }

    proptest! {
        // Canonicalizing any archive once through the model must be a
        // fixed point of serialize → deserialize → serialize.
        #[test]
        fn serialization_is_a_fixed_point(
            rows in proptest::collection::vec(row_strategy(), 0..12),
            total in 0.0f64..1000.0,
        ) {
            let doc = SolutionDoc {
                assignments: rows,
                port_peripherals: BTreeMap::new(),
                costs: BTreeMap::new(),
                total_cost: total,
            };
            let sol = from_doc(doc);
            let bytes = to_bytes(&sol);
            let again = from_bytes(&bytes).unwrap();
            prop_assert_eq!(to_bytes(&again), bytes);
        }
    }
}
