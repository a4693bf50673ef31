// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Constraint-solving core for microcontroller pin assignment.
//!
//! Given a parsed constraint program and an [`Mcu`] description, a solve
//! enumerates assignments of pins to port channels, checks them against
//! `require` expressions and the exclusivity rules, ranks the survivors
//! by cost, and returns them with accumulated diagnostics and counters.
//!
//! The entry point is [`solve`]; hosts that run several strategies in
//! parallel combine their results with [`merge::merge_results`]. Each
//! solve is single-threaded and owns all of its mutable state, so callers
//! are free to run solves concurrently on clones of the inputs.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::Deserialize;

use pinplan_lang::ast::Program;
use pinplan_lang::diag::{Diag, Loc, Severity};
use pinplan_lang::Sink;
use pinplan_mcu::Mcu;

pub mod archive;
pub mod context;
pub mod cost;
pub mod merge;
pub mod require;
pub mod search;
pub mod strategies;
pub mod tracker;

pub use cost::CostWeights;

/// Sentinel used on entries produced by `pin` declarations.
pub const PINNED_SENTINEL: &str = "<pinned>";
/// Sentinel used on reserved-pin markers in live results.
pub const RESERVED_SENTINEL: &str = "<reserved>";

/// Caller-supplied solve parameters, deserializable from a TOML file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct SolveOptions {
    pub max_solutions: usize,
    pub timeout_ms: u64,
    pub cost_weights: CostWeights,
    /// Restart count for the random-restart strategy.
    pub num_restarts: usize,
    /// Phase-1 instance-group cap for the two-phase strategies.
    pub max_groups: usize,
    pub max_solutions_per_group: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        SolveOptions {
            max_solutions: 20,
            timeout_ms: 5_000,
            cost_weights: CostWeights::default(),
            num_restarts: 4,
            max_groups: 10,
            max_solutions_per_group: 5,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    Backtracking,
    ForwardChecking,
    DynamicMrv,
    RandomRestart,
    CostGuided,
    TwoPhase,
    DiverseInstances,
}

impl Strategy {
    pub const ALL: [Strategy; 7] = [
        Strategy::Backtracking,
        Strategy::ForwardChecking,
        Strategy::DynamicMrv,
        Strategy::RandomRestart,
        Strategy::CostGuided,
        Strategy::TwoPhase,
        Strategy::DiverseInstances,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Strategy::Backtracking => "backtracking",
            Strategy::ForwardChecking => "forward-checking",
            Strategy::DynamicMrv => "dynamic-mrv",
            Strategy::RandomRestart => "random-restart",
            Strategy::CostGuided => "cost-guided",
            Strategy::TwoPhase => "two-phase",
            Strategy::DiverseInstances => "diverse-instances",
        }
    }

    pub fn from_id(s: &str) -> Option<Strategy> {
        Strategy::ALL.into_iter().find(|st| st.id() == s)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssignmentKind {
    Variable,
    Pinned,
    Reserved,
}

/// One routed signal in one combination.
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub kind: AssignmentKind,
    pub port: String,
    pub channel: String,
    pub pin: String,
    pub signal: String,
    pub config: String,
    pub instance: String,
}

/// One choice of configuration per port, with its assignment list.
#[derive(Clone, Debug)]
pub struct Combination {
    pub configs: IndexMap<String, String>,
    pub assignments: Vec<Assignment>,
}

#[derive(Clone, Debug)]
pub struct Solution {
    pub id: usize,
    /// Strategy id, attached by the result merger.
    pub solver: Option<String>,
    pub combinations: Vec<Combination>,
    pub port_instances: BTreeMap<String, BTreeSet<String>>,
    pub costs: BTreeMap<String, f64>,
    pub total_cost: f64,
}

impl Solution {
    /// Canonical identity of the routed assignment, independent of
    /// solver, ordering, and cost. Pinned and reserved markers are the
    /// same on every solution and are left out.
    pub fn fingerprint(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for comb in &self.combinations {
            for a in &comb.assignments {
                if a.kind == AssignmentKind::Variable {
                    parts.push(format!(
                        "{}/{}/{}/{}/{}",
                        a.port, a.config, a.channel, a.pin, a.signal
                    ));
                }
            }
        }
        parts.sort();
        parts.dedup();
        parts.join("|")
    }

    /// All distinct pin names used by port channels.
    pub fn used_pins(&self) -> BTreeSet<&str> {
        self.combinations
            .iter()
            .flat_map(|c| c.assignments.iter())
            .filter(|a| a.kind == AssignmentKind::Variable)
            .map(|a| a.pin.as_str())
            .collect()
    }
}

#[derive(Clone, Debug, Default, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Statistics {
    /// Size of the raw search space: product of initial domain sizes.
    pub total_combinations: u64,
    /// Config-combination evaluations performed during search.
    pub evaluated_combinations: u64,
    /// Assignments accepted before ranking and dedup.
    pub valid_solutions: u64,
    pub solve_time_ms: u64,
    /// Size of the config-combination product.
    pub config_combinations: u64,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub per_solver: IndexMap<String, Statistics>,
}

#[derive(Clone, Debug)]
pub struct SolverError {
    pub severity: Severity,
    pub message: String,
    pub source_tag: Option<String>,
    pub loc: Option<Loc>,
    /// Deepest partial assignment, attached to "no solution" reports.
    pub partial_solution: Option<Vec<Assignment>>,
}

impl From<Diag> for SolverError {
    fn from(d: Diag) -> Self {
        SolverError {
            severity: d.severity,
            message: d.message,
            source_tag: None,
            loc: d.loc,
            partial_solution: None,
        }
    }
}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{}: {}: {}", loc, self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SolveResult {
    pub mcu_ref: String,
    pub solutions: Vec<Solution>,
    pub errors: Vec<SolverError>,
    pub statistics: Statistics,
}

impl SolveResult {
    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Error)
    }
}

/// Runs one strategy to completion (or deadline) and returns ranked,
/// deduplicated solutions together with diagnostics and counters.
pub fn solve(
    program: &Program,
    mcu: &Mcu,
    options: &SolveOptions,
    strategy: Strategy,
) -> SolveResult {
    let start = Instant::now();
    let mut sink = Sink::new();
    let ctx = context::Context::prepare(program, mcu, &mut sink);
    let mut errors: Vec<SolverError> = sink.into_diags().into_iter().map(Into::into).collect();

    let Some(ctx) = ctx else {
        return SolveResult {
            mcu_ref: mcu.reference.clone(),
            solutions: Vec::new(),
            errors,
            statistics: Statistics {
                solve_time_ms: start.elapsed().as_millis() as u64,
                ..Statistics::default()
            },
        };
    };

    let mut statistics = Statistics {
        total_combinations: ctx.total_space,
        config_combinations: ctx.combos.len() as u64,
        ..Statistics::default()
    };

    if ctx.variables.is_empty() {
        errors.push(SolverError {
            severity: Severity::Warning,
            message: "constraint program declares no variables; nothing to solve".to_string(),
            source_tag: Some(strategy.id().to_string()),
            loc: None,
            partial_solution: None,
        });
        statistics.solve_time_ms = start.elapsed().as_millis() as u64;
        return SolveResult {
            mcu_ref: mcu.reference.clone(),
            solutions: Vec::new(),
            errors,
            statistics,
        };
    }

    let limits = search::Limits {
        deadline: start + Duration::from_millis(options.timeout_ms),
        max_solutions: options.max_solutions,
    };
    let mut out = search::SearchOutcome::default();
    match strategy {
        Strategy::Backtracking => strategies::backtrack::run(&ctx, limits, &mut out),
        Strategy::ForwardChecking => strategies::forward::run(&ctx, limits, &mut out),
        Strategy::DynamicMrv => strategies::dynamic::run(&ctx, limits, &mut out),
        Strategy::RandomRestart => {
            strategies::restart::run(&ctx, options.num_restarts, limits, &mut out)
        }
        Strategy::CostGuided => {
            strategies::cost_guided::run(&ctx, &options.cost_weights, limits, &mut out)
        }
        Strategy::TwoPhase => strategies::two_phase::run(
            &ctx,
            options.max_groups,
            options.max_solutions_per_group,
            limits,
            &mut out,
        ),
        Strategy::DiverseInstances => strategies::diverse::run(
            &ctx,
            options.max_groups,
            options.max_solutions_per_group,
            limits,
            &mut out,
        ),
    }

    statistics.evaluated_combinations = out.evaluated_combinations;
    statistics.valid_solutions = out.solutions.len() as u64;

    let mut solutions = out.solutions;
    for s in &mut solutions {
        cost::apply(s, mcu, &options.cost_weights);
    }
    solutions.sort_by(|a, b| a.total_cost.total_cmp(&b.total_cost));
    let mut solutions = merge::dedup_solutions(solutions);
    solutions.truncate(options.max_solutions);
    for (i, s) in solutions.iter_mut().enumerate() {
        s.id = i + 1;
    }

    if out.timed_out {
        errors.push(SolverError {
            severity: Severity::Warning,
            message: format!("solve timed out after {} ms", options.timeout_ms),
            source_tag: Some(strategy.id().to_string()),
            loc: None,
            partial_solution: None,
        });
    } else if out.hit_max {
        errors.push(SolverError {
            severity: Severity::Warning,
            message: format!(
                "stopped after reaching the solution cap of {}",
                options.max_solutions
            ),
            source_tag: Some(strategy.id().to_string()),
            loc: None,
            partial_solution: None,
        });
    }
    if solutions.is_empty() && !out.timed_out {
        let partial = partial_assignments(&ctx, &out.deepest);
        let detail = match out.deepest_var {
            Some(v) => {
                let var = &ctx.variables[v];
                let port = &ctx.ports[var.port];
                format!(
                    "; first unresolvable: {}.{} in config \"{}\" ({} conflicting candidate(s))",
                    port.name,
                    port.channels[var.channel],
                    port.configs[var.config].name,
                    out.deepest_candidates
                )
            }
            None => String::new(),
        };
        errors.push(SolverError {
            severity: Severity::Warning,
            message: format!(
                "no solution found; deepest search state assigned {} of {} variable(s){}",
                out.deepest.len(),
                ctx.variables.len(),
                detail
            ),
            source_tag: Some(strategy.id().to_string()),
            loc: None,
            partial_solution: (!partial.is_empty()).then_some(partial),
        });
    }

    statistics.solve_time_ms = start.elapsed().as_millis() as u64;
    SolveResult {
        mcu_ref: mcu.reference.clone(),
        solutions,
        errors,
        statistics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::collections::{HashMap, HashSet};

    fn mcu() -> Mcu {
        Mcu::from_json(
            br#"{
                "reference": "STM32F103C8",
                "package": "LQFP48",
                "pins": [
                    {"position": "10", "name": "PA0",  "kind": "io", "signals": ["ADC1_IN0", "TIM2_CH1"]},
                    {"position": "11", "name": "PA1",  "kind": "io", "signals": ["ADC1_IN1", "TIM2_CH2"]},
                    {"position": "12", "name": "PA2",  "kind": "io", "signals": ["USART2_TX", "ADC1_IN2", "TIM2_CH3"]},
                    {"position": "13", "name": "PA3",  "kind": "io", "signals": ["USART2_RX", "ADC1_IN3", "TIM2_CH4"]},
                    {"position": "14", "name": "PA4",  "kind": "io", "signals": ["DAC1_OUT1", "SPI1_NSS"]},
                    {"position": "15", "name": "PA5",  "kind": "io", "signals": ["SPI1_SCK", "ADC2_IN5"]},
                    {"position": "16", "name": "PA6",  "kind": "io", "signals": ["SPI1_MISO", "TIM3_CH1"]},
                    {"position": "17", "name": "PA7",  "kind": "io", "signals": ["SPI1_MOSI", "TIM3_CH2"]},
                    {"position": "30", "name": "PA9",  "kind": "io", "signals": ["USART1_TX", "TIM1_CH2"]},
                    {"position": "31", "name": "PA10", "kind": "io", "signals": ["USART1_RX", "TIM1_CH3"]},
                    {"position": "34", "name": "PA13", "kind": "io", "signals": ["SYS_JTMS-SWDIO"]},
                    {"position": "37", "name": "PA14", "kind": "io", "signals": ["SYS_JTCK-SWCLK"]},
                    {"position": "18", "name": "PB0",  "kind": "io", "signals": ["ADC1_IN8", "TIM3_CH3"]},
                    {"position": "26", "name": "PB13", "kind": "io", "signals": ["SPI2_SCK"]},
                    {"position": "27", "name": "PB14", "kind": "io", "signals": ["SPI2_MISO"]},
                    {"position": "28", "name": "PB15", "kind": "io", "signals": ["SPI2_MOSI"]},
                    {"position": "39", "name": "PB3",  "kind": "io", "signals": ["SPI3_SCK", "SYS_JTDO-TRACESWO"]},
                    {"position": "40", "name": "PB4",  "kind": "io", "signals": ["SPI3_MISO"]},
                    {"position": "41", "name": "PB5",  "kind": "io", "signals": ["SPI3_MOSI"]},
                    {"position": "45", "name": "PB8",  "kind": "io", "signals": ["TIM4_CH3"]},
                    {"position": "1",  "name": "VBAT", "kind": "power"}
                ]
            }"#,
        )
        .unwrap()
    }

    fn parse_program(src: &str) -> Program {
        let mut sink = Sink::new();
        let program = pinplan_lang::parse(src, &mut sink);
        assert!(!sink.has_errors(), "parse errors: {:?}", sink.diags());
        program
    }

    fn run(src: &str, strategy: Strategy) -> SolveResult {
        run_with(src, strategy, &SolveOptions::default())
    }

    fn run_with(src: &str, strategy: Strategy, options: &SolveOptions) -> SolveResult {
        solve(&parse_program(src), &mcu(), options, strategy)
    }

    fn fingerprints(result: &SolveResult) -> HashSet<String> {
        result.solutions.iter().map(|s| s.fingerprint()).collect()
    }

    /// The invariants every strategy's solutions must satisfy.
    fn assert_invariants(
        result: &SolveResult,
        mcu: &Mcu,
        reserved: &[&str],
        pinned: &[(&str, &str)],
        shared: &[&str],
    ) {
        for sol in &result.solutions {
            let mut pin_port: HashMap<&str, &str> = HashMap::new();
            let mut pin_channel: HashMap<(&str, &str), &str> = HashMap::new();
            let mut inst_port: HashMap<&str, &str> = HashMap::new();
            for comb in &sol.combinations {
                let mut config_pins: HashMap<(&str, &str), HashSet<&str>> = HashMap::new();
                for a in &comb.assignments {
                    if a.kind != AssignmentKind::Variable {
                        continue;
                    }
                    let pin = mcu.pin_by_name(&a.pin).expect("assigned pin must exist");
                    assert!(pin.is_assignable(), "{} is not assignable", a.pin);
                    assert!(
                        pin.signals.iter().any(|s| s.name == a.signal),
                        "{} does not carry {}",
                        a.pin,
                        a.signal
                    );
                    assert!(
                        config_pins
                            .entry((a.port.as_str(), a.config.as_str()))
                            .or_default()
                            .insert(a.pin.as_str()),
                        "pin {} used twice within {}/{}",
                        a.pin,
                        a.port,
                        a.config
                    );
                    if let Some(prev) = pin_port.insert(a.pin.as_str(), a.port.as_str()) {
                        assert_eq!(prev, a.port.as_str(), "pin {} crosses ports", a.pin);
                    }
                    if let Some(prev) =
                        pin_channel.insert((a.port.as_str(), a.pin.as_str()), a.channel.as_str())
                    {
                        assert_eq!(prev, a.channel.as_str(), "pin {} crosses channels", a.pin);
                    }
                    assert!(
                        !reserved.contains(&a.pin.as_str()),
                        "reserved pin {} was assigned",
                        a.pin
                    );
                    if !shared.contains(&a.instance.as_str()) {
                        if let Some(prev) =
                            inst_port.insert(a.instance.as_str(), a.port.as_str())
                        {
                            assert_eq!(
                                prev,
                                a.port.as_str(),
                                "instance {} crosses ports",
                                a.instance
                            );
                        }
                    }
                }
                for (p, s) in pinned {
                    assert!(
                        comb.assignments
                            .iter()
                            .any(|a| a.kind == AssignmentKind::Pinned
                                && a.pin == *p
                                && a.signal == *s),
                        "pinned ({}, {}) missing from a combination",
                        p,
                        s
                    );
                }
            }
            assert_eq!(
                sol.costs.get("pin_count").copied(),
                Some(sol.used_pins().len() as f64)
            );
            let distinct: HashSet<&String> = sol.port_instances.values().flatten().collect();
            assert_eq!(
                sol.costs.get("peripheral_count").copied(),
                Some(distinct.len() as f64)
            );
        }
    }

    const E1_UART: &str = indoc! {r#"
        port CMD:
            channel TX
            channel RX
            config "U":
                TX = USART*_TX
                RX = USART*_RX
                require same_instance(TX, RX)
    "#};

    #[test]
    fn e1_uart_full_duplex_every_strategy() {
        let mcu = mcu();
        for strategy in Strategy::ALL {
            let result = run(E1_UART, strategy);
            assert!(
                result.solutions.len() >= 2,
                "{} found {} solutions",
                strategy,
                result.solutions.len()
            );
            for sol in &result.solutions {
                let insts = &sol.port_instances["CMD"];
                assert_eq!(insts.len(), 1, "{}: instances crossed: {:?}", strategy, insts);
            }
            assert_invariants(&result, &mcu, &[], &[], &[]);
        }
    }

    #[test]
    fn e1_all_strategies_agree_on_fingerprints() {
        let baseline = fingerprints(&run(E1_UART, Strategy::Backtracking));
        assert_eq!(baseline.len(), 2);
        for strategy in Strategy::ALL {
            assert_eq!(
                fingerprints(&run(E1_UART, strategy)),
                baseline,
                "{} disagrees with baseline",
                strategy
            );
        }
    }

    #[test]
    fn e2_reserved_pin_removes_group() {
        let src = indoc! {r#"
            reserve: PA9
            port CMD:
                channel TX
                channel RX
                config "U":
                    TX = USART*_TX
                    RX = USART*_RX
                    require same_instance(TX, RX)
        "#};
        for strategy in Strategy::ALL {
            let result = run(src, strategy);
            assert_eq!(result.solutions.len(), 1, "{}", strategy);
            let insts = &result.solutions[0].port_instances["CMD"];
            assert!(insts.contains("USART2"));
            assert_invariants(&result, &mcu(), &["PA9"], &[], &[]);
        }
    }

    #[test]
    fn e3_pinned_dac_in_every_combination() {
        let src = indoc! {r#"
            pin PA4 = DAC1_OUT1
            port CMD:
                channel TX
                channel RX
                config "U":
                    TX = USART*_TX
                    RX = USART*_RX
                    require same_instance(TX, RX)
        "#};
        for strategy in Strategy::ALL {
            let result = run(src, strategy);
            assert!(!result.solutions.is_empty());
            assert_invariants(&result, &mcu(), &["PA4"], &[("PA4", "DAC1_OUT1")], &[]);
        }
    }

    #[test]
    fn e4_shared_adc_allows_one_instance_in_two_ports() {
        let without = indoc! {r#"
            port SENSE:
                channel V
                config "a":
                    V = ADC*_IN[0-3]
            port MONITOR:
                channel V
                config "a":
                    V = ADC*_IN[0-3]
        "#};
        // Only ADC1 carries IN0..IN3; without `shared` the two ports
        // cannot both have it.
        let result = run(without, Strategy::Backtracking);
        assert!(result.solutions.is_empty());
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("no solution")));

        let with = format!("shared: ADC*\n{}", without);
        for strategy in Strategy::ALL {
            let result = run(&with, strategy);
            assert!(!result.solutions.is_empty(), "{}", strategy);
            let sol = &result.solutions[0];
            assert!(sol.port_instances["SENSE"].contains("ADC1"));
            assert!(sol.port_instances["MONITOR"].contains("ADC1"));
            assert_invariants(&result, &mcu(), &[], &[], &["ADC1"]);
        }
    }

    #[test]
    fn e5_multi_pin_channel_takes_two_pins() {
        let src = indoc! {r#"
            port FLASH:
                channel MOSI
                config "s":
                    MOSI = SPI*_MOSI & GPIO[1-2]_*
        "#};
        for strategy in Strategy::ALL {
            let result = run(src, strategy);
            assert!(!result.solutions.is_empty(), "{}", strategy);
            for sol in &result.solutions {
                for comb in &sol.combinations {
                    let mosi_pins: HashSet<&str> = comb
                        .assignments
                        .iter()
                        .filter(|a| a.kind == AssignmentKind::Variable && a.channel == "MOSI")
                        .map(|a| a.pin.as_str())
                        .collect();
                    assert_eq!(mosi_pins.len(), 2, "{}", strategy);
                }
            }
            assert_invariants(&result, &mcu(), &[], &[], &[]);
        }
    }

    #[test]
    fn e6_debug_pin_penalty_orders_solutions() {
        let src = indoc! {r#"
            port LED:
                channel L @ PA13, PB8
                config "l":
                    L = IN
        "#};
        let result = run(src, Strategy::Backtracking);
        assert_eq!(result.solutions.len(), 2);
        let first = &result.solutions[0];
        let second = &result.solutions[1];
        assert!(first.used_pins().contains("PB8"));
        assert!(second.used_pins().contains("PA13"));
        assert!(first.total_cost < second.total_cost);
        assert_eq!(first.costs["debug_pin_penalty"], 0.0);
        assert_eq!(second.costs["debug_pin_penalty"], 10.0);
    }

    #[test]
    fn empty_program_warns_and_solves_nothing() {
        let result = run("", Strategy::Backtracking);
        assert!(result.solutions.is_empty());
        assert!(!result.has_errors());
        assert!(result
            .errors
            .iter()
            .any(|e| e.severity == Severity::Warning && e.message.contains("no variables")));
    }

    #[test]
    fn singleton_domains_yield_exactly_one_solution() {
        let src = indoc! {r#"
            port CMD:
                channel TX
                channel RX
                config "U":
                    TX = USART1_TX
                    RX = USART1_RX
        "#};
        for strategy in Strategy::ALL {
            let result = run(src, strategy);
            assert_eq!(result.solutions.len(), 1, "{}", strategy);
            assert_eq!(result.statistics.total_combinations, 1);
        }
    }

    #[test]
    fn empty_domain_reports_pattern_text() {
        let src = indoc! {r#"
            port CMD:
                channel TX
                config "U":
                    TX = USART9_TX | UART9_TX
        "#};
        let result = run(src, Strategy::Backtracking);
        assert!(result.has_errors());
        assert!(result.solutions.is_empty());
        let msg = &result.errors[0].message;
        assert!(msg.contains("USART9_TX | UART9_TX"), "got: {}", msg);
        assert!(msg.contains("CMD.TX"));
        assert!(msg.contains("\"U\""));
    }

    #[test]
    fn zero_deadline_times_out_empty() {
        let options = SolveOptions {
            timeout_ms: 0,
            ..SolveOptions::default()
        };
        for strategy in Strategy::ALL {
            let result = run_with(E1_UART, strategy, &options);
            assert!(result.solutions.is_empty(), "{}", strategy);
            assert!(
                result.errors.iter().any(|e| e.message.contains("timed out")),
                "{}",
                strategy
            );
        }
    }

    #[test]
    fn max_solutions_cap_warns() {
        let options = SolveOptions {
            max_solutions: 1,
            ..SolveOptions::default()
        };
        let result = run_with(E1_UART, Strategy::Backtracking, &options);
        assert_eq!(result.solutions.len(), 1);
        assert!(result.errors.iter().any(|e| e.message.contains("cap")));
    }

    #[test]
    fn vacuous_same_instance_is_true() {
        // The "CAN" filter drops every assignment, so the instance set is
        // empty and the require passes vacuously.
        let src = indoc! {r#"
            port CMD:
                channel TX
                channel RX
                config "U":
                    TX = USART1_TX
                    RX = USART1_RX
                    require same_instance(TX, RX, "CAN")
        "#};
        let result = run(src, Strategy::Backtracking);
        assert_eq!(result.solutions.len(), 1);
    }

    #[test]
    fn type_filter_narrows_instance_query() {
        let src = indoc! {r#"
            port CMD:
                channel TX
                channel RX
                config "U":
                    TX = USART*_TX
                    RX = USART*_RX
                    require same_instance(TX, RX)
                    require instance(TX, "USART") == "USART2"
        "#};
        let result = run(src, Strategy::Backtracking);
        assert_eq!(result.solutions.len(), 1);
        assert!(result.solutions[0].port_instances["CMD"].contains("USART2"));
    }

    #[test]
    fn gpio_port_and_pin_queries() {
        let src = indoc! {r#"
            port LED:
                channel L
                config "l":
                    L = IN
                    require gpio_port(L) == "GPIO2"
                    require gpio_pin(L) != "PB3"
        "#};
        let result = run(src, Strategy::Backtracking);
        assert!(!result.solutions.is_empty());
        for sol in &result.solutions {
            for pin in sol.used_pins() {
                assert!(pin.starts_with("PB"), "expected a PB pin, got {}", pin);
                assert_ne!(pin, "PB3");
            }
        }
    }

    #[test]
    fn diff_instance_forces_two_timers() {
        let src = indoc! {r#"
            port PWM:
                channel A
                channel B
                config "t":
                    A = TIM*_CH1
                    B = TIM*_CH1
                    require diff_instance(A, B)
        "#};
        let result = run(src, Strategy::Backtracking);
        assert!(!result.solutions.is_empty());
        for sol in &result.solutions {
            assert_eq!(sol.port_instances["PWM"].len(), 2);
        }
    }

    #[test]
    fn cross_port_require_is_honored() {
        let src = indoc! {r#"
            port CMD:
                channel TX
                channel RX
                config "U":
                    TX = USART*_TX
                    RX = USART*_RX
                    require same_instance(TX, RX)
            port AUX:
                channel T
                config "a":
                    T = TIM2_CH1 | TIM3_CH3
                    require gpio_port(T) != gpio_port(CMD.TX)
        "#};
        for strategy in Strategy::ALL {
            let result = run(src, strategy);
            // TIM2_CH1 is PA0, TIM3_CH3 is PB0; CMD always lands on
            // GPIO1, so only the PB0 alternative survives.
            assert!(!result.solutions.is_empty(), "{}", strategy);
            for sol in &result.solutions {
                for comb in &sol.combinations {
                    let t = comb
                        .assignments
                        .iter()
                        .find(|a| a.channel == "T")
                        .expect("T assigned");
                    assert_eq!(t.pin, "PB0", "{}", strategy);
                }
            }
        }
    }

    #[test]
    fn interacting_ports_agree_across_propagating_strategies() {
        let src = indoc! {r#"
            port A:
                channel X
                config "a":
                    X = SPI*_MOSI
            port B:
                channel Y
                config "b":
                    Y = SPI*_MOSI
        "#};
        let s1 = fingerprints(&run(src, Strategy::Backtracking));
        let s2 = fingerprints(&run(src, Strategy::ForwardChecking));
        let s3 = fingerprints(&run(src, Strategy::DynamicMrv));
        // Three MOSI-capable instances, two ports: 3 × 2 orderings.
        assert_eq!(s1.len(), 6);
        assert_eq!(s1, s2);
        assert_eq!(s1, s3);
    }

    #[test]
    fn multi_config_port_pins_stay_on_channel() {
        let src = indoc! {r#"
            port CMD:
                channel TX
                channel RX
                config "U1":
                    TX = USART1_TX
                    RX = USART1_RX
                config "U2":
                    TX = USART*_TX
                    RX = USART*_RX
                    require same_instance(TX, RX)
        "#};
        for strategy in Strategy::ALL {
            let result = run(src, strategy);
            assert!(!result.solutions.is_empty(), "{}", strategy);
            for sol in &result.solutions {
                // Two configs → two combinations per solution.
                assert_eq!(sol.combinations.len(), 2, "{}", strategy);
            }
            assert_invariants(&result, &mcu(), &[], &[], &[]);
        }
    }

    #[test]
    fn no_solution_reports_deepest_partial() {
        let src = indoc! {r#"
            port SENSE:
                channel V
                config "a":
                    V = ADC*_IN[0-3]
            port MONITOR:
                channel V
                config "a":
                    V = ADC*_IN[0-3]
        "#};
        let result = run(src, Strategy::Backtracking);
        assert!(result.solutions.is_empty());
        let report = result
            .errors
            .iter()
            .find(|e| e.message.contains("no solution"))
            .expect("missing no-solution report");
        assert!(report.message.contains("unresolvable"));
        let partial = report.partial_solution.as_ref().unwrap();
        assert!(!partial.is_empty());
    }

    #[test]
    fn unknown_require_function_is_an_error() {
        let src = indoc! {r#"
            port CMD:
                channel TX
                config "U":
                    TX = USART*_TX
                    require nonsense(TX)
        "#};
        let result = run(src, Strategy::Backtracking);
        assert!(result.has_errors());
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("unknown function 'nonsense'")));
    }

    #[test]
    fn unmapped_channel_in_require_warns_with_suggestion() {
        let src = indoc! {r#"
            port CMD:
                channel TX
                channel RX
                config "U":
                    TX = USART*_TX
                    RX = USART*_RX
                    require same_instance(TX, RZ)
        "#};
        let result = run(src, Strategy::Backtracking);
        let warn = result
            .errors
            .iter()
            .find(|e| e.severity == Severity::Warning && e.message.contains("'RZ'"))
            .expect("missing warning");
        assert!(warn.message.contains("did you mean 'RX'"));
        // A warning does not suppress solving.
        assert!(!result.solutions.is_empty());
    }

    #[test]
    fn unknown_port_in_require_is_an_error() {
        let src = indoc! {r#"
            port CMD:
                channel TX
                config "U":
                    TX = USART*_TX
                    require instance(TX) == instance(GHOST.RX)
        "#};
        let result = run(src, Strategy::Backtracking);
        assert!(result.has_errors());
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("unknown port 'GHOST'")));
    }

    #[test]
    fn merger_single_input_is_identity_modulo_tagging() {
        let result = run(E1_UART, Strategy::Backtracking);
        let before = fingerprints(&result);
        let costs: Vec<f64> = result.solutions.iter().map(|s| s.total_cost).collect();
        let merged = merge::merge_results(
            vec![("backtracking".to_string(), result)],
            SolveOptions::default().max_solutions,
        );
        assert_eq!(fingerprints(&merged), before);
        assert_eq!(
            merged.solutions.iter().map(|s| s.total_cost).collect::<Vec<_>>(),
            costs
        );
        for s in &merged.solutions {
            assert_eq!(s.solver.as_deref(), Some("backtracking"));
        }
        assert!(merged.statistics.per_solver.contains_key("backtracking"));
    }

    #[test]
    fn merger_fuses_and_dedups_across_strategies() {
        let results: Vec<(String, SolveResult)> = [Strategy::Backtracking, Strategy::ForwardChecking, Strategy::DynamicMrv]
            .into_iter()
            .map(|st| (st.id().to_string(), run(E1_UART, st)))
            .collect();
        let merged = merge::merge_results(results, 20);
        // Same two assignments regardless of origin.
        assert_eq!(merged.solutions.len(), 2);
        assert!(merged
            .solutions
            .windows(2)
            .all(|w| w[0].total_cost <= w[1].total_cost));
        assert_eq!(merged.statistics.per_solver.len(), 3);
        let ids: Vec<usize> = merged.solutions.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn dedup_is_idempotent() {
        let a = run(E1_UART, Strategy::Backtracking).solutions;
        let b = run(E1_UART, Strategy::ForwardChecking).solutions;
        let merged: Vec<Solution> = a.into_iter().chain(b).collect();
        let once = merge::dedup_solutions(merged);
        let once_prints: Vec<String> = once.iter().map(|s| s.fingerprint()).collect();
        let twice = merge::dedup_solutions(once);
        let twice_prints: Vec<String> = twice.iter().map(|s| s.fingerprint()).collect();
        assert_eq!(once_prints, twice_prints);
    }

    #[test]
    fn search_space_statistics() {
        let result = run(E1_UART, Strategy::Backtracking);
        // TX and RX each have two candidates.
        assert_eq!(result.statistics.total_combinations, 4);
        assert_eq!(result.statistics.config_combinations, 1);
        assert!(result.statistics.evaluated_combinations >= 2);
    }

    #[test]
    fn builtin_uart_macro_solves() {
        let src = indoc! {r#"
            port CMD:
                channel TX
                channel RX
                config "U":
                    uart(TX, RX)
        "#};
        let result = run(src, Strategy::Backtracking);
        assert_eq!(fingerprints(&result), fingerprints(&run(E1_UART, Strategy::Backtracking)));
    }
}

fn partial_assignments(ctx: &context::Context<'_>, trail: &[(usize, usize)]) -> Vec<Assignment> {
    trail
        .iter()
        .map(|&(vi, cand)| {
            let v = &ctx.variables[vi];
            let c = v.candidates[cand];
            let pin = &ctx.mcu.pins[c.pin];
            let sig = &pin.signals[c.signal];
            Assignment {
                kind: AssignmentKind::Variable,
                port: ctx.ports[v.port].name.clone(),
                channel: ctx.ports[v.port].channels[v.channel].clone(),
                pin: pin.name.clone(),
                signal: sig.name.clone(),
                config: ctx.ports[v.port].configs[v.config].name.clone(),
                instance: sig.instance.clone(),
            }
        })
        .collect()
}
