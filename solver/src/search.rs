// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Machinery shared by every solver strategy: wall-clock limits, eager
//! config-boundary checks, final per-combination evaluation, and
//! solution construction from a full (or partially skipped) assignment.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use indexmap::IndexMap;

use crate::context::Context;
use crate::require::{references_other_port, AssignView, EvalScope};
use crate::{
    Assignment, AssignmentKind, Combination, Solution, PINNED_SENTINEL, RESERVED_SENTINEL,
};

#[derive(Copy, Clone, Debug)]
pub struct Limits {
    pub deadline: Instant,
    pub max_solutions: usize,
}

/// Accumulated results of one strategy run.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub solutions: Vec<Solution>,
    pub evaluated_combinations: u64,
    pub timed_out: bool,
    pub hit_max: bool,
    /// Deepest partial assignment seen, for post-mortem diagnostics.
    pub deepest: Vec<(usize, usize)>,
    pub deepest_var: Option<usize>,
    pub deepest_candidates: usize,
}

impl SearchOutcome {
    /// Records a dead end if it is the deepest seen so far. Keeping the
    /// first occurrence at a given depth keeps the first unresolvable
    /// variable stable for diagnostics.
    pub fn record_dead_end(&mut self, trail: &[(usize, usize)], var: usize, candidates: usize) {
        if trail.len() > self.deepest.len() || self.deepest_var.is_none() {
            self.deepest = trail.to_vec();
            self.deepest_var = Some(var);
            self.deepest_candidates = candidates;
        }
    }
}

/// View of one candidate assignment for require evaluation.
fn view_of(ctx: &Context<'_>, var: usize, cand: usize) -> AssignView {
    let v = &ctx.variables[var];
    let c = v.candidates[cand];
    let sig = &ctx.mcu.pins[c.pin].signals[c.signal];
    AssignView {
        pin: Some(c.pin),
        instance: c.instance,
        peripheral: sig.peripheral.clone(),
    }
}

/// Eager check at a config boundary: all of `(port, config)`'s variables
/// are assigned; evaluate that config's self-contained requires.
/// Cross-port expressions wait for final evaluation.
pub fn eager_ok(ctx: &Context<'_>, assigned: &[Option<usize>], port: usize, config: usize) -> bool {
    let requires = &ctx.ports[port].configs[config].requires;
    if requires.is_empty() {
        return true;
    }
    let mut scope = EvalScope::new(ctx);
    if let Some(vars) = ctx.config_vars.get(&(port, config)) {
        for &vi in vars {
            if let Some(cand) = assigned[vi] {
                let v = &ctx.variables[vi];
                let channel = ctx.ports[v.port].channels[v.channel].clone();
                scope.add(v.port, &channel, view_of(ctx, vi, cand));
            }
        }
    }
    requires
        .iter()
        .filter(|r| !references_other_port(r))
        .all(|r| scope.eval(r, port).truthy())
}

/// Final acceptance of a full assignment.
///
/// A config "survives" when all of its variables are assigned (dynamic
/// MRV may skip wiped-out configs). The candidate solution's combinations
/// are the product over surviving configs; every one of them must pass
/// its active requires. Returns true and appends the solution on success.
pub fn try_accept(
    ctx: &Context<'_>,
    assigned: &[Option<usize>],
    out: &mut SearchOutcome,
) -> bool {
    let config_complete = |port: usize, config: usize| {
        ctx.config_vars
            .get(&(port, config))
            .map(|vars| vars.iter().all(|&v| assigned[v].is_some()))
            .unwrap_or(true)
    };

    let combos: Vec<&Vec<(usize, usize)>> = ctx
        .combos
        .iter()
        .filter(|combo| combo.iter().all(|&(p, c)| config_complete(p, c)))
        .collect();
    if combos.is_empty() {
        return false;
    }

    for combo in &combos {
        out.evaluated_combinations += 1;
        let scope = scope_for_combo(ctx, assigned, combo.as_slice());
        for &(p, c) in combo.iter() {
            for req in &ctx.ports[p].configs[c].requires {
                if !scope.eval(req, p).truthy() {
                    return false;
                }
            }
        }
    }

    let combinations: Vec<Combination> = combos
        .iter()
        .map(|combo| build_combination(ctx, assigned, combo.as_slice()))
        .collect();

    let mut port_instances: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for comb in &combinations {
        for a in &comb.assignments {
            if a.kind == AssignmentKind::Variable {
                port_instances
                    .entry(a.port.clone())
                    .or_default()
                    .insert(a.instance.clone());
            }
        }
    }

    out.solutions.push(Solution {
        id: 0,
        solver: None,
        combinations,
        port_instances,
        costs: BTreeMap::new(),
        total_cost: 0.0,
    });
    true
}

fn scope_for_combo<'c>(
    ctx: &'c Context<'c>,
    assigned: &[Option<usize>],
    combo: &[(usize, usize)],
) -> EvalScope<'c> {
    let active: HashMap<usize, usize> = combo.iter().copied().collect();
    let mut scope = EvalScope::new(ctx);
    for (vi, v) in ctx.variables.iter().enumerate() {
        if active.get(&v.port) != Some(&v.config) {
            continue;
        }
        if let Some(cand) = assigned[vi] {
            let channel = ctx.ports[v.port].channels[v.channel].clone();
            scope.add(v.port, &channel, view_of(ctx, vi, cand));
        }
    }
    scope
}

fn build_combination(
    ctx: &Context<'_>,
    assigned: &[Option<usize>],
    combo: &[(usize, usize)],
) -> Combination {
    let active: HashMap<usize, usize> = combo.iter().copied().collect();
    let mut configs = IndexMap::new();
    for &(p, c) in combo {
        configs.insert(
            ctx.ports[p].name.clone(),
            ctx.ports[p].configs[c].name.clone(),
        );
    }

    let mut assignments = Vec::new();
    for (vi, v) in ctx.variables.iter().enumerate() {
        if active.get(&v.port) != Some(&v.config) {
            continue;
        }
        let Some(cand) = assigned[vi] else { continue };
        let c = v.candidates[cand];
        let pin = &ctx.mcu.pins[c.pin];
        let sig = &pin.signals[c.signal];
        assignments.push(Assignment {
            kind: AssignmentKind::Variable,
            port: ctx.ports[v.port].name.clone(),
            channel: ctx.ports[v.port].channels[v.channel].clone(),
            pin: pin.name.clone(),
            signal: sig.name.clone(),
            config: ctx.ports[v.port].configs[v.config].name.clone(),
            instance: sig.instance.clone(),
        });
    }
    for p in &ctx.pinned {
        let pin = &ctx.mcu.pins[p.pin];
        let instance = pin
            .signals
            .iter()
            .find(|s| s.name == p.signal)
            .map(|s| s.instance.clone())
            .unwrap_or_default();
        assignments.push(Assignment {
            kind: AssignmentKind::Pinned,
            port: PINNED_SENTINEL.to_string(),
            channel: PINNED_SENTINEL.to_string(),
            pin: pin.name.clone(),
            signal: p.signal.clone(),
            config: PINNED_SENTINEL.to_string(),
            instance,
        });
    }
    for name in &ctx.reserved_names {
        assignments.push(Assignment {
            kind: AssignmentKind::Reserved,
            port: RESERVED_SENTINEL.to_string(),
            channel: String::new(),
            pin: name.clone(),
            signal: String::new(),
            config: String::new(),
            instance: String::new(),
        });
    }
    Combination {
        configs,
        assignments,
    }
}
