// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Two-phase search.
//!
//! Phase 1 backtracks over *peripheral instances* only: each variable of
//! a config combination is reduced to the set of instances its candidates
//! cover, instance exclusivity (with the shared-pattern escape) is
//! enforced, and requires are checked against synthetic instance-only
//! assignments. Distinct instance groups, fingerprinted as sorted
//! `key=instance` pairs, are collected up to a cap split evenly across
//! combinations.
//!
//! Phase 2 re-runs the full backtracking engine per group, with every
//! grouped variable's domain restricted to candidates on its chosen
//! instance, and a per-group solution budget.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::context::Context;
use crate::require::{depends_on_pins, instance_only_view, references_other_port, EvalScope};
use crate::search::{Limits, SearchOutcome};
use crate::strategies::backtrack::{identity_domains, CandidateOrder, Engine, Flow};
use crate::strategies::rng::Mulberry32;

#[derive(Clone, Debug)]
pub(crate) struct Group {
    /// Index into `ctx.combos`.
    pub combo: usize,
    /// Variable index → chosen instance id.
    pub choice: HashMap<usize, usize>,
}

pub fn run(
    ctx: &Context<'_>,
    max_groups: usize,
    max_solutions_per_group: usize,
    limits: Limits,
    out: &mut SearchOutcome,
) {
    let mut seen = HashSet::new();
    let mut groups = Vec::new();
    collect_groups(
        ctx,
        max_groups,
        None::<fn(usize) -> u32>,
        &mut seen,
        &mut groups,
        limits,
        out,
    );
    run_phase2(ctx, &groups, max_solutions_per_group, limits, out);
}

/// Phase 1 over every config combination. `round_seed`, when given, maps
/// a combination index to a shuffle seed for its instance domains.
pub(crate) fn collect_groups(
    ctx: &Context<'_>,
    max_groups: usize,
    round_seed: Option<impl Fn(usize) -> u32>,
    seen: &mut HashSet<String>,
    groups: &mut Vec<Group>,
    limits: Limits,
    out: &mut SearchOutcome,
) {
    let ncombos = ctx.combos.len().max(1);
    let per_combo = (max_groups + ncombos - 1) / ncombos;

    for (ci, combo) in ctx.combos.iter().enumerate() {
        if groups.len() >= max_groups || out.timed_out {
            break;
        }
        let active: HashMap<usize, usize> = combo.iter().copied().collect();
        let mut pvars: Vec<(usize, Vec<usize>)> = Vec::new();
        for (vi, v) in ctx.variables.iter().enumerate() {
            if active.get(&v.port) == Some(&v.config) {
                let mut insts = Vec::new();
                for c in &v.candidates {
                    if !insts.contains(&c.instance) {
                        insts.push(c.instance);
                    }
                }
                pvars.push((vi, insts));
            }
        }
        if let Some(seed_of) = &round_seed {
            let mut rng = Mulberry32::new(seed_of(ci));
            for (_, insts) in &mut pvars {
                rng.shuffle(insts);
            }
        }

        // Last phase-1 position per (port, config), for eager checks.
        let mut last_pos: HashMap<(usize, usize), usize> = HashMap::new();
        for (pos, (vi, _)) in pvars.iter().enumerate() {
            let v = &ctx.variables[*vi];
            last_pos.insert((v.port, v.config), pos);
        }

        let mut p1 = PhaseOne {
            ctx,
            combo: ci,
            pvars: &pvars,
            last_pos,
            choice: HashMap::new(),
            owner: HashMap::new(),
            refcount: HashMap::new(),
            emitted: 0,
            cap: per_combo,
            max_total: max_groups,
            limits,
        };
        p1.step(0, seen, groups, out);
    }
}

struct PhaseOne<'a, 'c> {
    ctx: &'c Context<'c>,
    combo: usize,
    pvars: &'a [(usize, Vec<usize>)],
    last_pos: HashMap<(usize, usize), usize>,
    choice: HashMap<usize, usize>,
    /// Non-shared instance id → owning port.
    owner: HashMap<usize, usize>,
    refcount: HashMap<(usize, usize), u32>,
    emitted: usize,
    cap: usize,
    max_total: usize,
    limits: Limits,
}

impl PhaseOne<'_, '_> {
    fn step(
        &mut self,
        depth: usize,
        seen: &mut HashSet<String>,
        groups: &mut Vec<Group>,
        out: &mut SearchOutcome,
    ) -> Flow {
        if Instant::now() >= self.limits.deadline {
            out.timed_out = true;
            return Flow::Stop;
        }
        if self.emitted >= self.cap || groups.len() >= self.max_total {
            return Flow::Stop;
        }
        if depth == self.pvars.len() {
            if self.final_ok() {
                let fp = self.fingerprint();
                if seen.insert(fp) {
                    groups.push(Group {
                        combo: self.combo,
                        choice: self.choice.clone(),
                    });
                    self.emitted += 1;
                }
            }
            return if self.emitted >= self.cap {
                Flow::Stop
            } else {
                Flow::Continue
            };
        }

        let ctx = self.ctx;
        let pvars = self.pvars;
        let (vi, insts) = &pvars[depth];
        let vi = *vi;
        let var = &ctx.variables[vi];
        for &inst in insts.iter() {
            let exclusive = !ctx.instance_shared[inst];
            if exclusive {
                if let Some(&owner) = self.owner.get(&inst) {
                    if owner != var.port {
                        continue;
                    }
                }
            }
            if exclusive {
                self.owner.insert(inst, var.port);
                *self.refcount.entry((var.port, inst)).or_insert(0) += 1;
            }
            self.choice.insert(vi, inst);

            let boundary_ok =
                if self.last_pos.get(&(var.port, var.config)) == Some(&depth) {
                    self.config_ok(var.port, var.config)
                } else {
                    true
                };
            let flow = if boundary_ok {
                self.step(depth + 1, seen, groups, out)
            } else {
                Flow::Continue
            };

            self.choice.remove(&vi);
            if exclusive {
                let rc = self.refcount.get_mut(&(var.port, inst)).unwrap();
                *rc -= 1;
                if *rc == 0 {
                    self.refcount.remove(&(var.port, inst));
                    self.owner.remove(&inst);
                }
            }
            if flow == Flow::Stop {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn scope(&self) -> EvalScope<'_> {
        let ctx = self.ctx;
        let mut scope = EvalScope::new(ctx);
        for (&vi, &inst) in &self.choice {
            let v = &ctx.variables[vi];
            let channel = ctx.ports[v.port].channels[v.channel].clone();
            scope.add(v.port, &channel, instance_only_view(ctx, inst));
        }
        scope
    }

    /// Eager check of one config's self-contained requires. Expressions
    /// needing concrete pins are meaningless here and wait for phase 2.
    fn config_ok(&self, port: usize, config: usize) -> bool {
        let scope = self.scope();
        self.ctx.ports[port].configs[config]
            .requires
            .iter()
            .filter(|r| !references_other_port(r) && !depends_on_pins(r))
            .all(|r| scope.eval(r, port).truthy())
    }

    /// Full require check for the combination; all ports are chosen by
    /// now, so cross-port references resolve too. Pin-dependent
    /// expressions still wait for phase 2.
    fn final_ok(&self) -> bool {
        let scope = self.scope();
        self.ctx.combos[self.combo].iter().all(|&(p, c)| {
            self.ctx.ports[p].configs[c]
                .requires
                .iter()
                .filter(|r| !depends_on_pins(r))
                .all(|r| scope.eval(r, p).truthy())
        })
    }

    /// Sorted `key=instance` pairs joined by `|`.
    fn fingerprint(&self) -> String {
        let ctx = self.ctx;
        let mut parts: Vec<String> = self
            .choice
            .iter()
            .map(|(&vi, &inst)| {
                let v = &ctx.variables[vi];
                format!(
                    "{}.{}.{}.{}={}",
                    ctx.ports[v.port].name,
                    ctx.ports[v.port].configs[v.config].name,
                    ctx.ports[v.port].channels[v.channel],
                    v.expr_index,
                    ctx.instance_name(inst)
                )
            })
            .collect();
        parts.sort();
        parts.join("|")
    }
}

pub(crate) fn run_phase2(
    ctx: &Context<'_>,
    groups: &[Group],
    max_solutions_per_group: usize,
    limits: Limits,
    out: &mut SearchOutcome,
) {
    for group in groups {
        if out.solutions.len() >= limits.max_solutions || out.timed_out {
            break;
        }
        if Instant::now() >= limits.deadline {
            out.timed_out = true;
            break;
        }
        let mut domains = identity_domains(ctx);
        for (vi, dom) in domains.iter_mut().enumerate() {
            if let Some(&inst) = group.choice.get(&vi) {
                dom.retain(|&c| ctx.variables[vi].candidates[c].instance == inst);
            }
        }
        let mut order: Vec<usize> = (0..ctx.variables.len()).collect();
        order.sort_by_key(|&v| domains[v].len());

        let cap = (out.solutions.len() + max_solutions_per_group).min(limits.max_solutions);
        Engine::new(
            ctx,
            order,
            domains,
            CandidateOrder::Domain,
            Limits {
                deadline: limits.deadline,
                max_solutions: cap,
            },
        )
        .run(out);
    }
    out.hit_max = out.solutions.len() >= limits.max_solutions;
}
