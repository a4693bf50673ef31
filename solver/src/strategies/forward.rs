// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Forward checking.
//!
//! Same static MRV order as the baseline, but every assignment is
//! propagated: candidates in *other* ports that collide on the pin, or on
//! a non-shared peripheral instance, are removed from their domains. The
//! removals are logged as `(variable, position, candidate)` records and
//! restored exactly on backtrack.
//!
//! A port is declared dead ("port wipeout") only when every one of its
//! configs has an unassigned variable with an empty domain; a single
//! wiped config is tolerated here and handled by the dynamic strategy.

use std::collections::HashMap;
use std::time::Instant;

use crate::context::Context;
use crate::search::{self, Limits, SearchOutcome};
use crate::strategies::backtrack::{identity_domains, Flow};
use crate::tracker::PinTracker;

/// One propagation log entry: the candidate that sat at `position` in
/// `variable`'s domain.
pub(crate) type Removal = (usize, usize, usize);

pub(crate) fn propagate(
    ctx: &Context<'_>,
    domains: &mut [Vec<usize>],
    assigned: &[Option<usize>],
    vi: usize,
    cand: usize,
) -> Vec<Removal> {
    let v = &ctx.variables[vi];
    let c = v.candidates[cand];
    let shared = ctx.instance_shared[c.instance];
    let mut log = Vec::new();
    for (w, dom) in domains.iter_mut().enumerate() {
        if assigned[w].is_some() || ctx.variables[w].port == v.port {
            continue;
        }
        for i in (0..dom.len()).rev() {
            let cc = ctx.variables[w].candidates[dom[i]];
            if cc.pin == c.pin || (!shared && cc.instance == c.instance) {
                let removed = dom.remove(i);
                log.push((w, i, removed));
            }
        }
    }
    log
}

pub(crate) fn undo(domains: &mut [Vec<usize>], log: Vec<Removal>) {
    for (w, i, cand) in log.into_iter().rev() {
        domains[w].insert(i, cand);
    }
}

pub(crate) fn port_wipeout(
    ctx: &Context<'_>,
    domains: &[Vec<usize>],
    assigned: &[Option<usize>],
) -> bool {
    for (pi, port) in ctx.ports.iter().enumerate() {
        if port.configs.is_empty() {
            continue;
        }
        let all_dead = (0..port.configs.len()).all(|ci| {
            ctx.config_vars
                .get(&(pi, ci))
                .map(|vars| {
                    vars.iter()
                        .any(|&v| assigned[v].is_none() && domains[v].is_empty())
                })
                .unwrap_or(false)
        });
        if all_dead {
            return true;
        }
    }
    false
}

struct Fc<'c> {
    ctx: &'c Context<'c>,
    domains: Vec<Vec<usize>>,
    limits: Limits,
    last_pos: HashMap<(usize, usize), usize>,
    tracker: PinTracker,
    assigned: Vec<Option<usize>>,
    trail: Vec<(usize, usize)>,
}

pub fn run(ctx: &Context<'_>, limits: Limits, out: &mut SearchOutcome) {
    let order: Vec<usize> = (0..ctx.variables.len()).collect();
    let mut fc = Fc {
        last_pos: ctx.last_var_positions(&order),
        domains: identity_domains(ctx),
        tracker: PinTracker::new(ctx.mcu.pins.len(), &ctx.instance_shared, &ctx.reserved),
        assigned: vec![None; ctx.variables.len()],
        trail: Vec::new(),
        ctx,
        limits,
    };
    fc.step(0, out);
}

impl Fc<'_> {
    fn step(&mut self, depth: usize, out: &mut SearchOutcome) -> Flow {
        if Instant::now() >= self.limits.deadline {
            out.timed_out = true;
            return Flow::Stop;
        }
        if depth == self.ctx.variables.len() {
            search::try_accept(self.ctx, &self.assigned, out);
            if out.solutions.len() >= self.limits.max_solutions {
                out.hit_max = true;
                return Flow::Stop;
            }
            return Flow::Continue;
        }

        let ctx = self.ctx;
        let vi = depth; // static order: variables are already MRV-sorted
        let var = &ctx.variables[vi];
        let cands = self.domains[vi].clone();
        let domain_size = cands.len();

        for cand in cands {
            if Instant::now() >= self.limits.deadline {
                out.timed_out = true;
                return Flow::Stop;
            }
            let c = var.candidates[cand];
            if !self
                .tracker
                .can_assign(c.pin, var.port, var.config, var.channel, c.instance)
            {
                continue;
            }
            self.tracker
                .assign(c.pin, var.port, var.config, var.channel, c.instance);
            self.assigned[vi] = Some(cand);
            self.trail.push((vi, cand));

            let log = propagate(ctx, &mut self.domains, &self.assigned, vi, cand);
            let dead = port_wipeout(ctx, &self.domains, &self.assigned);
            let boundary_ok = !dead
                && if self.last_pos.get(&(var.port, var.config)) == Some(&depth) {
                    search::eager_ok(ctx, &self.assigned, var.port, var.config)
                } else {
                    true
                };
            let flow = if boundary_ok {
                self.step(depth + 1, out)
            } else {
                Flow::Continue
            };

            undo(&mut self.domains, log);
            self.trail.pop();
            self.assigned[vi] = None;
            self.tracker
                .unassign(c.pin, var.port, var.config, var.channel, c.instance);
            if flow == Flow::Stop {
                return Flow::Stop;
            }
        }

        out.record_dead_end(&self.trail, vi, domain_size);
        Flow::Continue
    }
}
