// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dynamic MRV with forward checking.
//!
//! Instead of a fixed order, each step picks the unassigned variable with
//! the smallest non-empty domain. When only empty-domain variables remain
//! unassigned, they belong to configs that propagation wiped out; they
//! are skipped, and acceptance drops those configs from the combination
//! product instead of failing the whole assignment.

use std::collections::HashMap;
use std::time::Instant;

use crate::context::Context;
use crate::search::{self, Limits, SearchOutcome};
use crate::strategies::backtrack::{identity_domains, Flow};
use crate::strategies::forward::{port_wipeout, propagate, undo};
use crate::tracker::PinTracker;

struct Dm<'c> {
    ctx: &'c Context<'c>,
    domains: Vec<Vec<usize>>,
    limits: Limits,
    tracker: PinTracker,
    assigned: Vec<Option<usize>>,
    trail: Vec<(usize, usize)>,
    /// Unassigned-variable count per `(port, config)`; hitting zero
    /// triggers the eager require check for that config.
    remaining: HashMap<(usize, usize), usize>,
}

pub fn run(ctx: &Context<'_>, limits: Limits, out: &mut SearchOutcome) {
    let remaining = ctx
        .config_vars
        .iter()
        .map(|(&k, vars)| (k, vars.len()))
        .collect();
    let mut dm = Dm {
        domains: identity_domains(ctx),
        tracker: PinTracker::new(ctx.mcu.pins.len(), &ctx.instance_shared, &ctx.reserved),
        assigned: vec![None; ctx.variables.len()],
        trail: Vec::new(),
        remaining,
        ctx,
        limits,
    };
    dm.step(out);
}

impl Dm<'_> {
    fn step(&mut self, out: &mut SearchOutcome) -> Flow {
        if Instant::now() >= self.limits.deadline {
            out.timed_out = true;
            return Flow::Stop;
        }

        let ctx = self.ctx;
        // Smallest non-empty domain among unassigned variables; ties keep
        // the static MRV order.
        let mut pick: Option<(usize, usize)> = None;
        for vi in 0..ctx.variables.len() {
            if self.assigned[vi].is_some() {
                continue;
            }
            let len = self.domains[vi].len();
            if len == 0 {
                continue;
            }
            if pick.map_or(true, |(best, _)| len < best) {
                pick = Some((len, vi));
            }
        }
        let Some((domain_size, vi)) = pick else {
            // Fully assigned, or only wiped-out configs left: accept with
            // those configs skipped.
            search::try_accept(ctx, &self.assigned, out);
            if out.solutions.len() >= self.limits.max_solutions {
                out.hit_max = true;
                return Flow::Stop;
            }
            return Flow::Continue;
        };

        let var = &ctx.variables[vi];
        let cands = self.domains[vi].clone();
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
            let slot = self.remaining.get_mut(&(var.port, var.config)).unwrap();
            *slot -= 1;
            let config_done = *slot == 0;

            let log = propagate(ctx, &mut self.domains, &self.assigned, vi, cand);
            let dead = port_wipeout(ctx, &self.domains, &self.assigned);
            let boundary_ok = !dead
                && (!config_done
                    || search::eager_ok(ctx, &self.assigned, var.port, var.config));
            let flow = if boundary_ok {
                self.step(out)
            } else {
                Flow::Continue
            };

            undo(&mut self.domains, log);
            *self.remaining.get_mut(&(var.port, var.config)).unwrap() += 1;
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
