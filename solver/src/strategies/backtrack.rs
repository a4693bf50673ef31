// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Chronological backtracking.
//!
//! This is both the baseline strategy and the engine reused by the
//! randomized-restart, cost-guided, and two-phase strategies: the caller
//! controls the variable order, the per-variable domains, and how
//! candidates are ordered within a domain.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::context::Context;
use crate::cost::{CostWeights, DEBUG_PINS};
use crate::search::{self, Limits, SearchOutcome};
use crate::tracker::PinTracker;

#[derive(Copy, Clone)]
pub(crate) enum CandidateOrder<'w> {
    /// Iterate the domain as given.
    Domain,
    /// Sort candidates by an incremental cost estimate first.
    CostGuided(&'w CostWeights),
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Engine<'c, 'w> {
    ctx: &'c Context<'c>,
    order: Vec<usize>,
    domains: Vec<Vec<usize>>,
    candidate_order: CandidateOrder<'w>,
    limits: Limits,
    last_pos: HashMap<(usize, usize), usize>,
    tracker: PinTracker,
    assigned: Vec<Option<usize>>,
    trail: Vec<(usize, usize)>,
}

impl<'c, 'w> Engine<'c, 'w> {
    pub fn new(
        ctx: &'c Context<'c>,
        order: Vec<usize>,
        domains: Vec<Vec<usize>>,
        candidate_order: CandidateOrder<'w>,
        limits: Limits,
    ) -> Self {
        let last_pos = ctx.last_var_positions(&order);
        Engine {
            tracker: PinTracker::new(ctx.mcu.pins.len(), &ctx.instance_shared, &ctx.reserved),
            assigned: vec![None; ctx.variables.len()],
            trail: Vec::new(),
            ctx,
            order,
            domains,
            candidate_order,
            limits,
            last_pos,
        }
    }

    pub fn run(mut self, out: &mut SearchOutcome) {
        self.step(0, out);
    }

    fn step(&mut self, depth: usize, out: &mut SearchOutcome) -> Flow {
        if Instant::now() >= self.limits.deadline {
            out.timed_out = true;
            return Flow::Stop;
        }
        if depth == self.order.len() {
            search::try_accept(self.ctx, &self.assigned, out);
            if out.solutions.len() >= self.limits.max_solutions {
                out.hit_max = true;
                return Flow::Stop;
            }
            return Flow::Continue;
        }

        let ctx = self.ctx;
        let vi = self.order[depth];
        let var = &ctx.variables[vi];
        let mut cands = self.domains[vi].clone();
        if let CandidateOrder::CostGuided(weights) = self.candidate_order {
            self.sort_by_estimate(vi, &mut cands, weights);
        }
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

            let boundary_ok = if self.last_pos.get(&(var.port, var.config)) == Some(&depth) {
                search::eager_ok(ctx, &self.assigned, var.port, var.config)
            } else {
                true
            };
            let flow = if boundary_ok {
                self.step(depth + 1, out)
            } else {
                Flow::Continue
            };

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

    /// Cheapest-looking candidates first: staying on already-used GPIO
    /// letters, avoiding debug pins, staying near the port's pins.
    fn sort_by_estimate(&self, vi: usize, cands: &mut Vec<usize>, weights: &CostWeights) {
        let ctx = self.ctx;
        let var = &ctx.variables[vi];
        let port_pins: Vec<usize> = self
            .assigned
            .iter()
            .enumerate()
            .filter_map(|(i, a)| {
                a.and_then(|cand| {
                    (ctx.variables[i].port == var.port)
                        .then(|| ctx.variables[i].candidates[cand].pin)
                })
            })
            .collect();
        let letters: HashSet<char> = port_pins
            .iter()
            .filter_map(|&p| ctx.mcu.pins[p].gpio_letter())
            .collect();

        let mut scored: Vec<(f64, usize)> = cands
            .iter()
            .map(|&cand| {
                let pin = var.candidates[cand].pin;
                let mut est = 0.0;
                if weights.port_spread != 0.0 {
                    if let Some(l) = ctx.mcu.pins[pin].gpio_letter() {
                        if !letters.contains(&l) {
                            est += weights.port_spread;
                        }
                    }
                }
                if weights.debug_pin_penalty != 0.0
                    && DEBUG_PINS.contains(&ctx.mcu.pins[pin].name.as_str())
                {
                    est += weights.debug_pin_penalty * 10.0;
                }
                if weights.pin_proximity != 0.0 && !port_pins.is_empty() {
                    let sum: f64 = port_pins
                        .iter()
                        .map(|&q| ctx.mcu.pin_distance(pin, q))
                        .sum();
                    est += weights.pin_proximity * sum / port_pins.len() as f64;
                }
                (est, cand)
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        *cands = scored.into_iter().map(|(_, c)| c).collect();
    }
}

pub(crate) fn identity_domains(ctx: &Context<'_>) -> Vec<Vec<usize>> {
    ctx.variables
        .iter()
        .map(|v| (0..v.candidates.len()).collect())
        .collect()
}

/// S1: plain chronological backtracking in static MRV order.
pub fn run(ctx: &Context<'_>, limits: Limits, out: &mut SearchOutcome) {
    let order: Vec<usize> = (0..ctx.variables.len()).collect();
    let domains = identity_domains(ctx);
    Engine::new(ctx, order, domains, CandidateOrder::Domain, limits).run(out);
}
