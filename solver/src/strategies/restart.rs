// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Randomized restarts.
//!
//! Runs the backtracking engine `R` times. Each restart reseeds
//! Mulberry32 with `r * 12345 + 67890`, shuffles every domain, and
//! re-sorts the variable order by domain size with the shuffled order
//! breaking ties, then collects its share of the solution budget.

use std::time::Instant;

use crate::context::Context;
use crate::search::{Limits, SearchOutcome};
use crate::strategies::backtrack::{identity_domains, CandidateOrder, Engine};
use crate::strategies::rng::Mulberry32;

pub fn run(ctx: &Context<'_>, num_restarts: usize, limits: Limits, out: &mut SearchOutcome) {
    let restarts = num_restarts.max(1);
    let per_restart = (limits.max_solutions + restarts - 1) / restarts;

    for r in 0..restarts {
        if Instant::now() >= limits.deadline {
            out.timed_out = true;
            break;
        }
        let mut rng = Mulberry32::new((r as u32).wrapping_mul(12345).wrapping_add(67890));

        let mut domains = identity_domains(ctx);
        for dom in &mut domains {
            rng.shuffle(dom);
        }
        let mut order: Vec<usize> = (0..ctx.variables.len()).collect();
        rng.shuffle(&mut order);
        order.sort_by_key(|&v| ctx.variables[v].candidates.len());

        let cap = (out.solutions.len() + per_restart).min(limits.max_solutions);
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
        if out.timed_out {
            break;
        }
        if out.solutions.len() >= limits.max_solutions {
            break;
        }
    }
    out.hit_max = out.solutions.len() >= limits.max_solutions;
}
