// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Diverse-instance search: the two-phase strategy with up to ten
//! phase-1 rounds. Round 0 runs vanilla phase 1; each later round `r`
//! shuffles every instance domain with seed `r * 54321 + combo * 11`,
//! accumulating distinct groups until the cap is reached.

use std::collections::HashSet;
use std::time::Instant;

use crate::context::Context;
use crate::search::{Limits, SearchOutcome};
use crate::strategies::two_phase::{collect_groups, run_phase2};

const ROUNDS: u32 = 10;

pub fn run(
    ctx: &Context<'_>,
    max_groups: usize,
    max_solutions_per_group: usize,
    limits: Limits,
    out: &mut SearchOutcome,
) {
    let mut seen = HashSet::new();
    let mut groups = Vec::new();

    for round in 0..ROUNDS {
        if groups.len() >= max_groups || out.timed_out {
            break;
        }
        if Instant::now() >= limits.deadline {
            out.timed_out = true;
            break;
        }
        if round == 0 {
            collect_groups(
                ctx,
                max_groups,
                None::<fn(usize) -> u32>,
                &mut seen,
                &mut groups,
                limits,
                out,
            );
        } else {
            collect_groups(
                ctx,
                max_groups,
                Some(move |combo: usize| {
                    round
                        .wrapping_mul(54321)
                        .wrapping_add((combo as u32).wrapping_mul(11))
                }),
                &mut seen,
                &mut groups,
                limits,
                out,
            );
        }
    }

    run_phase2(ctx, &groups, max_solutions_per_group, limits, out);
}
