// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cost-guided backtracking.
//!
//! The baseline search, but each variable's candidates are visited in
//! ascending order of an incremental cost estimate against the current
//! partial assignment: spreading onto a new GPIO letter, landing on a
//! debug pin, and moving away from the port's existing pins all push a
//! candidate later. Zero-weight components are disabled.

use crate::context::Context;
use crate::cost::CostWeights;
use crate::search::{Limits, SearchOutcome};
use crate::strategies::backtrack::{identity_domains, CandidateOrder, Engine};

pub fn run(ctx: &Context<'_>, weights: &CostWeights, limits: Limits, out: &mut SearchOutcome) {
    let order: Vec<usize> = (0..ctx.variables.len()).collect();
    let domains = identity_domains(ctx);
    Engine::new(ctx, order, domains, CandidateOrder::CostGuided(weights), limits).run(out);
}
