// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deduplication and multi-solver result merging.
//!
//! Hosts run strategies in parallel on cloned inputs and hand the
//! labelled results to [`merge_results`]. Merging is deterministic:
//! stable cost sort, first-copy-wins dedup on the canonical assignment
//! fingerprint, trim, renumber.

use std::collections::HashSet;

use crate::{SolveResult, Solution, Statistics};

/// Keeps the first solution per fingerprint; idempotent.
pub fn dedup_solutions(solutions: Vec<Solution>) -> Vec<Solution> {
    let mut seen = HashSet::new();
    solutions
        .into_iter()
        .filter(|s| seen.insert(s.fingerprint()))
        .collect()
}

/// Fuses the results of one or more labelled solver runs.
///
/// A single input is returned as-is apart from solver tagging, so a
/// one-strategy host sees exactly what the strategy produced.
pub fn merge_results(results: Vec<(String, SolveResult)>, max_solutions: usize) -> SolveResult {
    assert!(!results.is_empty(), "nothing to merge");

    if results.len() == 1 {
        let (solver, mut result) = results.into_iter().next().unwrap();
        for s in &mut result.solutions {
            s.solver.get_or_insert_with(|| solver.clone());
        }
        let stats = result.statistics.clone();
        result.statistics.per_solver.insert(solver, stats);
        return result;
    }

    let mcu_ref = results[0].1.mcu_ref.clone();
    let mut solutions = Vec::new();
    let mut errors = Vec::new();
    let mut seen_messages = HashSet::new();
    let mut statistics = Statistics::default();

    for (solver, result) in results {
        for mut s in result.solutions {
            s.solver.get_or_insert_with(|| solver.clone());
            solutions.push(s);
        }
        for e in result.errors {
            if seen_messages.insert(e.message.clone()) {
                errors.push(e);
            }
        }
        let st = &result.statistics;
        statistics.total_combinations =
            statistics.total_combinations.saturating_add(st.total_combinations);
        statistics.evaluated_combinations = statistics
            .evaluated_combinations
            .saturating_add(st.evaluated_combinations);
        statistics.solve_time_ms = statistics.solve_time_ms.max(st.solve_time_ms);
        statistics.config_combinations =
            statistics.config_combinations.max(st.config_combinations);
        statistics.per_solver.insert(solver, result.statistics);
    }

    solutions.sort_by(|a, b| a.total_cost.total_cmp(&b.total_cost));
    let mut solutions = dedup_solutions(solutions);
    solutions.truncate(max_solutions);
    for (i, s) in solutions.iter_mut().enumerate() {
        s.id = i + 1;
    }
    statistics.valid_solutions = solutions.len() as u64;

    SolveResult {
        mcu_ref,
        solutions,
        errors,
        statistics,
    }
}
