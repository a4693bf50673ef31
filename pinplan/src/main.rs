// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use colored::Colorize;

use pinplan_lang::ast::Program;
use pinplan_lang::{Severity, Sink};
use pinplan_mcu::Mcu;
use pinplan_solver::{
    archive, merge, solve, SolveOptions, SolveResult, SolverError, Strategy,
};

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "constraint-based pin assignment for microcontrollers"
)]
enum Pinplan {
    /// Solves a constraint program against an MCU description and prints
    /// the ranked pin assignments.
    Solve {
        /// Path to the constraint program.
        constraints: PathBuf,
        /// Path to the MCU description, in JSON.
        #[clap(long)]
        mcu: PathBuf,
        /// Strategy to run, or "all" to run every strategy on its own
        /// thread and merge the results.
        #[clap(long, default_value = "backtracking")]
        strategy: String,
        /// Solve options file, in TOML.
        #[clap(long)]
        config: Option<PathBuf>,
        /// Overrides the solution cap from the options file.
        #[clap(long)]
        max_solutions: Option<usize>,
        /// Overrides the wall-clock budget from the options file.
        #[clap(long)]
        timeout_ms: Option<u64>,
        /// Thread cap for --strategy all.
        #[clap(long, default_value_t = Strategy::ALL.len())]
        jobs: usize,
        /// Also writes the ranked solutions as a JSON archive.
        #[clap(long)]
        out: Option<PathBuf>,
    },
    /// Parses, expands, and validates a constraint program without
    /// solving it.
    Check {
        /// Path to the constraint program.
        constraints: PathBuf,
    },
}

fn main() -> Result<()> {
    if !atty::is(atty::Stream::Stdout) {
        colored::control::set_override(false);
    }
    match Pinplan::parse() {
        Pinplan::Solve {
            constraints,
            mcu,
            strategy,
            config,
            max_solutions,
            timeout_ms,
            jobs,
            out,
        } => cmd_solve(
            &constraints,
            &mcu,
            &strategy,
            config.as_deref(),
            max_solutions,
            timeout_ms,
            jobs,
            out.as_deref(),
        ),
        Pinplan::Check { constraints } => cmd_check(&constraints),
    }
}

fn load_program(path: &Path) -> Result<(Program, Sink)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    let mut sink = Sink::new();
    let program = pinplan_lang::parse(&text, &mut sink);
    Ok((program, sink))
}

fn cmd_check(constraints: &Path) -> Result<()> {
    let (program, mut sink) = load_program(constraints)?;
    // Expansion catches macro problems the parser cannot see.
    let _ = pinplan_lang::expand::expand_program(program, &mut sink);
    for d in sink.diags() {
        print_diag(d.severity, d.loc.map(|l| l.to_string()), &d.message);
    }
    if sink.has_errors() {
        bail!("{} failed validation", constraints.display());
    }
    println!("{}: ok", constraints.display());
    Ok(())
}

fn cmd_solve(
    constraints: &Path,
    mcu_path: &Path,
    strategy: &str,
    config: Option<&Path>,
    max_solutions: Option<usize>,
    timeout_ms: Option<u64>,
    jobs: usize,
    out: Option<&Path>,
) -> Result<()> {
    let (program, sink) = load_program(constraints)?;
    for d in sink.diags() {
        print_diag(d.severity, d.loc.map(|l| l.to_string()), &d.message);
    }
    if sink.has_errors() {
        bail!("{} failed to parse", constraints.display());
    }

    let mcu_bytes = std::fs::read(mcu_path)
        .with_context(|| format!("could not read {}", mcu_path.display()))?;
    let mcu = Mcu::from_json(&mcu_bytes)?;

    let mut options = match config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("could not read {}", path.display()))?;
            toml::from_str::<SolveOptions>(&text)
                .with_context(|| format!("invalid solve options in {}", path.display()))?
        }
        None => SolveOptions::default(),
    };
    if let Some(n) = max_solutions {
        options.max_solutions = n;
    }
    if let Some(ms) = timeout_ms {
        options.timeout_ms = ms;
    }

    let result = if strategy == "all" {
        solve_all(&program, &mcu, &options, jobs.max(1))?
    } else {
        let st = Strategy::from_id(strategy).ok_or_else(|| {
            anyhow!(
                "unknown strategy '{}'; expected one of {}, or all",
                strategy,
                Strategy::ALL.map(|s| s.id()).join(", ")
            )
        })?;
        let result = solve(&program, &mcu, &options, st);
        merge::merge_results(vec![(st.id().to_string(), result)], options.max_solutions)
    };

    report(&result);

    if let Some(path) = out {
        let docs: Vec<archive::SolutionDoc> =
            result.solutions.iter().map(archive::to_doc).collect();
        let bytes = serde_json::to_vec_pretty(&docs)?;
        std::fs::write(path, bytes)
            .with_context(|| format!("could not write {}", path.display()))?;
        println!("wrote {} solution(s) to {}", result.solutions.len(), path.display());
    }

    if result.has_errors() {
        bail!("solve failed");
    }
    Ok(())
}

/// Runs every strategy on its own thread over cloned inputs and merges
/// on this one, at most `jobs` threads at a time.
fn solve_all(
    program: &Program,
    mcu: &Mcu,
    options: &SolveOptions,
    jobs: usize,
) -> Result<SolveResult> {
    let mut results = Vec::new();
    for wave in Strategy::ALL.chunks(jobs) {
        let handles: Vec<_> = wave
            .iter()
            .map(|&st| {
                let program = program.clone();
                let mcu = mcu.clone();
                let options = options.clone();
                std::thread::spawn(move || {
                    (st.id().to_string(), solve(&program, &mcu, &options, st))
                })
            })
            .collect();
        for h in handles {
            results.push(h.join().map_err(|_| anyhow!("solver thread panicked"))?);
        }
    }
    Ok(merge::merge_results(results, options.max_solutions))
}

fn report(result: &SolveResult) {
    for e in &result.errors {
        print_solver_error(e);
    }

    if result.solutions.is_empty() {
        println!("no solutions for {}", result.mcu_ref);
    } else {
        println!(
            "{} solution(s) for {}",
            result.solutions.len(),
            result.mcu_ref
        );
    }
    for s in &result.solutions {
        let origin = s
            .solver
            .as_deref()
            .map(|id| format!(" [{}]", id))
            .unwrap_or_default();
        println!(
            "\n{} cost {:.1}{}",
            format!("#{}", s.id).bold(),
            s.total_cost,
            origin.dimmed()
        );
        for comb in &s.combinations {
            if !comb.configs.is_empty() {
                let chosen = comb
                    .configs
                    .iter()
                    .map(|(p, c)| format!("{}=\"{}\"", p, c))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("  {}", chosen.cyan());
            }
            for a in &comb.assignments {
                match a.kind {
                    pinplan_solver::AssignmentKind::Variable => println!(
                        "    {:<18} {:<6} {}",
                        format!("{}.{}", a.port, a.channel),
                        a.pin.green(),
                        a.signal
                    ),
                    pinplan_solver::AssignmentKind::Pinned => println!(
                        "    {:<18} {:<6} {}",
                        "<pinned>".dimmed(),
                        a.pin.green(),
                        a.signal
                    ),
                    pinplan_solver::AssignmentKind::Reserved => println!(
                        "    {:<18} {:<6}",
                        "<reserved>".dimmed(),
                        a.pin.dimmed()
                    ),
                }
            }
        }
    }

    let st = &result.statistics;
    println!(
        "\nsearched {} of ~{} assignment(s), {} combination check(s), {} ms",
        st.evaluated_combinations, st.total_combinations, st.config_combinations, st.solve_time_ms
    );
    for (solver, sub) in &st.per_solver {
        println!(
            "  {:<18} {} valid, {} evaluated, {} ms",
            solver, sub.valid_solutions, sub.evaluated_combinations, sub.solve_time_ms
        );
    }
}

fn print_solver_error(e: &SolverError) {
    let loc = e.loc.map(|l| l.to_string());
    let mut message = e.message.clone();
    if let Some(tag) = &e.source_tag {
        message = format!("[{}] {}", tag, message);
    }
    print_diag(e.severity, loc, &message);
    if let Some(partial) = &e.partial_solution {
        eprintln!("  deepest partial assignment:");
        for a in partial {
            eprintln!("    {}.{} = {} ({})", a.port, a.channel, a.pin, a.signal);
        }
    }
}

fn print_diag(severity: Severity, loc: Option<String>, message: &str) {
    let tag = match severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
    };
    match loc {
        Some(loc) => eprintln!("{}: {}: {}", loc, tag, message),
        None => eprintln!("{}: {}", tag, message),
    }
}
