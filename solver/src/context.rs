// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared solve context.
//!
//! Built once per solve invocation and immutable afterwards: ports,
//! reserved and pinned pins, shared-instance patterns, solver variables
//! with their candidate lists, and the config-combination table. Pins,
//! ports, and peripheral instances are interned to dense indices here so
//! the trackers and fingerprints downstream work on integers.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use pinplan_lang::ast::{
    ConfigItem, Expr, PatternPart, Program, SignalPattern, Stmt,
};
use pinplan_lang::diag::{Loc, Sink};
use pinplan_lang::expand::expand_program;
use pinplan_mcu::pattern::find_matches;
use pinplan_mcu::{split_instance, Mcu};

use crate::require::KNOWN_FUNCTIONS;

/// Sentinel owner for reserved pins in the tracker.
pub const RESERVED_PORT: usize = usize::MAX;

#[derive(Clone, Debug)]
pub struct ConfigInfo {
    pub name: String,
    pub requires: Vec<Expr>,
}

#[derive(Clone, Debug)]
pub struct PortInfo {
    pub name: String,
    pub color: Option<String>,
    pub channels: Vec<String>,
    pub channel_allowed: Vec<Option<HashSet<String>>>,
    pub configs: Vec<ConfigInfo>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// Pin index in the MCU pin list.
    pub pin: usize,
    /// Signal index within that pin.
    pub signal: usize,
    /// Interned peripheral-instance id.
    pub instance: usize,
}

#[derive(Clone, Debug)]
pub struct Variable {
    pub port: usize,
    pub config: usize,
    pub channel: usize,
    /// Position among the `&`-joined terms of the mapping; terms of the
    /// same channel must land on distinct pins.
    pub expr_index: usize,
    pub candidates: Vec<Candidate>,
    /// Original pattern spelling, for diagnostics.
    pub pattern_text: String,
    pub loc: Loc,
}

#[derive(Clone, Debug)]
pub struct PinnedAssign {
    pub pin: usize,
    pub signal: String,
}

#[derive(Debug)]
pub struct Context<'m> {
    pub mcu: &'m Mcu,
    pub ports: Vec<PortInfo>,
    /// Sorted by ascending initial domain size (static MRV order).
    pub variables: Vec<Variable>,
    /// Reserved pin indices, pinned pins included.
    pub reserved: Vec<usize>,
    /// Names the user reserved explicitly (pinned pins not included);
    /// these become `<reserved>` markers on solutions.
    pub reserved_names: Vec<String>,
    pub pinned: Vec<PinnedAssign>,
    /// Interned peripheral-instance names.
    pub instances: Vec<String>,
    /// Per instance id: matches a `shared:` pattern.
    pub instance_shared: Vec<bool>,
    /// One entry per config combination: `(port, config)` choices.
    pub combos: Vec<Vec<(usize, usize)>>,
    /// Variables per `(port, config)`, in MRV order.
    pub config_vars: HashMap<(usize, usize), Vec<usize>>,
    /// Product of the initial domain sizes, saturating.
    pub total_space: u64,
}

impl<'m> Context<'m> {
    /// Expands macros and builds the context. Returns `None` when an
    /// error-severity diagnostic makes solving pointless; the sink then
    /// holds everything the caller needs to report.
    pub fn prepare(program: &Program, mcu: &'m Mcu, sink: &mut Sink) -> Option<Context<'m>> {
        let program = expand_program(program.clone(), sink);
        let mut cx = Builder {
            mcu,
            sink,
            ports: Vec::new(),
            reserved: Vec::new(),
            reserved_names: Vec::new(),
            pinned: Vec::new(),
            shared_patterns: Vec::new(),
            instances: Vec::new(),
            instance_ids: HashMap::new(),
            mappings: Vec::new(),
        };
        cx.collect(&program);
        cx.finish()
    }

    pub fn port_index(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }

    pub fn instance_name(&self, id: usize) -> &str {
        &self.instances[id]
    }

    /// For a search visiting variables in `order`, the position at which
    /// each `(port, config)` becomes fully assigned. Eager require checks
    /// fire when the search passes that position.
    pub fn last_var_positions(&self, order: &[usize]) -> HashMap<(usize, usize), usize> {
        let mut pos_of = vec![0usize; self.variables.len()];
        for (pos, &v) in order.iter().enumerate() {
            pos_of[v] = pos;
        }
        let mut out = HashMap::new();
        for (&key, vars) in &self.config_vars {
            if let Some(last) = vars.iter().map(|&v| pos_of[v]).max() {
                out.insert(key, last);
            }
        }
        out
    }
}

struct RawMapping {
    port: usize,
    config: usize,
    channel_name: String,
    exprs: Vec<Vec<SignalPattern>>,
    loc: Loc,
}

struct Builder<'m, 's> {
    mcu: &'m Mcu,
    sink: &'s mut Sink,
    ports: Vec<PortInfo>,
    reserved: Vec<usize>,
    reserved_names: Vec<String>,
    pinned: Vec<PinnedAssign>,
    shared_patterns: Vec<SignalPattern>,
    instances: Vec<String>,
    instance_ids: HashMap<String, usize>,
    mappings: Vec<RawMapping>,
}

impl<'m> Builder<'m, '_> {
    fn collect(&mut self, program: &Program) {
        for stmt in &program.stmts {
            match stmt {
                Stmt::Mcu(_) | Stmt::MacroDef(_) => {}
                Stmt::Reserve(r) => {
                    for name in &r.pins {
                        match self.mcu.pin_index(name) {
                            Some(i) => {
                                if !self.reserved.contains(&i) {
                                    self.reserved.push(i);
                                    self.reserved_names.push(name.clone());
                                }
                            }
                            None => self.sink.warning(
                                r.loc,
                                format!("reserved pin '{}' does not exist on {}", name, self.mcu.reference),
                            ),
                        }
                    }
                }
                Stmt::Shared(s) => {
                    self.shared_patterns.extend(s.patterns.iter().cloned());
                }
                Stmt::PinFix(p) => {
                    let Some(i) = self.mcu.pin_index(&p.pin) else {
                        self.sink.error(
                            p.loc,
                            format!("pinned pin '{}' does not exist on {}", p.pin, self.mcu.reference),
                        );
                        continue;
                    };
                    let listed = self.mcu.pins[i]
                        .signals
                        .iter()
                        .any(|s| s.name == p.signal);
                    if !listed {
                        self.sink.error(
                            p.loc,
                            format!("pin {} has no signal '{}'", p.pin, p.signal),
                        );
                        continue;
                    }
                    self.pinned.push(PinnedAssign {
                        pin: i,
                        signal: p.signal.clone(),
                    });
                    if !self.reserved.contains(&i) {
                        self.reserved.push(i);
                    }
                }
                Stmt::Port(decl) => {
                    if self.ports.iter().any(|p| p.name == decl.name) {
                        self.sink.error(
                            decl.loc,
                            format!("port '{}' is declared more than once", decl.name),
                        );
                        continue;
                    }
                    let port_idx = self.ports.len();
                    let mut info = PortInfo {
                        name: decl.name.clone(),
                        color: decl.color.clone(),
                        channels: Vec::new(),
                        channel_allowed: Vec::new(),
                        configs: Vec::new(),
                    };
                    for ch in &decl.channels {
                        if info.channels.contains(&ch.name) {
                            self.sink.warning(
                                ch.loc,
                                format!("channel '{}' is declared more than once", ch.name),
                            );
                            continue;
                        }
                        info.channels.push(ch.name.clone());
                        info.channel_allowed.push(
                            ch.allowed_pins
                                .as_ref()
                                .map(|pins| pins.iter().cloned().collect()),
                        );
                    }
                    for cfg in &decl.configs {
                        let cfg_idx = info.configs.len();
                        let mut requires = Vec::new();
                        for item in &cfg.items {
                            match item {
                                ConfigItem::Mapping(m) => {
                                    self.mappings.push(RawMapping {
                                        port: port_idx,
                                        config: cfg_idx,
                                        channel_name: m.channel.clone(),
                                        exprs: m
                                            .exprs
                                            .iter()
                                            .map(|e| e.alternatives.clone())
                                            .collect(),
                                        loc: m.loc,
                                    });
                                }
                                ConfigItem::Require(r) => requires.push(r.expr.clone()),
                                ConfigItem::Call(c) => {
                                    // Expansion either resolved or reported
                                    // these already; a survivor is a bug.
                                    self.sink.error(
                                        c.loc,
                                        format!("unexpanded macro call '{}'", c.name),
                                    );
                                }
                            }
                        }
                        info.configs.push(ConfigInfo {
                            name: cfg.name.clone(),
                            requires,
                        });
                    }
                    self.ports.push(info);
                }
            }
        }
    }

    fn intern_instance(&mut self, name: &str) -> usize {
        if let Some(&id) = self.instance_ids.get(name) {
            return id;
        }
        let id = self.instances.len();
        self.instances.push(name.to_string());
        self.instance_ids.insert(name.to_string(), id);
        id
    }

    fn finish(mut self) -> Option<Context<'m>> {
        // Resolve channel indices and build variables.
        let mut variables = Vec::new();
        let reserved_set: HashSet<usize> = self.reserved.iter().copied().collect();
        let mappings = std::mem::take(&mut self.mappings);
        for m in &mappings {
            let channel = match self.ports[m.port]
                .channels
                .iter()
                .position(|c| *c == m.channel_name)
            {
                Some(i) => i,
                None => {
                    self.sink.warning(
                        m.loc,
                        format!(
                            "channel '{}' is not declared in port {}",
                            m.channel_name, self.ports[m.port].name
                        ),
                    );
                    let port = &mut self.ports[m.port];
                    port.channels.push(m.channel_name.clone());
                    port.channel_allowed.push(None);
                    port.channels.len() - 1
                }
            };
            let allowed = self.ports[m.port].channel_allowed[channel].clone();
            for (expr_index, alternatives) in m.exprs.iter().enumerate() {
                let mut candidates: Vec<Candidate> = Vec::new();
                for pattern in alternatives {
                    for mt in find_matches(self.mcu, pattern, allowed.as_ref()) {
                        if reserved_set.contains(&mt.pin_index) {
                            continue;
                        }
                        let instance = self.intern_instance(&mt.signal.instance);
                        let cand = Candidate {
                            pin: mt.pin_index,
                            signal: mt.signal_index,
                            instance,
                        };
                        if !candidates
                            .iter()
                            .any(|c| c.pin == cand.pin && c.signal == cand.signal)
                        {
                            candidates.push(cand);
                        }
                    }
                }
                let pattern_text = alternatives
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" | ");
                variables.push(Variable {
                    port: m.port,
                    config: m.config,
                    channel,
                    expr_index,
                    candidates,
                    pattern_text,
                    loc: m.loc,
                });
            }
        }

        // Validate require expressions now that channel maps exist.
        let mapped: Vec<HashSet<String>> = self
            .ports
            .iter()
            .enumerate()
            .map(|(pi, _)| {
                variables
                    .iter()
                    .filter(|v| v.port == pi)
                    .map(|v| self.ports[pi].channels[v.channel].clone())
                    .collect()
            })
            .collect();
        for (pi, port) in self.ports.iter().enumerate() {
            for cfg in &port.configs {
                for req in &cfg.requires {
                    validate_require(req, pi, &self.ports, &mapped, self.sink);
                }
            }
        }

        // Every variable must have somewhere to go.
        let mut any_empty = false;
        for v in &variables {
            if v.candidates.is_empty() {
                any_empty = true;
                let port = &self.ports[v.port];
                self.sink.error(
                    v.loc,
                    format!(
                        "no signals match '{}' for {}.{} in config \"{}\"",
                        v.pattern_text,
                        port.name,
                        port.channels[v.channel],
                        port.configs[v.config].name
                    ),
                );
            }
        }
        if self.sink.has_errors() || any_empty {
            return None;
        }

        // Static MRV: smallest domain first, declaration order on ties.
        variables.sort_by_key(|v| v.candidates.len());

        let mut config_vars: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
        for (i, v) in variables.iter().enumerate() {
            config_vars.entry((v.port, v.config)).or_default().push(i);
        }

        let ports_with: Vec<usize> = self
            .ports
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.configs.is_empty())
            .map(|(i, _)| i)
            .collect();
        let combos: Vec<Vec<(usize, usize)>> = if ports_with.is_empty() {
            vec![Vec::new()]
        } else {
            ports_with
                .iter()
                .map(|&p| {
                    (0..self.ports[p].configs.len())
                        .map(|c| (p, c))
                        .collect::<Vec<_>>()
                })
                .multi_cartesian_product()
                .collect()
        };

        let instance_shared = self
            .instances
            .iter()
            .map(|name| {
                let (peripheral, _) = split_instance(name);
                self.shared_patterns
                    .iter()
                    .any(|p| instance_pattern_matches(&p.instance, name, &peripheral))
            })
            .collect();

        let total_space = variables
            .iter()
            .fold(1u64, |acc, v| acc.saturating_mul(v.candidates.len() as u64));

        Some(Context {
            mcu: self.mcu,
            ports: self.ports,
            variables,
            reserved: self.reserved,
            reserved_names: self.reserved_names,
            pinned: self.pinned,
            instances: self.instances,
            instance_shared,
            combos,
            config_vars,
            total_space,
        })
    }
}

/// Instance-side matching for `shared:` patterns, mirroring the matcher's
/// rules for candidate enumeration.
fn instance_pattern_matches(part: &PatternPart, instance: &str, peripheral: &str) -> bool {
    match part {
        PatternPart::Literal(lit) => instance == lit,
        PatternPart::Any => true,
        PatternPart::Wildcard(prefix) => {
            instance.starts_with(prefix.as_str())
                || peripheral.starts_with(prefix.as_str())
                || pinplan_mcu::reverse_aliases(prefix)
                    .iter()
                    .any(|alias| instance.starts_with(alias))
        }
        PatternPart::Range { prefix, values } => values
            .iter()
            .any(|v| instance == format!("{}{}", prefix, v)),
    }
}

fn validate_require(
    expr: &Expr,
    port: usize,
    ports: &[PortInfo],
    mapped: &[HashSet<String>],
    sink: &mut Sink,
) {
    match expr {
        Expr::Ident(name, loc) => {
            if !mapped[port].contains(name) {
                let mut msg = format!(
                    "'{}' does not name a mapped channel in port {}",
                    name, ports[port].name
                );
                if let Some(s) = suggest(name, mapped[port].iter()) {
                    msg.push_str(&format!("; did you mean '{}'?", s));
                }
                sink.warning(*loc, msg);
            }
        }
        Expr::Str(..) => {}
        Expr::Member {
            port: pname,
            channel,
            loc,
        } => match ports.iter().position(|p| p.name == *pname) {
            None => sink.error(*loc, format!("unknown port '{}'", pname)),
            Some(pi) => {
                if !mapped[pi].contains(channel) {
                    sink.warning(
                        *loc,
                        format!(
                            "'{}' does not name a mapped channel in port {}",
                            channel, pname
                        ),
                    );
                }
            }
        },
        Expr::Call { name, args, loc } => {
            if !KNOWN_FUNCTIONS.contains(&name.as_str()) {
                sink.error(*loc, format!("unknown function '{}' in require", name));
            }
            for arg in args {
                validate_require(arg, port, ports, mapped, sink);
            }
        }
        Expr::Not(inner, _) => validate_require(inner, port, ports, mapped, sink),
        Expr::Binary { lhs, rhs, .. } => {
            validate_require(lhs, port, ports, mapped, sink);
            validate_require(rhs, port, ports, mapped, sink);
        }
    }
}

/// Suggest only for very small edit distances; anything farther is more
/// likely a different name than a typo.
fn suggest<'a>(name: &str, options: impl Iterator<Item = &'a String>) -> Option<&'a str> {
    const MAX_DISTANCE: usize = 3;
    let mut scored: Vec<_> = options
        .filter_map(|s| {
            let d = strsim::damerau_levenshtein(name, s);
            (d <= MAX_DISTANCE).then_some((d, s.as_str()))
        })
        .collect();
    scored.sort();
    scored.first().map(|&(_, s)| s)
}
