// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `require` expression evaluation.
//!
//! Expressions evaluate to a truth value or a string. Strings come from
//! string literals, bare identifiers (which stand for their own name),
//! and the channel query functions; `==`/`!=` compare strings when both
//! sides are strings, everything else coerces to truth. A trailing
//! string-literal argument to a query function acts as a normalized-type
//! filter on the channel's assignments.
//!
//! `same_instance` over an empty filtered set is vacuously true: the set
//! of distinct instances is empty, and an empty set has at most one
//! element. Callers relying on the opposite should filter channels
//! explicitly.

use std::collections::HashMap;

use pinplan_lang::ast::{BinOp, Expr};
use pinplan_mcu::split_instance;

use crate::context::Context;

pub const KNOWN_FUNCTIONS: &[&str] = &[
    "same_instance",
    "diff_instance",
    "instance",
    "type",
    "gpio_pin",
    "gpio_port",
];

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
        }
    }
}

/// One channel assignment as seen by require evaluation. Instance-only
/// views (no pin) appear during two-phase instance search.
#[derive(Clone, Debug)]
pub struct AssignView {
    pub pin: Option<usize>,
    pub instance: usize,
    pub peripheral: String,
}

/// Channel assignments visible to one evaluation: either a single config
/// under eager checking, or one full config combination.
pub struct EvalScope<'c> {
    ctx: &'c Context<'c>,
    channels: HashMap<(usize, String), Vec<AssignView>>,
}

impl<'c> EvalScope<'c> {
    pub fn new(ctx: &'c Context<'c>) -> Self {
        EvalScope {
            ctx,
            channels: HashMap::new(),
        }
    }

    pub fn add(&mut self, port: usize, channel: &str, view: AssignView) {
        self.channels
            .entry((port, channel.to_string()))
            .or_default()
            .push(view);
    }

    fn assignments(&self, port: usize, channel: &str) -> &[AssignView] {
        self.channels
            .get(&(port, channel.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn eval(&self, expr: &Expr, current_port: usize) -> Value {
        match expr {
            Expr::Str(s, _) => Value::Str(s.clone()),
            Expr::Ident(name, _) => Value::Str(name.clone()),
            Expr::Member { port, channel, .. } => {
                Value::Str(format!("{}.{}", port, channel))
            }
            Expr::Not(inner, _) => Value::Bool(!self.eval(inner, current_port).truthy()),
            Expr::Binary { op, lhs, rhs, .. } => {
                let l = self.eval(lhs, current_port);
                let r = self.eval(rhs, current_port);
                match op {
                    BinOp::Or => Value::Bool(l.truthy() || r.truthy()),
                    BinOp::Xor => Value::Bool(l.truthy() != r.truthy()),
                    BinOp::And => Value::Bool(l.truthy() && r.truthy()),
                    BinOp::Eq => Value::Bool(values_equal(&l, &r)),
                    BinOp::Ne => Value::Bool(!values_equal(&l, &r)),
                }
            }
            Expr::Call { name, args, .. } => self.eval_call(name, args, current_port),
        }
    }

    fn eval_call(&self, name: &str, args: &[Expr], current_port: usize) -> Value {
        // A trailing string literal is a type filter, not a channel.
        let (channel_args, type_filter) = match args.last() {
            Some(Expr::Str(s, _)) => (&args[..args.len() - 1], Some(s.as_str())),
            _ => (args, None),
        };

        let mut per_channel: Vec<Vec<&AssignView>> = Vec::new();
        for arg in channel_args {
            let views = match arg {
                Expr::Ident(ch, _) => self.assignments(current_port, ch),
                Expr::Member { port, channel, .. } => match self.ctx.port_index(port) {
                    Some(pi) => self.assignments(pi, channel),
                    None => &[],
                },
                // Anything else filters to nothing rather than panicking;
                // validation warned about it already.
                _ => &[],
            };
            per_channel.push(
                views
                    .iter()
                    .filter(|v| type_filter.map_or(true, |t| v.peripheral == t))
                    .collect(),
            );
        }

        match name {
            "same_instance" => {
                let mut distinct: Vec<usize> = Vec::new();
                for views in &per_channel {
                    for v in views {
                        if !distinct.contains(&v.instance) {
                            distinct.push(v.instance);
                        }
                    }
                }
                Value::Bool(distinct.len() <= 1)
            }
            "diff_instance" => {
                // Multi-pin channels may repeat their own instance; only
                // repeats across channels make the list non-distinct.
                let mut seen: Vec<usize> = Vec::new();
                for views in &per_channel {
                    let mut mine: Vec<usize> = Vec::new();
                    for v in views {
                        if !mine.contains(&v.instance) {
                            mine.push(v.instance);
                        }
                    }
                    for inst in mine {
                        if seen.contains(&inst) {
                            return Value::Bool(false);
                        }
                        seen.push(inst);
                    }
                }
                Value::Bool(true)
            }
            "instance" => Value::Str(
                self.first(&per_channel)
                    .map(|v| self.ctx.instance_name(v.instance).to_string())
                    .unwrap_or_default(),
            ),
            "type" => Value::Str(
                self.first(&per_channel)
                    .map(|v| v.peripheral.clone())
                    .unwrap_or_default(),
            ),
            "gpio_pin" => Value::Str(
                self.first(&per_channel)
                    .and_then(|v| v.pin)
                    .map(|p| self.ctx.mcu.pins[p].name.clone())
                    .unwrap_or_default(),
            ),
            "gpio_port" => Value::Str(
                self.first(&per_channel)
                    .and_then(|v| v.pin)
                    .and_then(|p| self.ctx.mcu.pins[p].gpio_letter())
                    .map(|letter| {
                        format!(
                            "GPIO{}",
                            letter as u32 - 'A' as u32 + pinplan_mcu::GPIO_PORT_BASE
                        )
                    })
                    .unwrap_or_default(),
            ),
            // Unknown names were rejected during validation; evaluating
            // one anyway yields an empty string, which is falsy.
            _ => Value::Str(String::new()),
        }
    }

    fn first<'a>(&self, per_channel: &'a [Vec<&'a AssignView>]) -> Option<&'a AssignView> {
        per_channel.first().and_then(|v| v.first().copied())
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => l.truthy() == r.truthy(),
    }
}

/// True if the expression references another port via `port.channel`.
/// Eager config-boundary checks skip such expressions; they are only
/// decided during final per-combination evaluation.
pub fn references_other_port(expr: &Expr) -> bool {
    match expr {
        Expr::Member { .. } => true,
        Expr::Ident(..) | Expr::Str(..) => false,
        Expr::Not(inner, _) => references_other_port(inner),
        Expr::Call { args, .. } => args.iter().any(references_other_port),
        Expr::Binary { lhs, rhs, .. } => {
            references_other_port(lhs) || references_other_port(rhs)
        }
    }
}

/// True if evaluating the expression needs concrete pins. Instance-only
/// search phases skip such expressions; full search re-checks them.
pub fn depends_on_pins(expr: &Expr) -> bool {
    match expr {
        Expr::Call { name, args, .. } => {
            name == "gpio_pin" || name == "gpio_port" || args.iter().any(depends_on_pins)
        }
        Expr::Ident(..) | Expr::Str(..) | Expr::Member { .. } => false,
        Expr::Not(inner, _) => depends_on_pins(inner),
        Expr::Binary { lhs, rhs, .. } => depends_on_pins(lhs) || depends_on_pins(rhs),
    }
}

/// Builds an [`AssignView`] from an interned instance id alone, for
/// two-phase instance search.
pub fn instance_only_view(ctx: &Context<'_>, instance: usize) -> AssignView {
    let (peripheral, _) = split_instance(ctx.instance_name(instance));
    AssignView {
        pin: None,
        instance,
        peripheral,
    }
}
