// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Macro expansion.
//!
//! Replaces every macro call in a config body with the called macro's
//! body, substituting arguments for parameters. Substitution touches
//! channel names in mappings, bare identifiers in require expressions,
//! and arguments of nested calls; string literals and `port.channel`
//! references pass through untouched.

use indexmap::IndexMap;

use crate::ast::*;
use crate::diag::{Loc, Sink};
use crate::stdlib;

/// Transitive expansion is capped to keep pathological inputs from
/// chewing the whole deadline before solving even starts.
pub const MAX_EXPANSION_DEPTH: usize = 10;

/// Expands every config body in `prog`, merging local macro declarations
/// over the builtin library (local names win).
pub fn expand_program(prog: Program, sink: &mut Sink) -> Program {
    let mut macros: IndexMap<String, MacroDecl> = IndexMap::new();
    for m in stdlib::builtin_macros() {
        macros.insert(m.name.clone(), m);
    }
    for stmt in &prog.stmts {
        if let Stmt::MacroDef(m) = stmt {
            macros.insert(m.name.clone(), m.clone());
        }
    }

    let mut stmts = Vec::with_capacity(prog.stmts.len());
    for stmt in prog.stmts {
        match stmt {
            Stmt::Port(mut port) => {
                for cfg in &mut port.configs {
                    let items = std::mem::take(&mut cfg.items);
                    cfg.items = expand_items(items, &macros, &mut Vec::new(), 0, sink);
                }
                stmts.push(Stmt::Port(port));
            }
            other => stmts.push(other),
        }
    }
    Program { stmts }
}

fn expand_items(
    items: Vec<ConfigItem>,
    macros: &IndexMap<String, MacroDecl>,
    stack: &mut Vec<String>,
    depth: usize,
    sink: &mut Sink,
) -> Vec<ConfigItem> {
    let mut out = Vec::new();
    for item in items {
        match item {
            ConfigItem::Call(call) => {
                out.extend(expand_call(call, macros, stack, depth, sink))
            }
            other => out.push(other),
        }
    }
    out
}

fn expand_call(
    call: MacroCall,
    macros: &IndexMap<String, MacroDecl>,
    stack: &mut Vec<String>,
    depth: usize,
    sink: &mut Sink,
) -> Vec<ConfigItem> {
    let Some(decl) = macros.get(&call.name) else {
        sink.error(call.loc, format!("unknown macro '{}'", call.name));
        return Vec::new();
    };
    if decl.params.len() != call.args.len() {
        sink.error(
            call.loc,
            format!(
                "macro '{}' expects {} argument(s), got {}",
                call.name,
                decl.params.len(),
                call.args.len()
            ),
        );
        return Vec::new();
    }
    if stack.iter().any(|n| *n == call.name) {
        sink.error(
            call.loc,
            format!("recursive expansion of macro '{}'", call.name),
        );
        return Vec::new();
    }
    if depth >= MAX_EXPANSION_DEPTH {
        sink.error(
            call.loc,
            format!(
                "macro expansion nested deeper than {} levels",
                MAX_EXPANSION_DEPTH
            ),
        );
        return Vec::new();
    }

    let subst: IndexMap<&str, &MacroArg> = decl
        .params
        .iter()
        .map(|p| p.as_str())
        .zip(call.args.iter())
        .collect();
    let body: Vec<ConfigItem> = decl
        .body
        .iter()
        .map(|item| substitute_item(item, &subst, call.loc, sink))
        .collect();

    stack.push(call.name.clone());
    let out = expand_items(body, macros, stack, depth + 1, sink);
    stack.pop();
    out
}

fn substitute_item(
    item: &ConfigItem,
    subst: &IndexMap<&str, &MacroArg>,
    call_loc: Loc,
    sink: &mut Sink,
) -> ConfigItem {
    match item {
        ConfigItem::Mapping(m) => {
            let channel = match subst.get(m.channel.as_str()) {
                Some(MacroArg::Ident(s)) => (*s).clone(),
                Some(MacroArg::Str(_)) => {
                    sink.error(
                        call_loc,
                        format!(
                            "argument bound to '{}' must be a channel name, not a string",
                            m.channel
                        ),
                    );
                    m.channel.clone()
                }
                None => m.channel.clone(),
            };
            ConfigItem::Mapping(Mapping {
                channel,
                exprs: m.exprs.clone(),
                loc: call_loc,
            })
        }
        ConfigItem::Require(r) => ConfigItem::Require(Require {
            expr: substitute_expr(&r.expr, subst),
            loc: call_loc,
        }),
        ConfigItem::Call(c) => {
            let args = c
                .args
                .iter()
                .map(|a| match a {
                    MacroArg::Ident(s) => match subst.get(s.as_str()) {
                        Some(arg) => (*arg).clone(),
                        None => a.clone(),
                    },
                    MacroArg::Str(_) => a.clone(),
                })
                .collect();
            ConfigItem::Call(MacroCall {
                name: c.name.clone(),
                args,
                loc: call_loc,
            })
        }
    }
}

fn substitute_expr(expr: &Expr, subst: &IndexMap<&str, &MacroArg>) -> Expr {
    match expr {
        Expr::Ident(name, loc) => match subst.get(name.as_str()) {
            Some(MacroArg::Ident(s)) => Expr::Ident((*s).clone(), *loc),
            Some(MacroArg::Str(s)) => Expr::Str((*s).clone(), *loc),
            None => expr.clone(),
        },
        Expr::Str(..) | Expr::Member { .. } => expr.clone(),
        Expr::Call { name, args, loc } => Expr::Call {
            name: name.clone(),
            args: args.iter().map(|a| substitute_expr(a, subst)).collect(),
            loc: *loc,
        },
        Expr::Not(inner, loc) => Expr::Not(Box::new(substitute_expr(inner, subst)), *loc),
        Expr::Binary { op, lhs, rhs, loc } => Expr::Binary {
            op: *op,
            lhs: Box::new(substitute_expr(lhs, subst)),
            rhs: Box::new(substitute_expr(rhs, subst)),
            loc: *loc,
        },
    }
}
