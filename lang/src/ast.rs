// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Abstract syntax for constraint programs.
//!
//! A parsed program is a flat list of top-level statements. Macro calls
//! survive parsing and are replaced by their bodies in a separate
//! expansion pass (see [`crate::expand`]); everything downstream of that
//! pass can assume config bodies contain only mappings and requires.

use crate::diag::Loc;

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Mcu(McuDecl),
    Reserve(ReserveDecl),
    Shared(SharedDecl),
    PinFix(PinDecl),
    Port(PortDecl),
    MacroDef(MacroDecl),
}

/// `mcu: STM32F103* | STM32F4*` — consumed by UI layers, ignored by the
/// solver.
#[derive(Clone, Debug)]
pub struct McuDecl {
    pub patterns: Vec<String>,
    pub loc: Loc,
}

/// `reserve: PA13, PA14` — pins withdrawn from all assignment.
#[derive(Clone, Debug)]
pub struct ReserveDecl {
    pub pins: Vec<String>,
    pub loc: Loc,
}

/// `shared: ADC*, DMA*_*` — peripheral instances matching any of these
/// patterns may be used by more than one port.
#[derive(Clone, Debug)]
pub struct SharedDecl {
    pub patterns: Vec<SignalPattern>,
    pub loc: Loc,
}

/// `pin PA4 = DAC1_OUT1` — hard-wires a pin to a raw signal name.
#[derive(Clone, Debug)]
pub struct PinDecl {
    pub pin: String,
    pub signal: String,
    pub loc: Loc,
}

#[derive(Clone, Debug)]
pub struct PortDecl {
    pub name: String,
    pub color: Option<String>,
    pub channels: Vec<ChannelDecl>,
    pub configs: Vec<ConfigDecl>,
    pub loc: Loc,
}

/// `channel TX @ PA9, PB6` — the pin list, when present, restricts the
/// channel to those pins (by raw name or canonical GPIO name).
#[derive(Clone, Debug)]
pub struct ChannelDecl {
    pub name: String,
    pub allowed_pins: Option<Vec<String>>,
    pub loc: Loc,
}

#[derive(Clone, Debug)]
pub struct ConfigDecl {
    pub name: String,
    pub items: Vec<ConfigItem>,
    pub loc: Loc,
}

#[derive(Clone, Debug)]
pub enum ConfigItem {
    Mapping(Mapping),
    Require(Require),
    Call(MacroCall),
}

/// `MOSI = SPI*_MOSI & GPIO[1-2]_*` — one signal expression per `&`-joined
/// term; a channel mapped through `N` terms occupies `N` distinct pins.
#[derive(Clone, Debug)]
pub struct Mapping {
    pub channel: String,
    pub exprs: Vec<SignalExpr>,
    pub loc: Loc,
}

/// `|`-joined pattern alternatives; candidates are merged across them.
#[derive(Clone, Debug)]
pub struct SignalExpr {
    pub alternatives: Vec<SignalPattern>,
}

#[derive(Clone, Debug)]
pub struct Require {
    pub expr: Expr,
    pub loc: Loc,
}

#[derive(Clone, Debug)]
pub struct MacroCall {
    pub name: String,
    pub args: Vec<MacroArg>,
    pub loc: Loc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MacroArg {
    Ident(String),
    Str(String),
}

impl std::fmt::Display for MacroArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MacroArg::Ident(s) => f.write_str(s),
            MacroArg::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MacroDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<ConfigItem>,
    pub loc: Loc,
}

/// A two-sided signal pattern, instance side and function side. `text`
/// preserves the spelling from the source for diagnostics.
#[derive(Clone, Debug)]
pub struct SignalPattern {
    pub instance: PatternPart,
    pub function: PatternPart,
    pub text: String,
    pub loc: Loc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatternPart {
    /// Exact match against the full value.
    Literal(String),
    /// `USART*` — prefix match, with peripheral-type aliasing.
    Wildcard(String),
    /// `*` — matches anything.
    Any,
    /// `TIM[1-3,8]` — `prefix + N` for N in `values`, nothing trailing.
    Range { prefix: String, values: Vec<u32> },
}

#[derive(Clone, Debug)]
pub enum Expr {
    Ident(String, Loc),
    Str(String, Loc),
    /// `PORT.CHANNEL` cross-port channel reference.
    Member { port: String, channel: String, loc: Loc },
    Call { name: String, args: Vec<Expr>, loc: Loc },
    Not(Box<Expr>, Loc),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        loc: Loc,
    },
}

impl Expr {
    pub fn loc(&self) -> Loc {
        match self {
            Expr::Ident(_, loc)
            | Expr::Str(_, loc)
            | Expr::Member { loc, .. }
            | Expr::Call { loc, .. }
            | Expr::Not(_, loc)
            | Expr::Binary { loc, .. } => *loc,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Or,
    Xor,
    And,
    Eq,
    Ne,
}
