// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hand-written recursive-descent parser.
//!
//! Errors never abort the parse: each one is recorded in the sink and the
//! parser skips to the next line (or the next top-level keyword) and keeps
//! going, so a single run surfaces every problem it can reach.

use crate::ast::*;
use crate::diag::{Loc, Sink};
use crate::token::{Kw, Spanned, Tok};

pub fn parse_tokens(toks: &[Spanned], sink: &mut Sink) -> Program {
    let mut p = Parser { toks, pos: 0, sink };
    let mut stmts = Vec::new();

    while let Some(tok) = p.peek().cloned() {
        let loc = p.loc();
        match tok {
            Tok::Newline => {
                p.bump();
            }
            Tok::Kw(Kw::Mcu) => {
                p.bump();
                if let Some(s) = p.parse_mcu_decl(loc) {
                    stmts.push(Stmt::Mcu(s));
                }
            }
            Tok::Kw(Kw::Reserve) => {
                p.bump();
                if let Some(s) = p.parse_reserve_decl(loc) {
                    stmts.push(Stmt::Reserve(s));
                }
            }
            Tok::Kw(Kw::Pin) => {
                p.bump();
                if let Some(s) = p.parse_pin_decl(loc) {
                    stmts.push(Stmt::PinFix(s));
                }
            }
            Tok::Kw(Kw::Port) => {
                p.bump();
                if let Some(s) = p.parse_port_decl(loc) {
                    stmts.push(Stmt::Port(s));
                }
            }
            Tok::Kw(Kw::Macro) => {
                p.bump();
                if let Some(s) = p.parse_macro_decl(loc) {
                    stmts.push(Stmt::MacroDef(s));
                }
            }
            Tok::Ident(ref name) if name == "shared" => {
                p.bump();
                if let Some(s) = p.parse_shared_decl(loc) {
                    stmts.push(Stmt::Shared(s));
                }
            }
            Tok::Indent => {
                p.sink.error(loc, "unexpected indented block");
                p.skip_block();
            }
            other => {
                p.sink
                    .error(loc, format!("unexpected '{}' at top level", other.text()));
                p.recover();
            }
        }
    }

    Program { stmts }
}

struct Parser<'a> {
    toks: &'a [Spanned],
    pos: usize,
    sink: &'a mut Sink,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|s| &s.tok)
    }

    fn peek_at(&self, k: usize) -> Option<&Tok> {
        self.toks.get(self.pos + k).map(|s| &s.tok)
    }

    fn loc(&self) -> Loc {
        match self.toks.get(self.pos) {
            Some(s) => s.loc,
            None => self
                .toks
                .last()
                .map(|s| s.loc)
                .unwrap_or(Loc { line: 1, col: 1 }),
        }
    }

    fn bump(&mut self) -> Option<Spanned> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, t: &Tok) -> bool {
        if self.peek() == Some(t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: &Tok, what: &str) -> bool {
        if self.eat(t) {
            true
        } else {
            let loc = self.loc();
            self.sink.error(loc, format!("expected {}", what));
            false
        }
    }

    /// Consumes the line-terminating newline; tolerates EOF.
    fn expect_newline(&mut self) {
        match self.peek() {
            Some(Tok::Newline) => {
                self.bump();
            }
            None => {}
            Some(other) => {
                let loc = self.loc();
                self.sink
                    .error(loc, format!("expected end of line, found '{}'", other.text()));
                self.recover_line();
            }
        }
    }

    /// Error recovery: skip to the next line, stopping early at block
    /// boundaries and top-level keywords so surrounding structure survives.
    fn recover(&mut self) {
        loop {
            match self.peek() {
                None | Some(Tok::Indent) | Some(Tok::Dedent) => break,
                Some(Tok::Newline) => {
                    self.bump();
                    break;
                }
                Some(Tok::Kw(
                    Kw::Mcu | Kw::Reserve | Kw::Pin | Kw::Port | Kw::Macro,
                )) => break,
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    /// Recovery inside an indented block: skip the rest of the line only.
    fn recover_line(&mut self) {
        loop {
            match self.peek() {
                None | Some(Tok::Indent) | Some(Tok::Dedent) => break,
                Some(Tok::Newline) => {
                    self.bump();
                    break;
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    /// Skips a whole indented block, tracking nesting.
    fn skip_block(&mut self) {
        debug_assert_eq!(self.peek(), Some(&Tok::Indent));
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            match tok {
                Tok::Indent => depth += 1,
                Tok::Dedent => {
                    depth -= 1;
                    if depth == 0 {
                        self.bump();
                        return;
                    }
                }
                _ => {}
            }
            self.bump();
        }
    }

    /// A name assembled from alternating ident/number/underscore tokens:
    /// `PA` `0` is the pin `PA0`, `DAC` `_` `OUT` is the channel `DAC_OUT`.
    fn parse_compound_name(&mut self) -> Option<String> {
        let mut name = match self.peek() {
            Some(Tok::Ident(id)) => {
                let id = id.clone();
                self.bump();
                id
            }
            _ => {
                let loc = self.loc();
                self.sink.error(loc, "expected an identifier");
                return None;
            }
        };
        loop {
            match self.peek() {
                Some(Tok::Int(n)) => {
                    name.push_str(&n.to_string());
                    self.bump();
                }
                Some(Tok::Underscore) => match self.peek_at(1) {
                    Some(Tok::Ident(_)) | Some(Tok::Int(_)) => {
                        self.bump();
                        name.push('_');
                        match self.bump().unwrap().tok {
                            Tok::Ident(id) => name.push_str(&id),
                            Tok::Int(n) => name.push_str(&n.to_string()),
                            _ => unreachable!(),
                        }
                    }
                    _ => break,
                },
                _ => break,
            }
        }
        Some(name)
    }

    /// A raw signal name, as spelled on the MCU: ident/number/underscore
    /// plus embedded dashes (`SYS_JTCK-SWCLK`).
    fn parse_raw_signal(&mut self) -> Option<String> {
        let mut name = String::new();
        loop {
            match self.peek() {
                Some(Tok::Ident(_)) | Some(Tok::Int(_)) | Some(Tok::Underscore)
                | Some(Tok::Dash) => {
                    name.push_str(&self.bump().unwrap().tok.text());
                }
                _ => break,
            }
        }
        if name.is_empty() {
            let loc = self.loc();
            self.sink.error(loc, "expected a signal name");
            return None;
        }
        Some(name)
    }

    fn parse_mcu_decl(&mut self, loc: Loc) -> Option<McuDecl> {
        if !self.expect(&Tok::Colon, "':' after 'mcu'") {
            self.recover();
            return None;
        }
        let mut patterns = Vec::new();
        loop {
            let mut glob = String::new();
            loop {
                match self.peek() {
                    Some(Tok::Ident(_)) | Some(Tok::Int(_)) | Some(Tok::Dash)
                    | Some(Tok::Underscore) | Some(Tok::Star) | Some(Tok::Plus)
                    | Some(Tok::Dot) => {
                        glob.push_str(&self.bump().unwrap().tok.text());
                    }
                    _ => break,
                }
            }
            if glob.is_empty() {
                let l = self.loc();
                self.sink.error(l, "expected an MCU name pattern");
                self.recover();
                return None;
            }
            patterns.push(glob);
            if !self.eat(&Tok::Pipe) {
                break;
            }
        }
        self.expect_newline();
        Some(McuDecl { patterns, loc })
    }

    fn parse_reserve_decl(&mut self, loc: Loc) -> Option<ReserveDecl> {
        if !self.expect(&Tok::Colon, "':' after 'reserve'") {
            self.recover();
            return None;
        }
        let mut pins = Vec::new();
        loop {
            match self.parse_compound_name() {
                Some(p) => pins.push(p),
                None => {
                    self.recover();
                    return None;
                }
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect_newline();
        Some(ReserveDecl { pins, loc })
    }

    fn parse_shared_decl(&mut self, loc: Loc) -> Option<SharedDecl> {
        if !self.expect(&Tok::Colon, "':' after 'shared'") {
            self.recover();
            return None;
        }
        let mut patterns = Vec::new();
        loop {
            match self.parse_shared_pattern() {
                Some(p) => patterns.push(p),
                None => {
                    self.recover();
                    return None;
                }
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect_newline();
        Some(SharedDecl { patterns, loc })
    }

    /// `shared:` patterns may omit the function side (`shared: ADC*`);
    /// a missing side matches any function.
    fn parse_shared_pattern(&mut self) -> Option<SignalPattern> {
        let loc = self.loc();
        let mut text = String::new();
        let instance = self.parse_pattern_part(&mut text)?;
        if self.eat(&Tok::Underscore) {
            text.push('_');
            let function = self.parse_pattern_part(&mut text)?;
            Some(SignalPattern {
                instance,
                function,
                text,
                loc,
            })
        } else {
            Some(SignalPattern {
                instance,
                function: PatternPart::Any,
                text,
                loc,
            })
        }
    }

    fn parse_pin_decl(&mut self, loc: Loc) -> Option<PinDecl> {
        let pin = match self.parse_compound_name() {
            Some(p) => p,
            None => {
                self.recover();
                return None;
            }
        };
        if !self.expect(&Tok::Assign, "'=' after pin name") {
            self.recover();
            return None;
        }
        let signal = match self.parse_raw_signal() {
            Some(s) => s,
            None => {
                self.recover();
                return None;
            }
        };
        self.expect_newline();
        Some(PinDecl { pin, signal, loc })
    }

    fn parse_port_decl(&mut self, loc: Loc) -> Option<PortDecl> {
        let name = match self.parse_compound_name() {
            Some(n) => n,
            None => {
                self.recover();
                return None;
            }
        };
        if !self.expect(&Tok::Colon, "':' after port name") {
            self.recover();
            return None;
        }
        self.expect_newline();
        if !self.expect(&Tok::Indent, "an indented port body") {
            self.recover();
            return None;
        }

        let mut channels = Vec::new();
        let mut configs = Vec::new();
        let mut color = None;
        loop {
            match self.peek() {
                None => break,
                Some(Tok::Dedent) => {
                    self.bump();
                    break;
                }
                Some(Tok::Newline) => {
                    self.bump();
                }
                Some(Tok::Kw(Kw::Channel)) => {
                    let l = self.loc();
                    self.bump();
                    if let Some(c) = self.parse_channel_decl(l) {
                        channels.push(c);
                    }
                }
                Some(Tok::Kw(Kw::Config)) => {
                    let l = self.loc();
                    self.bump();
                    if let Some(c) = self.parse_config_decl(l) {
                        configs.push(c);
                    }
                }
                Some(Tok::Kw(Kw::Color)) => {
                    self.bump();
                    match self.peek() {
                        Some(Tok::Str(s)) => {
                            color = Some(s.clone());
                            self.bump();
                            self.expect_newline();
                        }
                        _ => {
                            let l = self.loc();
                            self.sink.error(l, "expected a quoted color");
                            self.recover_line();
                        }
                    }
                }
                Some(other) => {
                    let l = self.loc();
                    self.sink.error(
                        l,
                        format!(
                            "expected 'channel', 'config', or 'color' in port, found '{}'",
                            other.text()
                        ),
                    );
                    if self.peek() == Some(&Tok::Indent) {
                        self.skip_block();
                    } else {
                        self.recover_line();
                    }
                }
            }
        }

        Some(PortDecl {
            name,
            color,
            channels,
            configs,
            loc,
        })
    }

    fn parse_channel_decl(&mut self, loc: Loc) -> Option<ChannelDecl> {
        let name = match self.parse_compound_name() {
            Some(n) => n,
            None => {
                self.recover_line();
                return None;
            }
        };
        let mut allowed_pins = None;
        if self.eat(&Tok::At) {
            let mut pins = Vec::new();
            loop {
                match self.parse_compound_name() {
                    Some(p) => pins.push(p),
                    None => {
                        self.recover_line();
                        return None;
                    }
                }
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            allowed_pins = Some(pins);
        }
        self.expect_newline();
        Some(ChannelDecl {
            name,
            allowed_pins,
            loc,
        })
    }

    fn parse_config_decl(&mut self, loc: Loc) -> Option<ConfigDecl> {
        let name = match self.peek() {
            Some(Tok::Str(s)) => {
                let s = s.clone();
                self.bump();
                s
            }
            _ => {
                let l = self.loc();
                self.sink.error(l, "expected a quoted configuration name");
                self.recover_line();
                return None;
            }
        };
        if !self.expect(&Tok::Colon, "':' after configuration name") {
            self.recover_line();
            return None;
        }
        self.expect_newline();
        let items = self.parse_config_body();
        Some(ConfigDecl { name, items, loc })
    }

    /// Shared by `config "...":` blocks and macro bodies.
    fn parse_config_body(&mut self) -> Vec<ConfigItem> {
        let mut items = Vec::new();
        if !self.expect(&Tok::Indent, "an indented block") {
            return items;
        }
        loop {
            match self.peek() {
                None => break,
                Some(Tok::Dedent) => {
                    self.bump();
                    break;
                }
                Some(Tok::Newline) => {
                    self.bump();
                }
                Some(Tok::Kw(Kw::Require)) => {
                    let loc = self.loc();
                    self.bump();
                    match self.parse_expr() {
                        Some(expr) => {
                            items.push(ConfigItem::Require(Require { expr, loc }));
                            self.expect_newline();
                        }
                        None => self.recover_line(),
                    }
                }
                Some(Tok::Ident(_)) => {
                    if let Some(item) = self.parse_mapping_or_call() {
                        items.push(item);
                    }
                }
                Some(other) => {
                    let l = self.loc();
                    self.sink.error(
                        l,
                        format!(
                            "expected a mapping, 'require', or macro call, found '{}'",
                            other.text()
                        ),
                    );
                    if self.peek() == Some(&Tok::Indent) {
                        self.skip_block();
                    } else {
                        self.recover_line();
                    }
                }
            }
        }
        items
    }

    fn parse_mapping_or_call(&mut self) -> Option<ConfigItem> {
        let loc = self.loc();
        let name = match self.parse_compound_name() {
            Some(n) => n,
            None => {
                self.recover_line();
                return None;
            }
        };
        match self.peek() {
            Some(Tok::LParen) => {
                self.bump();
                let mut args = Vec::new();
                if self.peek() != Some(&Tok::RParen) {
                    loop {
                        match self.peek() {
                            Some(Tok::Str(s)) => {
                                args.push(MacroArg::Str(s.clone()));
                                self.bump();
                            }
                            Some(Tok::Ident(_)) => match self.parse_compound_name() {
                                Some(n) => args.push(MacroArg::Ident(n)),
                                None => {
                                    self.recover_line();
                                    return None;
                                }
                            },
                            _ => {
                                let l = self.loc();
                                self.sink.error(l, "expected a macro argument");
                                self.recover_line();
                                return None;
                            }
                        }
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                }
                if !self.expect(&Tok::RParen, "')'") {
                    self.recover_line();
                    return None;
                }
                self.expect_newline();
                Some(ConfigItem::Call(MacroCall { name, args, loc }))
            }
            Some(Tok::Assign) => {
                self.bump();
                let mut exprs = Vec::new();
                loop {
                    match self.parse_signal_expr() {
                        Some(e) => exprs.push(e),
                        None => {
                            self.recover_line();
                            return None;
                        }
                    }
                    if !self.eat(&Tok::Amp) {
                        break;
                    }
                }
                self.expect_newline();
                Some(ConfigItem::Mapping(Mapping {
                    channel: name,
                    exprs,
                    loc,
                }))
            }
            _ => {
                let l = self.loc();
                self.sink
                    .error(l, format!("expected '=' or '(' after '{}'", name));
                self.recover_line();
                None
            }
        }
    }

    fn parse_macro_decl(&mut self, loc: Loc) -> Option<MacroDecl> {
        let name = match self.parse_compound_name() {
            Some(n) => n,
            None => {
                self.recover();
                return None;
            }
        };
        if !self.expect(&Tok::LParen, "'(' after macro name") {
            self.recover();
            return None;
        }
        let mut params = Vec::new();
        if self.peek() != Some(&Tok::RParen) {
            loop {
                match self.parse_compound_name() {
                    Some(p) => params.push(p),
                    None => {
                        self.recover();
                        return None;
                    }
                }
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        if !self.expect(&Tok::RParen, "')'") {
            self.recover();
            return None;
        }
        if !self.expect(&Tok::Colon, "':' after macro signature") {
            self.recover();
            return None;
        }
        self.expect_newline();
        let body = self.parse_config_body();
        Some(MacroDecl {
            name,
            params,
            body,
            loc,
        })
    }

    fn parse_signal_expr(&mut self) -> Option<SignalExpr> {
        let mut alternatives = Vec::new();
        loop {
            match self.parse_signal_pattern() {
                Some(p) => alternatives.push(p),
                None => return None,
            }
            if !self.eat(&Tok::Pipe) {
                break;
            }
        }
        Some(SignalExpr { alternatives })
    }

    fn parse_signal_pattern(&mut self) -> Option<SignalPattern> {
        let loc = self.loc();

        // `IN` / `OUT` alone are shorthand for "any assignable GPIO".
        if let Some(Tok::Ident(id)) = self.peek() {
            if (id == "IN" || id == "OUT")
                && !matches!(
                    self.peek_at(1),
                    Some(Tok::Underscore)
                        | Some(Tok::Star)
                        | Some(Tok::LBracket)
                        | Some(Tok::Int(_))
                )
            {
                let text = id.clone();
                self.bump();
                return Some(SignalPattern {
                    instance: PatternPart::Wildcard("GPIO".to_string()),
                    function: PatternPart::Any,
                    text,
                    loc,
                });
            }
        }

        let mut text = String::new();
        let instance = self.parse_pattern_part(&mut text)?;
        if !self.eat(&Tok::Underscore) {
            let l = self.loc();
            self.sink
                .error(l, "expected '_' between instance and function in signal pattern");
            return None;
        }
        text.push('_');
        let mut function = self.parse_pattern_part(&mut text)?;

        // Function-side literals may span further underscores (OTG_FS_DM).
        while self.peek() == Some(&Tok::Underscore) {
            let lit = match &mut function {
                PatternPart::Literal(s) => s,
                _ => break,
            };
            match self.peek_at(1) {
                Some(Tok::Ident(_)) | Some(Tok::Int(_)) => {
                    self.bump();
                    lit.push('_');
                    text.push('_');
                    let seg = self.bump().unwrap().tok.text();
                    lit.push_str(&seg);
                    text.push_str(&seg);
                    if let Some(Tok::Int(n)) = self.peek() {
                        let s = n.to_string();
                        self.bump();
                        lit.push_str(&s);
                        text.push_str(&s);
                    }
                    if self.peek() == Some(&Tok::Star) {
                        self.bump();
                        text.push('*');
                        function = PatternPart::Wildcard(match function {
                            PatternPart::Literal(s) => s,
                            _ => unreachable!(),
                        });
                    }
                }
                _ => break,
            }
        }

        Some(SignalPattern {
            instance,
            function,
            text,
            loc,
        })
    }

    fn parse_pattern_part(&mut self, text: &mut String) -> Option<PatternPart> {
        let prefix = match self.peek() {
            Some(Tok::Star) => {
                self.bump();
                text.push('*');
                return Some(PatternPart::Any);
            }
            Some(Tok::Ident(id)) => {
                let mut prefix = id.clone();
                self.bump();
                if let Some(Tok::Int(n)) = self.peek() {
                    prefix.push_str(&n.to_string());
                    self.bump();
                }
                prefix
            }
            Some(Tok::Int(n)) => {
                let s = n.to_string();
                self.bump();
                s
            }
            _ => {
                let l = self.loc();
                self.sink.error(l, "expected a signal pattern");
                return None;
            }
        };
        text.push_str(&prefix);

        match self.peek() {
            Some(Tok::Star) => {
                self.bump();
                text.push('*');
                Some(PatternPart::Wildcard(prefix))
            }
            Some(Tok::LBracket) => {
                self.bump();
                text.push('[');
                let mut values = Vec::new();
                loop {
                    let lo = match self.peek() {
                        Some(Tok::Int(n)) => {
                            let n = *n;
                            self.bump();
                            n
                        }
                        _ => {
                            let l = self.loc();
                            self.sink.error(l, "expected a number in range");
                            return None;
                        }
                    };
                    text.push_str(&lo.to_string());
                    if self.eat(&Tok::Dash) {
                        text.push('-');
                        let hi = match self.peek() {
                            Some(Tok::Int(n)) => {
                                let n = *n;
                                self.bump();
                                n
                            }
                            _ => {
                                let l = self.loc();
                                self.sink.error(l, "expected a number after '-' in range");
                                return None;
                            }
                        };
                        text.push_str(&hi.to_string());
                        if lo > hi {
                            let l = self.loc();
                            self.sink
                                .error(l, format!("range bounds out of order: {}-{}", lo, hi));
                            return None;
                        }
                        values.extend(lo..=hi);
                    } else {
                        values.push(lo);
                    }
                    if self.eat(&Tok::Comma) {
                        text.push(',');
                        continue;
                    }
                    break;
                }
                if !self.expect(&Tok::RBracket, "']'") {
                    return None;
                }
                text.push(']');
                Some(PatternPart::Range { prefix, values })
            }
            _ => Some(PatternPart::Literal(prefix)),
        }
    }

    fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_expr_prec(0)
    }

    /// Precedence climbing, low to high: `|` `^` `&` `== !=` then `!`.
    fn parse_expr_prec(&mut self, min: u8) -> Option<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let (op, prec) = match self.peek() {
                Some(Tok::Pipe) => (BinOp::Or, 0),
                Some(Tok::Caret) => (BinOp::Xor, 1),
                Some(Tok::Amp) => (BinOp::And, 2),
                Some(Tok::EqEq) => (BinOp::Eq, 3),
                Some(Tok::BangEq) => (BinOp::Ne, 3),
                _ => break,
            };
            if prec < min {
                break;
            }
            let loc = self.loc();
            self.bump();
            let rhs = self.parse_expr_prec(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                loc,
            };
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        if self.peek() == Some(&Tok::Bang) {
            let loc = self.loc();
            self.bump();
            Some(Expr::Not(Box::new(self.parse_unary()?), loc))
        } else {
            self.parse_primary()
        }
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let loc = self.loc();
        match self.peek().cloned() {
            Some(Tok::LParen) => {
                self.bump();
                let e = self.parse_expr()?;
                if !self.expect(&Tok::RParen, "')'") {
                    return None;
                }
                Some(e)
            }
            Some(Tok::Str(s)) => {
                self.bump();
                Some(Expr::Str(s, loc))
            }
            Some(Tok::Ident(_)) => {
                let name = self.parse_compound_name()?;
                match self.peek() {
                    Some(Tok::Dot) => {
                        self.bump();
                        let channel = self.parse_compound_name()?;
                        Some(Expr::Member {
                            port: name,
                            channel,
                            loc,
                        })
                    }
                    Some(Tok::LParen) => {
                        self.bump();
                        let mut args = Vec::new();
                        if self.peek() != Some(&Tok::RParen) {
                            loop {
                                args.push(self.parse_expr()?);
                                if !self.eat(&Tok::Comma) {
                                    break;
                                }
                            }
                        }
                        if !self.expect(&Tok::RParen, "')'") {
                            return None;
                        }
                        Some(Expr::Call { name, args, loc })
                    }
                    _ => Some(Expr::Ident(name, loc)),
                }
            }
            _ => {
                self.sink.error(loc, "expected an expression");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::lex;
    use indoc::indoc;

    fn parse_ok(src: &str) -> Program {
        let mut sink = Sink::new();
        let toks = lex(src, &mut sink);
        let prog = parse_tokens(&toks, &mut sink);
        assert!(!sink.has_errors(), "unexpected errors: {:?}", sink.diags());
        prog
    }

    fn parse_err(src: &str) -> (Program, Sink) {
        let mut sink = Sink::new();
        let toks = lex(src, &mut sink);
        let prog = parse_tokens(&toks, &mut sink);
        assert!(sink.has_errors(), "expected errors, got none");
        (prog, sink)
    }

    #[test]
    fn full_duplex_uart_port() {
        let prog = parse_ok(indoc! {"
            port CMD:
                channel TX
                channel RX
                config \"U\":
                    TX = USART*_TX
                    RX = USART*_RX
                    require same_instance(TX, RX)
        "});
        assert_eq!(prog.stmts.len(), 1);
        let Stmt::Port(port) = &prog.stmts[0] else {
            panic!("expected a port");
        };
        assert_eq!(port.name, "CMD");
        assert_eq!(port.channels.len(), 2);
        assert_eq!(port.configs.len(), 1);
        assert_eq!(port.configs[0].name, "U");
        assert_eq!(port.configs[0].items.len(), 3);

        let ConfigItem::Mapping(m) = &port.configs[0].items[0] else {
            panic!("expected a mapping");
        };
        assert_eq!(m.channel, "TX");
        assert_eq!(m.exprs.len(), 1);
        let pat = &m.exprs[0].alternatives[0];
        assert_eq!(pat.instance, PatternPart::Wildcard("USART".to_string()));
        assert_eq!(pat.function, PatternPart::Literal("TX".to_string()));
        assert_eq!(pat.text, "USART*_TX");
    }

    #[test]
    fn pin_names_reassembled() {
        let prog = parse_ok("reserve: PA13, PA14, PB3\n");
        let Stmt::Reserve(r) = &prog.stmts[0] else {
            panic!();
        };
        assert_eq!(r.pins, vec!["PA13", "PA14", "PB3"]);
    }

    #[test]
    fn pinned_signal() {
        let prog = parse_ok("pin PA4 = DAC1_OUT1\n");
        let Stmt::PinFix(p) = &prog.stmts[0] else {
            panic!();
        };
        assert_eq!(p.pin, "PA4");
        assert_eq!(p.signal, "DAC1_OUT1");
    }

    #[test]
    fn hyphenated_raw_signal() {
        let prog = parse_ok("pin PA14 = SYS_JTCK-SWCLK\n");
        let Stmt::PinFix(p) = &prog.stmts[0] else {
            panic!();
        };
        assert_eq!(p.signal, "SYS_JTCK-SWCLK");
    }

    #[test]
    fn shared_and_mcu_decls() {
        let prog = parse_ok("mcu: STM32F4* | STM32G4*\nshared: ADC*_*\n");
        let Stmt::Mcu(m) = &prog.stmts[0] else {
            panic!();
        };
        assert_eq!(m.patterns, vec!["STM32F4*", "STM32G4*"]);
        let Stmt::Shared(s) = &prog.stmts[1] else {
            panic!();
        };
        assert_eq!(s.patterns.len(), 1);
        assert_eq!(
            s.patterns[0].instance,
            PatternPart::Wildcard("ADC".to_string())
        );
    }

    #[test]
    fn shared_pattern_without_function_side() {
        let prog = parse_ok("shared: ADC*, DMA1\n");
        let Stmt::Shared(s) = &prog.stmts[0] else {
            panic!();
        };
        assert_eq!(s.patterns.len(), 2);
        assert_eq!(s.patterns[0].function, PatternPart::Any);
        assert_eq!(
            s.patterns[1].instance,
            PatternPart::Literal("DMA1".to_string())
        );
        assert_eq!(s.patterns[1].function, PatternPart::Any);
    }

    #[test]
    fn range_patterns_expand() {
        let prog = parse_ok(indoc! {"
            port T:
                channel C
                config \"t\":
                    C = TIM[1-3,8]_CH[1,2]
        "});
        let Stmt::Port(port) = &prog.stmts[0] else {
            panic!();
        };
        let ConfigItem::Mapping(m) = &port.configs[0].items[0] else {
            panic!();
        };
        let pat = &m.exprs[0].alternatives[0];
        assert_eq!(
            pat.instance,
            PatternPart::Range {
                prefix: "TIM".to_string(),
                values: vec![1, 2, 3, 8],
            }
        );
        assert_eq!(
            pat.function,
            PatternPart::Range {
                prefix: "CH".to_string(),
                values: vec![1, 2],
            }
        );
        assert_eq!(pat.text, "TIM[1-3,8]_CH[1,2]");
    }

    #[test]
    fn multi_pin_mapping_and_alternatives() {
        let prog = parse_ok(indoc! {"
            port S:
                channel MOSI
                config \"s\":
                    MOSI = SPI*_MOSI | QUADSPI*_IO0 & GPIO[1-2]_*
        "});
        let Stmt::Port(port) = &prog.stmts[0] else {
            panic!();
        };
        let ConfigItem::Mapping(m) = &port.configs[0].items[0] else {
            panic!();
        };
        // `&` separates terms; `|` binds tighter, inside a term.
        assert_eq!(m.exprs.len(), 2);
        assert_eq!(m.exprs[0].alternatives.len(), 2);
        assert_eq!(m.exprs[1].alternatives.len(), 1);
    }

    #[test]
    fn in_out_shorthand() {
        let prog = parse_ok(indoc! {"
            port L:
                channel LED
                config \"l\":
                    LED = OUT
        "});
        let Stmt::Port(port) = &prog.stmts[0] else {
            panic!();
        };
        let ConfigItem::Mapping(m) = &port.configs[0].items[0] else {
            panic!();
        };
        let pat = &m.exprs[0].alternatives[0];
        assert_eq!(pat.instance, PatternPart::Wildcard("GPIO".to_string()));
        assert_eq!(pat.function, PatternPart::Any);
    }

    #[test]
    fn channel_with_allowed_pins() {
        let prog = parse_ok(indoc! {"
            port P:
                channel TX @ PA9, PB6
        "});
        let Stmt::Port(port) = &prog.stmts[0] else {
            panic!();
        };
        assert_eq!(
            port.channels[0].allowed_pins,
            Some(vec!["PA9".to_string(), "PB6".to_string()])
        );
    }

    #[test]
    fn expression_precedence() {
        let prog = parse_ok(indoc! {"
            port P:
                channel A
                config \"c\":
                    A = GPIO*_*
                    require instance(A) == \"GPIO1\" | !type(A) != \"USART\" & gpio_port(A) == \"GPIO2\"
        "});
        let Stmt::Port(port) = &prog.stmts[0] else {
            panic!();
        };
        let ConfigItem::Require(r) = &port.configs[0].items[1] else {
            panic!();
        };
        // Top-level operator must be `|`, the loosest.
        let Expr::Binary { op, .. } = &r.expr else {
            panic!("expected binary expr");
        };
        assert_eq!(*op, BinOp::Or);
    }

    #[test]
    fn cross_port_member_access() {
        let prog = parse_ok(indoc! {"
            port P:
                channel A
                config \"c\":
                    A = GPIO*_*
                    require instance(A) != instance(OTHER.B)
        "});
        let Stmt::Port(port) = &prog.stmts[0] else {
            panic!();
        };
        let ConfigItem::Require(r) = &port.configs[0].items[1] else {
            panic!();
        };
        let Expr::Binary { rhs, .. } = &r.expr else {
            panic!();
        };
        let Expr::Call { args, .. } = rhs.as_ref() else {
            panic!();
        };
        assert!(matches!(
            &args[0],
            Expr::Member { port, channel, .. } if port == "OTHER" && channel == "B"
        ));
    }

    #[test]
    fn macro_decl_and_call() {
        let prog = parse_ok(indoc! {"
            macro duplex(a, b):
                a = USART*_TX
                b = USART*_RX
                require same_instance(a, b)

            port P:
                channel TX
                channel RX
                config \"u\":
                    duplex(TX, RX)
        "});
        assert_eq!(prog.stmts.len(), 2);
        let Stmt::MacroDef(m) = &prog.stmts[0] else {
            panic!();
        };
        assert_eq!(m.params, vec!["a", "b"]);
        assert_eq!(m.body.len(), 3);
        let Stmt::Port(port) = &prog.stmts[1] else {
            panic!();
        };
        let ConfigItem::Call(c) = &port.configs[0].items[0] else {
            panic!();
        };
        assert_eq!(c.name, "duplex");
        assert_eq!(
            c.args,
            vec![
                MacroArg::Ident("TX".to_string()),
                MacroArg::Ident("RX".to_string())
            ]
        );
    }

    #[test]
    fn error_recovery_keeps_later_statements() {
        let (prog, sink) = parse_err(indoc! {"
            port 123:
            reserve: PA0
        "});
        // The bad port is dropped, the reserve statement survives.
        assert_eq!(prog.stmts.len(), 1);
        assert!(matches!(prog.stmts[0], Stmt::Reserve(_)));
        assert_eq!(sink.diags().len(), 1);
    }

    #[test]
    fn error_recovery_inside_config() {
        let (prog, _sink) = parse_err(indoc! {"
            port P:
                channel A
                channel B
                config \"c\":
                    A = = USART*_TX
                    B = USART*_RX
        "});
        let Stmt::Port(port) = &prog.stmts[0] else {
            panic!();
        };
        // The bad mapping is dropped, the next one survives.
        assert_eq!(port.configs[0].items.len(), 1);
        let ConfigItem::Mapping(m) = &port.configs[0].items[0] else {
            panic!();
        };
        assert_eq!(m.channel, "B");
    }

    #[test]
    fn locations_are_recorded() {
        let prog = parse_ok("reserve: PA0\npin PA1 = TIM2_CH2\n");
        let Stmt::PinFix(p) = &prog.stmts[1] else {
            panic!();
        };
        assert_eq!(p.loc.line, 2);
    }
}
