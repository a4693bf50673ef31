// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Front end for the pin-assignment constraint language: lexer, parser,
//! AST, and macro expansion. All passes accumulate diagnostics in a
//! [`diag::Sink`] rather than failing fast.

pub mod ast;
pub mod diag;
pub mod expand;
pub mod parser;
pub mod stdlib;
pub mod token;

pub use diag::{Diag, Loc, Severity, Sink};

/// Lexes and parses `src` into a program, accumulating any problems in
/// `sink`. Macro calls are left in place; run [`expand::expand_program`]
/// before handing the result to a solver.
pub fn parse(src: &str, sink: &mut Sink) -> ast::Program {
    let toks = token::lex(src, sink);
    parser::parse_tokens(&toks, sink)
}
