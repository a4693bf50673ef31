// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Accumulating diagnostics for the constraint-language pipeline.
//!
//! The lexer, parser, macro expander, and downstream semantic passes all
//! append to a shared [`Sink`] instead of returning `Result`, so a single
//! run reports as many problems as it can find. Only `Error`-severity
//! diagnostics suppress solving; warnings ride along with results.

use serde::Serialize;

/// A 1-based source position.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Loc {
    pub line: u32,
    pub col: u32,
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Diag {
    pub severity: Severity,
    pub message: String,
    pub loc: Option<Loc>,
}

impl std::fmt::Display for Diag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{}: {}: {}", loc, self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

#[derive(Debug, Default)]
pub struct Sink {
    diags: Vec<Diag>,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, loc: impl Into<Option<Loc>>, message: impl Into<String>) {
        self.diags.push(Diag {
            severity: Severity::Error,
            message: message.into(),
            loc: loc.into(),
        });
    }

    pub fn warning(&mut self, loc: impl Into<Option<Loc>>, message: impl Into<String>) {
        self.diags.push(Diag {
            severity: Severity::Warning,
            message: message.into(),
            loc: loc.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.diags.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn diags(&self) -> &[Diag] {
        &self.diags
    }

    pub fn into_diags(self) -> Vec<Diag> {
        self.diags
    }
}
