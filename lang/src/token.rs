// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Indentation-sensitive lexer.
//!
//! The language is line-oriented: every non-blank, non-comment line ends in
//! a `Newline` token, and changes in leading whitespace produce balanced
//! `Indent`/`Dedent` pairs against an indent stack. Leading whitespace is
//! counted byte-for-byte; tabs and spaces are not normalized against each
//! other, so mixing them inconsistently is an indentation error.
//!
//! Identifier runs contain only letters and number runs only digits, and
//! `_` is its own token. A name like `USART1_TX` therefore lexes as four
//! tokens (`USART`, `1`, `_`, `TX`); the parser reassembles compound names
//! contextually, which is what lets it split signal patterns on `_`.

use crate::diag::{Loc, Sink};

/// Reserved words. `shared` is deliberately absent: it is an ordinary
/// identifier that the parser recognizes positionally at top level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kw {
    Mcu,
    Reserve,
    Pin,
    Port,
    Channel,
    Config,
    Require,
    Macro,
    Color,
}

impl Kw {
    fn from_word(s: &str) -> Option<Kw> {
        Some(match s {
            "mcu" => Kw::Mcu,
            "reserve" => Kw::Reserve,
            "pin" => Kw::Pin,
            "port" => Kw::Port,
            "channel" => Kw::Channel,
            "config" => Kw::Config,
            "require" => Kw::Require,
            "macro" => Kw::Macro,
            "color" => Kw::Color,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kw::Mcu => "mcu",
            Kw::Reserve => "reserve",
            Kw::Pin => "pin",
            Kw::Port => "port",
            Kw::Channel => "channel",
            Kw::Config => "config",
            Kw::Require => "require",
            Kw::Macro => "macro",
            Kw::Color => "color",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tok {
    Indent,
    Dedent,
    Newline,
    Ident(String),
    Int(u32),
    Str(String),
    Kw(Kw),
    Colon,
    Comma,
    Pipe,
    Plus,
    Assign,
    Amp,
    Caret,
    Bang,
    At,
    Star,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dash,
    Underscore,
    EqEq,
    BangEq,
}

impl Tok {
    /// The source text of the token, used when reassembling glob and
    /// signal-pattern spellings for diagnostics.
    pub fn text(&self) -> String {
        match self {
            Tok::Indent => "<indent>".to_string(),
            Tok::Dedent => "<dedent>".to_string(),
            Tok::Newline => "<newline>".to_string(),
            Tok::Ident(s) => s.clone(),
            Tok::Int(n) => n.to_string(),
            Tok::Str(s) => format!("\"{}\"", s),
            Tok::Kw(k) => k.as_str().to_string(),
            Tok::Colon => ":".to_string(),
            Tok::Comma => ",".to_string(),
            Tok::Pipe => "|".to_string(),
            Tok::Plus => "+".to_string(),
            Tok::Assign => "=".to_string(),
            Tok::Amp => "&".to_string(),
            Tok::Caret => "^".to_string(),
            Tok::Bang => "!".to_string(),
            Tok::At => "@".to_string(),
            Tok::Star => "*".to_string(),
            Tok::Dot => ".".to_string(),
            Tok::LParen => "(".to_string(),
            Tok::RParen => ")".to_string(),
            Tok::LBracket => "[".to_string(),
            Tok::RBracket => "]".to_string(),
            Tok::Dash => "-".to_string(),
            Tok::Underscore => "_".to_string(),
            Tok::EqEq => "==".to_string(),
            Tok::BangEq => "!=".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Spanned {
    pub tok: Tok,
    pub loc: Loc,
}

pub fn lex(src: &str, sink: &mut Sink) -> Vec<Spanned> {
    let mut out = Vec::new();
    let mut stack: Vec<usize> = vec![0];
    let mut line_no: u32 = 0;

    for line in src.lines() {
        line_no += 1;
        let body_start = line
            .find(|c| c != ' ' && c != '\t')
            .unwrap_or(line.len());
        let body = &line[body_start..];
        if body.is_empty() || body.starts_with('#') {
            continue;
        }

        let loc = Loc {
            line: line_no,
            col: body_start as u32 + 1,
        };
        let cur = *stack.last().unwrap();
        if body_start > cur {
            stack.push(body_start);
            out.push(Spanned {
                tok: Tok::Indent,
                loc,
            });
        } else if body_start < cur {
            while *stack.last().unwrap() > body_start {
                stack.pop();
                out.push(Spanned {
                    tok: Tok::Dedent,
                    loc,
                });
            }
            if *stack.last().unwrap() != body_start {
                sink.error(loc, "inconsistent indentation");
                // Resynchronize on the new depth so one bad line doesn't
                // cascade into errors on every following line.
                stack.push(body_start);
                out.push(Spanned {
                    tok: Tok::Indent,
                    loc,
                });
            }
        }

        lex_line(body, line_no, body_start, &mut out, sink);
        out.push(Spanned {
            tok: Tok::Newline,
            loc: Loc {
                line: line_no,
                col: line.len() as u32 + 1,
            },
        });
    }

    let eof = Loc {
        line: line_no + 1,
        col: 1,
    };
    while *stack.last().unwrap() > 0 {
        stack.pop();
        out.push(Spanned {
            tok: Tok::Dedent,
            loc: eof,
        });
    }
    out
}

fn lex_line(body: &str, line: u32, offset: usize, out: &mut Vec<Spanned>, sink: &mut Sink) {
    let bytes = body.as_bytes();
    let n = bytes.len();
    let mut i = 0;

    let mut push = |tok: Tok, at: usize| {
        out.push(Spanned {
            tok,
            loc: Loc {
                line,
                col: (offset + at) as u32 + 1,
            },
        });
    };

    while i < n {
        let at = i;
        let loc = Loc {
            line,
            col: (offset + at) as u32 + 1,
        };
        match bytes[i] {
            b' ' | b'\t' => {
                i += 1;
            }
            b'#' => break,
            b'"' => match body[i + 1..].find('"') {
                Some(rel) => {
                    push(Tok::Str(body[i + 1..i + 1 + rel].to_string()), at);
                    i += rel + 2;
                }
                None => {
                    sink.error(loc, "unterminated string literal");
                    push(Tok::Str(body[i + 1..].to_string()), at);
                    i = n;
                }
            },
            b'0'..=b'9' => {
                let start = i;
                while i < n && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                match body[start..i].parse::<u32>() {
                    Ok(v) => push(Tok::Int(v), at),
                    Err(_) => sink.error(
                        loc,
                        format!("number out of range: {}", &body[start..i]),
                    ),
                }
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < n && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let word = &body[start..i];
                match Kw::from_word(word) {
                    Some(k) => push(Tok::Kw(k), at),
                    None => push(Tok::Ident(word.to_string()), at),
                }
            }
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    push(Tok::EqEq, at);
                    i += 2;
                } else {
                    push(Tok::Assign, at);
                    i += 1;
                }
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    push(Tok::BangEq, at);
                    i += 2;
                } else {
                    push(Tok::Bang, at);
                    i += 1;
                }
            }
            b':' => {
                push(Tok::Colon, at);
                i += 1;
            }
            b',' => {
                push(Tok::Comma, at);
                i += 1;
            }
            b'|' => {
                push(Tok::Pipe, at);
                i += 1;
            }
            b'+' => {
                push(Tok::Plus, at);
                i += 1;
            }
            b'&' => {
                push(Tok::Amp, at);
                i += 1;
            }
            b'^' => {
                push(Tok::Caret, at);
                i += 1;
            }
            b'@' => {
                push(Tok::At, at);
                i += 1;
            }
            b'*' => {
                push(Tok::Star, at);
                i += 1;
            }
            b'.' => {
                push(Tok::Dot, at);
                i += 1;
            }
            b'(' => {
                push(Tok::LParen, at);
                i += 1;
            }
            b')' => {
                push(Tok::RParen, at);
                i += 1;
            }
            b'[' => {
                push(Tok::LBracket, at);
                i += 1;
            }
            b']' => {
                push(Tok::RBracket, at);
                i += 1;
            }
            b'-' => {
                push(Tok::Dash, at);
                i += 1;
            }
            b'_' => {
                push(Tok::Underscore, at);
                i += 1;
            }
            _ => {
                let c = body[i..].chars().next().unwrap();
                sink.error(loc, format!("unexpected character {:?}", c));
                i += c.len_utf8();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(src: &str) -> Vec<Tok> {
        let mut sink = Sink::new();
        let toks = lex(src, &mut sink);
        assert!(!sink.has_errors(), "unexpected errors: {:?}", sink.diags());
        toks.into_iter().map(|s| s.tok).collect()
    }

    #[test]
    fn compound_names_split() {
        assert_eq!(
            lex_ok("USART1_TX"),
            vec![
                Tok::Ident("USART".to_string()),
                Tok::Int(1),
                Tok::Underscore,
                Tok::Ident("TX".to_string()),
                Tok::Newline,
            ]
        );
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            lex_ok("port CMD:"),
            vec![
                Tok::Kw(Kw::Port),
                Tok::Ident("CMD".to_string()),
                Tok::Colon,
                Tok::Newline,
            ]
        );
        // `shared` is not a keyword; the parser treats it positionally.
        assert_eq!(
            lex_ok("shared"),
            vec![Tok::Ident("shared".to_string()), Tok::Newline]
        );
    }

    #[test]
    fn indent_dedent_balance() {
        let toks = lex_ok("port A:\n    channel TX\nreserve: PA0\n");
        let indents = toks.iter().filter(|t| **t == Tok::Indent).count();
        let dedents = toks.iter().filter(|t| **t == Tok::Dedent).count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1);
        // The dedent must come before the `reserve` keyword.
        let di = toks.iter().position(|t| *t == Tok::Dedent).unwrap();
        let ri = toks.iter().position(|t| *t == Tok::Kw(Kw::Reserve)).unwrap();
        assert!(di < ri);
    }

    #[test]
    fn dedent_at_eof() {
        let toks = lex_ok("port A:\n    channel TX\n        x = GPIO_A\n");
        let indents = toks.iter().filter(|t| **t == Tok::Indent).count();
        let dedents = toks.iter().filter(|t| **t == Tok::Dedent).count();
        assert_eq!(indents, 2);
        assert_eq!(dedents, 2);
    }

    #[test]
    fn inconsistent_dedent_reported() {
        let mut sink = Sink::new();
        lex("port A:\n        channel TX\n    channel RX\n", &mut sink);
        assert!(sink.has_errors());
        assert!(sink.diags()[0].message.contains("indentation"));
    }

    #[test]
    fn unterminated_string() {
        let mut sink = Sink::new();
        let toks = lex("config \"oops:\n", &mut sink);
        assert!(sink.has_errors());
        assert_eq!(sink.diags()[0].loc.unwrap().line, 1);
        // Lexing still produced a string token so the parser can continue.
        assert!(toks.iter().any(|t| matches!(t.tok, Tok::Str(_))));
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        assert_eq!(
            lex_ok("# header\n\nreserve: PA13 # trailing\n"),
            vec![
                Tok::Kw(Kw::Reserve),
                Tok::Colon,
                Tok::Ident("PA".to_string()),
                Tok::Int(13),
                Tok::Newline,
            ]
        );
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            lex_ok("a == b != !c"),
            vec![
                Tok::Ident("a".to_string()),
                Tok::EqEq,
                Tok::Ident("b".to_string()),
                Tok::BangEq,
                Tok::Bang,
                Tok::Ident("c".to_string()),
                Tok::Newline,
            ]
        );
    }
}
