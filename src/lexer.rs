/*
Copyright 2025 Google LLC

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

     https://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Mode-stacked scanner for makefile bytes.
//!
//! The token class of a byte depends on where it sits: at the root of a
//! line, inside `$(...)`, after a directive keyword, or inside a `define`
//! block. A stack of modes tracks that; the rule matched first in list
//! order wins. The scanner is total: any byte not claimed by a rule
//! becomes a one-byte `Char` token, and the stream always ends in `Eof`.

use bytes::Bytes;
use memchr::memchr;

use crate::loc::Pos;
use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Root,
    Exp,
    Keyword,
    DefineHeader,
    DefineBody,
}

const KEYWORDS: &[&[u8]] = &[
    b"endif", b"ifeq", b"ifneq", b"ifdef", b"ifndef", b"include", b"define", b"endef",
];

fn keyword_at(s: &[u8]) -> Option<usize> {
    KEYWORDS
        .iter()
        .find(|kw| s.starts_with(kw))
        .map(|kw| kw.len())
}

fn is_space_or_tab(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

pub struct Lexer {
    buf: Bytes,
    pos: usize,
    line: i32,
    col: i32,
    modes: Vec<Mode>,
    define_nest: i32,
}

impl Lexer {
    pub fn new(buf: Bytes) -> Lexer {
        Lexer {
            buf,
            pos: 0,
            line: 1,
            col: 1,
            modes: vec![Mode::Root],
            define_nest: 0,
        }
    }

    fn rest(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn here(&self) -> Pos {
        Pos {
            offset: self.pos,
            line: self.line,
            col: self.col,
        }
    }

    fn emit(&mut self, kind: TokenKind, len: usize) -> Token {
        let pos = self.here();
        let value = self.buf.slice(self.pos..self.pos + len);
        for c in value.iter() {
            if *c == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos += len;
        Token { kind, pos, value }
    }

    fn push(&mut self, mode: Mode) {
        self.modes.push(mode);
    }

    fn pop(&mut self) {
        if self.modes.len() > 1 {
            self.modes.pop();
        }
    }

    /// Rules shared by every mode except the raw `define` body:
    /// backslash-newline continuations, comments, and escapes.
    fn base(&mut self) -> Option<Token> {
        let s = self.rest();
        if s.starts_with(b"\\\n") || s.starts_with(b"\\\r\n") {
            let mut len = if s[1] == b'\r' { 3 } else { 2 };
            while s.get(len).is_some_and(|c| c.is_ascii_whitespace()) {
                len += 1;
            }
            return Some(self.emit(TokenKind::LineContinuation, len));
        }
        if s[0] == b'#' {
            let len = memchr(b'\n', s).unwrap_or(s.len());
            return Some(self.emit(TokenKind::Comment, len));
        }
        if s.starts_with(b"$$") {
            return Some(self.emit(TokenKind::Escaped, 2));
        }
        if s[0] == b'\\' && s.len() >= 2 {
            return Some(self.emit(TokenKind::Escaped, 2));
        }
        None
    }

    /// `$`-introduced constructs common to the Root, Exp and Keyword
    /// modes. `$$` never reaches here (claimed by `base`).
    fn dollar(&mut self) -> Option<Token> {
        let s = self.rest();
        let c = *s.get(1)?;
        match c {
            b'(' | b'{' => {
                let t = self.emit(TokenKind::ExpStart, 2);
                self.push(Mode::Exp);
                Some(t)
            }
            b'0'..=b'9' => {
                let mut len = 2;
                while s.get(len).is_some_and(|c| c.is_ascii_digit()) {
                    len += 1;
                }
                Some(self.emit(TokenKind::ExpVar, len))
            }
            c if c.is_ascii_alphabetic() || c == b'_' => Some(self.emit(TokenKind::ExpVar, 2)),
            _ => None,
        }
    }

    fn quoted(&mut self) -> Option<Token> {
        let s = self.rest();
        let q = s[0];
        let end = memchr(q, &s[1..])?;
        Some(self.emit(TokenKind::ExpStr, end + 2))
    }

    fn root(&mut self) -> Token {
        let s = self.rest();
        for op in [
            b"::=".as_slice(),
            b":=",
            b"?=",
            b"!=",
            b"+=",
            b"=",
        ] {
            if s.starts_with(op) {
                return self.emit(TokenKind::AssignOp, op.len());
            }
        }
        match s[0] {
            b':' => return self.emit(TokenKind::Colon, 1),
            b'\n' => return self.emit(TokenKind::Nl, 1),
            b'\t' => return self.emit(TokenKind::Tab, 1),
            b'$' => {
                if let Some(t) = self.dollar() {
                    return t;
                }
            }
            _ => {}
        }
        let s = self.rest();
        if let Some(len) = keyword_at(s) {
            let t = self.emit(TokenKind::Keyword, len);
            if t.value.as_ref() == b"define" {
                self.define_nest = 1;
                self.push(Mode::DefineHeader);
            } else {
                self.push(Mode::Keyword);
            }
            return t;
        }
        self.emit(TokenKind::Char, 1)
    }

    fn exp(&mut self) -> Token {
        let s = self.rest();
        match s[0] {
            b')' | b'}' => {
                let t = self.emit(TokenKind::ExpEnd, 1);
                self.pop();
                t
            }
            b'\'' | b'"' => match self.quoted() {
                Some(t) => t,
                None => self.emit(TokenKind::Char, 1),
            },
            b'$' => match self.dollar() {
                Some(t) => t,
                None => self.emit(TokenKind::Char, 1),
            },
            _ => self.emit(TokenKind::Char, 1),
        }
    }

    fn keyword(&mut self) -> Token {
        let s = self.rest();
        match s[0] {
            c if is_space_or_tab(c) => {
                let mut len = 1;
                while s.get(len).copied().is_some_and(is_space_or_tab) {
                    len += 1;
                }
                self.emit(TokenKind::Whitespace, len)
            }
            b'\n' => {
                let t = self.emit(TokenKind::Nl, 1);
                self.pop();
                t
            }
            b'\'' | b'"' => match self.quoted() {
                Some(t) => t,
                None => self.emit(TokenKind::Char, 1),
            },
            b'$' => match self.dollar() {
                Some(t) => t,
                None => self.emit(TokenKind::Char, 1),
            },
            _ => self.emit(TokenKind::Char, 1),
        }
    }

    fn define_header(&mut self) -> Token {
        let s = self.rest();
        match s[0] {
            c if is_space_or_tab(c) => {
                let mut len = 1;
                while s.get(len).copied().is_some_and(is_space_or_tab) {
                    len += 1;
                }
                self.emit(TokenKind::Whitespace, len)
            }
            b'\n' => {
                let t = self.emit(TokenKind::Nl, 1);
                *self.modes.last_mut().unwrap() = Mode::DefineBody;
                t
            }
            _ => self.emit(TokenKind::Char, 1),
        }
    }

    /// Inside a `define` body everything is raw text, one `Char` token per
    /// line, until the matching `endef`. Nested define/endef pairs stay in
    /// the body.
    fn define_body(&mut self) -> Token {
        let s = self.rest();
        let ws_len = s.iter().take_while(|c| is_space_or_tab(**c)).count();
        let after = &s[ws_len..];
        let directive_len = after
            .iter()
            .take_while(|c| !b" \t\n#".contains(*c))
            .count();
        let directive = &after[..directive_len];
        if directive == b"endef" && self.define_nest == 1 {
            if ws_len > 0 {
                return self.emit(TokenKind::Whitespace, ws_len);
            }
            self.define_nest = 0;
            let t = self.emit(TokenKind::Keyword, 5);
            self.pop();
            self.push(Mode::Keyword);
            return t;
        }
        let len = memchr(b'\n', s).map(|i| i + 1).unwrap_or(s.len());
        if directive == b"define" {
            self.define_nest += 1;
        } else if directive == b"endef" {
            self.define_nest -= 1;
        }
        self.emit(TokenKind::Char, len)
    }

    pub fn next_token(&mut self) -> Token {
        if self.pos >= self.buf.len() {
            return Token::eof(self.here());
        }
        let mode = *self.modes.last().unwrap();
        if mode != Mode::DefineBody
            && let Some(t) = self.base()
        {
            return t;
        }
        match mode {
            Mode::Root => self.root(),
            Mode::Exp => self.exp(),
            Mode::Keyword => self.keyword(),
            Mode::DefineHeader => self.define_header(),
            Mode::DefineBody => self.define_body(),
        }
    }
}

impl Iterator for Lexer {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.pos >= self.buf.len() {
            return None;
        }
        Some(self.next_token())
    }
}

/// Tokenize a whole buffer the way the parser consumes it: line
/// continuations are transparent, and the vector is `Eof`-terminated.
pub fn tokenize(buf: Bytes) -> Vec<Token> {
    let mut lex = Lexer::new(buf);
    let mut toks = Vec::new();
    loop {
        let t = lex.next_token();
        let eof = t.is_eof();
        if t.kind != TokenKind::LineContinuation {
            toks.push(t);
        }
        if eof {
            break;
        }
    }
    toks
}
