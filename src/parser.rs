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

//! Hand-written recursive-descent parser over the token vector.
//!
//! One mutable cursor, no backtracking beyond `peekn(0)`/`peekn(1)`. The
//! same character means different things depending on position (`:` is a
//! target separator at the root, a pattern-substitution marker inside
//! `$(...)`), so each routine carries its own stop set. Runs of comment
//! tokens are buffered and attached to the next node parsed; a blank line
//! detaches them.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use bytes::{BufMut, Bytes, BytesMut};

use crate::ast::{AssignOp, Node, NodeKind};
use crate::lexer::tokenize;
use crate::loc::Pos;
use crate::token::{Matcher, Token, TokenKind, any_is};
use crate::trace_err;

const CHAR_SPACE: Matcher = Matcher::value(TokenKind::Char, &[b" "]);
const NL_STOP: &[Matcher] = &[Matcher::kind(TokenKind::Nl)];
const ROOT_STOP: &[Matcher] = &[
    Matcher::kind(TokenKind::Nl),
    Matcher::kind(TokenKind::Colon),
    Matcher::kind(TokenKind::AssignOp),
];
const DEPS_STOP: &[Matcher] = &[
    CHAR_SPACE,
    Matcher::kind(TokenKind::Nl),
    Matcher::kind(TokenKind::Colon),
];
const EXP_HEAD_STOP: &[Matcher] = &[
    Matcher::value(TokenKind::Char, &[b" ", b"\t", b"\n", b":"]),
    Matcher::kind(TokenKind::Nl),
];
const EXP_ARG_STOP: &[Matcher] = &[Matcher::value(TokenKind::Char, &[b","])];
const EXP_PAT_STOP: &[Matcher] = &[Matcher::value(TokenKind::Char, &[b"="])];
const COMMA_STOP: &[Matcher] = &[Matcher::value(TokenKind::Char, &[b","])];
const RPAREN_STOP: &[Matcher] = &[Matcher::value(TokenKind::Char, &[b")"])];
const NO_STOP: &[Matcher] = &[];

/// Parse a buffer into a single node, or a `Nodes` sequence when the
/// input has several top-level items.
pub fn parse_bytes(buf: Bytes) -> Result<Arc<Node>> {
    let mut p = Parser::new(tokenize(buf));
    let mut nodes = p.parse_nodes()?;
    Ok(if nodes.len() == 1 {
        nodes.pop().unwrap()
    } else {
        Arc::new(Node::new(NodeKind::Nodes(nodes)))
    })
}

/// Parse a makefile on disk into a `File` node. A read failure keeps its
/// `std::io::Error` in the chain so include fallback can tell not-found
/// apart from real I/O errors.
pub fn parse_file(path: &[u8]) -> Result<Arc<Node>> {
    let buf = std::fs::read(OsStr::from_bytes(path))
        .with_context(|| String::from_utf8_lossy(path).into_owned())?;
    let mut p = Parser::new(tokenize(Bytes::from(buf)));
    let nodes = p.parse_nodes()?;
    Ok(Arc::new(Node::new(NodeKind::File {
        path: Bytes::copy_from_slice(path),
        nodes,
    })))
}

pub struct Parser {
    tokens: Vec<Token>,
    c: usize,
    last_comments: Vec<Bytes>,
    nil: Token,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Parser {
        Parser {
            tokens,
            c: 0,
            last_comments: Vec::new(),
            nil: Token::eof(Pos::default()),
        }
    }

    pub fn parse_nodes(&mut self) -> Result<Vec<Arc<Node>>> {
        let mut nodes = Vec::new();
        while let Some(n) = self.root()? {
            nodes.push(n);
        }
        Ok(nodes)
    }

    fn peekn(&self, i: usize) -> &Token {
        self.tokens.get(self.c + i).unwrap_or(&self.nil)
    }

    fn peek(&self) -> &Token {
        self.peekn(0)
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.c < self.tokens.len() {
            self.c += 1;
        }
        t
    }

    fn eat(&mut self, m: Matcher) -> bool {
        if m.is(self.peek()) {
            self.advance();
            return true;
        }
        false
    }

    fn eatall(&mut self, ms: &[Matcher]) {
        while any_is(ms, self.peek()) {
            self.advance();
        }
    }

    fn ut(&self, t: &Token) -> anyhow::Error {
        anyhow!("unhandled token {t}")
    }

    fn traced<T>(
        &mut self,
        name: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        f(self).map_err(|e| trace_err::wrap(name, e))
    }

    /// Literal text of the tokens in `[start, end)`, as the lexer saw it.
    fn text_between(&self, start: usize, end: usize) -> Bytes {
        let mut b = BytesMut::new();
        for t in &self.tokens[start..end] {
            b.put_slice(&t.value);
        }
        b.freeze()
    }

    fn attach(&mut self, mut node: Node) -> Arc<Node> {
        if !self.last_comments.is_empty() {
            node.comments = std::mem::take(&mut self.last_comments);
        }
        Arc::new(node)
    }

    fn root(&mut self) -> Result<Option<Arc<Node>>> {
        self.traced("root", |p| p.root_inner())
    }

    fn root_inner(&mut self) -> Result<Option<Arc<Node>>> {
        let t = self.peek().clone();

        if t.kind == TokenKind::Comment {
            self.advance();
            self.last_comments.push(t.value);
            // The comment line's own newline is part of the comment; only
            // a further blank line detaches the run.
            self.eat(Matcher::kind(TokenKind::Nl));
            return self.root_inner();
        }

        if t.is_char(b'-') || t.is_char(b'+') {
            self.advance();
            let Some(node) = self.root_inner()? else {
                return Err(self.ut(&t));
            };
            return Ok(Some(Arc::new(Node::new(NodeKind::Modifier {
                modifier: t.value[0],
                node,
            }))));
        }

        match t.kind {
            TokenKind::Eof => {
                self.advance();
                return Ok(None);
            }
            TokenKind::Nl => {
                // A blank line detaches pending comments.
                self.advance();
                self.last_comments.clear();
                return self.root_inner();
            }
            TokenKind::Keyword => {
                self.advance();
                let node = match t.value.as_ref() {
                    b"include" => self.include()?,
                    b"define" => self.define()?,
                    b"ifeq" | b"ifneq" => self.ifeq(&t)?,
                    b"ifdef" | b"ifndef" => self.ifdef(&t)?,
                    _ => return Err(self.ut(&t)),
                };
                return Ok(Some(self.attach(node)));
            }
            _ => {}
        }

        let Some(exp) = self.expr(false, ROOT_STOP)? else {
            return Err(self.ut(&t));
        };
        let opt = self.peek().clone();
        let node = match opt.kind {
            TokenKind::Nl => {
                self.advance();
                exp
            }
            TokenKind::Colon => {
                self.advance();
                self.target(exp)?
            }
            TokenKind::AssignOp => {
                self.advance();
                self.varass(exp, &opt)?
            }
            _ => exp,
        };
        Ok(Some(self.attach(node)))
    }

    /// Accumulate `Exp` and `Raw` parts until a stop token; a length-1
    /// expression collapses to its sole part.
    fn expr(&mut self, eat: bool, stop: &'static [Matcher]) -> Result<Option<Node>> {
        self.traced("expr", |p| p.expr_inner(eat, stop))
    }

    fn expr_inner(&mut self, eat: bool, stop: &'static [Matcher]) -> Result<Option<Node>> {
        let mut parts: Vec<Node> = Vec::new();
        loop {
            let t = self.peek();
            if t.is_eof() {
                break;
            }
            if any_is(stop, t) {
                if eat {
                    self.advance();
                }
                break;
            }
            if t.kind == TokenKind::Comment {
                self.advance();
                continue;
            }
            if let Some(exp) = self.exp()? {
                parts.push(exp);
                continue;
            }
            if let Some(raw) = self.raw(|t| {
                matches!(
                    t.kind,
                    TokenKind::ExpVar | TokenKind::ExpStart | TokenKind::ExpEnd
                ) || any_is(stop, t)
            }) {
                parts.push(raw);
                continue;
            }
            break;
        }
        Ok(match parts.len() {
            0 => None,
            1 => Some(parts.pop().unwrap()),
            _ => Some(Node::new(NodeKind::Expr(
                parts.into_iter().map(Arc::new).collect(),
            ))),
        })
    }

    /// Accumulate token text until `until` matches. Comments never leak
    /// into values.
    fn raw(&mut self, until: impl Fn(&Token) -> bool) -> Option<Node> {
        let mut acc = BytesMut::new();
        loop {
            let t = self.peek();
            if t.is_eof() || until(t) {
                break;
            }
            let t = self.advance();
            if t.kind == TokenKind::Comment {
                continue;
            }
            acc.put_slice(&t.value);
        }
        if acc.is_empty() {
            return None;
        }
        Some(Node::raw(acc.freeze()))
    }

    /// Read one `$(...)` or `$X` expansion, or return `None` if the cursor
    /// is not on one.
    fn exp(&mut self) -> Result<Option<Node>> {
        self.traced("exp", |p| p.exp_inner())
    }

    fn exp_inner(&mut self) -> Result<Option<Node>> {
        let t = self.peek().clone();

        if t.kind == TokenKind::ExpVar {
            // `$X` is shorthand for `$(X)`.
            self.advance();
            return Ok(Some(Node::new(NodeKind::Exp(vec![Arc::new(Node::raw(
                t.value.slice(1..),
            ))]))));
        }
        if t.kind != TokenKind::ExpStart {
            return Ok(None);
        }
        self.advance();

        let pt = self.peek().clone();
        if pt.is_eof() {
            bail!("unexpected eof");
        }
        if pt.kind == TokenKind::ExpEnd {
            self.advance();
            return Ok(Some(Node::new(NodeKind::Exp(vec![]))));
        }

        // The head terminates on whitespace (function arguments follow)
        // or `:` (pattern-substitution shorthand).
        let Some(head) = self.expr_inner(false, EXP_HEAD_STOP)? else {
            return Err(self.ut(&pt));
        };
        if self.peek().is_char(b':') {
            return self.patsubst(head);
        }
        let mut parts = vec![head];
        let term = self.peek().clone();
        match term.kind {
            TokenKind::Eof => bail!("unexpected eof"),
            TokenKind::ExpEnd => {
                self.advance();
                return Ok(Some(Node::new(NodeKind::Exp(
                    parts.into_iter().map(Arc::new).collect(),
                ))));
            }
            _ => {
                // Whitespace between the head and its first argument.
                self.advance();
            }
        }

        // Comma-separated arguments; a bare comma (leading, doubled or
        // trailing) passes an empty Raw argument.
        if self.peek().kind != TokenKind::ExpEnd {
            loop {
                let part = self
                    .expr_inner(false, EXP_ARG_STOP)?
                    .unwrap_or_else(Node::empty_raw);
                parts.push(part);
                let t = self.advance();
                match t.kind {
                    TokenKind::ExpEnd => break,
                    TokenKind::Eof => bail!("unexpected eof"),
                    _ if t.is_char(b',') => continue,
                    _ => return Err(self.ut(&t)),
                }
            }
        } else {
            self.advance();
        }

        Ok(Some(Node::new(NodeKind::Exp(
            parts.into_iter().map(Arc::new).collect(),
        ))))
    }

    /// `$(VAR:PATTERN=REPL)`, entered with the cursor on the `:`.
    fn patsubst(&mut self, name: Node) -> Result<Option<Node>> {
        self.advance(); // Eat :
        let pat = self
            .expr_inner(false, EXP_PAT_STOP)?
            .unwrap_or_else(Node::empty_raw);
        let t = self.advance();
        if !t.is_char(b'=') {
            return Err(self.ut(&t));
        }
        let subst = self
            .expr_inner(false, NO_STOP)?
            .unwrap_or_else(Node::empty_raw);
        let t = self.advance();
        if t.is_eof() {
            bail!("unexpected eof");
        }
        if t.kind != TokenKind::ExpEnd {
            return Err(self.ut(&t));
        }
        Ok(Some(Node::new(NodeKind::PatSubst {
            name: Arc::new(name),
            pat: Arc::new(pat),
            subst: Arc::new(subst),
        })))
    }

    fn varass(&mut self, name: Node, opt: &Token) -> Result<Node> {
        self.traced("varass", |p| {
            let Some(op) = AssignOp::parse(&opt.value) else {
                bail!("unhandled op {}", String::from_utf8_lossy(&opt.value));
            };
            p.eatall(&[CHAR_SPACE]);
            let start = p.c;
            let value = p.expr(true, NL_STOP)?.unwrap_or_else(Node::empty_raw);
            let mut end = p.c;
            if end > start && p.tokens[end - 1].kind == TokenKind::Nl {
                end -= 1;
            }
            let orig = p.text_between(start, end);
            Ok(Node::new(NodeKind::Var {
                name: Arc::new(name),
                op,
                value: Arc::new(value),
                orig,
            }))
        })
    }

    fn target(&mut self, name: Node) -> Result<Node> {
        self.traced("target", |p| {
            let (deps, static_rule) = p.targetdeps()?;
            if static_rule {
                let (prereq_pats, again) = p.targetdeps()?;
                if again {
                    let t = p.peek().clone();
                    return Err(p.ut(&t));
                }
                let commands = p.commands()?;
                return Ok(Node::new(NodeKind::StaticPatternTarget {
                    names: Arc::new(name),
                    target_pats: deps,
                    prereq_pats,
                    commands,
                }));
            }
            let commands = p.commands()?;
            Ok(Node::new(NodeKind::Target {
                name: Arc::new(name),
                deps,
                commands,
            }))
        })
    }

    /// Space-separated prerequisites up to end of line. Returns `true`
    /// when stopped by a second `:` (a static-pattern rule).
    fn targetdeps(&mut self) -> Result<(Vec<Arc<Node>>, bool)> {
        self.traced("targetdeps", |p| {
            let mut deps = Vec::new();
            loop {
                p.eatall(&[CHAR_SPACE]);
                let t = p.peek().clone();
                if t.is_eof() {
                    return Ok((deps, false));
                }
                match t.kind {
                    TokenKind::Nl => {
                        p.advance();
                        return Ok((deps, false));
                    }
                    TokenKind::Colon => {
                        p.advance();
                        return Ok((deps, true));
                    }
                    TokenKind::Comment => {
                        p.advance();
                        continue;
                    }
                    _ => {}
                }
                let Some(e) = p.expr(false, DEPS_STOP)? else {
                    return Err(p.ut(&t));
                };
                deps.push(Arc::new(e));
            }
        })
    }

    /// Tab-indented recipe lines; comments inside recipes are discarded.
    fn commands(&mut self) -> Result<Vec<Arc<Node>>> {
        let mut cmds = Vec::new();
        while self.peek().kind == TokenKind::Tab {
            self.advance();
            let cmd = self.expr(true, NL_STOP)?.unwrap_or_else(Node::empty_raw);
            cmds.push(Arc::new(cmd));
        }
        Ok(cmds)
    }

    fn include(&mut self) -> Result<Node> {
        self.traced("include", |p| {
            p.eatall(&[Matcher::kind(TokenKind::Whitespace)]);
            let path = p.expr(true, NL_STOP)?.unwrap_or_else(Node::empty_raw);
            Ok(Node::new(NodeKind::Include {
                path: Arc::new(path),
            }))
        })
    }

    fn ifeq(&mut self, kw: &Token) -> Result<Node> {
        self.traced("ifeq", |p| {
            p.eatall(&[Matcher::kind(TokenKind::Whitespace)]);
            let t = p.advance();
            if !t.is_char(b'(') {
                bail!("expected `(` at {t}");
            }
            let left = p.expr(true, COMMA_STOP)?.unwrap_or_else(Node::empty_raw);
            let right = p.expr(true, RPAREN_STOP)?.unwrap_or_else(Node::empty_raw);
            p.eatall(&[
                Matcher::kind(TokenKind::Whitespace),
                Matcher::kind(TokenKind::Comment),
                Matcher::kind(TokenKind::Nl),
            ]);
            let body = p.ifbody()?;
            Ok(Node::new(NodeKind::IfEq {
                expected: kw.value.as_ref() == b"ifeq",
                left: Arc::new(left),
                right: Arc::new(right),
                body,
            }))
        })
    }

    fn ifdef(&mut self, kw: &Token) -> Result<Node> {
        self.traced("ifdef", |p| {
            p.eatall(&[Matcher::kind(TokenKind::Whitespace)]);
            let ident = p.expect_ident()?;
            p.eatall(&[
                Matcher::kind(TokenKind::Whitespace),
                Matcher::kind(TokenKind::Comment),
                Matcher::kind(TokenKind::Nl),
            ]);
            let body = p.ifbody()?;
            Ok(Node::new(NodeKind::IfDef {
                expected: kw.value.as_ref() == b"ifdef",
                ident,
                body,
            }))
        })
    }

    fn ifbody(&mut self) -> Result<Vec<Arc<Node>>> {
        self.traced("ifbody", |p| {
            let mut body = Vec::new();
            loop {
                p.eatall(&[
                    Matcher::kind(TokenKind::Nl),
                    Matcher::kind(TokenKind::Comment),
                    Matcher::kind(TokenKind::Whitespace),
                ]);
                let t = p.peek().clone();
                if t.is_eof() {
                    bail!("unexpected eof");
                }
                if t.kind == TokenKind::Keyword && t.value.as_ref() == b"endif" {
                    p.advance();
                    return Ok(body);
                }
                match p.root()? {
                    Some(n) => body.push(n),
                    None => bail!("unexpected eof"),
                }
            }
        })
    }

    fn expect_ident(&mut self) -> Result<Bytes> {
        let raw = self.raw(|t| match t.kind {
            TokenKind::Char => t.value.as_ref() == b" " || t.value.as_ref() == b"\n",
            TokenKind::Keyword | TokenKind::Escaped => false,
            _ => true,
        });
        match raw {
            Some(Node {
                kind: NodeKind::Raw(b),
                ..
            }) => Ok(b),
            _ => bail!("expected identifier at {}", self.peek()),
        }
    }

    /// `define NAME` up to a line whose first non-whitespace token is
    /// `endef`; the body is raw text.
    fn define(&mut self) -> Result<Node> {
        self.traced("define", |p| {
            p.eatall(&[Matcher::kind(TokenKind::Whitespace)]);
            let name = p.expect_ident()?;
            p.eatall(&[
                Matcher::kind(TokenKind::Whitespace),
                Matcher::kind(TokenKind::Comment),
            ]);
            p.eat(Matcher::kind(TokenKind::Nl));

            let mut body = BytesMut::new();
            loop {
                let t = p.peek().clone();
                match t.kind {
                    TokenKind::Eof => bail!("unexpected eof"),
                    TokenKind::Keyword if t.value.as_ref() == b"endef" => {
                        p.advance();
                        break;
                    }
                    TokenKind::Whitespace => {
                        p.advance();
                    }
                    _ => {
                        p.advance();
                        body.put_slice(&t.value);
                    }
                }
            }
            let mut body = body.freeze();
            if body.ends_with(b"\n") {
                body = body.slice(..body.len() - 1);
            }
            Ok(Node::new(NodeKind::Define { name, body }))
        })
    }
}
