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

use std::fmt::Display;

use bytes::Bytes;

use crate::loc::Pos;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Comment,
    Escaped,
    LineContinuation,
    ExpStart,
    ExpEnd,
    ExpVar,
    ExpStr,
    AssignOp,
    Colon,
    Nl,
    Tab,
    Whitespace,
    Keyword,
    Char,
    Eof,
}

impl TokenKind {
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Comment => "Comment",
            TokenKind::Escaped => "Escaped",
            TokenKind::LineContinuation => "LineContinuation",
            TokenKind::ExpStart => "ExpStart",
            TokenKind::ExpEnd => "ExpEnd",
            TokenKind::ExpVar => "ExpVar",
            TokenKind::ExpStr => "ExpStr",
            TokenKind::AssignOp => "AssignOp",
            TokenKind::Colon => "Colon",
            TokenKind::Nl => "Nl",
            TokenKind::Tab => "Tab",
            TokenKind::Whitespace => "Whitespace",
            TokenKind::Keyword => "Keyword",
            TokenKind::Char => "Char",
            TokenKind::Eof => "EOF",
        }
    }
}

/// One lexed token. Immutable once produced; the token vector is finite
/// and always ends with an `Eof` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Pos,
    pub value: Bytes,
}

impl Token {
    pub fn eof(pos: Pos) -> Token {
        Token {
            kind: TokenKind::Eof,
            pos,
            value: Bytes::new(),
        }
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }

    pub fn is_char(&self, c: u8) -> bool {
        self.kind == TokenKind::Char && self.value.as_ref() == [c]
    }

    /// Aligned form used by the token dump.
    pub fn string_align(&self) -> String {
        format!(
            "{:<16} {:>7} {:?}",
            self.kind.name(),
            self.pos.to_string(),
            String::from_utf8_lossy(&self.value)
        )
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {:?}",
            self.kind.name(),
            self.pos,
            String::from_utf8_lossy(&self.value)
        )
    }
}

/// Predicate-style token classification: a kind, optionally narrowed to a
/// set of literal values. The parser builds its stop conditions out of
/// static tables of these.
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    kind: TokenKind,
    values: &'static [&'static [u8]],
}

impl Matcher {
    pub const fn kind(kind: TokenKind) -> Matcher {
        Matcher { kind, values: &[] }
    }

    pub const fn value(kind: TokenKind, values: &'static [&'static [u8]]) -> Matcher {
        Matcher { kind, values }
    }

    pub fn is(&self, t: &Token) -> bool {
        if t.kind != self.kind {
            return false;
        }
        if self.values.is_empty() {
            return true;
        }
        self.values.iter().any(|v| t.value.as_ref() == *v)
    }
}

pub fn any_is(matchers: &[Matcher], t: &Token) -> bool {
    matchers.iter().any(|m| m.is(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(kind: TokenKind, value: &'static [u8]) -> Token {
        Token {
            kind,
            pos: Pos::default(),
            value: Bytes::from_static(value),
        }
    }

    #[test]
    fn test_matcher_kind() {
        let m = Matcher::kind(TokenKind::Nl);
        assert!(m.is(&tok(TokenKind::Nl, b"\n")));
        assert!(!m.is(&tok(TokenKind::Char, b"\n")));
    }

    #[test]
    fn test_matcher_values() {
        let m = Matcher::value(TokenKind::Char, &[b"-", b"+"]);
        assert!(m.is(&tok(TokenKind::Char, b"-")));
        assert!(m.is(&tok(TokenKind::Char, b"+")));
        assert!(!m.is(&tok(TokenKind::Char, b"*")));
    }

    #[test]
    fn test_any_is() {
        let ms = &[Matcher::kind(TokenKind::Nl), Matcher::kind(TokenKind::Colon)];
        assert!(any_is(ms, &tok(TokenKind::Colon, b":")));
        assert!(!any_is(ms, &tok(TokenKind::Tab, b"\t")));
    }
}
