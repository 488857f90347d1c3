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
use std::sync::Arc;

use bytes::Bytes;

/// Assignment operators, in source form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Eq,
    ColonEq,
    ColonColonEq,
    QuestionEq,
    PlusEq,
    BangEq,
}

impl AssignOp {
    pub fn parse(s: &[u8]) -> Option<AssignOp> {
        match s {
            b"=" => Some(AssignOp::Eq),
            b":=" => Some(AssignOp::ColonEq),
            b"::=" => Some(AssignOp::ColonColonEq),
            b"?=" => Some(AssignOp::QuestionEq),
            b"+=" => Some(AssignOp::PlusEq),
            b"!=" => Some(AssignOp::BangEq),
            _ => None,
        }
    }
}

impl Display for AssignOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AssignOp::Eq => "=",
            AssignOp::ColonEq => ":=",
            AssignOp::ColonColonEq => "::=",
            AssignOp::QuestionEq => "?=",
            AssignOp::PlusEq => "+=",
            AssignOp::BangEq => "!=",
        })
    }
}

/// A parsed makefile construct plus the run of comment lines that
/// immediately preceded it (empty for most nodes).
#[derive(Debug, PartialEq)]
pub struct Node {
    pub comments: Vec<Bytes>,
    pub kind: NodeKind,
}

#[derive(Debug, PartialEq)]
pub enum NodeKind {
    /// A whole parsed file.
    File { path: Bytes, nodes: Vec<Arc<Node>> },
    /// A sequence of top-level nodes.
    Nodes(Vec<Arc<Node>>),
    /// Literal text.
    Raw(Bytes),
    /// Concatenation of parts.
    Expr(Vec<Arc<Node>>),
    /// A `$(...)` expansion; the first part is the variable or function
    /// name.
    Exp(Vec<Arc<Node>>),
    /// `$(VAR:PATTERN=REPL)` substitution shorthand.
    PatSubst {
        name: Arc<Node>,
        pat: Arc<Node>,
        subst: Arc<Node>,
    },
    /// A variable assignment. `orig` keeps the unparsed right-hand text
    /// so `$(value v)` can report it.
    Var {
        name: Arc<Node>,
        op: AssignOp,
        value: Arc<Node>,
        orig: Bytes,
    },
    /// `name: deps` followed by tab-indented commands.
    Target {
        name: Arc<Node>,
        deps: Vec<Arc<Node>>,
        commands: Vec<Arc<Node>>,
    },
    /// `names: target-pattern: prereq-patterns` with commands.
    StaticPatternTarget {
        names: Arc<Node>,
        target_pats: Vec<Arc<Node>>,
        prereq_pats: Vec<Arc<Node>>,
        commands: Vec<Arc<Node>>,
    },
    Include {
        path: Arc<Node>,
    },
    IfEq {
        expected: bool,
        left: Arc<Node>,
        right: Arc<Node>,
        body: Vec<Arc<Node>>,
    },
    IfDef {
        expected: bool,
        ident: Bytes,
        body: Vec<Arc<Node>>,
    },
    /// A `define NAME ... endef` block; the body is kept as raw text and
    /// re-parsed on expansion.
    Define {
        name: Bytes,
        body: Bytes,
    },
    /// A `-` or `+` line prefix wrapping the following node.
    Modifier {
        modifier: u8,
        node: Arc<Node>,
    },
    Comment(Bytes),
}

impl Node {
    pub fn new(kind: NodeKind) -> Node {
        Node {
            comments: Vec::new(),
            kind,
        }
    }

    pub fn raw(text: Bytes) -> Node {
        Node::new(NodeKind::Raw(text))
    }

    pub fn empty_raw() -> Node {
        Node::raw(Bytes::new())
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::File { .. } => "File",
            NodeKind::Nodes(_) => "Nodes",
            NodeKind::Raw(_) => "Raw",
            NodeKind::Expr(_) => "Expr",
            NodeKind::Exp(_) => "Exp",
            NodeKind::PatSubst { .. } => "PatSubst",
            NodeKind::Var { .. } => "Var",
            NodeKind::Target { .. } => "Target",
            NodeKind::StaticPatternTarget { .. } => "StaticPatternTarget",
            NodeKind::Include { .. } => "Include",
            NodeKind::IfEq { .. } => "IfEq",
            NodeKind::IfDef { .. } => "IfDef",
            NodeKind::Define { .. } => "Define",
            NodeKind::Modifier { .. } => "Modifier",
            NodeKind::Comment(_) => "Comment",
        }
    }
}
