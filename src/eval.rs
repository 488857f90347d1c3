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

//! Symbolic evaluation of the AST: a single dispatch on the node tag,
//! a variable environment with definition-time vs reference-time
//! expansion, include resolution, and recursive re-parsing for `$(eval)`
//! and deferred variables.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Result, bail};
use bytes::{BufMut, Bytes, BytesMut};

use crate::ast::{AssignOp, Node, NodeKind};
use crate::func::{apply_patsubst, get_func_info};
use crate::parser;
use crate::strutil::{WordWriter, concat_dir, dirname, trim_space, words};
use crate::symtab::{MAKEFILE_LIST, Symbol, intern};
use crate::var::{Env, InnerVar, Var, Variable};
use crate::{log, warn};

/// Defined targets, name to defining node, first definition wins.
#[derive(Default)]
pub struct Targets {
    map: HashMap<Symbol, Arc<Node>>,
    order: Vec<Symbol>,
}

impl Targets {
    pub fn get(&self, name: &[u8]) -> Option<Arc<Node>> {
        self.map.get(&intern(name.to_vec())).cloned()
    }

    pub fn names(&self) -> &[Symbol] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn insert(&mut self, sym: Symbol, node: Arc<Node>) -> bool {
        if self.map.contains_key(&sym) {
            return false;
        }
        self.map.insert(sym, node);
        self.order.push(sym);
        true
    }
}

pub struct Evaluator {
    pub env: Arc<Env>,
    pub targets: Targets,
    /// Directory the exploration is rooted at; relative includes fall
    /// back here, and `$(shell)` runs here.
    pub root_dir: Bytes,

    /// Every file brought in so far, in inclusion order; feeds the
    /// `MAKEFILE_LIST` pseudo-variable.
    file_list: Vec<Bytes>,
    /// The chain of files currently being evaluated; the top decides
    /// what "the current Makefile's directory" means.
    file_stack: Vec<Bytes>,

    expanding: HashSet<Symbol>,
    reported_failure_point: bool,
    eval_depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn makefile_list_var(ev: &mut Evaluator, out: &mut dyn BufMut) -> Result<()> {
    let mut ww = WordWriter::new(out);
    for f in &ev.file_list {
        ww.write(f);
    }
    Ok(())
}

impl Evaluator {
    /// A fresh evaluation session: environment seeded from the OS
    /// process environment, no targets, no files.
    pub fn new() -> Evaluator {
        let env = Env::from_environ();
        env.assign(*MAKEFILE_LIST, Variable::func(makefile_list_var));
        Evaluator {
            env,
            targets: Targets::default(),
            root_dir: Bytes::new(),
            file_list: Vec::new(),
            file_stack: Vec::new(),
            expanding: HashSet::new(),
            reported_failure_point: false,
            eval_depth: 0,
        }
    }

    pub fn eval(&mut self, n: &Arc<Node>, out: &mut dyn BufMut) -> Result<()> {
        self.eval_depth += 1;
        log!("{:depth$}> {}", "", n.kind_name(), depth = self.eval_depth * 2);
        let r = self.eval_node(n, out);
        if let Err(err) = &r
            && !self.reported_failure_point
        {
            // Point-of-failure marker, once per session; the error itself
            // propagates unwrapped.
            self.reported_failure_point = true;
            log::error!("error happened here: in {} node: {err}", n.kind_name());
        }
        self.eval_depth -= 1;
        r
    }

    pub fn eval_to_bytes(&mut self, n: &Arc<Node>) -> Result<Bytes> {
        let mut out = BytesMut::new();
        self.eval(n, &mut out)?;
        Ok(out.freeze())
    }

    fn eval_node(&mut self, n: &Arc<Node>, out: &mut dyn BufMut) -> Result<()> {
        match &n.kind {
            NodeKind::File { nodes, .. } | NodeKind::Nodes(nodes) => self.eval_nodes(nodes, out),
            NodeKind::Raw(text) => {
                out.put_slice(text);
                Ok(())
            }
            NodeKind::Expr(parts) => {
                for p in parts {
                    self.eval(p, out)?;
                }
                Ok(())
            }
            NodeKind::Exp(parts) => self.eval_exp(parts, out),
            NodeKind::PatSubst { name, pat, subst } => self.eval_patsubst(name, pat, subst, out),
            NodeKind::Var {
                name,
                op,
                value,
                orig,
            } => self.eval_assign(name, *op, value, orig),
            NodeKind::Define { name, body } => {
                log!("define {}", String::from_utf8_lossy(name));
                self.env
                    .assign(intern(name.clone()), Variable::expand(body.clone()));
                Ok(())
            }
            NodeKind::Target { name, .. } => self.record_target(name, n),
            NodeKind::StaticPatternTarget { names, .. } => self.record_target(names, n),
            NodeKind::Include { path } => self.eval_include(path),
            NodeKind::IfEq {
                expected,
                left,
                right,
                body,
            } => {
                let l = self.eval_to_bytes(left)?;
                let r = self.eval_to_bytes(right)?;
                log!(
                    "ifeq left: {:?} right: {:?}",
                    String::from_utf8_lossy(&l),
                    String::from_utf8_lossy(&r)
                );
                if (l == r) == *expected {
                    self.eval_body(body)?;
                }
                Ok(())
            }
            NodeKind::IfDef {
                expected,
                ident,
                body,
            } => {
                if self.env.contains(intern(ident.clone())) == *expected {
                    self.eval_body(body)?;
                }
                Ok(())
            }
            NodeKind::Modifier { modifier, node } => match modifier {
                b'-' => {
                    let mut tmp = BytesMut::new();
                    if let Err(err) = self.eval(node, &mut tmp) {
                        log!("ignored error: {err:#}");
                    }
                    out.put_slice(&tmp);
                    Ok(())
                }
                b'+' => self.eval(node, out),
                m => bail!("unhandled modifier {}", *m as char),
            },
            NodeKind::Comment(_) => Ok(()),
        }
    }

    /// Evaluate a sequence, joining the non-empty results with newlines.
    fn eval_nodes(&mut self, nodes: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
        let mut first = true;
        for n in nodes {
            let b = self.eval_to_bytes(n)?;
            if b.is_empty() {
                continue;
            }
            if !first {
                out.put_u8(b'\n');
            }
            first = false;
            out.put_slice(&b);
        }
        Ok(())
    }

    /// Conditional and include bodies run for their side effects only.
    fn eval_body(&mut self, body: &[Arc<Node>]) -> Result<()> {
        let mut scratch = BytesMut::new();
        for n in body {
            scratch.clear();
            self.eval(n, &mut scratch)?;
        }
        Ok(())
    }

    /// `$(head)` is a variable reference; `$(head args...)` dispatches to
    /// the built-in function registry.
    fn eval_exp(&mut self, parts: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
        let Some((head_node, args)) = parts.split_first() else {
            return Ok(());
        };
        let head = self.eval_to_bytes(head_node)?;
        if args.is_empty() {
            let sym = intern(head.clone());
            let Some(var) = self.env.lookup(sym) else {
                warn!("undefined variable {}", String::from_utf8_lossy(&head));
                return Ok(());
            };
            return self.var_get(sym, &var, out);
        }
        let Some(fi) = get_func_info(&head) else {
            bail!("unhandled function `{}`", String::from_utf8_lossy(&head));
        };
        if args.len() < fi.min_arity {
            bail!(
                "insufficient number of arguments ({}) to function `{}`",
                args.len(),
                String::from_utf8_lossy(&head)
            );
        }
        (fi.func)(self, &head, args, out)
    }

    /// The expanded value of a variable, with a self-reference guard for
    /// recursive flavours.
    pub fn var_get(&mut self, sym: Symbol, var: &Var, out: &mut dyn BufMut) -> Result<()> {
        if !self.expanding.insert(sym) {
            bail!("recursive variable `{sym}' references itself (eventually)");
        }
        let r = self.var_eval_unguarded(var, out);
        self.expanding.remove(&sym);
        r
    }

    pub fn var_eval_unguarded(&mut self, var: &Var, out: &mut dyn BufMut) -> Result<()> {
        match var.value.clone() {
            InnerVar::Raw(b) => {
                out.put_slice(&b);
                Ok(())
            }
            InnerVar::Expand(text) => {
                let n = parser::parse_bytes(text)?;
                self.eval(&n, out)
            }
            InnerVar::Node { node, .. } => self.eval(&node, out),
            InnerVar::Func(f) => f(self, out),
        }
    }

    /// The unexpanded form of a variable, as `$(value v)` reports it.
    pub fn var_value(&mut self, var: &Var, out: &mut dyn BufMut) -> Result<()> {
        match var.value.clone() {
            InnerVar::Raw(b) | InnerVar::Expand(b) => {
                out.put_slice(&b);
                Ok(())
            }
            InnerVar::Node { orig, .. } => {
                out.put_slice(&orig);
                Ok(())
            }
            InnerVar::Func(f) => f(self, out),
        }
    }

    fn eval_assign(
        &mut self,
        name: &Arc<Node>,
        op: AssignOp,
        value: &Arc<Node>,
        orig: &Bytes,
    ) -> Result<()> {
        let name_b = self.eval_to_bytes(name)?;
        let name_t = name_b.slice_ref(trim_space(&name_b));
        if name_t.is_empty() {
            bail!("empty variable name");
        }
        let sym = intern(name_t);
        match op {
            AssignOp::ColonEq | AssignOp::ColonColonEq => {
                let v = self.eval_to_bytes(value)?;
                log!("define simple var {sym}");
                self.env.assign(sym, Variable::raw(v));
            }
            AssignOp::Eq => {
                log!("define var {sym}");
                self.env
                    .assign(sym, Variable::node(value.clone(), orig.clone()));
            }
            AssignOp::PlusEq => {
                let mut b = BytesMut::new();
                if let Some(prev) = self.env.lookup(sym) {
                    self.var_get(sym, &prev, &mut b)?;
                    if !b.is_empty() {
                        b.put_u8(b' ');
                    }
                }
                let v = self.eval_to_bytes(value)?;
                b.put_slice(&v);
                self.env.assign(sym, Variable::raw(b.freeze()));
            }
            AssignOp::QuestionEq => {
                if !self.env.contains(sym) {
                    let v = self.eval_to_bytes(value)?;
                    self.env.assign(sym, Variable::raw(v));
                }
            }
            AssignOp::BangEq => {
                let cmd = self.eval_to_bytes(value)?;
                let output = self.shell_capture(&cmd)?;
                self.env.assign(sym, Variable::raw(output));
            }
        }
        Ok(())
    }

    /// `$(VAR:PATTERN=REPL)` rewrites the variable's words like
    /// `$(patsubst PATTERN,REPL,$(VAR))`.
    fn eval_patsubst(
        &mut self,
        name: &Arc<Node>,
        pat: &Arc<Node>,
        subst: &Arc<Node>,
        out: &mut dyn BufMut,
    ) -> Result<()> {
        let name_b = self.eval_to_bytes(name)?;
        let sym = intern(name_b.clone());
        let Some(var) = self.env.lookup(sym) else {
            warn!("undefined variable {}", String::from_utf8_lossy(&name_b));
            return Ok(());
        };
        let mut value = BytesMut::new();
        self.var_get(sym, &var, &mut value)?;
        let pat_b = self.eval_to_bytes(pat)?;
        let subst_b = self.eval_to_bytes(subst)?;
        apply_patsubst(&pat_b, &subst_b, &value.freeze(), out);
        Ok(())
    }

    fn record_target(&mut self, name: &Arc<Node>, node: &Arc<Node>) -> Result<()> {
        let name_b = self.eval_to_bytes(name)?;
        let name_t = trim_space(&name_b);
        if name_t.is_empty() {
            return Ok(());
        }
        let sym = intern(name_b.slice_ref(name_t));
        log!("define target {sym}");
        if !self.targets.insert(sym, node.clone()) {
            warn!("target {sym} is already defined; first definition wins");
        }
        Ok(())
    }

    fn eval_include(&mut self, path: &Arc<Node>) -> Result<()> {
        let pats = self.eval_to_bytes(path)?;
        let names: Vec<Bytes> = words(&pats)
            .filter(|w| !w.is_empty())
            .map(|w| pats.slice_ref(w))
            .collect();
        for name in names {
            if name.contains(&b'*') {
                let pat = if name.starts_with(b"/") {
                    name.clone()
                } else {
                    concat_dir(&self.curdir(), &name)
                };
                let files = crate::fileutil::glob(pat);
                let Ok(files) = files.as_ref().as_ref() else {
                    continue;
                };
                for f in files {
                    let file = parser::parse_file(f)?;
                    self.include_file(&file)?;
                }
            } else {
                self.include_with_fallback(&name)?;
            }
        }
        Ok(())
    }

    /// Relative includes resolve against the including file's directory
    /// first, then against the root; the error reported for a missing
    /// file is the root-path one.
    fn include_with_fallback(&mut self, name: &Bytes) -> Result<()> {
        if !name.starts_with(b"/") {
            let sibling = concat_dir(&self.curdir(), name);
            log!("trying to include {}", String::from_utf8_lossy(&sibling));
            match parser::parse_file(&sibling) {
                Ok(file) => return self.include_file(&file),
                Err(err) => {
                    let not_found = err
                        .downcast_ref::<std::io::Error>()
                        .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound);
                    if !not_found {
                        return Err(err);
                    }
                }
            }
        }
        let full = concat_dir(&self.root_dir, name);
        log!("fallback to {}", String::from_utf8_lossy(&full));
        let file = parser::parse_file(&full)?;
        self.include_file(&file)
    }

    /// Evaluate a parsed `File` node in this session.
    pub fn include_file(&mut self, file: &Arc<Node>) -> Result<()> {
        let NodeKind::File { path, nodes } = &file.kind else {
            bail!("expected a file node, got {}", file.kind_name());
        };
        log!("include {}", String::from_utf8_lossy(path));
        self.file_list.push(path.clone());
        self.file_stack.push(path.clone());
        let r = self.eval_body(nodes);
        self.file_stack.pop();
        r
    }

    /// Directory of the file currently being evaluated; empty outside of
    /// any file (then relative paths resolve against the process cwd).
    pub fn curdir(&self) -> Bytes {
        match self.file_stack.last() {
            Some(f) => dirname(f),
            None => Bytes::new(),
        }
    }

    /// Run a command through `sh -c` in the root directory and capture
    /// stdout+stderr, with one trailing newline stripped. A non-zero
    /// exit is a hard error carrying the combined output.
    pub fn shell_capture(&mut self, cmd: &[u8]) -> Result<Bytes> {
        let dir = (!self.root_dir.is_empty()).then(|| self.root_dir.clone());
        let (status, mut output) = crate::fileutil::run_shell(cmd, dir.as_deref())?;
        if !status.success() {
            bail!(
                "shell error: {status} with output:\n{}",
                String::from_utf8_lossy(&output)
            );
        }
        if output.ends_with(b"\n") {
            output.pop();
        }
        Ok(Bytes::from(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::ffi::OsStrExt;

    fn run(ev: &mut Evaluator, s: &str) -> Bytes {
        let n = parser::parse_bytes(Bytes::copy_from_slice(s.as_bytes())).unwrap();
        ev.eval_to_bytes(&n).unwrap()
    }

    fn get(ev: &mut Evaluator, name: &str) -> String {
        run(ev, &format!("$({name})")).escape_ascii().to_string()
    }

    #[test]
    fn test_get_variable() {
        let mut ev = Evaluator::new();
        run(&mut ev, "TEST_GET := value");
        assert_eq!(run(&mut ev, "$(TEST_GET)").as_ref(), b"value");
    }

    #[test]
    fn test_undefined_variable_is_empty() {
        let mut ev = Evaluator::new();
        assert_eq!(run(&mut ev, "$(MX_SURELY_NOT_DEFINED)").as_ref(), b"");
    }

    #[test]
    fn test_raw_round_trip() {
        let mut ev = Evaluator::new();
        let n = Arc::new(Node::raw(Bytes::from_static(b"exact text")));
        assert_eq!(ev.eval_to_bytes(&n).unwrap().as_ref(), b"exact text");
    }

    #[test]
    fn test_lazy_vs_immediate_assignment() {
        let mut ev = Evaluator::new();
        assert_eq!(
            run(&mut ev, "A := 1\nB = $(A)\nA := 2\n$(B)").as_ref(),
            b"2"
        );
        let mut ev = Evaluator::new();
        assert_eq!(
            run(&mut ev, "A := 1\nB := $(A)\nA := 2\n$(B)").as_ref(),
            b"1"
        );
    }

    #[test]
    fn test_append_and_conditional_assignment() {
        let mut ev = Evaluator::new();
        run(&mut ev, "L := a\nL += b\nL += c");
        assert_eq!(get(&mut ev, "L"), "a b c");
        run(&mut ev, "M += solo");
        assert_eq!(get(&mut ev, "M"), "solo");
        run(&mut ev, "L ?= nope\nN ?= yes");
        assert_eq!(get(&mut ev, "L"), "a b c");
        assert_eq!(get(&mut ev, "N"), "yes");
    }

    #[test]
    fn test_shell_assignment() {
        let mut ev = Evaluator::new();
        run(&mut ev, "NOW != echo from-a-shell");
        assert_eq!(get(&mut ev, "NOW"), "from-a-shell");
    }

    #[test]
    fn test_ifeq_body_runs() {
        let mut ev = Evaluator::new();
        run(&mut ev, "ifneq (AAA,BBB)\nX:=/p\nendif\n");
        assert_eq!(get(&mut ev, "X"), "/p");
        run(&mut ev, "ifeq (AAA,BBB)\nY:=set\nendif\n");
        assert_eq!(get(&mut ev, "Y"), "");
    }

    #[test]
    fn test_ifdef() {
        let mut ev = Evaluator::new();
        run(&mut ev, "D := 1\nifdef D\nSAW_D:=yes\nendif\n");
        assert_eq!(get(&mut ev, "SAW_D"), "yes");
        run(&mut ev, "ifndef MX_SURELY_NOT_DEFINED\nSAW_U:=yes\nendif\n");
        assert_eq!(get(&mut ev, "SAW_U"), "yes");
    }

    #[test]
    fn test_dynamic_variable_name() {
        let mut ev = Evaluator::new();
        run(&mut ev, "TEST := value\ntest-value := 42");
        assert_eq!(run(&mut ev, "$(test-$(TEST))").as_ref(), b"42");
    }

    #[test]
    fn test_shell_function() {
        let mut ev = Evaluator::new();
        assert_eq!(run(&mut ev, "$(shell echo hello)").as_ref(), b"hello");
        // Combined stdout+stderr, single trailing newline stripped.
        assert_eq!(
            run(&mut ev, "$(shell echo a; echo b >&2)").as_ref(),
            b"a\nb"
        );
    }

    #[test]
    fn test_shell_failure_is_hard_error() {
        let mut ev = Evaluator::new();
        let n = parser::parse_bytes(Bytes::from_static(b"$(shell echo doomed; false)")).unwrap();
        let err = ev.eval_to_bytes(&n).unwrap_err();
        assert!(err.to_string().contains("doomed"), "{err}");
    }

    #[test]
    fn test_unknown_function_errors() {
        let mut ev = Evaluator::new();
        let n = parser::parse_bytes(Bytes::from_static(b"$(frobnicate a,b)")).unwrap();
        let err = ev.eval_to_bytes(&n).unwrap_err();
        assert!(err.to_string().contains("unhandled function"), "{err}");
    }

    #[test]
    fn test_words_and_friends() {
        let mut ev = Evaluator::new();
        assert_eq!(run(&mut ev, "$(words a b c)").as_ref(), b"3");
        assert_eq!(run(&mut ev, "$(firstword a b c)").as_ref(), b"a");
        assert_eq!(run(&mut ev, "$(lastword a b c)").as_ref(), b"c");
        assert_eq!(run(&mut ev, "$(firstword )").as_ref(), b"");
        assert_eq!(run(&mut ev, "$(strip a b c )").as_ref(), b"a b c");
    }

    #[test]
    fn test_subst() {
        let mut ev = Evaluator::new();
        assert_eq!(
            run(&mut ev, "$(subst ee,EE,feet on the street)").as_ref(),
            b"fEEt on the strEEt"
        );
    }

    #[test]
    fn test_subst_empty_from_appends() {
        // An empty `from` appends `to` once after the text.
        let mut ev = Evaluator::new();
        assert_eq!(run(&mut ev, "$(subst ,-,ab)").as_ref(), b"ab-");
    }

    #[test]
    fn test_filter() {
        let mut ev = Evaluator::new();
        assert_eq!(
            run(&mut ev, "$(filter %.c %.s,foo.c bar.c baz.s ugh.h)").as_ref(),
            b"foo.c bar.c baz.s"
        );
        assert_eq!(
            run(&mut ev, "$(filter-out %.c %.s,foo.c bar.c baz.s ugh.h)").as_ref(),
            b"ugh.h"
        );
    }

    #[test]
    fn test_patsubst_and_shorthand() {
        let mut ev = Evaluator::new();
        run(&mut ev, "foo = a.o b.o l.a c.o");
        assert_eq!(
            run(&mut ev, "$(patsubst %.c,%.o,x.c.c bar.c)").as_ref(),
            b"x.c.o bar.o"
        );
        assert_eq!(run(&mut ev, "$(foo:%.o=%.c)").as_ref(), b"a.c b.c l.a c.c");
        assert_eq!(run(&mut ev, "$(foo:.o=.c)").as_ref(), b"a.c b.c l.a c.c");
    }

    #[test]
    fn test_dir_notdir_basename() {
        let mut ev = Evaluator::new();
        assert_eq!(
            run(&mut ev, "$(dir /some/test/file.txt /d/)").as_ref(),
            b"/some/test/ /d/"
        );
        assert_eq!(
            run(&mut ev, "$(notdir /some/test/file.txt plain)").as_ref(),
            b"file.txt plain"
        );
        assert_eq!(
            run(&mut ev, "$(basename src/foo.c bar.o sub.dir)").as_ref(),
            b"src/foo bar sub"
        );
    }

    #[test]
    fn test_if_function() {
        let mut ev = Evaluator::new();
        assert_eq!(run(&mut ev, "$(if nonempty,then,else)").as_ref(), b"then");
        assert_eq!(run(&mut ev, "$(if  ,then,else)").as_ref(), b"else");
        assert_eq!(run(&mut ev, "$(if ,then)").as_ref(), b"");
    }

    #[test]
    fn test_foreach_with_shadowing() {
        let mut ev = Evaluator::new();
        run(&mut ev, "dir = outer");
        assert_eq!(
            run(&mut ev, "$(foreach dir,a b c,$(dir))").as_ref(),
            b"a b c"
        );
        assert_eq!(get(&mut ev, "dir"), "outer");
    }

    #[test]
    fn test_call_positional_vars_restored() {
        let mut ev = Evaluator::new();
        run(&mut ev, "1 := pre\nrevcat = $(2)$(1)");
        assert_eq!(run(&mut ev, "$(call revcat,x,y)").as_ref(), b"yx");
        // Shadowed `1` is back, `2` is gone.
        assert_eq!(get(&mut ev, "1"), "pre");
        assert!(!ev.env.contains(intern("2")));
    }

    #[test]
    fn test_call_missing_var_is_empty() {
        let mut ev = Evaluator::new();
        assert_eq!(run(&mut ev, "$(call no-such-macro,a)").as_ref(), b"");
    }

    #[test]
    fn test_value_reports_unexpanded_text() {
        let mut ev = Evaluator::new();
        run(&mut ev, "V = $(W)-tail");
        assert_eq!(run(&mut ev, "$(value V)").as_ref(), b"$(W)-tail");
        assert_eq!(run(&mut ev, "$(value MX_NOT_BOUND)").as_ref(), b"");
    }

    #[test]
    fn test_define_and_call_with_eval() {
        let mut ev = Evaluator::new();
        run(
            &mut ev,
            "MODULES =\n\ndefine somedefine\n$(eval\nMODULES += $1\n$(1)-path:=somepath\n)\nendef\n\n$(call somedefine,somemodule)\n",
        );
        assert_eq!(get(&mut ev, "somemodule-path"), "somepath");
        assert_eq!(get(&mut ev, "MODULES"), "somemodule");
    }

    #[test]
    fn test_define_value_is_body_text() {
        let mut ev = Evaluator::new();
        run(&mut ev, "define T\nline1 $(X)\nline2\nendef\n");
        assert_eq!(run(&mut ev, "$(value T)").as_ref(), b"line1 $(X)\nline2");
    }

    #[test]
    fn test_recursive_variable_is_an_error() {
        let mut ev = Evaluator::new();
        run(&mut ev, "SELF = $(SELF)x");
        let n = parser::parse_bytes(Bytes::from_static(b"$(SELF)")).unwrap();
        let err = ev.eval_to_bytes(&n).unwrap_err();
        assert!(err.to_string().contains("references itself"), "{err}");
    }

    #[test]
    fn test_error_function() {
        let mut ev = Evaluator::new();
        let n = parser::parse_bytes(Bytes::from_static(b"$(error boom)")).unwrap();
        assert!(ev.eval_to_bytes(&n).is_err());
        // info and warning do not fail.
        let mut ev = Evaluator::new();
        run(&mut ev, "$(info all good)");
        run(&mut ev, "$(warning but noted)");
    }

    #[test]
    fn test_modifier_minus_swallows_errors() {
        let mut ev = Evaluator::new();
        run(&mut ev, "-include /no/such/dir/at/all.mk\n");
        let n = parser::parse_bytes(Bytes::from_static(b"include /no/such/dir/at/all.mk\n"))
            .unwrap();
        assert!(ev.eval_to_bytes(&n).is_err());
    }

    #[test]
    fn test_target_recording_first_wins() {
        let mut ev = Evaluator::new();
        run(
            &mut ev,
            "N := one\nrun: dep1\n\techo first\nrun:\n\techo second\n$(N)-job:\n\ttrue\n",
        );
        assert_eq!(ev.targets.len(), 2);
        let t = ev.targets.get(b"run").unwrap();
        let NodeKind::Target { deps, .. } = &t.kind else {
            panic!("expected Target, got {t:?}");
        };
        assert_eq!(deps.len(), 1);
        assert!(ev.targets.get(b"one-job").is_some());
    }

    #[test]
    fn test_static_pattern_target_recorded() {
        let mut ev = Evaluator::new();
        run(&mut ev, "objs: %.o: %.c\n\tcc $<\n");
        let t = ev.targets.get(b"objs").unwrap();
        assert!(matches!(t.kind, NodeKind::StaticPatternTarget { .. }));
    }

    #[test]
    fn test_ifeq_with_expansions() {
        let mut ev = Evaluator::new();
        run(&mut ev, "L := same\nR = same\nifeq ($(L),$(R))\nEQ:=yes\nendif\n");
        assert_eq!(get(&mut ev, "EQ"), "yes");
    }

    #[test]
    fn test_addprefix() {
        let mut ev = Evaluator::new();
        assert_eq!(
            run(&mut ev, "$(addprefix src/,a b)").as_ref(),
            b"src/a src/b"
        );
    }

    #[test]
    fn test_expr_concatenation() {
        let mut ev = Evaluator::new();
        run(&mut ev, "P := pre\nS := post");
        assert_eq!(run(&mut ev, "$(P)-mid-$(S)").as_ref(), b"pre-mid-post");
    }

    #[test]
    fn test_nested_foreach() {
        let mut ev = Evaluator::new();
        assert_eq!(
            run(&mut ev, "$(foreach a,1 2,$(foreach b,x y,$(a)$(b)))").as_ref(),
            b"1x 1y 2x 2y"
        );
    }

    #[test]
    fn test_makefile_list_starts_empty() {
        let mut ev = Evaluator::new();
        assert_eq!(run(&mut ev, "$(MAKEFILE_LIST)").as_ref(), b"");
    }

    #[test]
    fn test_call_binds_zero_to_macro_name() {
        let mut ev = Evaluator::new();
        run(&mut ev, "self-name = $(0)");
        assert_eq!(run(&mut ev, "$(call self-name)").as_ref(), b"self-name");
    }

    #[test]
    fn test_shell_joins_args_with_space() {
        let mut ev = Evaluator::new();
        assert_eq!(
            run(&mut ev, "$(shell printf '%s-%s' a,b)").as_ref(),
            b"a-b"
        );
    }

    #[test]
    fn test_strip_spaces_only() {
        // strip trims single spaces, not tabs.
        let mut ev = Evaluator::new();
        assert_eq!(run(&mut ev, "$(strip \tx )").as_ref(), b"\tx");
    }

    fn write_file(path: &std::path::Path, content: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_include_sibling_then_root_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("sub")).unwrap();
        write_file(&root.join("sub/sibling.mk"), "WHERE := sibling\n");
        write_file(&root.join("fromroot.mk"), "ROOTVAR := root\n");
        write_file(
            &root.join("sub/Makefile"),
            "include sibling.mk\ninclude fromroot.mk\n",
        );

        let mut ev = Evaluator::new();
        ev.root_dir = Bytes::copy_from_slice(root.as_os_str().as_bytes());
        let mk = root.join("sub/Makefile");
        let file = parser::parse_file(mk.as_os_str().as_bytes()).unwrap();
        ev.include_file(&file).unwrap();

        assert_eq!(get(&mut ev, "WHERE"), "sibling");
        assert_eq!(get(&mut ev, "ROOTVAR"), "root");
        assert_eq!(
            run(&mut ev, "$(MAKEFILE_LIST)").split(|c| *c == b' ').count(),
            3
        );
    }

    #[test]
    fn test_include_missing_reports_root_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("sub")).unwrap();
        write_file(&root.join("sub/Makefile"), "include nowhere.mk\n");

        let mut ev = Evaluator::new();
        ev.root_dir = Bytes::copy_from_slice(root.as_os_str().as_bytes());
        let mk = root.join("sub/Makefile");
        let file = parser::parse_file(mk.as_os_str().as_bytes()).unwrap();
        let err = ev.include_file(&file).unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(&root.join("nowhere.mk").display().to_string()),
            "{msg}"
        );
    }

    #[test]
    fn test_include_glob() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("one.mk"), "GLOB_A := 1\n");
        write_file(&root.join("two.mk"), "GLOB_B := 2\n");
        write_file(&root.join("Makefile"), "include *.mk\n");

        let mut ev = Evaluator::new();
        ev.root_dir = Bytes::copy_from_slice(root.as_os_str().as_bytes());
        let mk = root.join("Makefile");
        let file = parser::parse_file(mk.as_os_str().as_bytes()).unwrap();
        ev.include_file(&file).unwrap();
        assert_eq!(get(&mut ev, "GLOB_A"), "1");
        assert_eq!(get(&mut ev, "GLOB_B"), "2");
    }

    #[test]
    fn test_wildcard_and_realpath_use_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("x.gen"), "");
        write_file(&root.join("y.gen"), "");
        write_file(
            &root.join("Makefile"),
            "FOUND := $(wildcard *.gen)\nREAL := $(realpath x.gen)\n",
        );

        let mut ev = Evaluator::new();
        ev.root_dir = Bytes::copy_from_slice(root.as_os_str().as_bytes());
        let mk = root.join("Makefile");
        let file = parser::parse_file(mk.as_os_str().as_bytes()).unwrap();
        ev.include_file(&file).unwrap();

        let found = run(&mut ev, "$(FOUND)");
        assert_eq!(words(&found).count(), 2);
        let real = run(&mut ev, "$(REAL)");
        assert_eq!(real, root.join("x.gen").as_os_str().as_bytes());
    }

    #[test]
    fn test_comment_never_in_value() {
        let mut ev = Evaluator::new();
        run(&mut ev, "C := x # comment\n");
        assert_eq!(get(&mut ev, "C"), "x ");
    }

    #[test]
    fn test_env_seeded_from_process_environment() {
        // SAFETY: tests run single threaded with respect to this var.
        unsafe { std::env::set_var("MX_FROM_ENV", "seeded") };
        let mut ev = Evaluator::new();
        assert_eq!(get(&mut ev, "MX_FROM_ENV"), "seeded");
    }
}
