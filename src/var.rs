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

use std::collections::HashMap;
use std::fmt::Debug;
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;

use anyhow::Result;
use bytes::{BufMut, Bytes};
use parking_lot::Mutex;

use crate::ast::Node;
use crate::eval::Evaluator;
use crate::symtab::{Symbol, intern};

pub type Var = Arc<Variable>;

/// Pseudo-variables (`MAKEFILE_LIST`) compute their value from evaluator
/// state.
pub type PseudoVarFn = fn(&mut Evaluator, &mut dyn BufMut) -> Result<()>;

/// A runtime variable. The flavour decides *when* expansion happens:
/// `Raw` is already expanded, `Expand` re-parses its text on every get,
/// `Node` re-evaluates a parsed fragment, `Func` asks the evaluator.
#[derive(Clone)]
pub enum InnerVar {
    Raw(Bytes),
    Expand(Bytes),
    Node { node: Arc<Node>, orig: Bytes },
    Func(PseudoVarFn),
}

pub struct Variable {
    pub value: InnerVar,
}

impl Variable {
    pub fn raw(text: Bytes) -> Var {
        Arc::new(Variable {
            value: InnerVar::Raw(text),
        })
    }

    pub fn expand(text: Bytes) -> Var {
        Arc::new(Variable {
            value: InnerVar::Expand(text),
        })
    }

    pub fn node(node: Arc<Node>, orig: Bytes) -> Var {
        Arc::new(Variable {
            value: InnerVar::Node { node, orig },
        })
    }

    pub fn func(f: PseudoVarFn) -> Var {
        Arc::new(Variable {
            value: InnerVar::Func(f),
        })
    }

    pub fn flavor(&self) -> &'static str {
        match &self.value {
            InnerVar::Raw(_) => "raw",
            InnerVar::Expand(_) => "expand",
            InnerVar::Node { .. } => "node",
            InnerVar::Func(_) => "func",
        }
    }
}

impl Debug for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            InnerVar::Raw(b) => write!(f, "Raw({:?})", String::from_utf8_lossy(b)),
            InnerVar::Expand(b) => write!(f, "Expand({:?})", String::from_utf8_lossy(b)),
            InnerVar::Node { orig, .. } => {
                write!(f, "Node({:?})", String::from_utf8_lossy(orig))
            }
            InnerVar::Func(_) => write!(f, "Func"),
        }
    }
}

#[derive(Default)]
struct EnvInner {
    vars: HashMap<Symbol, Var>,
    order: Vec<Symbol>,
}

/// The variable environment: an insertion-ordered map from name to
/// variable, seeded from the process environment. Mutex-wrapped so that
/// `ScopedVar` guards can restore bindings while an evaluation borrows
/// the evaluator.
#[derive(Default)]
pub struct Env(Mutex<EnvInner>);

impl Env {
    pub fn new() -> Arc<Env> {
        Arc::new(Env::default())
    }

    /// An environment holding every OS environment variable as an
    /// already-expanded binding.
    pub fn from_environ() -> Arc<Env> {
        let env = Env::new();
        for (k, v) in std::env::vars_os() {
            env.assign(
                intern(k.as_bytes().to_vec()),
                Variable::raw(Bytes::from(v.as_bytes().to_vec())),
            );
        }
        env
    }

    pub fn lookup(&self, sym: Symbol) -> Option<Var> {
        self.0.lock().vars.get(&sym).cloned()
    }

    pub fn contains(&self, sym: Symbol) -> bool {
        self.0.lock().vars.contains_key(&sym)
    }

    /// Bind `sym`, returning the shadowed variable if one existed. A new
    /// name goes to the end of the iteration order; a rebound name keeps
    /// its place.
    pub fn assign(&self, sym: Symbol, var: Var) -> Option<Var> {
        let mut inner = self.0.lock();
        let prev = inner.vars.insert(sym, var);
        if prev.is_none() {
            inner.order.push(sym);
        }
        prev
    }

    pub fn remove(&self, sym: Symbol) -> Option<Var> {
        let mut inner = self.0.lock();
        let prev = inner.vars.remove(&sym);
        if prev.is_some() {
            inner.order.retain(|s| *s != sym);
        }
        prev
    }

    /// Names in definition order.
    pub fn names(&self) -> Vec<Symbol> {
        self.0.lock().order.clone()
    }
}

/// Temporarily shadow one binding; dropping restores the previous state,
/// on success and error paths alike.
pub struct ScopedVar {
    env: Arc<Env>,
    sym: Symbol,
    orig: Option<Var>,
}

impl ScopedVar {
    pub fn new(env: Arc<Env>, sym: Symbol, var: Var) -> ScopedVar {
        let orig = env.assign(sym, var);
        ScopedVar { env, sym, orig }
    }
}

impl Drop for ScopedVar {
    fn drop(&mut self) {
        if let Some(orig) = self.orig.take() {
            self.env.assign(self.sym, orig);
        } else {
            self.env.remove(self.sym);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_insertion_order() {
        let env = Env::new();
        let (a, b, c) = (intern("za"), intern("zb"), intern("zc"));
        env.assign(a, Variable::raw(Bytes::from_static(b"1")));
        env.assign(b, Variable::raw(Bytes::from_static(b"2")));
        env.assign(c, Variable::raw(Bytes::from_static(b"3")));
        env.assign(b, Variable::raw(Bytes::from_static(b"2'")));
        assert_eq!(env.names(), vec![a, b, c]);
    }

    #[test]
    fn test_scoped_var_restores_previous_binding() {
        let env = Env::new();
        let sym = intern("scoped-test");
        env.assign(sym, Variable::raw(Bytes::from_static(b"outer")));
        {
            let _sv = ScopedVar::new(
                env.clone(),
                sym,
                Variable::raw(Bytes::from_static(b"inner")),
            );
            let got = env.lookup(sym).unwrap();
            assert!(matches!(&got.value, InnerVar::Raw(b) if b.as_ref() == b"inner"));
        }
        let got = env.lookup(sym).unwrap();
        assert!(matches!(&got.value, InnerVar::Raw(b) if b.as_ref() == b"outer"));
    }

    #[test]
    fn test_scoped_var_removes_fresh_binding() {
        let env = Env::new();
        let sym = intern("scoped-fresh");
        {
            let _sv = ScopedVar::new(
                env.clone(),
                sym,
                Variable::raw(Bytes::from_static(b"inner")),
            );
            assert!(env.contains(sym));
        }
        assert!(!env.contains(sym));
        assert!(env.names().iter().all(|s| *s != sym));
    }
}
