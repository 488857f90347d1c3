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

//! The built-in expansion functions. Handlers receive their arguments as
//! unevaluated nodes, because some of them (`if`, `foreach`) must not
//! pre-evaluate every branch.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};

use anyhow::{Result, bail};
use bytes::{BufMut, Bytes, BytesMut};
use memchr::{memmem, memrchr};

use crate::ast::Node;
use crate::eval::Evaluator;
use crate::strutil::{Pattern, WordWriter, abs_path, concat_dir, trim_space, words};
use crate::symtab::intern;
use crate::var::{ScopedVar, Variable};
use crate::warn;

pub type MakeFuncImpl = fn(&mut Evaluator, &[u8], &[Arc<Node>], &mut dyn BufMut) -> Result<()>;

pub struct FuncInfo {
    pub name: &'static [u8],
    pub func: MakeFuncImpl,
    pub min_arity: usize,
}

// Function pointers are not comparable, so just compare by name.
impl PartialEq for FuncInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Debug for FuncInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Func({})", String::from_utf8_lossy(self.name))
    }
}

fn shell_func(ev: &mut Evaluator, _n: &[u8], args: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
    let mut cmd = BytesMut::new();
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            cmd.put_u8(b' ');
        }
        cmd.put_slice(&ev.eval_to_bytes(a)?);
    }
    let output = ev.shell_capture(&cmd)?;
    out.put_slice(&output);
    Ok(())
}

/// `$(call name,a,b)` binds `0` to the macro name and `1..N` to the
/// arguments for the duration of the expansion.
fn call_func(ev: &mut Evaluator, _n: &[u8], args: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
    let mut parts = Vec::with_capacity(args.len());
    for a in args {
        parts.push(ev.eval_to_bytes(a)?);
    }
    let func_sym = intern(parts[0].clone());
    let var = ev.env.lookup(func_sym);
    if var.is_none() {
        warn!("undefined user function {func_sym}");
    }

    let mut sv = Vec::with_capacity(parts.len());
    for (i, p) in parts.iter().enumerate() {
        sv.push(ScopedVar::new(
            ev.env.clone(),
            intern(format!("{i}")),
            Variable::raw(p.clone()),
        ));
    }
    let r = match &var {
        Some(var) => ev.var_eval_unguarded(var, out),
        None => Ok(()),
    };
    drop(sv);
    r
}

fn if_func(ev: &mut Evaluator, _n: &[u8], args: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
    let cond = ev.eval_to_bytes(&args[0])?;
    if !trim_space(&cond).is_empty() {
        ev.eval(&args[1], out)
    } else if args.len() > 2 {
        ev.eval(&args[2], out)
    } else {
        Ok(())
    }
}

fn foreach_func(ev: &mut Evaluator, _n: &[u8], args: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
    let varname = intern(ev.eval_to_bytes(&args[0])?);
    let list = ev.eval_to_bytes(&args[1])?;
    let mut ww = WordWriter::new(out);
    for w in words(&list) {
        let w = list.slice_ref(w);
        let _sv = ScopedVar::new(ev.env.clone(), varname, Variable::raw(w));
        ww.maybe_add_space();
        ev.eval(&args[2], ww.out)?;
    }
    Ok(())
}

fn words_func(ev: &mut Evaluator, _n: &[u8], args: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
    let text = ev.eval_to_bytes(&args[0])?;
    let n = words(&text).count();
    out.put_slice(n.to_string().as_bytes());
    Ok(())
}

fn firstword_func(
    ev: &mut Evaluator,
    _n: &[u8],
    args: &[Arc<Node>],
    out: &mut dyn BufMut,
) -> Result<()> {
    let text = ev.eval_to_bytes(&args[0])?;
    if let Some(w) = words(&text).next() {
        out.put_slice(w);
    }
    Ok(())
}

fn lastword_func(
    ev: &mut Evaluator,
    _n: &[u8],
    args: &[Arc<Node>],
    out: &mut dyn BufMut,
) -> Result<()> {
    let text = ev.eval_to_bytes(&args[0])?;
    if let Some(w) = words(&text).last() {
        out.put_slice(w);
    }
    Ok(())
}

/// Trim one leading and one trailing space, nothing more.
fn strip_func(ev: &mut Evaluator, _n: &[u8], args: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
    let v = ev.eval_to_bytes(&args[0])?;
    let s = v.strip_prefix(b" ").unwrap_or(&v);
    let s = s.strip_suffix(b" ").unwrap_or(s);
    out.put_slice(s);
    Ok(())
}

fn subst_func(ev: &mut Evaluator, _n: &[u8], args: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
    let from = ev.eval_to_bytes(&args[0])?;
    let to = ev.eval_to_bytes(&args[1])?;
    let text = ev.eval_to_bytes(&args[2])?;
    if from.is_empty() {
        // An empty needle appends the replacement once.
        out.put_slice(&text);
        out.put_slice(&to);
        return Ok(());
    }
    let f = memmem::Finder::new(&from);
    let mut remainder = text.as_ref();
    while !remainder.is_empty() {
        let Some(found) = f.find(remainder) else {
            out.put_slice(remainder);
            break;
        };
        out.put_slice(&remainder[..found]);
        out.put_slice(&to);
        remainder = &remainder[found + from.len()..];
    }
    Ok(())
}

/// Shared by `$(patsubst ...)` and the `$(v:pat=repl)` shorthand: a
/// pattern without `%` gets `%` prepended to both sides, which is the
/// suffix-rewrite rule.
pub fn apply_patsubst(pat: &Bytes, repl: &Bytes, text: &Bytes, out: &mut dyn BufMut) {
    let (pat, repl) = if !pat.contains(&b'%') {
        let mut p = BytesMut::with_capacity(pat.len() + 1);
        p.put_u8(b'%');
        p.put_slice(pat);
        let mut r = BytesMut::with_capacity(repl.len() + 1);
        r.put_u8(b'%');
        r.put_slice(repl);
        (p.freeze(), r.freeze())
    } else {
        (pat.clone(), repl.clone())
    };
    let pattern = Pattern::new(pat);
    let mut ww = WordWriter::new(out);
    for w in words(text) {
        let w = text.slice_ref(w);
        ww.write(&pattern.append_subst(&w, &repl));
    }
}

fn patsubst_func(
    ev: &mut Evaluator,
    _n: &[u8],
    args: &[Arc<Node>],
    out: &mut dyn BufMut,
) -> Result<()> {
    let pat = ev.eval_to_bytes(&args[0])?;
    let repl = ev.eval_to_bytes(&args[1])?;
    let text = ev.eval_to_bytes(&args[2])?;
    apply_patsubst(&pat, &repl, &text, out);
    Ok(())
}

fn filter_func(ev: &mut Evaluator, name: &[u8], args: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
    let keep = name == b"filter";
    let pat_buf = ev.eval_to_bytes(&args[0])?;
    let text = ev.eval_to_bytes(&args[1])?;
    let pats: Vec<Pattern> = words(&pat_buf)
        .filter(|p| !p.is_empty())
        .map(|p| Pattern::new(pat_buf.slice_ref(p)))
        .collect();
    let mut ww = WordWriter::new(out);
    for w in words(&text) {
        let matched = pats.iter().any(|p| p.matches(w));
        if matched == keep {
            ww.write(w);
        }
    }
    Ok(())
}

fn addprefix_func(
    ev: &mut Evaluator,
    _n: &[u8],
    args: &[Arc<Node>],
    out: &mut dyn BufMut,
) -> Result<()> {
    let pre = ev.eval_to_bytes(&args[0])?;
    let text = ev.eval_to_bytes(&args[1])?;
    let mut ww = WordWriter::new(out);
    for w in words(&text) {
        ww.write(&pre);
        ww.out.put_slice(w);
    }
    Ok(())
}

/// Everything before the final `.` of each word, or the word itself.
fn basename_func(
    ev: &mut Evaluator,
    _n: &[u8],
    args: &[Arc<Node>],
    out: &mut dyn BufMut,
) -> Result<()> {
    let text = ev.eval_to_bytes(&args[0])?;
    let mut ww = WordWriter::new(out);
    for w in words(&text) {
        match memrchr(b'.', w) {
            Some(i) => ww.write(&w[..i]),
            None => ww.write(w),
        }
    }
    Ok(())
}

/// Everything up to and including the final `/` of each word.
fn dir_func(ev: &mut Evaluator, _n: &[u8], args: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
    let text = ev.eval_to_bytes(&args[0])?;
    let mut ww = WordWriter::new(out);
    for w in words(&text) {
        match memrchr(b'/', w) {
            Some(i) => ww.write(&w[..i + 1]),
            None => ww.write(b""),
        }
    }
    Ok(())
}

fn notdir_func(ev: &mut Evaluator, _n: &[u8], args: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
    let text = ev.eval_to_bytes(&args[0])?;
    let mut ww = WordWriter::new(out);
    for w in words(&text) {
        match memrchr(b'/', w) {
            Some(i) => ww.write(&w[i + 1..]),
            None => ww.write(w),
        }
    }
    Ok(())
}

/// Join each relative path against the current Makefile's directory,
/// absolutise and clean; no filesystem access involved.
fn realpath_func(
    ev: &mut Evaluator,
    _n: &[u8],
    args: &[Arc<Node>],
    out: &mut dyn BufMut,
) -> Result<()> {
    let text = ev.eval_to_bytes(&args[0])?;
    let curdir = ev.curdir();
    let mut ww = WordWriter::new(out);
    for w in words(&text) {
        if w.is_empty() {
            continue;
        }
        let p = if w.starts_with(b"/") {
            text.slice_ref(w)
        } else {
            concat_dir(&curdir, w)
        };
        ww.write(&abs_path(&p)?);
    }
    Ok(())
}

fn wildcard_func(
    ev: &mut Evaluator,
    _n: &[u8],
    args: &[Arc<Node>],
    out: &mut dyn BufMut,
) -> Result<()> {
    let pat = ev.eval_to_bytes(&args[0])?;
    let pat = if pat.starts_with(b"/") {
        pat
    } else {
        concat_dir(&ev.curdir(), &pat)
    };
    let files = crate::fileutil::glob(pat);
    let mut ww = WordWriter::new(out);
    if let Ok(files) = files.as_ref().as_ref() {
        for f in files {
            ww.write(f);
        }
    }
    Ok(())
}

/// `info`, `warning` and `error` print their comma-joined arguments;
/// `error` then aborts the evaluation.
fn control_func(ev: &mut Evaluator, name: &[u8], args: &[Arc<Node>], _out: &mut dyn BufMut) -> Result<()> {
    let mut text = BytesMut::new();
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            text.put_u8(b',');
        }
        text.put_slice(&ev.eval_to_bytes(a)?);
    }
    println!("{}", String::from_utf8_lossy(&text));
    if name == b"error" {
        bail!("error");
    }
    Ok(())
}

/// Expand the argument, parse the result as a makefile fragment, and
/// evaluate it in the current environment.
fn eval_func(ev: &mut Evaluator, _n: &[u8], args: &[Arc<Node>], _out: &mut dyn BufMut) -> Result<()> {
    let text = ev.eval_to_bytes(&args[0])?;
    let n = crate::parser::parse_bytes(text)?;
    let mut scratch = BytesMut::new();
    ev.eval(&n, &mut scratch)?;
    Ok(())
}

fn value_func(ev: &mut Evaluator, _n: &[u8], args: &[Arc<Node>], out: &mut dyn BufMut) -> Result<()> {
    let name = ev.eval_to_bytes(&args[0])?;
    let Some(var) = ev.env.lookup(intern(name)) else {
        return Ok(());
    };
    ev.var_value(&var, out)
}

const fn func(name: &'static [u8], f: MakeFuncImpl, min_arity: usize) -> FuncInfo {
    FuncInfo {
        name,
        func: f,
        min_arity,
    }
}

const FUNC_INFO: &[FuncInfo] = &[
    func(b"shell", shell_func, 1),
    func(b"call", call_func, 1),
    func(b"if", if_func, 2),
    func(b"words", words_func, 1),
    func(b"firstword", firstword_func, 1),
    func(b"lastword", lastword_func, 1),
    func(b"strip", strip_func, 1),
    func(b"subst", subst_func, 3),
    func(b"patsubst", patsubst_func, 3),
    func(b"addprefix", addprefix_func, 2),
    func(b"basename", basename_func, 1),
    func(b"dir", dir_func, 1),
    func(b"notdir", notdir_func, 1),
    func(b"realpath", realpath_func, 1),
    func(b"wildcard", wildcard_func, 1),
    func(b"foreach", foreach_func, 3),
    func(b"filter", filter_func, 2),
    func(b"filter-out", filter_func, 2),
    func(b"info", control_func, 1),
    func(b"warning", control_func, 1),
    func(b"error", control_func, 1),
    func(b"eval", eval_func, 1),
    func(b"value", value_func, 1),
];

static FUNC_INFO_MAP: LazyLock<HashMap<&'static [u8], &'static FuncInfo>> =
    LazyLock::new(|| FUNC_INFO.iter().map(|f| (f.name, f)).collect());

pub fn get_func_info(name: &[u8]) -> Option<&'static FuncInfo> {
    FUNC_INFO_MAP.get(name).map(|v| &**v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        assert!(get_func_info(b"shell").is_some());
        assert!(get_func_info(b"filter-out").is_some());
        assert!(get_func_info(b"sort").is_none());
        assert_eq!(get_func_info(b"subst").unwrap().min_arity, 3);
    }

    #[test]
    fn test_apply_patsubst_translation() {
        // `p,r,t` with % equals the anchored-regex formulation: per word,
        // ^quote(p with % -> (.*))$ with % in r replaced by the capture.
        let cases: &[(&[u8], &[u8], &[u8], &[u8])] = &[
            (b"%.c", b"%.o", b"a.c b.c", b"a.o b.o"),
            (b"%.c", b"%.o", b"a.c x.y", b"a.o x.y"),
            (b"a%z", b"<%>", b"abz az anz", b"<b> <> <n>"),
            // No `%`: suffix-rewrite shorthand.
            (b".o", b".c", b"a.o b.o l.a c.o", b"a.c b.c l.a c.c"),
        ];
        for (pat, repl, text, want) in cases {
            let mut out = BytesMut::new();
            apply_patsubst(
                &Bytes::copy_from_slice(pat),
                &Bytes::copy_from_slice(repl),
                &Bytes::copy_from_slice(text),
                &mut out,
            );
            assert_eq!(out.as_ref(), *want);
        }
    }
}
