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

use std::env::current_dir;
use std::os::unix::ffi::OsStrExt;

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};
use memchr::{memchr, memrchr};

pub fn trim_space(s: &[u8]) -> &[u8] {
    s.trim_ascii()
}

/// Make's word splitting: trim outer whitespace, then split on the ASCII
/// space character. Interior space runs therefore yield empty words.
pub fn words(s: &[u8]) -> impl Iterator<Item = &[u8]> {
    let s = trim_space(s);
    let n = if s.is_empty() { 0 } else { usize::MAX };
    s.split(|c: &u8| *c == b' ').take(n)
}

pub struct WordWriter<'a> {
    pub out: &'a mut dyn BufMut,
    needs_space: bool,
}

impl<'a> WordWriter<'a> {
    pub fn new(out: &'a mut dyn BufMut) -> WordWriter<'a> {
        WordWriter {
            out,
            needs_space: false,
        }
    }

    pub fn maybe_add_space(&mut self) {
        if self.needs_space {
            self.out.put_u8(b' ');
        } else {
            self.needs_space = true;
        }
    }

    pub fn write(&mut self, s: &[u8]) {
        self.maybe_add_space();
        self.out.put_slice(s);
    }
}

/// A `%`-pattern as used by `patsubst`, `filter` and the substitution
/// shorthand. Only the first `%` is a wildcard; without one the pattern
/// matches exact words.
#[derive(Debug)]
pub struct Pattern {
    pat: Bytes,
    percent_index: Option<usize>,
}

impl Pattern {
    pub fn new(pat: Bytes) -> Pattern {
        let idx = memchr(b'%', &pat);
        Pattern {
            pat,
            percent_index: idx,
        }
    }

    pub fn matches(&self, s: &[u8]) -> bool {
        if let Some(percent_index) = self.percent_index {
            return self.match_impl(s, percent_index);
        }
        self.pat == s
    }

    fn match_impl(&self, s: &[u8], percent_index: usize) -> bool {
        s.len() + 1 >= self.pat.len()
            && s.starts_with(&self.pat[..percent_index])
            && s.ends_with(&self.pat[percent_index + 1..])
    }

    /// Rewrite one word: on match, `%` in `subst` becomes the matched
    /// stem; an unmatched word passes through unchanged.
    pub fn append_subst(&self, s: &Bytes, subst: &Bytes) -> Bytes {
        let Some(percent_index) = self.percent_index else {
            if s == &self.pat {
                return subst.clone();
            }
            return s.clone();
        };

        if self.match_impl(s, percent_index) {
            if let Some(subst_percent_index) = memchr(b'%', subst) {
                let mut ret = BytesMut::with_capacity(subst.len() + s.len() - self.pat.len() + 1);
                ret.put_slice(&subst[..subst_percent_index]);
                ret.put_slice(&s[percent_index..(percent_index + s.len() + 1 - self.pat.len())]);
                ret.put_slice(&subst[subst_percent_index + 1..]);
                return ret.into();
            }
            return subst.clone();
        }
        s.clone()
    }
}

/// Directory part of a path, without the trailing slash; `.` when there
/// is none.
pub fn dirname(s: &Bytes) -> Bytes {
    let Some(found) = memrchr(b'/', s) else {
        return Bytes::from_static(b".");
    };
    if found == 0 {
        return Bytes::from_static(b"/");
    }
    s.slice(..found)
}

/// Collapse `.`, `..` and repeated slashes without touching the
/// filesystem.
pub fn normalize_path(mut o: &[u8]) -> Bytes {
    if o.is_empty() {
        return Bytes::new();
    }
    let mut ret = BytesMut::new();
    if o.starts_with(b"/") {
        ret.put_u8(b'/');
        o = &o[1..];
    }
    while !o.is_empty() {
        let idx = memchr(b'/', o);
        let (dir, rest) = match idx {
            Some(idx) => (&o[..idx], &o[idx + 1..]),
            None => (o, [].as_slice()),
        };
        o = rest;

        if dir == b"." || (dir == b".." && ret.as_ref() == b"/") {
            continue;
        } else if dir == b".." && !ret.is_empty() && ret.as_ref() != b".." && !ret.ends_with(b"/..")
        {
            match memrchr(b'/', ret.as_ref()) {
                Some(index) => {
                    if index == 0 {
                        ret.truncate(1);
                    } else {
                        ret.truncate(index);
                    }
                }
                None => {
                    ret.truncate(0);
                }
            }
        } else if !dir.is_empty() {
            if !ret.is_empty() && !ret.ends_with(b"/") {
                ret.put_u8(b'/');
            }
            ret.put_slice(dir);
        }
    }
    ret.into()
}

/// Join a relative name onto a base directory and clean the result;
/// absolute names pass through.
pub fn concat_dir(b: &[u8], n: &[u8]) -> Bytes {
    let mut r = BytesMut::new();
    if !b.is_empty() && !n.starts_with(b"/") {
        r.put_slice(b);
        r.put_u8(b'/');
    }
    r.put_slice(n);
    normalize_path(&r)
}

/// Absolutise against the process working directory, then clean.
pub fn abs_path(s: &[u8]) -> Result<Bytes> {
    if s.starts_with(b"/") {
        return Ok(normalize_path(s));
    }
    let mut o = BytesMut::from(current_dir()?.as_os_str().as_bytes());
    if !s.is_empty() {
        o.put_u8(b'/');
        o.put_slice(s);
    }
    Ok(normalize_path(&o))
}
