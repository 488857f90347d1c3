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

//! Call-stack-style error wrapping for the parser. Each routine prepends
//! its own name on the way out, so a failure deep in an expression reads
//! `[root > target > expr > raw]: unhandled token ...`.

use std::fmt::{Debug, Display};

pub struct TraceError {
    trace: Vec<&'static str>,
    msg: String,
}

impl Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.trace.join(" > "), self.msg)
    }
}

impl Debug for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for TraceError {}

/// Wrap `err` with a routine name: an existing trace grows at the front,
/// anything else starts a new one.
pub fn wrap(name: &'static str, err: anyhow::Error) -> anyhow::Error {
    match err.downcast::<TraceError>() {
        Ok(mut te) => {
            te.trace.insert(0, name);
            te.into()
        }
        Err(err) => TraceError {
            trace: vec![name],
            msg: err.to_string(),
        }
        .into(),
    }
}
