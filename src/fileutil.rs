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
use std::ffi::{CStr, CString, OsStr};
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::process::{Command, ExitStatus};
use std::slice;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::log;

pub type GlobResults = Arc<Result<Vec<Bytes>, std::io::Error>>;

static GLOB_CACHE: LazyLock<Mutex<HashMap<Bytes, GlobResults>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Expand a pattern against the filesystem, with a process-wide cache. A
/// pattern without glob metacharacters is checked for plain existence.
pub fn glob(pat: Bytes) -> GlobResults {
    let mut cache = GLOB_CACHE.lock();
    if let Some(entry) = cache.get(&pat) {
        return entry.clone();
    }
    let glob = Arc::new(
        if pat.contains(&b'?') || pat.contains(&b'*') || pat.contains(&b'[') || pat.contains(&b'\\')
        {
            libc_glob(&pat)
        } else if let Err(err) = std::fs::metadata(<OsStr as OsStrExt>::from_bytes(&pat)) {
            Err(err)
        } else {
            Ok(vec![pat.clone()])
        },
    );
    cache.insert(pat, glob.clone());
    glob
}

// Use libc glob over the `glob` crate, to maintain compatibility.
// The glob crate normalizes paths too much:
//   ./sub/*.mk -> sub/a.mk
// This breaks makefiles that do further string manipulation.
fn libc_glob(pattern: &[u8]) -> Result<Vec<Bytes>, std::io::Error> {
    let pat = CString::new(pattern).unwrap();
    let mut ret = Vec::new();
    // SAFETY: All of the types in glob_t are safe to be zero'd.
    let mut gl: libc::glob_t = unsafe { std::mem::zeroed() };
    // SAFETY: gl has been zero'd above, and pat is used as an input.
    // We'll free any allocated memory with globfree below.
    let r = unsafe { libc::glob(pat.as_ptr(), 0, None, &mut gl) };
    if r == 0 && gl.gl_pathc > 0 && !gl.gl_pathv.is_null() {
        // SAFETY: glob succeeded and gl_pathv is non-null; the pointers
        // stay valid until the globfree below, and we copy out of them
        // immediately.
        let paths = unsafe { slice::from_raw_parts(gl.gl_pathv, gl.gl_pathc) };
        ret.reserve_exact(gl.gl_pathc);
        for ptr in paths {
            if !ptr.is_null() {
                // SAFETY: a non-null entry of a successful glob is a valid
                // C string.
                let s = unsafe { CStr::from_ptr(*ptr) };
                ret.push(Bytes::from(s.to_bytes().to_owned()));
            }
        }
    }
    // SAFETY: nothing from gl is used past this point; this only frees
    // memory allocated by libc::glob.
    unsafe { libc::globfree(&mut gl) };
    Ok(ret)
}

pub fn clear_glob_cache() {
    GLOB_CACHE.lock().clear();
}

/// Run a command under `sh -c`, blocking until it exits, with stdout and
/// stderr combined into one stream in write order.
pub fn run_shell(cmd: &[u8], dir: Option<&[u8]>) -> Result<(ExitStatus, Vec<u8>)> {
    log!("run_shell({})", String::from_utf8_lossy(cmd));

    let mut command = Command::new("sh");
    command.arg("-c").arg(OsStr::from_bytes(cmd));
    if let Some(dir) = dir {
        command.current_dir(OsStr::from_bytes(dir));
    }

    let (mut reader, writer) = os_pipe::pipe()?;
    command.stderr(writer.try_clone()?);
    command.stdout(writer);

    let mut handle = command.spawn()?;
    // Drop the command, otherwise the pipe writer stays open.
    drop(command);

    let mut output = Vec::new();
    reader.read_to_end(&mut output)?;

    let status = handle.wait()?;
    Ok((status, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_run_shell_combines_streams() {
        let (status, out) = run_shell(b"echo one; echo two >&2", None).unwrap();
        assert!(status.success());
        assert_eq!(out, b"one\ntwo\n");
    }

    #[test]
    fn test_run_shell_failure_status() {
        let (status, out) = run_shell(b"echo oops; exit 3", None).unwrap();
        assert!(!status.success());
        assert_eq!(out, b"oops\n");
    }

    #[test]
    fn test_run_shell_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (_, out) = run_shell(b"pwd", Some(dir.path().as_os_str().as_bytes())).unwrap();
        let got = std::path::Path::new(OsStr::from_bytes(out.strip_suffix(b"\n").unwrap()))
            .canonicalize()
            .unwrap();
        assert_eq!(got, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_glob() {
        let dir = tempfile::tempdir().unwrap();
        let mk = |name: &str| {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(b"x\n").unwrap();
        };
        mk("a.mk");
        mk("b.mk");
        mk("c.txt");
        let pat = format!("{}/*.mk", dir.path().display());
        let files = glob(Bytes::from(pat));
        let files = files.as_ref().as_ref().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with(b"a.mk"));
        assert!(files[1].ends_with(b"b.mk"));
    }

    #[test]
    fn test_glob_missing_plain_path_is_error() {
        let files = glob(Bytes::from_static(b"/no/such/file/anywhere.mk"));
        assert!(files.as_ref().is_err());
    }

    #[test]
    fn test_clear_glob_cache() {
        let dir = tempfile::tempdir().unwrap();
        let pat = format!("{}/*.log", dir.path().display());

        let files = glob(Bytes::from(pat.clone()));
        assert!(files.as_ref().as_ref().unwrap().is_empty());

        std::fs::File::create(dir.path().join("new.log")).unwrap();
        // The cached answer survives the new file...
        let files = glob(Bytes::from(pat.clone()));
        assert!(files.as_ref().as_ref().unwrap().is_empty());

        // ...until the cache is dropped.
        clear_glob_cache();
        let files = glob(Bytes::from(pat));
        assert_eq!(files.as_ref().as_ref().unwrap().len(), 1);
    }
}
