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

// TODO: Add docs
#![allow(missing_docs)]
#![deny(warnings)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(clippy::undocumented_unsafe_blocks)]

use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use anyhow::{Result, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand};

use makex::eval::Evaluator;
use makex::fileutil::clear_glob_cache;
use makex::lexer::Lexer;
use makex::parser::{parse_bytes, parse_file};
use makex::strutil::dirname;

#[derive(Parser)]
#[command(name = "makex", about = "Makefile explorer", version)]
struct Cli {
    /// Log level filter; MAKEX_LOG overrides.
    #[arg(long, default_value = "warn", global = true)]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dump the token stream and AST of a makefile, or parse a whole
    /// tree with `<dir>/...`.
    Dump { path: String },
    /// Evaluate a makefile and print the AST of the named target.
    Explore { makefile: String, target: String },
}

fn dump_one(path: &Path, print: bool) -> Result<()> {
    let buf = Bytes::from(std::fs::read(path)?);
    if print {
        for t in Lexer::new(buf.clone()) {
            println!("{}", t.string_align());
        }
        println!();
    }
    let node = parse_bytes(buf)?;
    if print {
        println!("{node:#?}");
    }
    Ok(())
}

fn dump_tree(dir: &Path, count: &mut usize) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dump_tree(&entry.path(), count)?;
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == "Makefile" || name.ends_with(".mk") {
            println!("{}", entry.path().display());
            *count += 1;
            dump_one(&entry.path(), false)?;
        }
    }
    Ok(())
}

fn dump(path: &str) -> Result<()> {
    if let Some(dir) = path.strip_suffix("/...") {
        let mut count = 0;
        let r = dump_tree(Path::new(dir), &mut count);
        println!("Found {count} files");
        return r;
    }
    dump_one(Path::new(path), true)
}

fn explore(makefile: &str, target: &str) -> Result<()> {
    let path = std::path::absolute(makefile)?;
    let path_bytes = Bytes::copy_from_slice(path.as_os_str().as_bytes());

    let file = parse_file(&path_bytes)?;
    let mut ev = Evaluator::new();
    ev.root_dir = dirname(&path_bytes);
    // Glob results are cached process-wide; evaluation starts from a
    // fresh view of the filesystem.
    clear_glob_cache();
    ev.include_file(&file)?;

    let Some(node) = ev.targets.get(target.as_bytes()) else {
        bail!("unknown target");
    };
    println!("{node:#?}");
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Dump { path } => dump(path),
        Command::Explore { makefile, target } => explore(makefile, target),
    }
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .parse_filters(&cli.log)
        .format(|buf, record| writeln!(buf, "*makex*: {}", record.args()))
        .parse_env("MAKEX_LOG")
        .init();

    if let Err(err) = run(cli) {
        for cause in err.chain() {
            eprintln!("{cause}");
        }
        std::process::exit(1);
    }
}
