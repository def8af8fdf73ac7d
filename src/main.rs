// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/main.rs

// Command line driver.

// <>

use skiff::lisp::{self, Config, Context};

use std::env;
use std::io;
use std::process;
use std::thread;

/// Host stack for the interpreter thread; sized for MAX_DEPTH
const STACK_SIZE: usize = 256 * 1024 * 1024;
const MAX_DEPTH: usize = 20000;

const USAGE: &str = "usage: skiff [-v] (repl | file <path> | eval <source>)";

fn main() {
    let mut args: Vec<String> = env::args().skip(1).collect();

    let verbose = args.first().map(|a| a == "-v").unwrap_or(false);
    if verbose {
        args.remove(0);
    }

    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init()
    {
        eprintln!("logger setup failed: {}", e);
    }

    let cfg = Config {
        max_depth: MAX_DEPTH,
        ..Default::default()
    };

    // Deep non-tail recursion runs on the host stack, so the
    // interpreter gets a thread with room for it
    let runner = thread::Builder::new()
        .name("skiff".to_string())
        .stack_size(STACK_SIZE)
        .spawn(move || run(&args, cfg));

    let code = match runner.map(|h| h.join()) {
        Ok(Ok(code)) => code,
        Ok(Err(_)) => {
            log::error!("interpreter thread panicked");
            101
        }
        Err(e) => {
            log::error!("could not start interpreter thread: {}", e);
            1
        }
    };

    process::exit(code);
}

/// Dispatches on the subcommand; returns the exit status
fn run(args: &[String], cfg: Config) -> i32 {
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["repl"] => match lisp::repl(io::stdin(), cfg) {
            Ok(()) => 0,
            Err(e) => {
                log::error!("{}", e);
                1
            }
        },
        ["file", path] => match lisp::run_file(path, cfg) {
            Ok(out) => {
                println!("{}", out);
                0
            }
            Err(e) => {
                println!("Error: {}", e);
                1
            }
        },
        ["eval", source] => {
            let mut ctx = Context::with_config(cfg);
            let out = ctx.exec(source);

            if ctx.failing() {
                println!("Error: {}", ctx.fail_message());
                1
            } else {
                println!("{}", ctx.display(out));
                0
            }
        }
        _ => {
            eprintln!("{}", USAGE);
            2
        }
    }
}
