// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/mod.rs

// The runtime context and the ways in from outside: source strings,
// files, and an interactive loop.

// <>

//! The Skiff Lisp runtime
//!
//! Values are single machine words: small integers and symbols live
//! in the word itself, while pairs and typed objects point into a
//! chunked cell heap managed by a mark-sweep collector.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};

pub mod config;
pub mod env;
pub mod eval;
pub mod gc;
pub mod memmgt;
pub mod parser;
pub mod print;
pub mod stdenv;
pub mod symtab;
pub mod syntax;
pub mod types;
pub mod value;

pub use config::{Config, Growth};
pub use eval::{Arity, NativeDesc, NativeFn, SyntaxFn};
pub use memmgt::{GcStats, Heap};
pub use types::{CoreType, DestructorFn, FindRefsFn, TypeHooks, TypeId, MAX_REFS};
pub use value::{Kind, Value, NIL};

use parser::Reader;
use symtab::SymbolTable;

/// Longest failure message kept, in bytes
pub const FAIL_MSG_CAP: usize = 256;

pub enum SkErr {
    /// Malformed source
    Parse(String),
    /// Source that ends inside a list or string
    Incomplete(String),
    /// Evaluation failed; carries the failure message
    Eval(String),
    Io(io::Error),
}

impl fmt::Display for SkErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkErr::Parse(msg) | SkErr::Incomplete(msg) | SkErr::Eval(msg) => {
                write!(f, "{}", msg)
            }
            SkErr::Io(e) => write!(f, "io: {}", e),
        }
    }
}

impl fmt::Debug for SkErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkErr::Parse(msg) => write!(f, "Parse({:?})", msg),
            SkErr::Incomplete(msg) => write!(f, "Incomplete({:?})", msg),
            SkErr::Eval(msg) => write!(f, "Eval({:?})", msg),
            SkErr::Io(e) => write!(f, "Io({:?})", e),
        }
    }
}

impl std::error::Error for SkErr {}

impl From<io::Error> for SkErr {
    fn from(e: io::Error) -> Self {
        SkErr::Io(e)
    }
}

/// One interpreter instance: heap, symbols, global environment, and
/// the evaluator's error state
pub struct Context {
    heap: Heap,
    symtab: SymbolTable,
    syntax: HashMap<u32, SyntaxFn>,
    root_env: Value,
    /// Function whose body is running; target of self tail calls
    cur_func: Value,
    will_tail_call: bool,
    failing: bool,
    fail_msg: String,
    depth: usize,
    max_depth: usize,
    peak_depth: usize,
    t: Value,
}

impl Context {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(cfg: Config) -> Self {
        let mut ctx = Self {
            heap: Heap::new(&cfg),
            symtab: SymbolTable::new(cfg.symtab_capacity),
            syntax: HashMap::new(),
            root_env: NIL,
            cur_func: NIL,
            will_tail_call: false,
            failing: false,
            fail_msg: String::new(),
            depth: 0,
            max_depth: cfg.max_depth,
            peak_depth: 0,
            t: NIL,
        };

        let env = ctx.heap.cons(NIL, NIL);
        ctx.heap.pin(env);
        ctx.root_env = env;

        let t = ctx.sym("t");
        ctx.t = t;
        ctx.env_define(env, t, t);

        for &(name, form) in syntax::FORMS {
            ctx.define_syntax(name, form);
        }

        for &(name, func, arity) in stdenv::natives() {
            ctx.define_native(name, arity, func);
        }

        log::debug!(
            "context ready: {} symbols, {} syntax forms, {} cells live",
            ctx.symtab.len(),
            ctx.syntax.len(),
            ctx.heap.live_count()
        );

        ctx
    }

    /// Binds a native procedure in the root environment
    pub fn define_native(&mut self, name: &'static str, arity: Arity, func: NativeFn) {
        let desc = Box::into_raw(Box::new(NativeDesc { name, arity, func }));
        let native = self.heap.make_tagged(TypeId::NATIVE, desc as usize);

        let base = self.heap.root_base();
        self.heap.push_root(native);

        let key = self.sym(name);
        let env = self.root_env;
        self.env_define(env, key, native);

        self.heap.pop_roots(base);
    }

    /// Makes a symbol name a syntax form, in every environment
    pub fn define_syntax(&mut self, name: &str, form: SyntaxFn) {
        let id = self.symtab.get_id(name);
        self.syntax.insert(id, form);
    }

    // Error state

    /// Enters the failing state with a message and returns nil; the
    /// first message stands until `reset`
    pub fn fail(&mut self, msg: impl AsRef<str>) -> Value {
        if !self.failing {
            self.failing = true;
            self.fail_msg.clear();
            self.set_fail_msg(msg.as_ref());
        }

        NIL
    }

    /// Replaces the failure message, clipped to FAIL_MSG_CAP bytes
    pub(crate) fn set_fail_msg(&mut self, msg: &str) {
        let mut end = msg.len().min(FAIL_MSG_CAP);
        while !msg.is_char_boundary(end) {
            end -= 1;
        }

        self.fail_msg.clear();
        self.fail_msg.push_str(&msg[..end]);
    }

    pub fn failing(&self) -> bool {
        self.failing
    }

    pub fn fail_message(&self) -> &str {
        &self.fail_msg
    }

    /// Clears the failing state; meant for the top level, between forms
    pub fn reset(&mut self) {
        self.failing = false;
        self.fail_msg.clear();
        self.cur_func = NIL;
        self.will_tail_call = false;
    }

    // Accessors

    pub fn root_env(&self) -> Value {
        self.root_env
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Deepest evaluation nesting reached so far
    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }

    // Value construction

    /// Interns a symbol
    pub fn sym(&mut self, name: &str) -> Value {
        Value::sym(self.symtab.get_id(name))
    }

    pub fn sym_name(&self, v: Value) -> Option<&str> {
        self.symtab.lookup_by_id(v.as_sym()?)
    }

    /// The canonical true value, the symbol `t`
    pub fn t(&self) -> Value {
        self.t
    }

    pub fn boolean(&self, b: bool) -> Value {
        if b {
            self.t
        } else {
            NIL
        }
    }

    pub fn cons(&mut self, first: Value, rest: Value) -> Value {
        self.heap.cons(first, rest)
    }

    /// Builds a proper list of the given values
    pub fn list(&mut self, items: &[Value]) -> Value {
        let base = self.heap.root_base();
        for &v in items {
            self.heap.push_root(v);
        }
        let acc = self.heap.push_root(NIL);

        for &v in items.iter().rev() {
            let cell = self.heap.cons(v, self.heap.root(acc));
            self.heap.set_root(acc, cell);
        }

        let out = self.heap.root(acc);
        self.heap.pop_roots(base);
        out
    }

    /// A string object owning a copy of the bytes
    pub fn str(&mut self, bytes: &[u8]) -> Value {
        let buf = Box::into_raw(Box::new(bytes.to_vec()));
        self.heap.make_tagged(TypeId::STR, buf as usize)
    }

    pub fn str_bytes(&self, v: Value) -> Option<&[u8]> {
        if v.type_id() != TypeId::STR || v.payload() == 0 {
            return None;
        }

        let buf = v.payload() as *const Vec<u8>;
        Some(unsafe { &(&(*buf))[..] })
    }

    /// A closure over `env`; `name` is a symbol, or nil when anonymous
    pub fn func(&mut self, env: Value, params: Value, body: Value, name: Value) -> Value {
        let base = self.heap.root_base();
        let parts = self.list(&[env, params, body, name]);
        self.heap.push_root(parts);

        let out = self.heap.make_tagged(TypeId::FUNC, parts.raw());

        self.heap.pop_roots(base);
        out
    }

    pub fn native_desc(&self, v: Value) -> Option<NativeDesc> {
        if v.type_id() != TypeId::NATIVE || v.payload() == 0 {
            return None;
        }

        Some(unsafe { *(v.payload() as *const NativeDesc) })
    }

    // Heap passthroughs

    pub fn pin(&mut self, v: Value) {
        self.heap.pin(v)
    }

    pub fn unpin(&mut self, v: Value) {
        self.heap.unpin(v)
    }

    /// Full collection; returns the number of cells freed
    pub fn collect(&mut self) -> usize {
        self.heap.collect(true)
    }

    pub fn register_type(
        &mut self,
        name: &str,
        find_refs: Option<FindRefsFn>,
        destructor: Option<DestructorFn>,
    ) -> TypeId {
        self.heap.register_type(name, find_refs, destructor)
    }

    pub fn register_type_hooks(&mut self, name: &str, hooks: Box<dyn TypeHooks>) -> TypeId {
        self.heap.register_type_hooks(name, hooks)
    }

    /// A typed object; the caller keeps whatever `payload` refers to
    /// alive until this returns
    pub fn make_tagged(&mut self, typ: TypeId, payload: usize) -> Value {
        self.heap.make_tagged(typ, payload)
    }

    // Running source

    /// Reads and evaluates every form in the source, in the root
    /// environment; returns the value of the last one
    ///
    /// Stops at the first failure, which `failing()` then reports.
    pub fn exec(&mut self, source: &str) -> Value {
        self.exec_forms(source, false)
    }

    /// As `exec`, printing each non-nil result
    pub fn exec_echo(&mut self, source: &str) -> Value {
        self.exec_forms(source, true)
    }

    fn exec_forms(&mut self, source: &str, echo: bool) -> Value {
        let mut reader = Reader::new(source);

        let base = self.heap.root_base();
        let result = self.heap.push_root(NIL);

        loop {
            self.reset();

            let form = match reader.read(self) {
                Ok(Some(form)) => form,
                Ok(None) => break,
                Err(e) => {
                    self.heap.set_root(result, NIL);
                    self.fail(e.to_string());
                    break;
                }
            };

            self.heap.set_root(result, form);
            let env = self.root_env;
            let out = self.eval(env, form, false);
            self.heap.set_root(result, out);

            if self.failing {
                break;
            }

            if echo && !out.is_nil() {
                println!("{}", self.display(out));
            }
        }

        let out = self.heap.root(result);
        self.heap.pop_roots(base);
        out
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if cfg!(feature = "memdbg") {
            log::debug!(
                "context shutdown: {} cells live in {} chunks",
                self.heap.live_count(),
                self.heap.chunk_count()
            );
        }

        self.heap.unpin(self.root_env);
        self.root_env = NIL;
    }
}

/// The parts of a function object: (env, params, body, name)
pub(crate) fn func_parts(func: Value) -> (Value, Value, Value, Value) {
    let parts = unsafe { Value::from_raw(func.payload()) };
    (parts.nth(0), parts.nth(1), parts.nth(2), parts.nth(3))
}

/// Runs a source file in a fresh context, returning the printed value
/// of its last form
pub fn run_file(filename: &str, cfg: Config) -> Result<String, SkErr> {
    let src = fs::read_to_string(filename)?;
    let mut ctx = Context::with_config(cfg);

    log::info!("running {}", filename);
    let out = ctx.exec(&src);

    if ctx.failing() {
        return Err(SkErr::Eval(ctx.fail_message().to_string()));
    }

    Ok(ctx.display(out))
}

/// Interactive loop; a form may span lines and is run once every list
/// and string in it is closed
pub fn repl(stream_in: io::Stdin, cfg: Config) -> Result<(), SkErr> {
    let mut ctx = Context::with_config(cfg);
    let mut input = String::new();

    loop {
        {
            let mut out = io::stdout().lock();
            write!(out, "{}", if input.is_empty() { "> " } else { "  " })?;
            out.flush()?;
        }

        let mut line = String::new();
        if stream_in.read_line(&mut line)? == 0 {
            break;
        }
        input.push_str(&line);

        if !parser::is_complete(&input) {
            continue;
        }

        ctx.exec_echo(&input);
        if ctx.failing() {
            log::debug!("repl form failed");
            println!("Error: {}", ctx.fail_message());
        }

        input.clear();
    }

    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trip() {
        for n in [0, 1, -1, 12345, value::INT_MAX, value::INT_MIN] {
            assert_eq!(Value::int(n).as_int(), Some(n));
        }
    }

    #[test]
    fn exec_returns_last_value() {
        let mut ctx = Context::new();

        assert_eq!(ctx.exec("1 2 3"), Value::int(3));
        assert_eq!(ctx.exec(""), NIL);
        assert_eq!(ctx.exec("; just a comment"), NIL);
    }

    #[test]
    fn exec_stops_at_failure() {
        let mut ctx = Context::new();

        ctx.exec("(define a 1) (car 1) (define a 2)");
        assert!(ctx.failing());
        assert_eq!(ctx.exec("a"), Value::int(1));
    }

    #[test]
    fn first_failure_wins() {
        let mut ctx = Context::new();

        ctx.fail("first");
        ctx.fail("second");
        assert_eq!(ctx.fail_message(), "first");

        ctx.reset();
        assert!(!ctx.failing());
        assert_eq!(ctx.fail_message(), "");
    }

    #[test]
    fn long_messages_are_clipped() {
        let mut ctx = Context::new();

        ctx.fail("é".repeat(FAIL_MSG_CAP));
        assert!(ctx.fail_message().len() <= FAIL_MSG_CAP);
        assert!(ctx.fail_message().chars().all(|c| c == 'é'));
    }

    #[test]
    fn parse_errors_fail() {
        let mut ctx = Context::new();

        assert_eq!(ctx.exec("(1 2"), NIL);
        assert!(ctx.failing());
        assert_eq!(ctx.fail_message(), "Expected ')'");
    }

    #[test]
    fn unpinned_values_are_collected() {
        let mut ctx = Context::new();
        ctx.collect();
        let before = ctx.heap().live_count();

        let cell = ctx.cons(Value::int(1), NIL);
        ctx.pin(cell);
        ctx.collect();
        assert!(ctx.heap().is_live(cell));

        ctx.unpin(cell);
        ctx.collect();
        assert_eq!(ctx.heap().live_count(), before);
    }

    #[test]
    fn list_builds_in_order() {
        let mut ctx = Context::new();

        let l = ctx.list(&[Value::int(1), Value::int(2), Value::int(3)]);
        assert_eq!(ctx.display(l), "(1 2 3)");
        assert_eq!(ctx.list(&[]), NIL);
    }

    #[test]
    fn natives_from_outside() {
        fn twice(_ctx: &mut Context, args: &[Value]) -> Value {
            match args[0].as_int() {
                Some(n) => Value::int(n * 2),
                None => NIL,
            }
        }

        let mut ctx = Context::new();
        ctx.define_native("twice", Arity::new(1, 0, false), twice);

        assert_eq!(ctx.exec("(twice 21)"), Value::int(42));
    }

    #[test]
    fn run_file_reports_errors() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("skiff-good-{}.sk", std::process::id()));
        let bad = dir.join(format!("skiff-bad-{}.sk", std::process::id()));

        fs::write(&good, "(define (sq x) (* x x))\n(sq 7)\n").unwrap();
        fs::write(&bad, "(sq 7)\n").unwrap();

        assert_eq!(run_file(good.to_str().unwrap(), Config::default()).unwrap(), "49");
        match run_file(bad.to_str().unwrap(), Config::default()) {
            Err(SkErr::Eval(msg)) => assert!(msg.contains("Not defined")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            run_file("/nonexistent/skiff.sk", Config::default()),
            Err(SkErr::Io(_))
        ));

        let _ = fs::remove_file(good);
        let _ = fs::remove_file(bad);
    }
}
