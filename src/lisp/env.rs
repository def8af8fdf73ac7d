// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/env.rs

// Environments. A frame is a pair of (parent . bindings), where the
// bindings are an association list of (symbol . value) pairs with
// the newest first.

// <>

use super::value::{Value, NIL};
use super::Context;

/// Binding pair for a symbol in this frame only
fn frame_binding(frame: Value, key: Value) -> Option<Value> {
    let mut vars = frame.cdr();

    while vars.is_pair() {
        let binding = vars.car();
        if binding.is_pair() && binding.car() == key {
            return Some(binding);
        }

        vars = vars.cdr();
    }

    None
}

/// Binding pair for a symbol in this frame or any ancestor
pub fn env_lookup(env: Value, key: Value) -> Option<Value> {
    let mut frame = env;

    while frame.is_pair() {
        if let Some(binding) = frame_binding(frame, key) {
            return Some(binding);
        }

        frame = frame.car();
    }

    None
}

impl Context {
    /// An empty frame whose lookups fall through to `parent`
    pub fn env_new(&mut self, parent: Value) -> Value {
        self.heap.cons(parent, NIL)
    }

    /// Binds a symbol in the given frame, replacing any binding it
    /// already has there; parent frames are never touched
    pub fn env_define(&mut self, env: Value, key: Value, val: Value) {
        if let Some(binding) = frame_binding(env, key) {
            binding.set_cdr(val);
            return;
        }

        let base = self.heap.root_base();
        self.heap.push_root(env);

        let binding = self.heap.cons(key, val);
        let vars = self.heap.cons(binding, env.cdr());
        env.set_cdr(vars);

        self.heap.pop_roots(base);
    }

    /// Value bound to a symbol; unbound is an error
    pub fn env_get(&mut self, env: Value, key: Value) -> Value {
        match env_lookup(env, key) {
            Some(binding) => binding.cdr(),
            None => self.unbound(key),
        }
    }

    /// Rebinds an existing binding wherever it is found; unbound is an
    /// error
    pub fn env_set(&mut self, env: Value, key: Value, val: Value) -> Value {
        match env_lookup(env, key) {
            Some(binding) => {
                binding.set_cdr(val);
                val
            }
            None => self.unbound(key),
        }
    }

    fn unbound(&mut self, key: Value) -> Value {
        let msg = format!("Not defined: '{}'", self.display(key));
        self.fail(msg)
    }
}

#[cfg(test)]
mod tests {
    use crate::lisp::{Context, Value, NIL};

    #[test]
    fn define_then_get() {
        let mut ctx = Context::new();
        let env = ctx.root_env();
        let x = ctx.sym("x");

        ctx.env_define(env, x, Value::int(5));
        assert_eq!(ctx.env_get(env, x).as_int(), Some(5));

        // redefinition replaces in place
        ctx.env_define(env, x, Value::int(6));
        assert_eq!(ctx.env_get(env, x).as_int(), Some(6));
        assert!(!ctx.failing());
    }

    #[test]
    fn define_shadows_parent() {
        let mut ctx = Context::new();
        let root = ctx.root_env();
        let x = ctx.sym("x");
        ctx.env_define(root, x, Value::int(1));

        let child = ctx.env_new(root);
        ctx.pin(child);
        ctx.env_define(child, x, Value::int(2));

        assert_eq!(ctx.env_get(child, x).as_int(), Some(2));
        assert_eq!(ctx.env_get(root, x).as_int(), Some(1));
    }

    #[test]
    fn set_walks_parents() {
        let mut ctx = Context::new();
        let root = ctx.root_env();
        let y = ctx.sym("y");
        ctx.env_define(root, y, Value::int(1));

        let child = ctx.env_new(root);
        ctx.pin(child);
        ctx.env_set(child, y, Value::int(9));

        assert_eq!(ctx.env_get(root, y).as_int(), Some(9));
    }

    #[test]
    fn unbound_is_an_error() {
        let mut ctx = Context::new();
        let root = ctx.root_env();
        let z = ctx.sym("zzz");

        assert_eq!(ctx.env_get(root, z), NIL);
        assert!(ctx.failing());
        assert_eq!(ctx.fail_message(), "Not defined: 'zzz'");

        ctx.reset();
        ctx.env_set(root, z, Value::int(1));
        assert!(ctx.failing());
        assert!(crate::lisp::env::env_lookup(root, z).is_none());
    }

    #[test]
    fn deep_chain_lookup() {
        let mut ctx = Context::new();
        let root = ctx.root_env();
        let k = ctx.sym("k");
        ctx.env_define(root, k, Value::int(3));

        let mut env = root;
        for _ in 0..10000 {
            env = ctx.env_new(env);
            ctx.heap_mut().push_root(env);
        }

        assert_eq!(ctx.env_get(env, k).as_int(), Some(3));
    }
}
