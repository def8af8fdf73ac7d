// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/syntax.rs

// Special forms, which receive their arguments unevaluated.

// <>

use super::eval::SyntaxFn;
use super::value::{Value, NIL};
use super::Context;

pub const FORMS: &[(&str, SyntaxFn)] = &[
    ("quote", quote),
    ("if", if_),
    ("define", define),
    ("lambda", lambda),
    ("begin", begin),
    ("and", and),
    ("or", or),
    ("let", let_),
    ("set!", set),
];

/// (quote x)
fn quote(_ctx: &mut Context, _env: Value, args: Value, _tail: bool) -> Value {
    args.car()
}

/// (if test then else?)
fn if_(ctx: &mut Context, env: Value, args: Value, tail: bool) -> Value {
    if !args.cdr().is_pair() {
        return ctx.fail("if: Missing branch");
    }

    let test = ctx.eval(env, args.car(), false);
    if ctx.failing() {
        return NIL;
    }

    let branch = if test.is_truthy() {
        args.nth(1)
    } else {
        args.nth(2)
    };

    ctx.eval(env, branch, tail)
}

/// (define x expr) or (define (f params...) body...)
fn define(ctx: &mut Context, env: Value, args: Value, _tail: bool) -> Value {
    if !args.is_pair() {
        return ctx.fail("Invalid definition");
    }

    let target = args.car();

    if target.is_sym() {
        let val = ctx.eval(env, args.nth(1), false);
        if ctx.failing() {
            return NIL;
        }

        ctx.env_define(env, target, val);
    } else if target.is_pair() && target.car().is_sym() {
        let name = target.car();
        if !valid_params(target.cdr()) {
            return ctx.fail("Invalid parameter list");
        }

        let func = ctx.func(env, target.cdr(), args.cdr(), name);
        ctx.env_define(env, name, func);
    } else {
        return ctx.fail("Invalid definition");
    }

    NIL
}

/// (lambda params body...)
fn lambda(ctx: &mut Context, env: Value, args: Value, _tail: bool) -> Value {
    if !args.is_pair() || !valid_params(args.car()) {
        return ctx.fail("Invalid parameter list");
    }

    ctx.func(env, args.car(), args.cdr(), NIL)
}

/// (begin forms...)
fn begin(ctx: &mut Context, env: Value, args: Value, tail: bool) -> Value {
    eval_body(ctx, env, args, tail)
}

/// (and forms...); t when empty
fn and(ctx: &mut Context, env: Value, args: Value, tail: bool) -> Value {
    let mut result = ctx.t();
    let mut cur = args;

    while cur.is_pair() {
        let last = !cur.cdr().is_pair();

        result = ctx.eval(env, cur.car(), tail && last);
        if ctx.failing() || !result.is_truthy() {
            return NIL;
        }

        cur = cur.cdr();
    }

    result
}

/// (or forms...); nil when empty
fn or(ctx: &mut Context, env: Value, args: Value, tail: bool) -> Value {
    let mut cur = args;

    while cur.is_pair() {
        let last = !cur.cdr().is_pair();

        let result = ctx.eval(env, cur.car(), tail && last);
        if ctx.failing() {
            return NIL;
        }
        if result.is_truthy() {
            return result;
        }

        cur = cur.cdr();
    }

    NIL
}

/// (let ((name expr)...) body...); bindings are evaluated in the
/// outer environment and bound together in a new frame
fn let_(ctx: &mut Context, env: Value, args: Value, tail: bool) -> Value {
    if !args.is_pair() {
        return ctx.fail("let: Missing bindings");
    }

    let base = ctx.heap.root_base();
    let frame = ctx.env_new(env);
    ctx.heap.push_root(frame);

    let mut bindings = args.car();
    while bindings.is_pair() {
        let binding = bindings.car();

        let (name, expr) = if binding.is_sym() {
            (binding, NIL)
        } else {
            (binding.car(), binding.nth(1))
        };

        if !name.is_sym() {
            ctx.heap.pop_roots(base);
            return ctx.fail("let: Invalid binding");
        }

        let val = ctx.eval(env, expr, false);
        if ctx.failing() {
            ctx.heap.pop_roots(base);
            return NIL;
        }

        ctx.env_define(frame, name, val);
        bindings = bindings.cdr();
    }

    let out = eval_body(ctx, frame, args.cdr(), tail);
    ctx.heap.pop_roots(base);
    out
}

/// (set! name expr)
fn set(ctx: &mut Context, env: Value, args: Value, _tail: bool) -> Value {
    let name = args.car();
    if !name.is_sym() {
        return ctx.fail("set!: Expected a symbol");
    }

    let val = ctx.eval(env, args.nth(1), false);
    if ctx.failing() {
        return NIL;
    }

    ctx.env_set(env, name, val)
}

/// Evaluates forms in order, the last one in tail position if the
/// whole sequence is
fn eval_body(ctx: &mut Context, env: Value, forms: Value, tail: bool) -> Value {
    let mut result = NIL;
    let mut cur = forms;

    while cur.is_pair() {
        let last = !cur.cdr().is_pair();

        result = ctx.eval(env, cur.car(), tail && last);
        if ctx.failing() {
            return NIL;
        }

        cur = cur.cdr();
    }

    result
}

/// A proper list of symbols, optionally dotted with a symbol, or a
/// lone symbol
fn valid_params(params: Value) -> bool {
    let mut cur = params;

    while cur.is_pair() {
        if !cur.car().is_sym() {
            return false;
        }
        cur = cur.cdr();
    }

    cur.is_nil() || cur.is_sym()
}
