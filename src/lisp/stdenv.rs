// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/stdenv.rs

// Native procedures which are part of the standard Skiff environment
// and are bound in every root environment.

// <>

use super::eval::{Arity, NativeFn};
use super::types::TypeId;
use super::value::{Value, NIL};
use super::Context;

use std::io::{self, Write};

/// Generates a slice of native procedures along with names and
/// argument shapes
///
/// The shape is `(required optional rest)`. Arguments are bound to
/// the listed identifiers in order; a missing optional argument is
/// nil and the rest list, if declared, comes last. All native
/// functions must return a valid value, and report errors through
/// `Context::fail`.
#[macro_export]
macro_rules! skiff_fn {
    ( const $array:ident; $ctx:ident;
      $( $name:literal ( $req:literal $opt:literal $rest:literal ) [ $($args:ident),* ] $body:block )+
    ) => {
        pub const $array: &[(&str, $crate::lisp::eval::NativeFn, $crate::lisp::eval::Arity)] =
            &[$(($name, |
                _ctx: &mut $crate::lisp::Context,
                _args: &[$crate::lisp::Value],
              | -> $crate::lisp::Value {
                    let $ctx = _ctx;
                    let _ = &$ctx;

                    #[allow(unused_mut)]
                    let mut _ind = 0;
                    $(
                        let $args = _args[_ind];
                        _ind += 1;
                    )*

                    $body
                },
                $crate::lisp::eval::Arity::new($req, $opt, $rest))),+];
    };
}

/// Integer argument, or a failure naming the procedure and position
fn int_arg(ctx: &mut Context, fname: &str, pos: usize, v: Value) -> Option<i32> {
    match v.as_int() {
        Some(n) => Some(n),
        None => {
            ctx.fail(format!("{}: argument {} is not an int", fname, pos));
            None
        }
    }
}

fn pair_arg(ctx: &mut Context, fname: &str, pos: usize, v: Value) -> Option<Value> {
    if v.is_pair() {
        Some(v)
    } else {
        ctx.fail(format!("{}: argument {} is not a pair", fname, pos));
        None
    }
}

/// Length of a proper list; improper and circular lists fail
fn list_arg(ctx: &mut Context, fname: &str, pos: usize, v: Value) -> Option<usize> {
    let mut slow = v;
    let mut fast = v;
    let mut len = 0;

    loop {
        if fast.is_nil() {
            return Some(len);
        }
        if !fast.is_pair() {
            break;
        }

        fast = fast.cdr();
        len += 1;

        if fast.is_nil() {
            return Some(len);
        }
        if !fast.is_pair() {
            break;
        }

        fast = fast.cdr();
        len += 1;
        slow = slow.cdr();

        if fast == slow {
            ctx.fail(format!("{}: argument {} is a circular list", fname, pos));
            return None;
        }
    }

    ctx.fail(format!("{}: argument {} is not a list", fname, pos));
    None
}

/// Folds an integer rest list
fn fold_ints(
    ctx: &mut Context,
    fname: &str,
    first_pos: usize,
    init: i32,
    rest: Value,
    op: fn(i32, i32) -> i32,
) -> Value {
    let mut acc = init;
    let mut cur = rest;
    let mut pos = first_pos;

    while cur.is_pair() {
        let Some(n) = int_arg(ctx, fname, pos, cur.car()) else {
            return NIL;
        };

        acc = op(acc, n);
        cur = cur.cdr();
        pos += 1;
    }

    Value::int(acc)
}

/// True if each adjacent pair of integers satisfies the relation
fn chain_ints(ctx: &mut Context, fname: &str, first: Value, rest: Value, rel: fn(i32, i32) -> bool) -> Value {
    let Some(mut prev) = int_arg(ctx, fname, 1, first) else {
        return NIL;
    };

    let mut holds = true;
    let mut cur = rest;
    let mut pos = 2;

    while cur.is_pair() {
        let Some(n) = int_arg(ctx, fname, pos, cur.car()) else {
            return NIL;
        };

        holds &= rel(prev, n);
        prev = n;
        cur = cur.cdr();
        pos += 1;
    }

    ctx.boolean(holds)
}

/// Identity, except integers and strings compare by content
pub fn equal(ctx: &Context, a: Value, b: Value) -> bool {
    if a == b {
        return true;
    }

    match (ctx.str_bytes(a), ctx.str_bytes(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

skiff_fn! {
    const ARITH_FNS;
    ctx;

    "+" (0 0 true) [rest] {
        fold_ints(ctx, "+", 1, 0, rest, i32::wrapping_add)
    }

    "*" (0 0 true) [rest] {
        fold_ints(ctx, "*", 1, 1, rest, i32::wrapping_mul)
    }

    "-" (1 0 true) [first, rest] {
        let Some(a) = int_arg(ctx, "-", 1, first) else {
            return NIL;
        };

        if rest.is_nil() {
            Value::int(a.wrapping_neg())
        } else {
            fold_ints(ctx, "-", 2, a, rest, i32::wrapping_sub)
        }
    }

    "quotient" (2 0 false) [a, b] {
        let (Some(x), Some(y)) = (int_arg(ctx, "quotient", 1, a), int_arg(ctx, "quotient", 2, b)) else {
            return NIL;
        };

        if y == 0 {
            return ctx.fail("quotient: Division by zero");
        }
        Value::int(x.wrapping_div(y))
    }

    "remainder" (2 0 false) [a, b] {
        let (Some(x), Some(y)) = (int_arg(ctx, "remainder", 1, a), int_arg(ctx, "remainder", 2, b)) else {
            return NIL;
        };

        if y == 0 {
            return ctx.fail("remainder: Division by zero");
        }
        Value::int(x.wrapping_rem(y))
    }

    "=" (1 0 true) [first, rest] {
        chain_ints(ctx, "=", first, rest, |a, b| a == b)
    }

    "<" (1 0 true) [first, rest] {
        chain_ints(ctx, "<", first, rest, |a, b| a < b)
    }

    ">" (1 0 true) [first, rest] {
        chain_ints(ctx, ">", first, rest, |a, b| a > b)
    }

    "<=" (1 0 true) [first, rest] {
        chain_ints(ctx, "<=", first, rest, |a, b| a <= b)
    }

    ">=" (1 0 true) [first, rest] {
        chain_ints(ctx, ">=", first, rest, |a, b| a >= b)
    }
}

skiff_fn! {
    const LIST_FNS;
    ctx;

    "cons" (2 0 false) [a, b] {
        ctx.cons(a, b)
    }

    "car" (1 0 false) [p] {
        match pair_arg(ctx, "car", 1, p) {
            Some(p) => p.car(),
            None => NIL,
        }
    }

    "cdr" (1 0 false) [p] {
        match pair_arg(ctx, "cdr", 1, p) {
            Some(p) => p.cdr(),
            None => NIL,
        }
    }

    "set-car!" (2 0 false) [p, v] {
        if let Some(p) = pair_arg(ctx, "set-car!", 1, p) {
            p.set_car(v);
        }
        NIL
    }

    "set-cdr!" (2 0 false) [p, v] {
        if let Some(p) = pair_arg(ctx, "set-cdr!", 1, p) {
            p.set_cdr(v);
        }
        NIL
    }

    "list" (0 0 true) [rest] {
        rest
    }

    "list-ref" (2 0 false) [list, index] {
        let Some(len) = list_arg(ctx, "list-ref", 1, list) else {
            return NIL;
        };
        let Some(i) = int_arg(ctx, "list-ref", 2, index) else {
            return NIL;
        };

        if i < 0 || i as usize >= len {
            return ctx.fail("list-ref: Index out of range");
        }
        list.nth(i as usize)
    }

    "length" (1 0 false) [list] {
        match list_arg(ctx, "length", 1, list) {
            Some(len) => Value::int(len as i32),
            None => NIL,
        }
    }
}

skiff_fn! {
    const PRED_FNS;
    ctx;

    "nil?" (1 0 false) [v] {
        ctx.boolean(v.is_nil())
    }

    "cons?" (1 0 false) [v] {
        ctx.boolean(v.is_pair())
    }

    "sym?" (1 0 false) [v] {
        ctx.boolean(v.is_sym())
    }

    "int?" (1 0 false) [v] {
        ctx.boolean(v.is_int())
    }

    "str?" (1 0 false) [v] {
        let is_str = v.type_id() == TypeId::STR;
        ctx.boolean(is_str)
    }

    "func?" (1 0 false) [v] {
        let typ = v.type_id();
        ctx.boolean(typ == TypeId::FUNC || typ == TypeId::NATIVE)
    }

    "not" (1 0 false) [v] {
        ctx.boolean(!v.is_truthy())
    }

    "eq?" (2 0 false) [a, b] {
        ctx.boolean(a == b)
    }

    "equal?" (2 0 false) [a, b] {
        let same = equal(ctx, a, b);
        ctx.boolean(same)
    }
}

skiff_fn! {
    const MISC_FNS;
    ctx;

    "str-len" (1 0 false) [s] {
        match ctx.str_bytes(s).map(<[u8]>::len) {
            Some(len) => Value::int(len as i32),
            None => ctx.fail("str-len: argument 1 is not a str"),
        }
    }

    "apply" (2 0 false) [func, args] {
        if list_arg(ctx, "apply", 2, args).is_none() {
            return NIL;
        }
        ctx.apply(func, args)
    }

    "print" (0 0 true) [rest] {
        let mut line = String::new();
        let mut cur = rest;

        while cur.is_pair() {
            if cur != rest {
                line.push(' ');
            }

            let v = cur.car();
            match ctx.str_bytes(v) {
                Some(bytes) => line.push_str(&String::from_utf8_lossy(bytes)),
                None => line.push_str(&ctx.display(v)),
            }
            cur = cur.cdr();
        }

        let mut out = io::stdout().lock();
        if writeln!(out, "{}", line).is_err() {
            log::warn!("print: stdout closed");
        }
        NIL
    }

    "gc" (0 0 false) [] {
        ctx.heap_mut().collect(true);
        Value::int(ctx.heap().live_count() as i32)
    }
}

/// Every native bound in a fresh root environment
pub fn natives() -> impl Iterator<Item = &'static (&'static str, NativeFn, Arity)> {
    ARITH_FNS
        .iter()
        .chain(LIST_FNS)
        .chain(PRED_FNS)
        .chain(MISC_FNS)
}
