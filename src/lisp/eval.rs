// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/eval.rs

// Evaluation and application. Every frame that holds heap values
// across an allocation keeps them on the shadow root stack; a self
// call in tail position rebinds and loops inside `apply` instead of
// growing the host stack.

// <>

use super::types::TypeId;
use super::value::{Kind, Value, NIL};
use super::{func_parts, Context, FAIL_MSG_CAP};

/// Native procedure; receives the required and optional arguments in
/// order, then the rest list if the arity has one
pub type NativeFn = fn(&mut Context, &[Value]) -> Value;

/// Syntax form; receives the environment, the unevaluated argument
/// list, and whether the form is in tail position
pub type SyntaxFn = fn(&mut Context, Value, Value, bool) -> Value;

/// Most required plus optional arguments a native may declare
pub const MAX_FIXED_ARGS: usize = 4;

/// Argument shape of a native procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub required: u8,
    pub optional: u8,
    pub rest: bool,
}

impl Arity {
    pub const fn new(required: u8, optional: u8, rest: bool) -> Self {
        assert!((required + optional) as usize <= MAX_FIXED_ARGS);
        Self {
            required,
            optional,
            rest,
        }
    }

    /// Length of the argument slice handed to the native
    pub const fn slots(self) -> usize {
        self.required as usize + self.optional as usize + self.rest as usize
    }
}

/// Out-of-band descriptor owned by a `native` object
#[derive(Clone, Copy)]
pub struct NativeDesc {
    pub name: &'static str,
    pub arity: Arity,
    pub func: NativeFn,
}

impl Context {
    /// Evaluates an expression in an environment
    ///
    /// On error the failure flag is set and nil is returned; callers
    /// must check `failing()` before using the result.
    pub fn eval(&mut self, env: Value, expr: Value, tail: bool) -> Value {
        match expr.kind() {
            Kind::Nil | Kind::Int(_) | Kind::Tagged(_) => return expr,
            Kind::Sym(_) => return self.env_get(env, expr),
            Kind::Pair => (),
        }

        if self.depth >= self.max_depth {
            return self.fail("Evaluation too deep");
        }

        self.depth += 1;
        self.peak_depth = self.peak_depth.max(self.depth);
        if cfg!(feature = "stkdbg") && self.depth % 256 == 0 {
            log::debug!("eval depth {}", self.depth);
        }

        let base = self.heap.root_base();
        self.heap.push_root(env);
        self.heap.push_root(expr);

        let out = self.eval_form(env, expr, tail);

        self.heap.pop_roots(base);
        self.depth -= 1;

        out
    }

    fn eval_form(&mut self, env: Value, expr: Value, tail: bool) -> Value {
        if let Some(id) = expr.car().as_sym() {
            if let Some(&form) = self.syntax.get(&id) {
                return form(self, env, expr.cdr(), tail);
            }
        }

        let form = self.eval_list(env, expr);
        if self.failing {
            return NIL;
        }
        self.heap.push_root(form);

        let (func, args) = (form.car(), form.cdr());

        match func.type_id() {
            TypeId::FUNC if tail && func == self.cur_func => {
                // the enclosing apply rebinds these and loops
                self.will_tail_call = true;
                args
            }
            TypeId::FUNC => self.apply_func(func, args),
            TypeId::NATIVE => self.apply_native(func, args),
            _ => self.fail("eval: Invalid application"),
        }
    }

    /// Evaluates every element of a list, left to right, into a fresh
    /// list; stops at the first failure
    pub fn eval_list(&mut self, env: Value, list: Value) -> Value {
        let base = self.heap.root_base();
        let head = self.heap.push_root(NIL);

        let mut tail = NIL;
        let mut cur = list;

        while cur.is_pair() {
            let v = self.eval(env, cur.car(), false);
            if self.failing {
                self.heap.pop_roots(base);
                return NIL;
            }

            let cell = self.heap.cons(v, NIL);
            if tail.is_nil() {
                self.heap.set_root(head, cell);
            } else {
                tail.set_cdr(cell);
            }
            tail = cell;

            cur = cur.cdr();
        }

        let out = self.heap.root(head);
        self.heap.pop_roots(base);
        out
    }

    /// Applies a function or native to an already evaluated argument
    /// list
    pub fn apply(&mut self, func: Value, args: Value) -> Value {
        let base = self.heap.root_base();
        self.heap.push_root(func);
        self.heap.push_root(args);

        let out = match func.type_id() {
            TypeId::FUNC => self.apply_func(func, args),
            TypeId::NATIVE => self.apply_native(func, args),
            _ => self.fail("apply: Invalid application"),
        };

        self.heap.pop_roots(base);
        out
    }

    /// Callers keep `func` and `args` rooted
    fn apply_func(&mut self, func: Value, args: Value) -> Value {
        let prev = self.cur_func;
        self.cur_func = func;

        let out = self.run_body(func, args);

        self.cur_func = prev;
        out
    }

    fn run_body(&mut self, func: Value, mut args: Value) -> Value {
        let (env, params, body, name) = func_parts(func);

        let base = self.heap.root_base();
        let args_slot = self.heap.push_root(args);
        let frame_slot = self.heap.push_root(NIL);

        let out = 'call: loop {
            let frame = self.env_new(env);
            self.heap.set_root(frame_slot, frame);

            self.bind_params(frame, params, args);
            if self.failing {
                break 'call NIL;
            }

            let mut result = NIL;
            let mut forms = body;

            while forms.is_pair() {
                let last = !forms.cdr().is_pair();

                result = self.eval(frame, forms.car(), last);
                if self.failing {
                    break 'call NIL;
                }

                if self.will_tail_call {
                    self.will_tail_call = false;

                    args = result;
                    self.heap.set_root(args_slot, args);

                    continue 'call;
                }

                forms = forms.cdr();
            }

            break 'call result;
        };

        // outer frames are dropped once the cap is reached; the cause
        // at the end of the message always survives
        if self.failing && name.is_sym() {
            let frame = format!("In {}:\n", self.display(name));
            if frame.len() + self.fail_msg.len() <= FAIL_MSG_CAP {
                self.fail_msg.insert_str(0, &frame);
            }
        }

        self.heap.pop_roots(base);
        out
    }

    /// Binds parameters in a fresh frame; a dotted or bare symbol
    /// parameter list collects the remaining arguments
    fn bind_params(&mut self, frame: Value, params: Value, args: Value) {
        let mut names = params;
        let mut vals = args;

        loop {
            if names.is_pair() {
                if !vals.is_pair() {
                    self.fail("Not enough arguments for function");
                    return;
                }

                self.env_define(frame, names.car(), vals.car());

                names = names.cdr();
                vals = vals.cdr();
            } else if names.is_sym() {
                self.env_define(frame, names, vals);
                return;
            } else {
                if !vals.is_nil() {
                    self.fail("Too many arguments for function");
                }
                return;
            }
        }
    }

    /// Callers keep `func` and `args` rooted
    fn apply_native(&mut self, func: Value, args: Value) -> Value {
        let desc = match self.native_desc(func) {
            Some(d) => d,
            None => return self.fail("apply: Invalid native"),
        };

        let arity = desc.arity;
        let mut argv = [NIL; MAX_FIXED_ARGS + 1];
        let mut rest = args;
        let mut n = 0;

        for _ in 0..arity.required {
            if !rest.is_pair() {
                return self.fail(format!("Too few arguments for {}", desc.name));
            }

            argv[n] = rest.car();
            rest = rest.cdr();
            n += 1;
        }

        // missing optionals are nil
        for _ in 0..arity.optional {
            argv[n] = rest.car();
            rest = rest.cdr();
            n += 1;
        }

        if arity.rest {
            argv[n] = rest;
            n += 1;
        } else if !rest.is_nil() {
            return self.fail(format!("Too many arguments for {}", desc.name));
        }

        (desc.func)(self, &argv[..n])
    }
}

#[cfg(test)]
mod tests {
    use crate::lisp::{Config, Context, Value, NIL};

    #[test]
    fn self_evaluating() {
        let mut ctx = Context::new();
        let env = ctx.root_env();

        assert_eq!(ctx.eval(env, Value::int(4), false), Value::int(4));
        assert_eq!(ctx.eval(env, NIL, false), NIL);

        let s = ctx.str(b"hi");
        assert_eq!(ctx.eval(env, s, false), s);
    }

    #[test]
    fn factorial() {
        let mut ctx = Context::new();

        ctx.exec("(define (fact x) (if (= x 0) 1 (* x (fact (- x 1)))))");
        assert!(!ctx.failing());

        let out = ctx.exec("(fact 10)");
        assert!(!ctx.failing(), "{}", ctx.fail_message());
        assert_eq!(out.as_int(), Some(3628800));
    }

    #[test]
    fn tail_calls_stay_flat() {
        let mut ctx = Context::new();

        ctx.exec("(define (loop n acc) (if (= n 0) acc (loop (- n 1) (* acc n))))");
        let out = ctx.exec("(loop 100000 1)");

        assert!(!ctx.failing(), "{}", ctx.fail_message());
        assert!(out.is_int());
        assert!(ctx.peak_depth() < 16);
    }

    #[test]
    fn tail_depth_is_bounded() {
        // far below the loop count, so only a flat loop can finish
        let mut ctx = Context::with_config(Config {
            max_depth: 64,
            ..Default::default()
        });

        ctx.exec("(define (count n) (if (= n 0) 'done (count (- n 1))))");
        let out = ctx.exec("(count 100000)");

        assert!(!ctx.failing(), "{}", ctx.fail_message());
        assert_eq!(out, ctx.sym("done"));
    }

    #[test]
    fn deep_recursion_fails_cleanly() {
        let mut ctx = Context::with_config(Config {
            max_depth: 32,
            ..Default::default()
        });

        ctx.exec("(define (down n) (if (= n 0) 0 (+ 1 (down (- n 1)))))");
        ctx.exec("(down 1000)");

        assert!(ctx.failing());
        assert!(ctx.fail_message().starts_with("In down:\n"));
        assert!(ctx.fail_message().ends_with("Evaluation too deep"));
    }

    #[test]
    fn deep_failure_keeps_its_cause() {
        let mut ctx = Context::new();

        ctx.exec("(define (d n) (if (= n 0) undefined-x (+ 1 (d (- n 1)))))");
        ctx.exec("(d 60)");

        let msg = ctx.fail_message();
        assert!(ctx.failing());
        assert!(msg.len() <= crate::lisp::FAIL_MSG_CAP);
        assert!(msg.starts_with("In d:\n"));
        assert!(msg.ends_with("Not defined: 'undefined-x'"), "{}", msg);
    }

    #[test]
    fn arity_checked() {
        let mut ctx = Context::new();
        ctx.exec("(define (two a b) (+ a b))");

        ctx.exec("(two 1)");
        assert!(ctx.failing());
        assert!(ctx.fail_message().contains("Not enough arguments"));

        ctx.exec("(two 1 2 3)");
        assert!(ctx.failing());
        assert!(ctx.fail_message().contains("Too many arguments"));

        assert_eq!(ctx.exec("(two 1 2)").as_int(), Some(3));
        assert!(!ctx.failing());
    }

    #[test]
    fn native_arity_checked() {
        let mut ctx = Context::new();

        ctx.exec("(car)");
        assert_eq!(ctx.fail_message(), "Too few arguments for car");

        ctx.exec("(car '(1) '(2))");
        assert_eq!(ctx.fail_message(), "Too many arguments for car");
    }

    #[test]
    fn rest_parameters() {
        let mut ctx = Context::new();

        ctx.exec("(define (f a . more) more)");
        let out = ctx.exec("(f 1 2 3)");
        assert_eq!(ctx.display(out), "(2 3)");

        ctx.exec("(define g (lambda args args))");
        let out = ctx.exec("(g 4 5)");
        assert_eq!(ctx.display(out), "(4 5)");

        assert_eq!(ctx.exec("(f 1)"), NIL);
        assert!(!ctx.failing());
    }

    #[test]
    fn undefined_symbol() {
        let mut ctx = Context::new();

        let out = ctx.exec("(undefined-symbol)");

        assert_eq!(out, NIL);
        assert!(ctx.failing());
        assert!(ctx.fail_message().contains("Not defined"));
        assert!(ctx.fail_message().contains("undefined-symbol"));
    }

    #[test]
    fn invalid_application() {
        let mut ctx = Context::new();

        ctx.exec("(1 2)");
        assert_eq!(ctx.fail_message(), "eval: Invalid application");
    }

    #[test]
    fn failure_names_the_function() {
        let mut ctx = Context::new();

        ctx.exec("(define (outer) (inner))");
        ctx.exec("(define (inner) (car 5))");
        ctx.exec("(outer)");

        assert!(ctx.failing());
        assert!(ctx.fail_message().starts_with("In outer:\nIn inner:\n"));
    }

    #[test]
    fn closures_capture() {
        let mut ctx = Context::new();

        ctx.exec("(define (adder n) (lambda (x) (+ x n)))");
        ctx.exec("(define add5 (adder 5))");

        assert_eq!(ctx.exec("(add5 10)").as_int(), Some(15));
    }

    #[test]
    fn mutual_recursion_not_in_tail_loop() {
        let mut ctx = Context::new();

        ctx.exec("(define (ev? n) (if (= n 0) t (od? (- n 1))))");
        ctx.exec("(define (od? n) (if (= n 0) () (ev? (- n 1))))");

        assert_eq!(ctx.exec("(ev? 10)"), ctx.sym("t"));
        assert_eq!(ctx.exec("(od? 7)"), ctx.sym("t"));
    }

    #[test]
    fn survives_collection_mid_evaluation() {
        let mut ctx = Context::with_config(Config::fixed(512));

        ctx.exec("(define (build n acc) (if (= n 0) acc (build (- n 1) (cons n acc))))");
        let out = ctx.exec("(length (build 100 ()))");

        assert!(!ctx.failing(), "{}", ctx.fail_message());
        assert_eq!(out.as_int(), Some(100));
        assert!(ctx.heap().stats().collections > 0);
    }
}
