// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/print.rs

// Textual rendering of values.

// <>

use std::fmt::Write;

use super::types::{CoreType, TypeId};
use super::value::{Kind, Value};
use super::{func_parts, Context};

/// Nesting past this prints as "..."
const MAX_PRINT_DEPTH: usize = 128;
/// List elements past this print as "..."
const MAX_PRINT_LEN: usize = 100000;

impl Context {
    /// Renders a value the way the reader would accept it back, where
    /// such a rendering exists
    pub fn display(&self, v: Value) -> String {
        let mut out = String::new();
        self.write_value(&mut out, v, 0);
        out
    }

    fn write_value(&self, out: &mut String, v: Value, depth: usize) {
        if depth > MAX_PRINT_DEPTH {
            out.push_str("...");
            return;
        }

        match v.kind() {
            Kind::Nil => out.push_str("()"),
            Kind::Int(n) => {
                let _ = write!(out, "{}", n);
            }
            Kind::Sym(id) => match self.symtab.lookup_by_id(id) {
                Some(name) => out.push_str(name),
                None => {
                    let _ = write!(out, "#<sym {}>", id);
                }
            },
            Kind::Pair => self.write_list(out, v, depth),
            Kind::Tagged(typ) => self.write_object(out, v, typ),
        }
    }

    /// Walks the spine iteratively; only elements recurse
    fn write_list(&self, out: &mut String, list: Value, depth: usize) {
        out.push('(');

        let mut cur = list;
        let mut count = 1;

        loop {
            self.write_value(out, cur.car(), depth + 1);

            let next = cur.cdr();
            if next.is_pair() {
                if count >= MAX_PRINT_LEN {
                    out.push_str(" ...");
                    break;
                }

                out.push(' ');
                cur = next;
                count += 1;
            } else {
                if !next.is_nil() {
                    out.push_str(" . ");
                    self.write_value(out, next, depth + 1);
                }
                break;
            }
        }

        out.push(')');
    }

    fn write_object(&self, out: &mut String, v: Value, typ: TypeId) {
        match typ.core() {
            Some(CoreType::Str) => {
                out.push('"');
                for c in String::from_utf8_lossy(self.str_bytes(v).unwrap_or_default()).chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            Some(CoreType::Func) => {
                let name = func_parts(v).3;
                match self.sym_name(name) {
                    Some(name) => {
                        let _ = write!(out, "#<func {}>", name);
                    }
                    None => out.push_str("#<func>"),
                }
            }
            Some(CoreType::Native) => match self.native_desc(v) {
                Some(desc) => {
                    let _ = write!(out, "#<native {}>", desc.name);
                }
                None => out.push_str("#<native>"),
            },
            _ => {
                let _ = write!(out, "#<{}>", self.heap.types().name(typ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::lisp::{Context, Value, NIL};

    #[test]
    fn atoms() {
        let mut ctx = Context::new();

        assert_eq!(ctx.display(NIL), "()");
        assert_eq!(ctx.display(Value::int(-42)), "-42");

        let s = ctx.sym("hello");
        assert_eq!(ctx.display(s), "hello");
    }

    #[test]
    fn lists() {
        let mut ctx = Context::new();

        let out = ctx.exec("'(1 (2 3) () . 4)");
        assert_eq!(ctx.display(out), "(1 (2 3) () . 4)");

        let out = ctx.exec("(cons 1 2)");
        assert_eq!(ctx.display(out), "(1 . 2)");
    }

    #[test]
    fn strings_are_escaped() {
        let mut ctx = Context::new();

        let s = ctx.str(b"a\"b\\c\nd");
        assert_eq!(ctx.display(s), "\"a\\\"b\\\\c\\nd\"");
    }

    #[test]
    fn procedures() {
        let mut ctx = Context::new();

        let f = ctx.exec("(lambda (x) x)");
        assert_eq!(ctx.display(f), "#<func>");

        let f = ctx.exec("car");
        assert_eq!(ctx.display(f), "#<native car>");
    }

    #[test]
    fn user_types_print_their_name() {
        let mut ctx = Context::new();

        let typ = ctx.register_type("widget", None, None);
        let w = ctx.make_tagged(typ, 0);
        assert_eq!(ctx.display(w), "#<widget>");
    }

    #[test]
    fn cyclic_lists_are_cut_off() {
        let mut ctx = Context::new();

        let out = ctx.exec("(define c '(1 2)) (set-cdr! (cdr c) c) c");
        assert!(!ctx.failing(), "{}", ctx.fail_message());

        let text = ctx.display(out);
        assert!(text.starts_with("(1 2 1 2"));
        assert!(text.ends_with(" ...)"));
    }
}
