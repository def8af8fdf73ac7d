// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/parser.rs

// Reads source text into value trees, one top-level form at a time.

// <>

use super::value::{Value, NIL};
use super::{Context, SkErr};

/// Deepest list nesting the reader accepts
const MAX_NESTING: usize = 512;

/// Cursor over a source buffer
pub struct Reader<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            depth: 0,
        }
    }

    /// Reads the next top-level form; None at end of input
    ///
    /// The returned value is not rooted.
    pub fn read(&mut self, ctx: &mut Context) -> Result<Option<Value>, SkErr> {
        self.skip_blank();

        if self.pos >= self.src.len() {
            return Ok(None);
        }

        self.read_value(ctx).map(Some)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    /// Skips whitespace and line comments
    fn skip_blank(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.pos += 1;
            } else if c == b';' {
                while let Some(c) = self.peek() {
                    self.pos += 1;
                    if c == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Returns a contiguous value parsed from the input; the reader
    /// is chosen by the first character
    fn read_value(&mut self, ctx: &mut Context) -> Result<Value, SkErr> {
        self.skip_blank();

        match self.peek() {
            None => Err(SkErr::Parse("Unexpected end of input".into())),
            Some(b')') => {
                self.pos += 1;
                Err(SkErr::Parse("Unexpected ')'".into()))
            }
            Some(b'(') => {
                self.pos += 1;
                self.read_list(ctx)
            }
            Some(b'\'') => {
                self.pos += 1;
                self.read_quote(ctx)
            }
            Some(b'"') => {
                self.pos += 1;
                self.read_string(ctx)
            }
            Some(_) => Ok(self.read_atom(ctx)),
        }
    }

    fn read_quote(&mut self, ctx: &mut Context) -> Result<Value, SkErr> {
        if self.depth >= MAX_NESTING {
            return Err(SkErr::Parse("Nesting too deep".into()));
        }

        self.depth += 1;
        let quoted = self.read_value(ctx);
        self.depth -= 1;
        let quoted = quoted?;

        let base = ctx.heap.root_base();
        ctx.heap.push_root(quoted);

        let tail = ctx.cons(quoted, NIL);
        let quote = ctx.sym("quote");
        let out = ctx.cons(quote, tail);

        ctx.heap.pop_roots(base);
        Ok(out)
    }

    fn read_list(&mut self, ctx: &mut Context) -> Result<Value, SkErr> {
        if self.depth >= MAX_NESTING {
            return Err(SkErr::Parse("Nesting too deep".into()));
        }

        self.depth += 1;
        let base = ctx.heap.root_base();
        let head = ctx.heap.push_root(NIL);

        let out = self.read_elements(ctx, head);

        ctx.heap.pop_roots(base);
        self.depth -= 1;
        out
    }

    /// Appends elements to the list rooted at `head` until ')'
    fn read_elements(&mut self, ctx: &mut Context, head: usize) -> Result<Value, SkErr> {
        let mut tail = NIL;

        loop {
            self.skip_blank();

            match self.peek() {
                None => return Err(SkErr::Incomplete("Expected ')'".into())),
                Some(b')') => {
                    self.pos += 1;
                    return Ok(ctx.heap.root(head));
                }
                Some(b'.') if self.is_lone_dot() => {
                    // may only appear immediately before the final element
                    if tail.is_nil() {
                        return Err(SkErr::Parse("Misplaced '.'".into()));
                    }
                    self.pos += 1;

                    let last = self.read_value(ctx)?;
                    tail.set_cdr(last);

                    self.skip_blank();
                    return match self.peek() {
                        Some(b')') => {
                            self.pos += 1;
                            Ok(ctx.heap.root(head))
                        }
                        None => Err(SkErr::Incomplete("Expected ')'".into())),
                        Some(_) => Err(SkErr::Parse("Misplaced '.'".into())),
                    };
                }
                Some(_) => {
                    let next = self.read_value(ctx)?;
                    let cell = ctx.cons(next, NIL);

                    if tail.is_nil() {
                        ctx.heap.set_root(head, cell);
                    } else {
                        tail.set_cdr(cell);
                    }
                    tail = cell;
                }
            }
        }
    }

    fn is_lone_dot(&self) -> bool {
        match self.src.get(self.pos + 1) {
            None => true,
            Some(&c) => ends_atom(c),
        }
    }

    fn read_string(&mut self, ctx: &mut Context) -> Result<Value, SkErr> {
        let mut acc = Vec::new();

        loop {
            let Some(c) = self.peek() else {
                return Err(SkErr::Incomplete("Missing closing '\"'".into()));
            };
            self.pos += 1;

            match c {
                b'"' => break,
                b'\\' => {
                    let Some(e) = self.peek() else {
                        return Err(SkErr::Incomplete("Missing closing '\"'".into()));
                    };
                    self.pos += 1;

                    acc.push(match e {
                        b'n' => b'\n',
                        b't' => b'\t',
                        other => other,
                    });
                }
                _ => acc.push(c),
            }
        }

        Ok(ctx.str(&acc))
    }

    /// Integer or symbol
    fn read_atom(&mut self, ctx: &mut Context) -> Value {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if ends_atom(c) {
                break;
            }
            self.pos += 1;
        }

        let text = String::from_utf8_lossy(&self.src[start..self.pos]);

        match parse_int(&text) {
            Some(n) => Value::int(n),
            None => ctx.sym(&text),
        }
    }
}

fn ends_atom(c: u8) -> bool {
    c.is_ascii_whitespace() || matches!(c, b'(' | b')' | b'"' | b';' | b'\'')
}

/// Decimal integer with optional sign, wrapped to the integer width
fn parse_int(text: &str) -> Option<i32> {
    let bytes = text.as_bytes();
    let (neg, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        _ => (false, bytes),
    };

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    let mut acc: i32 = 0;
    for d in digits {
        acc = acc.wrapping_mul(10).wrapping_add((d - b'0') as i32);
    }

    Some(if neg { acc.wrapping_neg() } else { acc })
}

/// True once every list and string opened in the source is closed
pub fn is_complete(src: &str) -> bool {
    let mut depth: usize = 0;
    let mut in_str = false;
    let mut bytes = src.bytes();

    while let Some(c) = bytes.next() {
        if in_str {
            match c {
                b'\\' => {
                    bytes.next();
                }
                b'"' => in_str = false,
                _ => (),
            }
            continue;
        }

        match c {
            b'"' => in_str = true,
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b';' => {
                for c in bytes.by_ref() {
                    if c == b'\n' {
                        break;
                    }
                }
            }
            _ => (),
        }
    }

    depth == 0 && !in_str
}
