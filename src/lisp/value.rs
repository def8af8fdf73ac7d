// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/value.rs

// The word-sized value handle. Immediates (nil, integers, symbols)
// are encoded entirely in the handle bits; everything else is a
// pointer to a heap cell with the low bits stolen for a tag.

// <>

use super::types::TypeId;

use std::fmt;

/// Low two bits of every value
///
/// 00 - pair pointer (or nil when the whole word is zero)
/// 01 - 30-bit signed integer
/// 10 - symbol id
/// 11 - tagged object pointer
const TAG_MASK: usize = 0b11;
const TAG_PAIR: usize = 0b00;
const TAG_INT: usize = 0b01;
const TAG_SYM: usize = 0b10;
const TAG_OBJ: usize = 0b11;

/// Width of the integer immediate
pub const INT_BITS: u32 = 30;
pub const INT_MAX: i32 = (1 << (INT_BITS - 1)) - 1;
pub const INT_MIN: i32 = -(1 << (INT_BITS - 1));

/// Symbol ids must fit into the immediate
pub const SYM_MAX: u32 = (1 << 30) - 1;

/// Low three bits of the first word of a tagged or free cell; no
/// valid value encoding ever has all three set, so this marks a cell
/// as holding a type tag rather than a pair's first slot
pub const CELL_TAGGED: usize = 0b111;

/// Tag word of a cell on the free list (type 0 never names a live
/// tagged object)
pub const CELL_FREE: usize = CELL_TAGGED;

/// A heap cell; interpreted as a pair or as a tagged object by the
/// value addressing it
///
/// Pair: `head` holds the first value and `tail` the rest value.
/// Tagged: `head` holds the type tag word and `tail` the payload.
/// Free: `head` is `CELL_FREE` and `tail` links the next free cell.
#[repr(C, align(16))]
pub struct Cell {
    pub(super) head: usize,
    pub(super) tail: usize,
}

pub const CELL_SIZE: usize = std::mem::size_of::<Cell>();

/// Runtime value handle
///
/// Values are plain words and are `Copy`; a heap value stays valid
/// only while the collector can reach it from the pin set or the
/// shadow root stack.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(usize);

pub const NIL: Value = Value(0);

/// Decoded view of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Nil,
    Int(i32),
    Sym(u32),
    Pair,
    Tagged(TypeId),
}

impl Value {
    /// Encodes an integer, wrapping to `INT_BITS`
    #[inline(always)]
    pub const fn int(n: i32) -> Self {
        Self((((n as u32) << 2) as usize) | TAG_INT)
    }

    /// Encodes a symbol id; only the symbol table should mint these
    #[inline(always)]
    pub(super) const fn sym(id: u32) -> Self {
        assert!(id <= SYM_MAX);
        Self(((id as usize) << 2) | TAG_SYM)
    }

    #[inline(always)]
    pub(super) fn pair_at(cell: *mut Cell) -> Self {
        debug_assert_eq!(cell as usize & (CELL_SIZE - 1), 0);
        Self(cell as usize | TAG_PAIR)
    }

    #[inline(always)]
    pub(super) fn tagged_at(cell: *mut Cell) -> Self {
        debug_assert_eq!(cell as usize & (CELL_SIZE - 1), 0);
        Self(cell as usize | TAG_OBJ)
    }

    /// Reconstitutes a value from its raw word
    ///
    /// # Safety
    ///
    /// A heap encoding must address a live cell before any accessor
    /// dereferences it; the collector itself validates every word it
    /// traces.
    #[inline(always)]
    pub const unsafe fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline(always)]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn is_int(self) -> bool {
        self.0 & TAG_MASK == TAG_INT
    }

    #[inline(always)]
    pub const fn is_sym(self) -> bool {
        self.0 & TAG_MASK == TAG_SYM
    }

    #[inline(always)]
    pub const fn is_pair(self) -> bool {
        self.0 != 0 && self.0 & TAG_MASK == TAG_PAIR
    }

    #[inline(always)]
    pub const fn is_tagged(self) -> bool {
        self.0 & TAG_MASK == TAG_OBJ
    }

    /// True for everything but nil
    #[inline(always)]
    pub const fn is_truthy(self) -> bool {
        !self.is_nil()
    }

    #[inline(always)]
    pub const fn as_int(self) -> Option<i32> {
        if self.is_int() {
            // arithmetic shift restores the sign of the 30-bit field
            Some((self.0 as u32 as i32) >> 2)
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn as_sym(self) -> Option<u32> {
        if self.is_sym() {
            Some((self.0 >> 2) as u32)
        } else {
            None
        }
    }

    /// Address of the addressed cell, if this is a heap encoding
    #[inline(always)]
    pub(super) const fn cell_addr(self) -> Option<usize> {
        if self.is_pair() || self.is_tagged() {
            Some(self.0 & !TAG_MASK)
        } else {
            None
        }
    }

    #[inline(always)]
    fn cell(self) -> *mut Cell {
        (self.0 & !TAG_MASK) as *mut Cell
    }

    pub fn kind(self) -> Kind {
        match self.0 & TAG_MASK {
            _ if self.0 == 0 => Kind::Nil,
            TAG_INT => Kind::Int((self.0 as u32 as i32) >> 2),
            TAG_SYM => Kind::Sym((self.0 >> 2) as u32),
            TAG_PAIR => Kind::Pair,
            _ => Kind::Tagged(self.type_id()),
        }
    }

    /// Type of any value; costs one dereference for tagged objects
    pub fn type_id(self) -> TypeId {
        match self.0 & TAG_MASK {
            _ if self.0 == 0 => TypeId::NIL,
            TAG_INT => TypeId::INT,
            TAG_SYM => TypeId::SYM,
            TAG_PAIR => TypeId::PAIR,
            _ => TypeId(unsafe { (*self.cell()).head >> 3 } as u32),
        }
    }

    /// Payload word of a tagged object; zero for anything else
    #[inline(always)]
    pub fn payload(self) -> usize {
        if self.is_tagged() {
            unsafe { (*self.cell()).tail }
        } else {
            0
        }
    }

    /// First slot of a pair; nil for anything else
    #[inline(always)]
    pub fn car(self) -> Value {
        if self.is_pair() {
            Value(unsafe { (*self.cell()).head })
        } else {
            NIL
        }
    }

    /// Rest slot of a pair; nil for anything else
    #[inline(always)]
    pub fn cdr(self) -> Value {
        if self.is_pair() {
            Value(unsafe { (*self.cell()).tail })
        } else {
            NIL
        }
    }

    #[inline(always)]
    pub fn set_car(self, v: Value) {
        assert!(self.is_pair(), "set_car on a non-pair");
        unsafe { (*self.cell()).head = v.0 }
    }

    #[inline(always)]
    pub fn set_cdr(self, v: Value) {
        assert!(self.is_pair(), "set_cdr on a non-pair");
        unsafe { (*self.cell()).tail = v.0 }
    }

    /// Element `n` of a list, stopping at the first non-pair
    pub fn nth(self, n: usize) -> Value {
        let mut cur = self;
        for _ in 0..n {
            cur = cur.cdr();
        }
        cur.car()
    }
}

impl Default for Value {
    fn default() -> Self {
        NIL
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 & TAG_MASK {
            _ if self.0 == 0 => write!(f, "nil"),
            TAG_INT => write!(f, "int({})", (self.0 as u32 as i32) >> 2),
            TAG_SYM => write!(f, "sym#{}", self.0 >> 2),
            TAG_PAIR => write!(f, "pair@{:#x}", self.0),
            _ => write!(f, "obj@{:#x}", self.0 & !TAG_MASK),
        }
    }
}

/// Tag word stored in the first slot of a tagged cell
#[inline(always)]
pub(super) const fn tag_word(typ: TypeId) -> usize {
    ((typ.0 as usize) << 3) | CELL_TAGGED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trip() {
        for n in [0, 1, -1, 42, -42, 3628800, INT_MAX, INT_MIN] {
            assert_eq!(Value::int(n).as_int(), Some(n));
            assert_eq!(Value::int(n).kind(), Kind::Int(n));
        }
    }

    #[test]
    fn int_wraps_at_width() {
        assert_eq!(Value::int(INT_MAX + 1).as_int(), Some(INT_MIN));
        assert_eq!(Value::int(INT_MIN - 1).as_int(), Some(INT_MAX));
        assert_eq!(Value::int(1 << 30).as_int(), Some(0));
    }

    #[test]
    fn immediates_self_describe() {
        assert!(NIL.is_nil());
        assert!(!NIL.is_pair());
        assert_eq!(NIL.kind(), Kind::Nil);
        assert_eq!(NIL.type_id(), TypeId::NIL);

        let s = Value::sym(7);
        assert!(s.is_sym());
        assert_eq!(s.as_sym(), Some(7));
        assert_eq!(s.type_id(), TypeId::SYM);
        assert_ne!(s, Value::int(7));

        assert!(Value::int(0).is_truthy());
        assert!(!NIL.is_truthy());
    }

    #[test]
    fn no_value_looks_like_a_tag_word() {
        for v in [Value::int(-1), Value::int(5), Value::sym(SYM_MAX), Value::sym(3)] {
            assert_ne!(v.raw() & CELL_TAGGED, CELL_TAGGED);
        }
    }

    #[test]
    fn accessors_on_immediates() {
        assert_eq!(Value::int(3).car(), NIL);
        assert_eq!(Value::sym(1).cdr(), NIL);
        assert_eq!(Value::int(3).payload(), 0);
    }
}
