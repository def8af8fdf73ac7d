// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/types.rs

// Registry of heap object types. Each tagged cell names an entry
// here, which tells the collector how to find the values the object
// references and how to release whatever it owns outside the heap.

// <>

use super::eval::NativeDesc;
use super::value::{Value, NIL};

/// Most values a single tagged object may reference
pub const MAX_REFS: usize = 2;

/// Writes referenced values into the buffer; returns how many
pub type FindRefsFn = fn(usize, &mut [Value; MAX_REFS]) -> usize;

/// Releases out-of-band memory owned by a payload
pub type DestructorFn = fn(usize);

/// Generates an enum along with a TryFrom<u8> impl for it
macro_rules! enum_and_tryfrom {
    ($(#[$meta:meta])* $vis:vis enum $name:ident {
        $($(#[$vmeta:meta])* $vname:ident $(= $val:expr)?,)*
    }) => {
        $(#[$meta])*
        $vis enum $name {
            $($(#[$vmeta])* $vname $(= $val)?,)*
        }

        impl std::convert::TryFrom<u8> for $name {
            type Error = ();

            #[inline(always)]
            fn try_from(v: u8) -> Result<Self, Self::Error> {
                match v {
                    $(x if x == $name::$vname as u8 => Ok($name::$vname),)*
                    _ => Err(()),
                }
            }
        }
    }
}

enum_and_tryfrom! {
    /// Types registered by every context before any user type
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u8)]
    pub enum CoreType {
        Nil = 0,
        Pair = 1,
        Int = 2,
        Sym = 3,
        Func = 4,
        Native = 5,
        Str = 6,
    }
}

/// Index into the type registry; stable once handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const NIL: TypeId = TypeId(CoreType::Nil as u32);
    pub const PAIR: TypeId = TypeId(CoreType::Pair as u32);
    pub const INT: TypeId = TypeId(CoreType::Int as u32);
    pub const SYM: TypeId = TypeId(CoreType::Sym as u32);
    pub const FUNC: TypeId = TypeId(CoreType::Func as u32);
    pub const NATIVE: TypeId = TypeId(CoreType::Native as u32);
    pub const STR: TypeId = TypeId(CoreType::Str as u32);

    pub fn core(self) -> Option<CoreType> {
        u8::try_from(self.0).ok().and_then(|b| CoreType::try_from(b).ok())
    }
}

/// Per-type behavior consulted by the collector
///
/// Neither method may allocate; both run in the middle of a
/// collection.
pub trait TypeHooks {
    fn find_refs(&self, _payload: usize, _out: &mut [Value; MAX_REFS]) -> usize {
        0
    }

    fn destroy(&self, _payload: usize) {}
}

/// Hooks given as plain function pointers
struct FnHooks {
    find_refs: Option<FindRefsFn>,
    destructor: Option<DestructorFn>,
}

impl TypeHooks for FnHooks {
    fn find_refs(&self, payload: usize, out: &mut [Value; MAX_REFS]) -> usize {
        match self.find_refs {
            Some(f) => f(payload, out),
            None => 0,
        }
    }

    fn destroy(&self, payload: usize) {
        if let Some(d) = self.destructor {
            d(payload)
        }
    }
}

struct TypeEntry {
    name: Box<str>,
    hooks: Box<dyn TypeHooks>,
}

/// Append-only table of heap object types
pub struct TypeRegistry {
    entries: Vec<TypeEntry>,
}

impl TypeRegistry {
    /// Creates a registry holding the core types, in CoreType order
    pub fn new() -> Self {
        let mut reg = Self {
            entries: Vec::with_capacity(16),
        };

        reg.register("nil", None, None);
        reg.register("pair", None, None);
        reg.register("int", None, None);
        reg.register("sym", None, None);
        reg.register("func", Some(func_refs), None);
        reg.register("native", None, Some(native_free));
        reg.register("str", None, Some(str_free));

        debug_assert_eq!(reg.len(), CoreType::Str as usize + 1);
        reg
    }

    pub fn register(
        &mut self,
        name: &str,
        find_refs: Option<FindRefsFn>,
        destructor: Option<DestructorFn>,
    ) -> TypeId {
        self.register_hooks(
            name,
            Box::new(FnHooks {
                find_refs,
                destructor,
            }),
        )
    }

    pub fn register_hooks(&mut self, name: &str, hooks: Box<dyn TypeHooks>) -> TypeId {
        let id = TypeId(self.entries.len() as u32);
        assert!(id.0 < (1 << 24), "type registry full");

        self.entries.push(TypeEntry {
            name: name.into(),
            hooks,
        });

        log::debug!("registered type {} as {}", name, id.0);
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_registered(&self, id: TypeId) -> bool {
        (id.0 as usize) < self.entries.len()
    }

    pub fn name(&self, id: TypeId) -> &str {
        self.entries
            .get(id.0 as usize)
            .map(|e| &*e.name)
            .unwrap_or("unknown")
    }

    #[inline(always)]
    pub(super) fn find_refs(&self, id: TypeId, payload: usize, out: &mut [Value; MAX_REFS]) -> usize {
        match self.entries.get(id.0 as usize) {
            Some(e) => e.hooks.find_refs(payload, out).min(MAX_REFS),
            None => 0,
        }
    }

    #[inline(always)]
    pub(super) fn destroy(&self, id: TypeId, payload: usize) {
        if let Some(e) = self.entries.get(id.0 as usize) {
            e.hooks.destroy(payload)
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A function's payload is the list (env params body name)
fn func_refs(payload: usize, out: &mut [Value; MAX_REFS]) -> usize {
    out[0] = unsafe { Value::from_raw(payload) };
    1
}

fn native_free(payload: usize) {
    if payload != 0 {
        drop(unsafe { Box::from_raw(payload as *mut NativeDesc) })
    }
}

fn str_free(payload: usize) {
    if payload != 0 {
        drop(unsafe { Box::from_raw(payload as *mut Vec<u8>) })
    }
}

/// Reference buffer for a single find_refs call
#[inline(always)]
pub(super) fn ref_buf() -> [Value; MAX_REFS] {
    [NIL; MAX_REFS]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_types_first() {
        let reg = TypeRegistry::new();

        assert_eq!(reg.len(), 7);
        assert_eq!(reg.name(TypeId::PAIR), "pair");
        assert_eq!(reg.name(TypeId::STR), "str");
        assert_eq!(TypeId::FUNC.core(), Some(CoreType::Func));
        assert_eq!(TypeId(99).core(), None);
    }

    #[test]
    fn append_only_ids() {
        let mut reg = TypeRegistry::new();

        let a = reg.register("a", None, None);
        let b = reg.register("b", None, None);

        assert_eq!(a, TypeId(7));
        assert_eq!(b, TypeId(8));
        assert_eq!(reg.name(a), "a");
        assert!(reg.is_registered(b));
        assert!(!reg.is_registered(TypeId(9)));
        assert_eq!(reg.name(TypeId(9)), "unknown");
    }

    #[test]
    fn find_refs_capped() {
        fn greedy(_: usize, out: &mut [Value; MAX_REFS]) -> usize {
            out[0] = Value::int(1);
            out[1] = Value::int(2);
            5
        }

        let mut reg = TypeRegistry::new();
        let id = reg.register("greedy", Some(greedy), None);

        let mut buf = ref_buf();
        assert_eq!(reg.find_refs(id, 0, &mut buf), MAX_REFS);
        assert_eq!(buf[1], Value::int(2));
    }

    #[test]
    fn trait_hooks() {
        use std::cell::Cell;
        use std::rc::Rc;

        struct Counting(Rc<Cell<usize>>);

        impl TypeHooks for Counting {
            fn destroy(&self, payload: usize) {
                self.0.set(self.0.get() + payload)
            }
        }

        let count = Rc::new(Cell::new(0));
        let mut reg = TypeRegistry::new();
        let id = reg.register_hooks("counting", Box::new(Counting(count.clone())));

        reg.destroy(id, 3);
        reg.destroy(id, 4);
        assert_eq!(count.get(), 7);
    }
}
