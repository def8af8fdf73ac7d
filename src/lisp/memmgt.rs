// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/memmgt.rs

// Memory management for Skiff. Carves fixed-capacity chunks into
// cells, threads unused cells onto a free list per chunk, and keeps
// the two root sources the collector starts from: the pin set and the
// shadow root stack.

// <>

use super::config::{Config, Growth};
use super::types::{TypeHooks, TypeId, TypeRegistry, FindRefsFn, DestructorFn};
use super::value::{self, Cell, Value, CELL_FREE, CELL_SIZE, NIL};

use std::alloc;
use std::ptr;

/// A contiguous block of cells with its own free list and mark bitmap
pub(super) struct Chunk {
    base: *mut Cell,
    len: usize,
    /// Head of the free list; null when the chunk is full
    free: *mut Cell,
    free_ct: usize,
    /// One bit per cell, meaningful only during a collection
    marks: Vec<u64>,
}

impl Chunk {
    fn new(len: usize) -> Self {
        assert!(len > 0, "empty chunk");

        let layout = alloc::Layout::array::<Cell>(len)
            .unwrap_or_else(|_| panic!("chunk of {} cells is too large", len));

        let base = unsafe { alloc::alloc(layout) } as *mut Cell;
        if base.is_null() {
            alloc::handle_alloc_error(layout);
        }

        // thread every cell onto the free list, lowest address first
        for i in 0..len {
            let next = if i + 1 < len {
                unsafe { base.add(i + 1) as usize }
            } else {
                0
            };

            unsafe {
                ptr::write(
                    base.add(i),
                    Cell {
                        head: CELL_FREE,
                        tail: next,
                    },
                )
            }
        }

        Self {
            base,
            len,
            free: base,
            free_ct: len,
            marks: vec![0; (len + 63) / 64],
        }
    }

    #[inline(always)]
    fn pop(&mut self) -> Option<*mut Cell> {
        if self.free.is_null() {
            return None;
        }

        let cell = self.free;
        unsafe {
            debug_assert_eq!((*cell).head, CELL_FREE);
            self.free = (*cell).tail as *mut Cell;
        }
        self.free_ct -= 1;

        Some(cell)
    }

    /// Relinks a cell onto the free list and resets its tag
    #[inline(always)]
    pub(super) fn push(&mut self, cell: *mut Cell) {
        unsafe {
            (*cell).head = CELL_FREE;
            (*cell).tail = self.free as usize;
        }
        self.free = cell;
        self.free_ct += 1;
    }

    /// Index of the cell at this address, if it is one of ours
    #[inline(always)]
    pub(super) fn index_of(&self, addr: usize) -> Option<usize> {
        let lo = self.base as usize;
        let hi = lo + self.len * CELL_SIZE;

        if addr < lo || addr >= hi || (addr - lo) % CELL_SIZE != 0 {
            None
        } else {
            Some((addr - lo) / CELL_SIZE)
        }
    }

    #[inline(always)]
    pub(super) fn cell(&self, idx: usize) -> *mut Cell {
        debug_assert!(idx < self.len);
        unsafe { self.base.add(idx) }
    }

    #[inline(always)]
    pub(super) fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub(super) fn live(&self) -> usize {
        self.len - self.free_ct
    }

    #[inline(always)]
    pub(super) fn is_marked(&self, idx: usize) -> bool {
        self.marks[idx / 64] & (1 << (idx % 64)) != 0
    }

    #[inline(always)]
    pub(super) fn set_mark(&mut self, idx: usize) {
        self.marks[idx / 64] |= 1 << (idx % 64)
    }

    pub(super) fn clear_marks(&mut self) {
        self.marks.iter_mut().for_each(|w| *w = 0)
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        if let Ok(layout) = alloc::Layout::array::<Cell>(self.len) {
            unsafe { alloc::dealloc(self.base as *mut u8, layout) }
        }
    }
}

/// Running totals kept by the collector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: u64,
    pub last_freed: usize,
    pub total_freed: u64,
    /// Cells in use after the last collection
    pub live: usize,
    pub chunks: usize,
}

/// Owner of every cell in a context
pub struct Heap {
    pub(super) chunks: Vec<Chunk>,
    chunk_cells: usize,
    growth: Growth,
    /// Chunk most recently allocated from
    cursor: usize,

    /// Explicit keep-alive set
    pub(super) pins: Vec<Value>,
    /// Values held by active native frames
    pub(super) roots: Vec<Value>,

    pub(super) types: TypeRegistry,
    pub(super) stats: GcStats,
    pub(super) collecting: bool,
}

impl Heap {
    pub fn new(cfg: &Config) -> Self {
        let mut heap = Self {
            chunks: Vec::new(),
            chunk_cells: cfg.chunk_cells,
            growth: cfg.growth,
            cursor: 0,
            pins: Vec::new(),
            roots: Vec::with_capacity(256),
            types: TypeRegistry::new(),
            stats: GcStats::default(),
            collecting: false,
        };

        heap.chunks.push(Chunk::new(cfg.chunk_cells));
        heap.stats.chunks = 1;
        heap
    }

    /// Takes a cell off some free list, collecting and then growing
    /// as the policy allows; exhaustion is fatal
    fn alloc_cell(&mut self) -> *mut Cell {
        assert!(!self.collecting, "allocation during a collection");

        if let Some(cell) = self.pop_free() {
            return cell;
        }

        self.collect(true);

        // grow early if the collection left the heap nearly full
        if self.free_cells() < self.capacity() / 8 {
            self.grow();
        }

        match self.pop_free() {
            Some(cell) => cell,
            None => self.exhausted(),
        }
    }

    fn pop_free(&mut self) -> Option<*mut Cell> {
        let n = self.chunks.len();

        for i in 0..n {
            let k = (self.cursor + i) % n;
            if let Some(cell) = self.chunks[k].pop() {
                self.cursor = k;

                if cfg!(feature = "memdbg") {
                    log::debug!("alloc {:p} in chunk {}", cell, k);
                }

                return Some(cell);
            }
        }

        None
    }

    fn grow(&mut self) -> bool {
        match self.growth {
            Growth::Grow { max_chunks } if self.chunks.len() < max_chunks => {
                self.chunks.push(Chunk::new(self.chunk_cells));
                self.cursor = self.chunks.len() - 1;
                self.stats.chunks = self.chunks.len();

                log::info!(
                    "heap grown to {} chunks of {} cells",
                    self.chunks.len(),
                    self.chunk_cells
                );
                true
            }
            _ => false,
        }
    }

    fn exhausted(&self) -> ! {
        log::error!(
            "heap exhausted: {} live cells in {} chunks, {} pins, {} roots",
            self.live_count(),
            self.chunks.len(),
            self.pins.len(),
            self.roots.len()
        );
        panic!("heap exhausted")
    }

    /// A fresh pair with both slots nil
    pub fn alloc(&mut self) -> Value {
        self.cons(NIL, NIL)
    }

    pub fn cons(&mut self, first: Value, rest: Value) -> Value {
        // both halves must survive a collection triggered right here
        let base = self.root_base();
        self.push_root(first);
        self.push_root(rest);

        let cell = self.alloc_cell();

        self.pop_roots(base);

        unsafe {
            ptr::write(
                cell,
                Cell {
                    head: first.raw(),
                    tail: rest.raw(),
                },
            )
        }

        Value::pair_at(cell)
    }

    /// Allocates a tagged object; any values the payload references
    /// must already be rooted by the caller
    pub fn make_tagged(&mut self, typ: TypeId, payload: usize) -> Value {
        assert!(
            typ != TypeId::NIL && self.types.is_registered(typ),
            "bad type id {}",
            typ.0
        );

        let cell = self.alloc_cell();

        unsafe {
            ptr::write(
                cell,
                Cell {
                    head: value::tag_word(typ),
                    tail: payload,
                },
            )
        }

        Value::tagged_at(cell)
    }

    /// Keeps a value alive until unpinned; pinning twice is the same
    /// as pinning once
    pub fn pin(&mut self, v: Value) {
        if !self.pins.contains(&v) {
            if cfg!(feature = "memdbg") {
                log::debug!("pin {:?}", v);
            }

            self.pins.push(v);
        }
    }

    /// Removes the matching pin, if there is one
    pub fn unpin(&mut self, v: Value) {
        if let Some(i) = self.pins.iter().position(|p| *p == v) {
            if cfg!(feature = "memdbg") {
                log::debug!("unpin {:?}", v);
            }

            self.pins.swap_remove(i);
        }
    }

    pub fn is_pinned(&self, v: Value) -> bool {
        self.pins.contains(&v)
    }

    /// Current top of the shadow root stack
    #[inline(always)]
    pub fn root_base(&self) -> usize {
        self.roots.len()
    }

    /// Pushes a value onto the shadow root stack; returns its slot
    #[inline(always)]
    pub fn push_root(&mut self, v: Value) -> usize {
        self.roots.push(v);

        if cfg!(feature = "stkdbg") && self.roots.len() % 1024 == 0 {
            log::debug!("root stack depth {}", self.roots.len());
        }

        self.roots.len() - 1
    }

    #[inline(always)]
    pub fn set_root(&mut self, slot: usize, v: Value) {
        self.roots[slot] = v
    }

    #[inline(always)]
    pub fn root(&self, slot: usize) -> Value {
        self.roots[slot]
    }

    /// Drops every root pushed since `base` was taken
    #[inline(always)]
    pub fn pop_roots(&mut self, base: usize) {
        debug_assert!(base <= self.roots.len());
        self.roots.truncate(base)
    }

    pub fn register_type(
        &mut self,
        name: &str,
        find_refs: Option<FindRefsFn>,
        destructor: Option<DestructorFn>,
    ) -> TypeId {
        self.types.register(name, find_refs, destructor)
    }

    pub fn register_type_hooks(&mut self, name: &str, hooks: Box<dyn TypeHooks>) -> TypeId {
        self.types.register_hooks(name, hooks)
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Chunk and cell index of an address, if it is a cell of ours
    #[inline(always)]
    pub(super) fn locate(&self, addr: usize) -> Option<(usize, usize)> {
        self.chunks
            .iter()
            .enumerate()
            .find_map(|(ci, c)| c.index_of(addr).map(|idx| (ci, idx)))
    }

    /// True if the value is an immediate or addresses an allocated
    /// cell of this heap
    pub fn is_live(&self, v: Value) -> bool {
        match v.cell_addr() {
            None => true,
            Some(addr) => match self.locate(addr) {
                Some((ci, idx)) => unsafe { (*self.chunks[ci].cell(idx)).head != CELL_FREE },
                None => false,
            },
        }
    }

    pub fn live_count(&self) -> usize {
        self.chunks.iter().map(Chunk::live).sum()
    }

    pub fn free_cells(&self) -> usize {
        self.capacity() - self.live_count()
    }

    pub fn capacity(&self) -> usize {
        self.chunks.len() * self.chunk_cells
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if self.collecting {
            return;
        }

        // final pass keeps only pinned values, then nothing survives
        self.roots.clear();
        self.collect(false);

        log::debug!(
            "heap shutdown: {} pinned cells, {} collections",
            self.live_count(),
            self.stats.collections
        );

        self.pins.clear();
        self.collect(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(cells: usize) -> Heap {
        Heap::new(&Config::fixed(cells))
    }

    #[test]
    fn cons_fills_both_slots() {
        let mut heap = small(16);

        let p = heap.cons(Value::int(1), Value::int(2));

        assert!(p.is_pair());
        assert_eq!(p.car(), Value::int(1));
        assert_eq!(p.cdr(), Value::int(2));
        assert_eq!(heap.live_count(), 1);
        assert!(heap.is_live(p));
    }

    #[test]
    fn tagged_records_type() {
        let mut heap = small(16);
        let typ = heap.register_type("thing", None, None);

        let t = heap.make_tagged(typ, 0xbeef);

        assert!(t.is_tagged());
        assert_eq!(t.type_id(), typ);
        assert_eq!(t.payload(), 0xbeef);
    }

    #[test]
    #[should_panic(expected = "bad type id")]
    fn tagged_rejects_unknown_type() {
        let mut heap = small(16);
        heap.make_tagged(TypeId(200), 0);
    }

    #[test]
    fn pin_is_idempotent() {
        let mut heap = small(16);
        let p = heap.alloc();

        heap.pin(p);
        heap.pin(p);
        assert_eq!(heap.pins.len(), 1);

        heap.unpin(p);
        assert!(!heap.is_pinned(p));

        // absent: no-op
        heap.unpin(p);
        heap.unpin(Value::int(3));
        assert!(heap.pins.is_empty());
    }

    #[test]
    fn unpin_removes_only_the_match() {
        let mut heap = small(16);
        let a = heap.alloc();
        let b = heap.alloc();
        let c = heap.alloc();

        heap.pin(a);
        heap.pin(b);
        heap.pin(c);
        heap.unpin(c);

        assert!(heap.is_pinned(a));
        assert!(heap.is_pinned(b));
        assert!(!heap.is_pinned(c));
    }

    #[test]
    fn root_stack_slots() {
        let mut heap = small(16);
        let base = heap.root_base();

        let s = heap.push_root(NIL);
        heap.set_root(s, Value::int(9));
        assert_eq!(heap.root(s), Value::int(9));

        heap.push_root(Value::int(1));
        heap.pop_roots(base);
        assert_eq!(heap.root_base(), base);
    }

    #[test]
    fn foreign_addresses_are_not_live() {
        let heap = small(16);
        let stray = Box::new(Cell { head: 0, tail: 0 });
        let addr = &*stray as *const Cell as usize;

        assert!(!heap.is_live(unsafe { Value::from_raw(addr) }));
        assert!(heap.is_live(Value::int(4)));
    }

    #[test]
    fn grows_when_full() {
        let mut heap = Heap::new(&Config {
            chunk_cells: 8,
            growth: Growth::Grow { max_chunks: 4 },
            ..Default::default()
        });

        let keep = heap.alloc();
        heap.pin(keep);
        let mut tail = keep;
        for i in 0..20 {
            let next = heap.cons(Value::int(i), NIL);
            tail.set_cdr(next);
            tail = next;
        }

        assert_eq!(heap.live_count(), 21);
        assert!(heap.chunk_count() >= 3);
        assert_eq!(heap.stats().chunks, heap.chunk_count());
    }

    #[test]
    #[should_panic(expected = "heap exhausted")]
    fn fixed_heap_exhaustion_is_fatal() {
        let mut heap = small(8);

        let keep = heap.alloc();
        heap.pin(keep);
        let mut tail = keep;
        for i in 0..8 {
            let next = heap.cons(Value::int(i), NIL);
            tail.set_cdr(next);
            tail = next;
        }
    }
}
