// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/gc.rs

// Stop-the-world mark and sweep over every chunk of a heap.

// <>

use super::memmgt::Heap;
use super::types::{self, TypeId};
use super::value::{Value, CELL_FREE, CELL_TAGGED};

impl Heap {
    /// Runs a full collection and returns the number of cells freed
    ///
    /// Roots are the pin set plus, when `scan_roots` is set, the
    /// shadow root stack. Destructors run exactly once per reclaimed
    /// object, from the sweep.
    pub fn collect(&mut self, scan_roots: bool) -> usize {
        assert!(!self.collecting, "collection re-entered");
        self.collecting = true;

        let marked = self.mark(scan_roots);
        let freed = self.sweep();

        self.collecting = false;

        self.stats.collections += 1;
        self.stats.last_freed = freed;
        self.stats.total_freed += freed as u64;
        self.stats.live = self.live_count();

        log::debug!(
            "gc #{}: marked {}, freed {}, {} of {} cells live",
            self.stats.collections,
            marked,
            freed,
            self.stats.live,
            self.capacity()
        );

        freed
    }

    fn mark(&mut self, scan_roots: bool) -> usize {
        for chunk in self.chunks.iter_mut() {
            chunk.clear_marks();
        }

        let mut work: Vec<Value> = Vec::with_capacity(self.pins.len() + self.roots.len());
        work.extend(self.pins.iter().filter(|v| v.cell_addr().is_some()));
        if scan_roots {
            work.extend(self.roots.iter().filter(|v| v.cell_addr().is_some()));
        }

        if cfg!(feature = "stkdbg") {
            log::debug!(
                "gc roots: {} pins, {} stack slots{}",
                self.pins.len(),
                self.roots.len(),
                if scan_roots { "" } else { " (skipped)" }
            );
        }

        let mut refs = types::ref_buf();
        let mut marked = 0;

        while let Some(v) = work.pop() {
            let Some(addr) = v.cell_addr() else {
                continue;
            };

            // only trust words that land on an allocated cell
            let Some((ci, idx)) = self.locate(addr) else {
                continue;
            };

            let chunk = &mut self.chunks[ci];
            if chunk.is_marked(idx) {
                continue;
            }

            let cell = chunk.cell(idx);
            let (head, tail) = unsafe { ((*cell).head, (*cell).tail) };
            if head == CELL_FREE {
                continue;
            }

            chunk.set_mark(idx);
            marked += 1;

            if head & CELL_TAGGED == CELL_TAGGED {
                let n = self
                    .types
                    .find_refs(TypeId((head >> 3) as u32), tail, &mut refs);

                work.extend(refs[..n].iter().filter(|v| v.cell_addr().is_some()));
            } else {
                for raw in [head, tail] {
                    let v = unsafe { Value::from_raw(raw) };
                    if v.cell_addr().is_some() {
                        work.push(v);
                    }
                }
            }
        }

        marked
    }

    fn sweep(&mut self) -> usize {
        let types = &self.types;
        let mut freed = 0;

        for chunk in self.chunks.iter_mut() {
            for idx in 0..chunk.len() {
                if chunk.is_marked(idx) {
                    continue;
                }

                let cell = chunk.cell(idx);
                let (head, tail) = unsafe { ((*cell).head, (*cell).tail) };
                if head == CELL_FREE {
                    continue;
                }

                if head & CELL_TAGGED == CELL_TAGGED {
                    types.destroy(TypeId((head >> 3) as u32), tail);
                }

                if cfg!(feature = "memdbg") {
                    log::debug!("reclaim {:p}", cell);
                }

                chunk.push(cell);
                freed += 1;
            }
        }

        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lisp::config::Config;
    use crate::lisp::types::{TypeHooks, MAX_REFS};
    use crate::lisp::value::NIL;

    use std::cell::Cell;
    use std::rc::Rc;

    /// A box holding one value; counts its destructions
    struct Boxed(Rc<Cell<usize>>);

    impl TypeHooks for Boxed {
        fn find_refs(&self, payload: usize, out: &mut [Value; MAX_REFS]) -> usize {
            out[0] = unsafe { Value::from_raw(payload) };
            1
        }

        fn destroy(&self, _payload: usize) {
            self.0.set(self.0.get() + 1)
        }
    }

    fn heap_with_box() -> (Heap, TypeId, Rc<Cell<usize>>) {
        let mut heap = Heap::new(&Config::fixed(64));
        let count = Rc::new(Cell::new(0));
        let typ = heap.register_type_hooks("box", Box::new(Boxed(count.clone())));
        (heap, typ, count)
    }

    #[test]
    fn unreachable_is_freed() {
        let mut heap = Heap::new(&Config::fixed(64));

        heap.cons(Value::int(1), NIL);
        heap.cons(Value::int(2), NIL);

        assert_eq!(heap.collect(true), 2);
        assert_eq!(heap.live_count(), 0);
        assert_eq!(heap.stats().last_freed, 2);
    }

    #[test]
    fn pinned_survives_until_unpinned() {
        let (mut heap, typ, count) = heap_with_box();

        let b = heap.make_tagged(typ, NIL.raw());
        heap.pin(b);

        for _ in 0..5 {
            heap.collect(true);
            assert!(heap.is_live(b));
        }
        assert_eq!(count.get(), 0);

        heap.unpin(b);
        heap.collect(true);
        assert_eq!(count.get(), 1);
        assert_eq!(heap.live_count(), 0);

        heap.collect(true);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn traces_through_payload() {
        let (mut heap, typ, count) = heap_with_box();

        let inner = heap.cons(Value::int(5), NIL);
        let base = heap.root_base();
        heap.push_root(inner);
        let b = heap.make_tagged(typ, inner.raw());
        heap.pop_roots(base);
        heap.pin(b);

        heap.collect(true);
        assert_eq!(count.get(), 0);
        assert!(heap.is_live(inner));
        assert_eq!(inner.car(), Value::int(5));
    }

    #[test]
    fn cycles_survive_then_free_once() {
        let (mut heap, typ, count) = heap_with_box();

        // pair -> box -> pair
        let p = heap.cons(NIL, NIL);
        heap.pin(p);
        let b = heap.make_tagged(typ, p.raw());
        p.set_car(b);

        let q = heap.cons(p, NIL);
        p.set_cdr(q);

        heap.collect(true);
        assert_eq!(heap.live_count(), 3);
        assert_eq!(count.get(), 0);

        heap.unpin(p);
        assert_eq!(heap.collect(true), 3);
        assert_eq!(count.get(), 1);

        heap.collect(true);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn root_scan_toggle() {
        let mut heap = Heap::new(&Config::fixed(64));

        let p = heap.cons(Value::int(1), NIL);
        heap.push_root(p);

        heap.collect(true);
        assert!(heap.is_live(p));

        heap.collect(false);
        assert!(!heap.is_live(p));
    }

    #[test]
    fn shutdown_destroys_everything() {
        let (mut heap, typ, count) = heap_with_box();

        let a = heap.make_tagged(typ, NIL.raw());
        heap.pin(a);
        let b = heap.make_tagged(typ, NIL.raw());
        heap.push_root(b);
        heap.make_tagged(typ, NIL.raw());

        drop(heap);
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn immediates_never_traced() {
        let mut heap = Heap::new(&Config::fixed(16));

        heap.pin(Value::int(12));
        heap.push_root(NIL);

        assert_eq!(heap.collect(true), 0);
        assert_eq!(heap.stats().collections, 1);
    }
}
