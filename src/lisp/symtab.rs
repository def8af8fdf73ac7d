// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/symtab.rs

// A table to associate symbol names with efficient internal IDs.

// <>

use super::value::SYM_MAX;

const EMPTY: u32 = u32::MAX;

/// Bidirectional map between names and dense symbol ids
///
/// Ids are handed out in insertion order, so the id to name direction
/// is a plain vector; the name to id direction is an open-addressed
/// table of ids with linear probing.
pub struct SymbolTable {
    names: Vec<Box<str>>,
    nm_to_id: Vec<u32>,
}

impl SymbolTable {
    pub fn new(approx_cap: usize) -> Self {
        let len = (approx_cap.max(8) * 2).next_power_of_two();

        Self {
            names: Vec::with_capacity(approx_cap),
            nm_to_id: vec![EMPTY; len],
        }
    }

    /// Looks up a name, interning it with the next id if absent
    pub fn get_id(&mut self, name: &str) -> u32 {
        let tgt = Self::hash_name(name.as_bytes()) & (self.nm_to_id.len() - 1);

        let slot = match self.find_slot(tgt, name) {
            Ok(id) => return id,
            Err(slot) => slot,
        };

        let id = self.names.len() as u32;
        assert!(id <= SYM_MAX, "symbol table full");

        self.names.push(name.into());
        self.nm_to_id[slot] = id;

        // maintain a load ratio of at most one half
        if self.names.len() * 2 > self.nm_to_id.len() {
            self.resize(2);
        }

        id
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<u32> {
        let tgt = Self::hash_name(name.as_bytes()) & (self.nm_to_id.len() - 1);
        self.find_slot(tgt, name).ok()
    }

    pub fn lookup_by_id(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(|n| &**n)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Ok with the id if found, else Err with the empty slot where it
    /// belongs
    fn find_slot(&self, tgt: usize, name: &str) -> Result<u32, usize> {
        let mask = self.nm_to_id.len() - 1;
        let mut csn = tgt;

        loop {
            let cur = self.nm_to_id[csn];

            if cur == EMPTY {
                return Err(csn);
            } else if &*self.names[cur as usize] == name {
                return Ok(cur);
            }

            csn = (csn + 1) & mask;
            assert_ne!(csn, tgt, "rollover");
        }
    }

    fn resize(&mut self, factor: usize) {
        let new_len = self.nm_to_id.len() * factor;
        let mask = new_len - 1;
        let mut table = vec![EMPTY; new_len];

        // re-hash every name into the new table
        for (id, name) in self.names.iter().enumerate() {
            let mut csn = Self::hash_name(name.as_bytes()) & mask;
            while table[csn] != EMPTY {
                csn = (csn + 1) & mask;
            }
            table[csn] = id as u32;
        }

        log::debug!("symbol table resized to {} slots", new_len);
        self.nm_to_id = table;
    }

    fn hash_name(name: &[u8]) -> usize {
        let mut acc: usize = 1;
        for b in name {
            acc = acc.wrapping_add(acc << 5).wrapping_add(*b as _)
        }
        acc
    }
}
