// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lisp/config.rs

// Tunable sizes for a runtime context.

// <>

/// What the allocator does when a collection leaves no free cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// Exhaustion after a collection is fatal
    Fixed,
    /// Add another chunk, up to this many in total; fatal past that
    Grow { max_chunks: usize },
}

/// Runtime configuration
///
/// ```ignore
/// let cfg = Config {
///     chunk_cells: 512,
///     growth: Growth::Fixed,
///     ..Default::default()
/// };
/// let ctx = Context::with_config(cfg);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Cells per chunk; every chunk has the same capacity
    ///
    /// Default: 4096
    pub chunk_cells: usize,

    /// Exhaustion policy
    ///
    /// Default: grow up to 64 chunks
    pub growth: Growth,

    /// Initial symbol table capacity, in names
    ///
    /// Default: 256
    pub symtab_capacity: usize,

    /// Deepest nesting of pending evaluations before evaluation fails;
    /// bounds host stack use by non-tail recursion
    ///
    /// Default: 1000
    pub max_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_cells: 4096,
            growth: Growth::Grow { max_chunks: 64 },
            symtab_capacity: 256,
            max_depth: 1000,
        }
    }
}

impl Config {
    /// A single fixed chunk; handy for exercising the collector
    pub fn fixed(chunk_cells: usize) -> Self {
        Self {
            chunk_cells,
            growth: Growth::Fixed,
            ..Default::default()
        }
    }
}
