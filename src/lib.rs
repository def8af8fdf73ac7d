// Skiff, a small Lisp runtime with a tracing collector.
// Copyright (C) 2024 Matthew Rothlisberger

// Skiff is licensed under the terms of the GNU Affero General Public
// License. See the top level LICENSE file for the license text.

// Find full copyright information in the top level COPYRIGHT file.

// <>

// src/lib.rs

// Crate root.

// <>

pub mod lisp;

pub use lisp::{Config, Context, SkErr, Value};
