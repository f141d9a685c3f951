//! Deterministic, pure logic shared by the explorer loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod backoff;
pub mod choices;
pub mod fill;
pub mod graph;
pub mod payload;
pub mod types;
pub mod verifier;
