//! Autonomous UI exploration loop.
//!
//! This crate explores an interactive application one action at a time: it
//! captures the current screen, asks a decision oracle for the next action,
//! executes it, and verifies the action had its intended effect. Discovered
//! screens and transitions form a navigation graph; every step lands in a
//! ledger that can be replayed into regression tests. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (graph queries, choice building,
//!   verification). No I/O, fully testable in isolation.
//! - **[`io`]**: Collaborator seams (capture, oracle, action execution) and
//!   persistence (config, ledger, graph). Isolated to enable scripted fakes in tests.
//!
//! Orchestration modules ([`decision`], [`explore`], [`ledger`]) coordinate core
//! logic with I/O to run an exploration session.

pub mod core;
pub mod decision;
pub mod error;
pub mod exit_codes;
pub mod explore;
pub mod io;
pub mod ledger;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
