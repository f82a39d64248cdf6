//! Deterministic, pure logic shared by the orchestration loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod decision;
pub mod events;
pub mod guardrails;
pub mod phase_gate;
pub mod types;
pub mod window;
