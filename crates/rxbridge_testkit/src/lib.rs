//! # rxbridge Testkit
//!
//! Test utilities for rxbridge.
//!
//! This crate provides:
//! - [`MemoryEngine`], an in-process engine that honours the native call
//!   contract and accounts for every resource it hands out
//! - Fixtures for building queries and items and reading result payloads
//!
//! ## Usage
//!
//! ```rust
//! use rxbridge_testkit::{assert_no_leaks, MemoryEngine};
//!
//! let engine = MemoryEngine::new();
//! assert_no_leaks(&engine);
//! ```

#![warn(missing_docs)]

mod engine;
pub mod fixtures;

pub use engine::{codes, MemoryEngine, ServerBehavior};
pub use fixtures::*;
