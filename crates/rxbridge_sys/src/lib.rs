//! # rxbridge-sys
//!
//! Raw C ABI of the embedded Reindexer engine.
//!
//! This crate provides:
//! - `#[repr(C)]` records exchanged with the engine ([`ctypes`])
//! - The [`NativeEngine`] trait, the single seam every native call passes through
//! - [`LinkedEngine`], which forwards to the linked C library (feature `linked`)
//!
//! Nothing here is safe to call directly. `rxbridge_core` wraps these calls
//! with borrowed views, envelope decoding and handle ownership.

#![warn(missing_docs)]

pub mod ctypes;
mod engine;
#[cfg(feature = "linked")]
mod linked;

pub use ctypes::*;
pub use engine::{NativeEngine, RawHandle};
#[cfg(feature = "linked")]
pub use linked::LinkedEngine;
