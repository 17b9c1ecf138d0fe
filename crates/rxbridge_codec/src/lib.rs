//! # rxbridge Codec
//!
//! Packed encoding used for the argument buffers handed to the native engine.
//!
//! ## Rules
//!
//! - Unsigned integers are LEB128 varints
//! - Signed integers are zig-zag encoded, then written as varints
//! - Strings and byte strings are a varint length followed by the bytes
//! - Fixed-width integers are little-endian
//!
//! ## Usage
//!
//! ```
//! use rxbridge_codec::{PackedReader, PackedWriter};
//!
//! let mut w = PackedWriter::new();
//! w.put_vstring("items").put_varuint(3);
//! let bytes = w.into_bytes();
//!
//! let mut r = PackedReader::new(&bytes);
//! assert_eq!(r.get_vstring().unwrap(), "items");
//! assert_eq!(r.get_varuint().unwrap(), 3);
//! assert!(r.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod reader;
mod writer;

pub use error::{CodecError, CodecResult};
pub use reader::PackedReader;
pub use writer::PackedWriter;
