//! Pickle opcode stream rewriting
//!
//! This module implements opcode-level filtering of Python pickles
//! (protocols 0 through 2). A pickle is walked as a flat sequence of
//! opcode events, each event may be replaced by a caller-supplied
//! transform, and the sequence is re-encoded byte for byte.
//!
//! Layering (leaf first): [`opcode`] and [`argument`] form the catalog,
//! [`encoder`] turns `(opcode, argument)` pairs back into bytes,
//! [`reader`] splits raw bytes into events, and [`filter`] drives the loop.

pub mod argument;
pub mod encoder;
pub mod error;
pub mod filter;
pub mod opcode;
pub mod reader;

pub use argument::Argument;
pub use encoder::{binlong, binstring, decode_long, encode, encode_into, encode_long, encode_raw};
pub use error::{DecodeError, EncodeError};
pub use filter::{filter, filter_events, filter_record, FilterOptions, FilterStats, PickleFilter};
pub use opcode::{classify, Arity, Opcode};
pub use reader::{Event, OpReader};

/// Highest pickle protocol whose opcodes are in the catalog
pub const HIGHEST_PROTOCOL: u8 = 2;

/// Longest payload that fits a one-byte length prefix
pub const SHORT_LEN_MAX: usize = u8::MAX as usize;
