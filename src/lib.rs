//! Opcode-level rewriting of Python pickle streams
//!
//! Persisted object graphs (ZODB records, pickled caches) can be migrated
//! without loading the classes they reference: the pickle is split into
//! opcode events, a transform swaps the events it cares about, and the
//! stream is re-encoded byte for byte.
//!
//! ```
//! use picklefilter::pickle::{filter, Argument, Opcode};
//!
//! let out = filter(
//!     |op, arg| match (op, arg) {
//!         (Opcode::ShortBinString, Argument::Bytes(b)) => {
//!             Some((op, Argument::Bytes(b.to_ascii_uppercase())))
//!         }
//!         _ => None,
//!     },
//!     b"U\x02ab.",
//! )
//! .unwrap();
//! assert_eq!(out, b"U\x02AB.");
//! ```

pub mod error;
pub mod pickle;
pub mod rename;

pub use error::{Error, Result};
pub use pickle::{filter, filter_record, Argument, Event, OpReader, Opcode, PickleFilter};
pub use rename::{RenameError, Renamer};
