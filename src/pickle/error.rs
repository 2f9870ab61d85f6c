//! Error types for the pickle layers
//!
//! Encoding and decoding fail independently: the reader reports positions
//! in the input, the encoder reports the opcode it was asked to produce.

use thiserror::Error;

use super::opcode::Opcode;

/// Failure to turn an `(opcode, argument)` pair into bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Identifier byte outside the opcode catalog
    #[error("unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    /// The argument variant cannot feed this opcode's encoder
    #[error("{opcode} expects {expected} argument, got {found}")]
    ArgumentMismatch {
        opcode: Opcode,
        expected: &'static str,
        found: &'static str,
    },

    /// The argument does not fit the opcode's wire encoding
    #[error("cannot encode {opcode}: {reason}")]
    EncodingViolation { opcode: Opcode, reason: String },
}

/// Failure to split raw bytes into opcode events
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode 0x{code:02x} at offset {offset}")]
    UnknownOpcode { code: u8, offset: usize },

    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("malformed input at offset {offset}: {reason}")]
    MalformedInput { offset: usize, reason: String },
}

impl DecodeError {
    /// Byte position the error refers to
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::UnknownOpcode { offset, .. }
            | DecodeError::UnexpectedEof { offset }
            | DecodeError::MalformedInput { offset, .. } => *offset,
        }
    }
}
