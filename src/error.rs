//! Crate-level error type
//!
//! Thin wrapper over the per-layer errors. Every failure is fatal for the
//! run that produced it; rewriting is deterministic, so nothing is retried.

use thiserror::Error;

use crate::pickle::{DecodeError, EncodeError, Opcode};
use crate::rename::RenameError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The input could not be split into opcode events
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// An (original or substituted) event could not be re-encoded
    #[error("offset {offset}: {source}")]
    Encode {
        offset: usize,
        opcode: Opcode,
        #[source]
        source: EncodeError,
    },

    #[error("input of {size} bytes exceeds limit of {limit} bytes")]
    InputTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Rename(#[from] RenameError),
}

impl Error {
    /// Input offset of the failing event, when known
    pub fn offset(&self) -> Option<usize> {
        match self {
            Error::Decode(e) => Some(e.offset()),
            Error::Encode { offset, .. } => Some(*offset),
            Error::InputTooLarge { .. } | Error::Rename(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_error_message() {
        let err = Error::Encode {
            offset: 12,
            opcode: Opcode::BinInt1,
            source: EncodeError::EncodingViolation {
                opcode: Opcode::BinInt1,
                reason: "300 out of range".to_string(),
            },
        };
        assert_eq!(err.to_string(), "offset 12: cannot encode BININT1: 300 out of range");
        assert_eq!(err.offset(), Some(12));
    }

    #[test]
    fn test_decode_error_is_transparent() {
        let err = Error::from(DecodeError::UnexpectedEof { offset: 3 });
        assert_eq!(err.to_string(), "unexpected end of input at offset 3");
        assert_eq!(err.offset(), Some(3));
    }
}
