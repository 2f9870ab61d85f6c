//! Decoded opcode arguments

use std::fmt;

use num_bigint::BigInt;

/// Argument carried by an opcode event.
///
/// Which variants an opcode accepts is decided by the encoder; the reader
/// always produces the variant listed next to each opcode family below.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// No payload (every no-argument opcode)
    None,
    /// Native integer: fixed-width ints, memo indexes, `INT`, `PUT`/`GET`
    Int(i64),
    /// Legacy `INT` spelled with a leading zero (`I00`/`I01` booleans)
    BoxedInt(i64),
    /// Arbitrary precision: `LONG`, `LONG1`, `LONG4`
    Long(BigInt),
    /// `FLOAT`, `BINFLOAT`
    Float(f64),
    /// Byte strings: `STRING`, `BINSTRING`, `SHORT_BINSTRING`, `PERSID`
    Bytes(Vec<u8>),
    /// Text strings, and `"module name"` pairs for `GLOBAL`/`INST`
    Text(String),
    /// Text holding lone surrogates, which Python 2 unicode objects allow
    /// and `String` cannot. Code points, one per element.
    WideText(Vec<u32>),
}

impl Argument {
    /// Variant name, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Argument::None => "no",
            Argument::Int(_) => "int",
            Argument::BoxedInt(_) => "boxed int",
            Argument::Long(_) => "long",
            Argument::Float(_) => "float",
            Argument::Bytes(_) => "bytes",
            Argument::Text(_) => "text",
            Argument::WideText(_) => "wide text",
        }
    }

    /// `Text` when every code point is a Unicode scalar value, `WideText`
    /// otherwise.
    pub fn from_code_points(points: Vec<u32>) -> Self {
        match points.iter().map(|&cp| char::from_u32(cp)).collect::<Option<String>>() {
            Some(text) => Argument::Text(text),
            None => Argument::WideText(points),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Argument::None)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Argument::Int(v) | Argument::BoxedInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Raw bytes of a byte or text string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Argument::Bytes(b) => Some(b),
            Argument::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Argument::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Code points of either text variant
    pub fn code_points(&self) -> Option<Vec<u32>> {
        match self {
            Argument::Text(s) => Some(s.chars().map(u32::from).collect()),
            Argument::WideText(points) => Some(points.clone()),
            _ => None,
        }
    }

    /// Module and name of a `"module name"` reference
    pub fn as_global(&self) -> Option<(&str, &str)> {
        self.as_text()?.split_once(' ')
    }
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Int(v)
    }
}

impl From<BigInt> for Argument {
    fn from(v: BigInt) -> Self {
        Argument::Long(v)
    }
}

impl From<f64> for Argument {
    fn from(v: f64) -> Self {
        Argument::Float(v)
    }
}

impl From<Vec<u8>> for Argument {
    fn from(v: Vec<u8>) -> Self {
        Argument::Bytes(v)
    }
}

impl From<&[u8]> for Argument {
    fn from(v: &[u8]) -> Self {
        Argument::Bytes(v.to_vec())
    }
}

impl From<String> for Argument {
    fn from(v: String) -> Self {
        Argument::Text(v)
    }
}

impl From<&str> for Argument {
    fn from(v: &str) -> Self {
        Argument::Text(v.to_string())
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::None => Ok(()),
            Argument::Int(v) => write!(f, "{}", v),
            Argument::BoxedInt(v) => write!(f, "0{}", v),
            Argument::Long(v) => write!(f, "{}L", v),
            Argument::Float(v) => write!(f, "{:?}", v),
            Argument::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            Argument::Text(s) => write!(f, "{:?}", s),
            Argument::WideText(points) => {
                f.write_str("\"")?;
                for &cp in points {
                    match char::from_u32(cp) {
                        Some(c) => write!(f, "{}", c.escape_debug())?,
                        None => write!(f, "\\u{{{:x}}}", cp)?,
                    }
                }
                f.write_str("\"")
            }
        }
    }
}
