//! Opcode encoder
//!
//! Turns `(opcode, argument)` pairs into the bytes a conforming unpickler
//! reads back as that opcode. The output for an event decoded by
//! [`OpReader`](super::reader::OpReader) is identical to the input bytes
//! it was decoded from.

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use super::argument::Argument;
use super::error::EncodeError;
use super::opcode::Opcode;
use super::SHORT_LEN_MAX;

const MAX_CODE_POINT: u32 = 0x10ffff;

/// Encode one opcode and its argument into a fresh buffer.
pub fn encode(opcode: Opcode, arg: &Argument) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(16);
    encode_into(&mut out, opcode, arg)?;
    Ok(out)
}

/// Encode a raw identifier byte, failing for codes outside the catalog.
pub fn encode_raw(code: u8, arg: &Argument) -> Result<Vec<u8>, EncodeError> {
    encode(Opcode::try_from(code)?, arg)
}

/// Append one encoded opcode to `out`.
///
/// On error `out` is left as it was before the call.
pub fn encode_into(out: &mut Vec<u8>, opcode: Opcode, arg: &Argument) -> Result<(), EncodeError> {
    let start = out.len();
    out.push(opcode.code());
    let result = write_argument(out, opcode, arg);
    if result.is_err() {
        out.truncate(start);
    }
    result
}

fn write_argument(out: &mut Vec<u8>, opcode: Opcode, arg: &Argument) -> Result<(), EncodeError> {
    use Opcode::*;

    match opcode {
        // No-argument opcodes are their identifier byte; any argument is ignored
        Mark | Stop | Pop | PopMark | Dup | None | BinPersId | Reduce | EmptyList | Append
        | Build | Dict | Appends | List | Obj | SetItem | Tuple | SetItems | EmptyDict
        | EmptyTuple | NewObj | Tuple1 | Tuple2 | Tuple3 | NewTrue | NewFalse => Ok(()),

        Int => match arg {
            Argument::Int(v) => {
                write_line(out, v.to_string().as_bytes());
                Ok(())
            }
            Argument::BoxedInt(v) if *v < 0 => Err(violation(
                opcode,
                format!("leading-zero form cannot carry negative value {}", v),
            )),
            Argument::BoxedInt(v) => {
                write_line(out, format!("0{}", v).as_bytes());
                Ok(())
            }
            Argument::Long(v) => {
                write_line(out, v.to_string().as_bytes());
                Ok(())
            }
            other => Err(mismatch(opcode, "int", other)),
        },
        BinInt => {
            let v: i32 = fixed(opcode, arg)?;
            out.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        BinInt1 | BinPut | BinGet | Proto | Ext1 => {
            let v: u8 = fixed(opcode, arg)?;
            out.push(v);
            Ok(())
        }
        BinInt2 | Ext2 => {
            let v: u16 = fixed(opcode, arg)?;
            out.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        LongBinPut | LongBinGet | Ext4 => {
            let v: i32 = fixed(opcode, arg)?;
            out.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }

        Long => {
            let v = big(opcode, arg)?;
            write_line(out, format!("{}L", v).as_bytes());
            Ok(())
        }
        Long1 => {
            let bytes = encode_long(&big(opcode, arg)?);
            if bytes.len() > SHORT_LEN_MAX {
                return Err(violation(
                    opcode,
                    format!("{} byte encoding exceeds one-byte length prefix", bytes.len()),
                ));
            }
            out.push(bytes.len() as u8);
            out.extend_from_slice(&bytes);
            Ok(())
        }
        Long4 => {
            let bytes = encode_long(&big(opcode, arg)?);
            write_len_prefixed(out, opcode, &bytes)
        }

        Float => match arg {
            Argument::Float(v) => {
                write_line(out, float_repr(*v).as_bytes());
                Ok(())
            }
            other => Err(mismatch(opcode, "float", other)),
        },
        BinFloat => match arg {
            Argument::Float(v) => {
                out.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
            other => Err(mismatch(opcode, "float", other)),
        },

        String => {
            let data = bytes(opcode, arg)?;
            write_line(out, &string_repr(data));
            Ok(())
        }
        BinString => {
            let data = bytes(opcode, arg)?;
            write_len_prefixed(out, opcode, data)
        }
        ShortBinString => {
            let data = bytes(opcode, arg)?;
            if data.len() > SHORT_LEN_MAX {
                return Err(violation(
                    opcode,
                    format!("{} byte payload exceeds one-byte length prefix", data.len()),
                ));
            }
            out.push(data.len() as u8);
            out.extend_from_slice(data);
            Ok(())
        }
        Unicode => match arg {
            Argument::Text(text) => {
                write_line(out, &raw_unicode_escape(text));
                Ok(())
            }
            Argument::WideText(points) => {
                check_code_points(opcode, points)?;
                write_line(out, &escape_code_points(points.iter().copied()));
                Ok(())
            }
            other => Err(mismatch(opcode, "text", other)),
        },
        BinUnicode => match arg {
            Argument::Text(text) => write_len_prefixed(out, opcode, text.as_bytes()),
            Argument::WideText(points) => {
                check_code_points(opcode, points)?;
                write_len_prefixed(out, opcode, &wide_utf8(points))
            }
            other => Err(mismatch(opcode, "text", other)),
        },

        Global | Inst => {
            let name = bytes(opcode, arg)?;
            out.extend(name.iter().map(|&b| if b == b' ' { b'\n' } else { b }));
            out.push(b'\n');
            Ok(())
        }
        PersId => {
            let pid = bytes(opcode, arg)?;
            write_line(out, pid);
            Ok(())
        }

        Put | Get => {
            let v: i64 = fixed(opcode, arg)?;
            write_line(out, v.to_string().as_bytes());
            Ok(())
        }
    }
}

/// Two's-complement little-endian encoding used by `LONG1`/`LONG4`.
///
/// Zero encodes as the empty string; every other value uses the fewest
/// bytes that keep the sign bit correct.
pub fn encode_long(v: &BigInt) -> Vec<u8> {
    if v.is_zero() {
        return Vec::new();
    }
    v.to_signed_bytes_le()
}

/// Inverse of [`encode_long`].
pub fn decode_long(bytes: &[u8]) -> BigInt {
    if bytes.is_empty() {
        return BigInt::zero();
    }
    BigInt::from_signed_bytes_le(bytes)
}

/// Pick `SHORT_BINSTRING` or `BINSTRING` for a byte string.
pub fn binstring(data: Vec<u8>) -> (Opcode, Argument) {
    let opcode = if data.len() <= SHORT_LEN_MAX {
        Opcode::ShortBinString
    } else {
        Opcode::BinString
    };
    (opcode, Argument::Bytes(data))
}

/// Pick `LONG1` or `LONG4` for an arbitrary-precision integer.
pub fn binlong(v: BigInt) -> (Opcode, Argument) {
    let opcode = if encode_long(&v).len() <= SHORT_LEN_MAX {
        Opcode::Long1
    } else {
        Opcode::Long4
    };
    (opcode, Argument::Long(v))
}

// Argument extraction

fn mismatch(opcode: Opcode, expected: &'static str, found: &Argument) -> EncodeError {
    EncodeError::ArgumentMismatch {
        opcode,
        expected,
        found: found.kind(),
    }
}

fn violation(opcode: Opcode, reason: impl Into<String>) -> EncodeError {
    EncodeError::EncodingViolation {
        opcode,
        reason: reason.into(),
    }
}

fn fixed<T: TryFrom<i64>>(opcode: Opcode, arg: &Argument) -> Result<T, EncodeError> {
    let v = match arg {
        Argument::Int(v) | Argument::BoxedInt(v) => *v,
        Argument::Long(v) => v
            .to_i64()
            .ok_or_else(|| violation(opcode, format!("{} out of range", v)))?,
        other => return Err(mismatch(opcode, "int", other)),
    };
    T::try_from(v).map_err(|_| violation(opcode, format!("{} out of range", v)))
}

fn big(opcode: Opcode, arg: &Argument) -> Result<BigInt, EncodeError> {
    match arg {
        Argument::Long(v) => Ok(v.clone()),
        Argument::Int(v) | Argument::BoxedInt(v) => Ok(BigInt::from(*v)),
        other => Err(mismatch(opcode, "long", other)),
    }
}

fn bytes(opcode: Opcode, arg: &Argument) -> Result<&[u8], EncodeError> {
    arg.as_bytes().ok_or_else(|| mismatch(opcode, "bytes", arg))
}

fn check_code_points(opcode: Opcode, points: &[u32]) -> Result<(), EncodeError> {
    match points.iter().find(|&&cp| cp > MAX_CODE_POINT) {
        Some(cp) => Err(violation(opcode, format!("code point {:#x} out of range", cp))),
        None => Ok(()),
    }
}

// Wire helpers

fn write_line(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
    out.push(b'\n');
}

fn write_len_prefixed(out: &mut Vec<u8>, opcode: Opcode, data: &[u8]) -> Result<(), EncodeError> {
    let len = i32::try_from(data.len()).map_err(|_| {
        violation(
            opcode,
            format!("{} byte payload overflows four-byte length prefix", data.len()),
        )
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    Ok(())
}

/// Python's `repr(float)`: shortest round-trip digits, exponent form
/// outside `1e-4 <= |v| < 1e16`.
pub(crate) fn float_repr(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    // `{:e}` yields the shortest round-trip digits, e.g. "-1.5e16"
    let sci = format!("{:e}", v);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let (negative, mantissa) = match mantissa.strip_prefix('-') {
        Some(m) => (true, m),
        None => (false, mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let decpt = exp + 1;

    let mut out = String::with_capacity(digits.len() + 8);
    if negative {
        out.push('-');
    }
    if decpt <= -4 || decpt > 16 {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push_str(&format!("e{:+03}", exp));
    } else if decpt <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat('0').take((-decpt) as usize));
        out.push_str(&digits);
    } else if decpt as usize >= digits.len() {
        out.push_str(&digits);
        out.extend(std::iter::repeat('0').take(decpt as usize - digits.len()));
        out.push_str(".0");
    } else {
        let (int_part, frac_part) = digits.split_at(decpt as usize);
        out.push_str(int_part);
        out.push('.');
        out.push_str(frac_part);
    }
    out
}

/// Python 2 `repr(str)`: quoted, with backslash escapes for quotes,
/// control characters and non-ASCII bytes.
pub(crate) fn string_repr(data: &[u8]) -> Vec<u8> {
    let quote = if data.contains(&b'\'') && !data.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };

    let mut out = Vec::with_capacity(data.len() + 2);
    out.push(quote);
    for &c in data {
        match c {
            b'\\' => out.extend_from_slice(b"\\\\"),
            c if c == quote => {
                out.push(b'\\');
                out.push(c);
            }
            b'\t' => out.extend_from_slice(b"\\t"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            c if !(b' '..0x7f).contains(&c) => {
                out.extend_from_slice(format!("\\x{:02x}", c).as_bytes());
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// `UNICODE` payload: backslash and newline become `\u` escapes, then the
/// text is written as raw-unicode-escape (Latin-1 bytes below U+0100).
pub(crate) fn raw_unicode_escape(text: &str) -> Vec<u8> {
    escape_code_points(text.chars().map(u32::from))
}

/// [`raw_unicode_escape`] over bare code points; surrogates get `\u` escapes
/// like any other BMP code point.
pub(crate) fn escape_code_points(points: impl IntoIterator<Item = u32>) -> Vec<u8> {
    let mut out = Vec::new();
    for cp in points {
        match cp {
            0x5c => out.extend_from_slice(b"\\u005c"),
            0x0a => out.extend_from_slice(b"\\u000a"),
            _ if cp < 0x100 => out.push(cp as u8),
            _ if cp <= 0xffff => out.extend_from_slice(format!("\\u{:04x}", cp).as_bytes()),
            _ => out.extend_from_slice(format!("\\U{:08x}", cp).as_bytes()),
        }
    }
    out
}

/// UTF-8 as Python 2 writes it for unicode objects: a lone surrogate is
/// the three-byte sequence of its code point. Code points are written one
/// at a time, so a surrogate pair stays two sequences.
pub(crate) fn wide_utf8(points: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(points.len() * 3);
    for &cp in points {
        match char::from_u32(cp) {
            Some(ch) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
            None => out.extend_from_slice(&[
                0xe0 | (cp >> 12) as u8,
                0x80 | ((cp >> 6) & 0x3f) as u8,
                0x80 | (cp & 0x3f) as u8,
            ]),
        }
    }
    out
}
