//! Pickle opcode reader
//!
//! Splits a pickle into `(opcode, argument, offset)` events, the way
//! Python's `pickletools.genops` does. Iteration ends after `STOP`; reaching
//! the end of input first is an error.

use std::fmt;

use num_bigint::BigInt;

use super::argument::Argument;
use super::encoder::decode_long;
use super::error::DecodeError;
use super::opcode::Opcode;

const MAX_CODE_POINT: u32 = 0x10ffff;

/// One decoded opcode
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub opcode: Opcode,
    pub arg: Argument,
    /// Absolute position of the opcode byte in the input
    pub offset: usize,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.opcode.code();
        let shown = if code.is_ascii_graphic() {
            format!("'{}'", code as char)
        } else {
            format!("\\x{:02x}", code)
        };
        write!(f, "{:>6}: {:<6} {:<16}", self.offset, shown, self.opcode.name())?;
        if !self.arg.is_none() {
            write!(f, " {}", self.arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Stopped,
    Failed,
}

/// Iterator over the opcodes of one pickle
pub struct OpReader<'a> {
    data: &'a [u8],
    pos: usize,
    state: State,
}

impl<'a> OpReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0)
    }

    /// Start reading at `start`; offsets stay relative to `data`.
    pub fn at(data: &'a [u8], start: usize) -> Self {
        OpReader {
            data,
            pos: start,
            state: State::Running,
        }
    }

    /// Offset of the next unread byte
    pub fn position(&self) -> usize {
        self.pos
    }

    /// True once `STOP` has been read
    pub fn is_stopped(&self) -> bool {
        self.state == State::Stopped
    }

    fn read_event(&mut self) -> Result<Event, DecodeError> {
        let offset = self.pos;
        let code = self.read_u8()?;
        let opcode = Opcode::from_code(code).ok_or(DecodeError::UnknownOpcode { code, offset })?;
        let arg = self.read_argument(opcode)?;
        Ok(Event { opcode, arg, offset })
    }

    fn read_argument(&mut self, opcode: Opcode) -> Result<Argument, DecodeError> {
        use Opcode::*;

        let start = self.pos;
        let arg = match opcode {
            Mark | Stop | Pop | PopMark | Dup | None | BinPersId | Reduce | EmptyList | Append
            | Build | Dict | Appends | List | Obj | SetItem | Tuple | SetItems | EmptyDict
            | EmptyTuple | NewObj | Tuple1 | Tuple2 | Tuple3 | NewTrue | NewFalse => {
                Argument::None
            }

            Int => {
                let line = self.read_line()?;
                parse_decimal_int(line, start)?
            }
            Put | Get => {
                let line = self.read_line()?;
                let text = ascii(line, start)?;
                let index = text
                    .parse()
                    .map_err(|_| malformed(start, format!("bad memo index {:?}", text)))?;
                Argument::Int(index)
            }
            BinInt | LongBinPut | LongBinGet | Ext4 => Argument::Int(self.read_i32_le()? as i64),
            BinInt1 | BinPut | BinGet | Proto | Ext1 => Argument::Int(self.read_u8()? as i64),
            BinInt2 | Ext2 => Argument::Int(self.read_u16_le()? as i64),

            Long => {
                let line = self.read_line()?;
                let text = ascii(line, start)?;
                let digits = text.strip_suffix('L').unwrap_or(text);
                let v: BigInt = digits
                    .parse()
                    .map_err(|_| malformed(start, format!("bad long literal {:?}", text)))?;
                Argument::Long(v)
            }
            Long1 => {
                let len = self.read_u8()? as usize;
                Argument::Long(decode_long(self.read_exact(len)?))
            }
            Long4 => {
                let len = self.read_len_i32()?;
                Argument::Long(decode_long(self.read_exact(len)?))
            }

            Float => {
                let line = self.read_line()?;
                let text = ascii(line, start)?;
                Argument::Float(
                    text.parse()
                        .map_err(|_| malformed(start, format!("bad float literal {:?}", text)))?,
                )
            }
            BinFloat => {
                let raw = self.read_exact(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                Argument::Float(f64::from_be_bytes(buf))
            }

            String => {
                let line = self.read_line()?;
                Argument::Bytes(unquote_string(line, start)?)
            }
            BinString => {
                let len = self.read_len_i32()?;
                Argument::Bytes(self.read_exact(len)?.to_vec())
            }
            ShortBinString => {
                let len = self.read_u8()? as usize;
                Argument::Bytes(self.read_exact(len)?.to_vec())
            }
            Unicode => {
                let line = self.read_line()?;
                Argument::from_code_points(raw_unicode_unescape(line, start)?)
            }
            BinUnicode => {
                let len = self.read_u32_le()? as usize;
                let raw = self.read_exact(len)?;
                match std::str::from_utf8(raw) {
                    Ok(text) => Argument::Text(text.to_string()),
                    Err(_) => Argument::from_code_points(wide_utf8_decode(raw, start)?),
                }
            }

            Global | Inst => {
                let module = utf8(self.read_line()?, start)?;
                let name = utf8(self.read_line()?, start)?;
                Argument::Text(format!("{} {}", module, name))
            }
            PersId => Argument::Bytes(self.read_line()?.to_vec()),
        };
        Ok(arg)
    }

    // Helper functions for reading binary data

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let data = self.data;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or(DecodeError::UnexpectedEof { offset: self.pos })?;
        let slice = &data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        let raw = self.read_exact(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        let raw = self.read_exact(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_i32_le(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_u32_le()? as i32)
    }

    fn read_len_i32(&mut self) -> Result<usize, DecodeError> {
        let offset = self.pos;
        let len = self.read_i32_le()?;
        usize::try_from(len).map_err(|_| malformed(offset, format!("negative length {}", len)))
    }

    /// Bytes up to the next newline; the newline is consumed but not returned.
    fn read_line(&mut self) -> Result<&'a [u8], DecodeError> {
        let data = self.data;
        let rest = &data[self.pos.min(data.len())..];
        let len = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(DecodeError::UnexpectedEof { offset: data.len() })?;
        let line = &rest[..len];
        self.pos += len + 1;
        Ok(line)
    }
}

impl Iterator for OpReader<'_> {
    type Item = Result<Event, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != State::Running {
            return None;
        }
        if self.pos >= self.data.len() {
            self.state = State::Failed;
            return Some(Err(DecodeError::UnexpectedEof { offset: self.pos }));
        }
        match self.read_event() {
            Ok(event) => {
                if event.opcode == Opcode::Stop {
                    self.state = State::Stopped;
                }
                Some(Ok(event))
            }
            Err(err) => {
                self.state = State::Failed;
                Some(Err(err))
            }
        }
    }
}

impl std::iter::FusedIterator for OpReader<'_> {}

fn malformed(offset: usize, reason: impl Into<String>) -> DecodeError {
    DecodeError::MalformedInput {
        offset,
        reason: reason.into(),
    }
}

fn ascii(line: &[u8], offset: usize) -> Result<&str, DecodeError> {
    if !line.is_ascii() {
        return Err(malformed(offset, "non-ASCII bytes in decimal field"));
    }
    utf8(line, offset)
}

fn utf8(raw: &[u8], offset: usize) -> Result<&str, DecodeError> {
    std::str::from_utf8(raw).map_err(|_| malformed(offset, "invalid UTF-8"))
}

/// `INT` payload. A leading zero followed by more digits is the legacy
/// boolean-like spelling and is kept as [`Argument::BoxedInt`].
fn parse_decimal_int(line: &[u8], offset: usize) -> Result<Argument, DecodeError> {
    let text = ascii(line, offset)?;
    let bad = || malformed(offset, format!("bad int literal {:?}", text));

    if text.len() > 1 && text.starts_with('0') {
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Argument::BoxedInt(v));
        }
    }
    match text.parse::<i64>() {
        Ok(v) => Ok(Argument::Int(v)),
        Err(_) => text.parse::<BigInt>().map(Argument::Long).map_err(|_| bad()),
    }
}

/// `STRING` payload: a quoted Python string literal with backslash escapes.
fn unquote_string(line: &[u8], offset: usize) -> Result<Vec<u8>, DecodeError> {
    let quoted = matches!(
        line.first(),
        Some(&q @ (b'\'' | b'"')) if line.len() >= 2 && line[line.len() - 1] == q
    );
    if !quoted {
        return Err(malformed(offset, "STRING argument is not quoted"));
    }
    let inner = &line[1..line.len() - 1];

    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        let c = inner[i];
        i += 1;
        if c != b'\\' {
            out.push(c);
            continue;
        }
        let Some(&esc) = inner.get(i) else {
            return Err(malformed(offset, "trailing backslash in STRING"));
        };
        i += 1;
        match esc {
            b'\\' | b'\'' | b'"' => out.push(esc),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'x' => {
                let hex = inner
                    .get(i..i + 2)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| malformed(offset, "invalid \\x escape in STRING"))?;
                out.push(hex);
                i += 2;
            }
            b'0'..=b'7' => {
                let mut v = (esc - b'0') as u32;
                let mut digits = 1;
                while digits < 3 {
                    match inner.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            v = v * 8 + (d - b'0') as u32;
                            i += 1;
                            digits += 1;
                        }
                        _ => break,
                    }
                }
                out.push((v & 0xff) as u8);
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// `UNICODE` payload: raw-unicode-escape. Bytes map to U+0000..U+00FF;
/// `\uXXXX` and `\UXXXXXXXX` are escapes only after an odd run of backslashes.
/// Returns code points, since the escapes may name lone surrogates.
fn raw_unicode_unescape(line: &[u8], offset: usize) -> Result<Vec<u32>, DecodeError> {
    let mut out = Vec::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let c = line[i];
        if c != b'\\' {
            out.push(u32::from(c));
            i += 1;
            continue;
        }

        let run = line[i..].iter().take_while(|&&b| b == b'\\').count();
        let after = i + run;
        let width = match line.get(after) {
            Some(b'u') if run % 2 == 1 => 4,
            Some(b'U') if run % 2 == 1 => 8,
            _ => 0,
        };
        if width == 0 {
            out.extend(std::iter::repeat(u32::from(b'\\')).take(run));
            i = after;
            continue;
        }

        out.extend(std::iter::repeat(u32::from(b'\\')).take(run - 1));
        let cp = line
            .get(after + 1..after + 1 + width)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u32::from_str_radix(h, 16).ok())
            .filter(|&cp| cp <= MAX_CODE_POINT)
            .ok_or_else(|| malformed(offset, "invalid unicode escape in UNICODE"))?;
        out.push(cp);
        i = after + 1 + width;
    }
    Ok(out)
}

/// UTF-8 as Python 2 reads it: standard sequences plus the three-byte
/// forms of surrogate code points. Overlong forms stay invalid.
fn wide_utf8_decode(raw: &[u8], offset: usize) -> Result<Vec<u32>, DecodeError> {
    let invalid = || malformed(offset, "invalid UTF-8");
    let cont = |b: Option<&u8>| match b {
        Some(&b) if b & 0xc0 == 0x80 => Ok(u32::from(b & 0x3f)),
        _ => Err(invalid()),
    };

    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let lead = raw[i];
        let (cp, width) = match lead {
            0x00..=0x7f => (u32::from(lead), 1),
            0xc2..=0xdf => ((u32::from(lead & 0x1f) << 6) | cont(raw.get(i + 1))?, 2),
            0xe0..=0xef => {
                let cp = (u32::from(lead & 0x0f) << 12)
                    | (cont(raw.get(i + 1))? << 6)
                    | cont(raw.get(i + 2))?;
                if cp < 0x800 {
                    return Err(invalid());
                }
                (cp, 3)
            }
            0xf0..=0xf4 => {
                let cp = (u32::from(lead & 0x07) << 18)
                    | (cont(raw.get(i + 1))? << 12)
                    | (cont(raw.get(i + 2))? << 6)
                    | cont(raw.get(i + 3))?;
                if !(0x10000..=MAX_CODE_POINT).contains(&cp) {
                    return Err(invalid());
                }
                (cp, 4)
            }
            _ => return Err(invalid()),
        };
        out.push(cp);
        i += width;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn events(data: &[u8]) -> Vec<(Opcode, Argument)> {
        OpReader::new(data)
            .map(|ev| ev.map(|ev| (ev.opcode, ev.arg)))
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_protocol0_dict() {
        // pickle.dumps({'a': 1}, 0) under Python 2
        let data = b"(dp0\nS'a'\np1\nI1\ns.";
        assert_eq!(
            events(data),
            vec![
                (Opcode::Mark, Argument::None),
                (Opcode::Dict, Argument::None),
                (Opcode::Put, Argument::Int(0)),
                (Opcode::String, Argument::Bytes(b"a".to_vec())),
                (Opcode::Put, Argument::Int(1)),
                (Opcode::Int, Argument::Int(1)),
                (Opcode::SetItem, Argument::None),
                (Opcode::Stop, Argument::None),
            ]
        );
    }

    #[test]
    fn test_offsets_are_absolute() {
        let data = b"XXX\x80\x02K\x05.";
        let offsets: Vec<usize> = OpReader::at(data, 3).map(|ev| ev.unwrap().offset).collect();
        assert_eq!(offsets, vec![3, 5, 7]);
    }

    #[test]
    fn test_boxed_int() {
        assert_eq!(events(b"I01\n.")[0].1, Argument::BoxedInt(1));
        assert_eq!(events(b"I00\n.")[0].1, Argument::BoxedInt(0));
        assert_eq!(events(b"I0\n.")[0].1, Argument::Int(0));
        assert_eq!(events(b"I-7\n.")[0].1, Argument::Int(-7));
        assert_eq!(
            events(b"I99999999999999999999\n.")[0].1,
            Argument::Long("99999999999999999999".parse().unwrap())
        );
    }

    #[test]
    fn test_long_literal() {
        assert_eq!(events(b"L-12L\n.")[0].1, Argument::Long(BigInt::from(-12)));
        assert_eq!(events(b"L12\n.")[0].1, Argument::Long(BigInt::from(12)));
        assert_eq!(events(b"\x8a\x00.")[0].1, Argument::Long(BigInt::from(0)));
        assert_eq!(events(b"\x8a\x02\xff\x00.")[0].1, Argument::Long(BigInt::from(255)));
    }

    #[test]
    fn test_string_unescape() {
        assert_eq!(
            events(b"S'a\\nb\\\\c\\x00\\'\\101'\n.")[0].1,
            Argument::Bytes(b"a\nb\\c\x00'A".to_vec())
        );
        assert_eq!(events(b"S\"it's\"\n.")[0].1, Argument::Bytes(b"it's".to_vec()));
    }

    fn code_points(text: &str) -> Vec<u32> {
        text.chars().map(u32::from).collect()
    }

    #[test]
    fn test_unicode_unescape() {
        assert_eq!(
            events(b"Va\\u005cb\\u000a\xe9\\u20ac\n.")[0].1,
            Argument::from("a\\b\n\u{e9}\u{20ac}")
        );
        assert_eq!(
            raw_unicode_unescape(b"x\\\\u0041", 0).unwrap(),
            code_points("x\\\\u0041")
        );
        assert_eq!(raw_unicode_unescape(b"\\U0001f600", 0).unwrap(), vec![0x1f600]);
        assert!(raw_unicode_unescape(b"\\U00110000", 0).is_err());
        assert!(raw_unicode_unescape(b"\\u12", 0).is_err());
    }

    #[test]
    fn test_lone_surrogates_stay_wide() {
        assert_eq!(
            events(b"V\\ud800x\n.")[0].1,
            Argument::WideText(vec![0xd800, 0x78])
        );
        assert_eq!(
            events(b"X\x04\x00\x00\x00\xed\xb0\x80y.")[0].1,
            Argument::WideText(vec![0xdc00, 0x79])
        );
        // a surrogate pair written as two sequences is not recombined
        assert_eq!(
            wide_utf8_decode(b"\xed\xa0\xbd\xed\xb8\x80", 0).unwrap(),
            vec![0xd83d, 0xde00]
        );
    }

    #[test]
    fn test_invalid_utf8_in_binunicode() {
        for raw in [&b"\xff"[..], b"\xc0\x80", b"\xe0\x80\x80", b"\xed\xa0", b"\xf4\x90\x80\x80"] {
            assert_eq!(
                wide_utf8_decode(raw, 3),
                Err(DecodeError::MalformedInput {
                    offset: 3,
                    reason: "invalid UTF-8".to_string(),
                }),
                "{:?}",
                raw
            );
        }
    }

    #[test]
    fn test_global_pair() {
        assert_eq!(
            events(b"ccopy_reg\n_reconstructor\n.")[0],
            (Opcode::Global, Argument::from("copy_reg _reconstructor"))
        );
    }

    #[test]
    fn test_stops_after_stop() {
        let mut reader = OpReader::new(b"N.N.");
        assert_eq!(reader.next().unwrap().unwrap().opcode, Opcode::None);
        assert_eq!(reader.next().unwrap().unwrap().opcode, Opcode::Stop);
        assert!(reader.next().is_none());
        assert!(reader.is_stopped());
        assert_eq!(reader.position(), 2);
    }

    #[test]
    fn test_eof_before_stop() {
        let results: Vec<_> = OpReader::new(b"N").collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1], Err(DecodeError::UnexpectedEof { offset: 1 }));
    }

    #[test]
    fn test_truncated_argument() {
        let results: Vec<_> = OpReader::new(b"J\x01\x00").collect();
        assert_eq!(results, vec![Err(DecodeError::UnexpectedEof { offset: 1 })]);
    }

    #[test]
    fn test_unknown_opcode() {
        let results: Vec<_> = OpReader::new(b"N\xff.").collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1], Err(DecodeError::UnknownOpcode { code: 0xff, offset: 1 }));
    }

    #[test]
    fn test_event_display() {
        let event = Event {
            opcode: Opcode::BinInt1,
            arg: Argument::Int(5),
            offset: 2,
        };
        assert_eq!(event.to_string(), "     2: 'K'    BININT1          5");
    }
}
