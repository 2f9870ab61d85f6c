//! Opcode catalog
//!
//! The closed set of opcodes a protocol 0-2 pickle may contain. Each
//! variant's discriminant is its identifier byte on the wire.

use std::fmt;

use super::error::EncodeError;

/// Whether an opcode carries an argument payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    NoArgument,
    HasArgument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    // Stack and container construction (no argument)
    Mark = b'(',
    Stop = b'.',
    Pop = b'0',
    PopMark = b'1',
    Dup = b'2',
    None = b'N',
    BinPersId = b'Q',
    Reduce = b'R',
    EmptyList = b']',
    Append = b'a',
    Build = b'b',
    Dict = b'd',
    Appends = b'e',
    List = b'l',
    Obj = b'o',
    SetItem = b's',
    Tuple = b't',
    SetItems = b'u',
    EmptyDict = b'}',
    EmptyTuple = b')',
    NewObj = 0x81,
    Tuple1 = 0x85,
    Tuple2 = 0x86,
    Tuple3 = 0x87,
    NewTrue = 0x88,
    NewFalse = 0x89,

    // Integers
    Int = b'I',
    BinInt = b'J',
    BinInt1 = b'K',
    BinInt2 = b'M',
    Long = b'L',
    Long1 = 0x8a,
    Long4 = 0x8b,

    // Floats
    Float = b'F',
    BinFloat = b'G',

    // Byte and text strings
    String = b'S',
    BinString = b'T',
    ShortBinString = b'U',
    Unicode = b'V',
    BinUnicode = b'X',

    // Named references
    Global = b'c',
    Inst = b'i',
    PersId = b'P',

    // Memo
    Put = b'p',
    BinPut = b'q',
    LongBinPut = b'r',
    Get = b'g',
    BinGet = b'h',
    LongBinGet = b'j',

    // Protocol and extension registry
    Proto = 0x80,
    Ext1 = 0x82,
    Ext2 = 0x83,
    Ext4 = 0x84,
}

impl Opcode {
    /// Every opcode in the catalog, no-argument opcodes first.
    pub const ALL: [Opcode; 53] = [
        Opcode::Mark,
        Opcode::Stop,
        Opcode::Pop,
        Opcode::PopMark,
        Opcode::Dup,
        Opcode::None,
        Opcode::BinPersId,
        Opcode::Reduce,
        Opcode::EmptyList,
        Opcode::Append,
        Opcode::Build,
        Opcode::Dict,
        Opcode::Appends,
        Opcode::List,
        Opcode::Obj,
        Opcode::SetItem,
        Opcode::Tuple,
        Opcode::SetItems,
        Opcode::EmptyDict,
        Opcode::EmptyTuple,
        Opcode::NewObj,
        Opcode::Tuple1,
        Opcode::Tuple2,
        Opcode::Tuple3,
        Opcode::NewTrue,
        Opcode::NewFalse,
        Opcode::Int,
        Opcode::BinInt,
        Opcode::BinInt1,
        Opcode::BinInt2,
        Opcode::Long,
        Opcode::Long1,
        Opcode::Long4,
        Opcode::Float,
        Opcode::BinFloat,
        Opcode::String,
        Opcode::BinString,
        Opcode::ShortBinString,
        Opcode::Unicode,
        Opcode::BinUnicode,
        Opcode::Global,
        Opcode::Inst,
        Opcode::PersId,
        Opcode::Put,
        Opcode::BinPut,
        Opcode::LongBinPut,
        Opcode::Get,
        Opcode::BinGet,
        Opcode::LongBinGet,
        Opcode::Proto,
        Opcode::Ext1,
        Opcode::Ext2,
        Opcode::Ext4,
    ];

    /// Identifier byte as it appears on the wire
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Look up an identifier byte.
    pub const fn from_code(code: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match code {
            b'(' => Mark,
            b'.' => Stop,
            b'0' => Pop,
            b'1' => PopMark,
            b'2' => Dup,
            b'N' => None,
            b'Q' => BinPersId,
            b'R' => Reduce,
            b']' => EmptyList,
            b'a' => Append,
            b'b' => Build,
            b'd' => Dict,
            b'e' => Appends,
            b'l' => List,
            b'o' => Obj,
            b's' => SetItem,
            b't' => Tuple,
            b'u' => SetItems,
            b'}' => EmptyDict,
            b')' => EmptyTuple,
            0x81 => NewObj,
            0x85 => Tuple1,
            0x86 => Tuple2,
            0x87 => Tuple3,
            0x88 => NewTrue,
            0x89 => NewFalse,
            b'I' => Int,
            b'J' => BinInt,
            b'K' => BinInt1,
            b'M' => BinInt2,
            b'L' => Long,
            0x8a => Long1,
            0x8b => Long4,
            b'F' => Float,
            b'G' => BinFloat,
            b'S' => String,
            b'T' => BinString,
            b'U' => ShortBinString,
            b'V' => Unicode,
            b'X' => BinUnicode,
            b'c' => Global,
            b'i' => Inst,
            b'P' => PersId,
            b'p' => Put,
            b'q' => BinPut,
            b'r' => LongBinPut,
            b'g' => Get,
            b'h' => BinGet,
            b'j' => LongBinGet,
            0x80 => Proto,
            0x82 => Ext1,
            0x83 => Ext2,
            0x84 => Ext4,
            _ => return Option::None,
        })
    }

    pub const fn arity(self) -> Arity {
        use Opcode::*;
        match self {
            Mark | Stop | Pop | PopMark | Dup | None | BinPersId | Reduce | EmptyList
            | Append | Build | Dict | Appends | List | Obj | SetItem | Tuple | SetItems
            | EmptyDict | EmptyTuple | NewObj | Tuple1 | Tuple2 | Tuple3 | NewTrue
            | NewFalse => Arity::NoArgument,
            _ => Arity::HasArgument,
        }
    }

    #[inline]
    pub const fn has_argument(self) -> bool {
        matches!(self.arity(), Arity::HasArgument)
    }

    /// Lowest protocol that introduced this opcode.
    pub const fn protocol(self) -> u8 {
        use Opcode::*;
        match self {
            Mark | Stop | Pop | Dup | None | Reduce | Append | Build | Dict | List | Obj
            | SetItem | Tuple | Int | Long | Float | String | Unicode | Global | Inst
            | PersId | Put | Get => 0,
            NewObj | Tuple1 | Tuple2 | Tuple3 | NewTrue | NewFalse | Long1 | Long4 | Proto
            | Ext1 | Ext2 | Ext4 => 2,
            _ => 1,
        }
    }

    /// Name as printed by Python's `pickletools`.
    pub const fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Mark => "MARK",
            Stop => "STOP",
            Pop => "POP",
            PopMark => "POP_MARK",
            Dup => "DUP",
            None => "NONE",
            BinPersId => "BINPERSID",
            Reduce => "REDUCE",
            EmptyList => "EMPTY_LIST",
            Append => "APPEND",
            Build => "BUILD",
            Dict => "DICT",
            Appends => "APPENDS",
            List => "LIST",
            Obj => "OBJ",
            SetItem => "SETITEM",
            Tuple => "TUPLE",
            SetItems => "SETITEMS",
            EmptyDict => "EMPTY_DICT",
            EmptyTuple => "EMPTY_TUPLE",
            NewObj => "NEWOBJ",
            Tuple1 => "TUPLE1",
            Tuple2 => "TUPLE2",
            Tuple3 => "TUPLE3",
            NewTrue => "NEWTRUE",
            NewFalse => "NEWFALSE",
            Int => "INT",
            BinInt => "BININT",
            BinInt1 => "BININT1",
            BinInt2 => "BININT2",
            Long => "LONG",
            Long1 => "LONG1",
            Long4 => "LONG4",
            Float => "FLOAT",
            BinFloat => "BINFLOAT",
            String => "STRING",
            BinString => "BINSTRING",
            ShortBinString => "SHORT_BINSTRING",
            Unicode => "UNICODE",
            BinUnicode => "BINUNICODE",
            Global => "GLOBAL",
            Inst => "INST",
            PersId => "PERSID",
            Put => "PUT",
            BinPut => "BINPUT",
            LongBinPut => "LONG_BINPUT",
            Get => "GET",
            BinGet => "BINGET",
            LongBinGet => "LONG_BINGET",
            Proto => "PROTO",
            Ext1 => "EXT1",
            Ext2 => "EXT2",
            Ext4 => "EXT4",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = EncodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Opcode::from_code(code).ok_or(EncodeError::UnknownOpcode(code))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arity of a raw identifier byte.
pub fn classify(code: u8) -> Result<Arity, EncodeError> {
    Opcode::try_from(code).map(Opcode::arity)
}
