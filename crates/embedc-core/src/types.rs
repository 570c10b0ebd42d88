//! Native type table shared by the parser, generator and marshaler.
//!
//! Directive types are single tokens (`int`, `double[]`, `string`, `ulong`).
//! Each resolves once, at parse time, into a [`NativeType`]; nothing is
//! inferred from runtime values except in automatic import mode.

use std::fmt;
use std::mem::size_of;

/// A scalar C type that can cross the call boundary by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    Char,
    SignedChar,
    UnsignedChar,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Size,
    Float,
    Double,
}

/// In-memory representation of a scalar on the current target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repr {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Repr {
    pub fn is_float(self) -> bool {
        matches!(self, Repr::F32 | Repr::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Repr::I8 | Repr::I16 | Repr::I32 | Repr::I64)
    }

    /// Inclusive integer range representable by this repr.
    pub fn int_range(self) -> Option<(i128, i128)> {
        let range = match self {
            Repr::Bool => (0, 1),
            Repr::I8 => (i8::MIN as i128, i8::MAX as i128),
            Repr::U8 => (0, u8::MAX as i128),
            Repr::I16 => (i16::MIN as i128, i16::MAX as i128),
            Repr::U16 => (0, u16::MAX as i128),
            Repr::I32 => (i32::MIN as i128, i32::MAX as i128),
            Repr::U32 => (0, u32::MAX as i128),
            Repr::I64 => (i64::MIN as i128, i64::MAX as i128),
            Repr::U64 => (0, u64::MAX as i128),
            Repr::F32 | Repr::F64 => return None,
        };
        Some(range)
    }
}

impl ScalarType {
    /// Resolve a directive token to a scalar type.
    pub fn from_token(token: &str) -> Option<Self> {
        let ty = match token {
            "bool" => Self::Bool,
            "char" => Self::Char,
            "schar" => Self::SignedChar,
            "uchar" => Self::UnsignedChar,
            "short" => Self::Short,
            "ushort" => Self::UnsignedShort,
            "int" => Self::Int,
            "uint" | "unsigned" => Self::UnsignedInt,
            "long" => Self::Long,
            "ulong" => Self::UnsignedLong,
            "longlong" => Self::LongLong,
            "ulonglong" => Self::UnsignedLongLong,
            "int8_t" => Self::Int8,
            "int16_t" => Self::Int16,
            "int32_t" => Self::Int32,
            "int64_t" => Self::Int64,
            "uint8_t" => Self::UInt8,
            "uint16_t" => Self::UInt16,
            "uint32_t" => Self::UInt32,
            "uint64_t" => Self::UInt64,
            "size_t" => Self::Size,
            "float" => Self::Float,
            "double" => Self::Double,
            _ => return None,
        };
        Some(ty)
    }

    /// Spelling of this type in generated C.
    pub fn c_name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Char => "char",
            Self::SignedChar => "signed char",
            Self::UnsignedChar => "unsigned char",
            Self::Short => "short",
            Self::UnsignedShort => "unsigned short",
            Self::Int => "int",
            Self::UnsignedInt => "unsigned int",
            Self::Long => "long",
            Self::UnsignedLong => "unsigned long",
            Self::LongLong => "long long",
            Self::UnsignedLongLong => "unsigned long long",
            Self::Int8 => "int8_t",
            Self::Int16 => "int16_t",
            Self::Int32 => "int32_t",
            Self::Int64 => "int64_t",
            Self::UInt8 => "uint8_t",
            Self::UInt16 => "uint16_t",
            Self::UInt32 => "uint32_t",
            Self::UInt64 => "uint64_t",
            Self::Size => "size_t",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    /// Canonical directive token, used when re-rendering a binding.
    pub fn token(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Char => "char",
            Self::SignedChar => "schar",
            Self::UnsignedChar => "uchar",
            Self::Short => "short",
            Self::UnsignedShort => "ushort",
            Self::Int => "int",
            Self::UnsignedInt => "uint",
            Self::Long => "long",
            Self::UnsignedLong => "ulong",
            Self::LongLong => "longlong",
            Self::UnsignedLongLong => "ulonglong",
            Self::Int8 => "int8_t",
            Self::Int16 => "int16_t",
            Self::Int32 => "int32_t",
            Self::Int64 => "int64_t",
            Self::UInt8 => "uint8_t",
            Self::UInt16 => "uint16_t",
            Self::UInt32 => "uint32_t",
            Self::UInt64 => "uint64_t",
            Self::Size => "size_t",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    /// Representation on the current target.
    pub fn repr(self) -> Repr {
        match self {
            Self::Bool => Repr::Bool,
            // Plain `char` is signed on the mainstream desktop ABIs.
            Self::Char | Self::SignedChar | Self::Int8 => Repr::I8,
            Self::UnsignedChar | Self::UInt8 => Repr::U8,
            Self::Short | Self::Int16 => Repr::I16,
            Self::UnsignedShort | Self::UInt16 => Repr::U16,
            Self::Int | Self::Int32 => Repr::I32,
            Self::UnsignedInt | Self::UInt32 => Repr::U32,
            Self::LongLong | Self::Int64 => Repr::I64,
            Self::UnsignedLongLong | Self::UInt64 => Repr::U64,
            Self::Long => {
                if size_of::<libc::c_long>() == 8 {
                    Repr::I64
                } else {
                    Repr::I32
                }
            }
            Self::UnsignedLong => {
                if size_of::<libc::c_ulong>() == 8 {
                    Repr::U64
                } else {
                    Repr::U32
                }
            }
            Self::Size => {
                if size_of::<libc::size_t>() == 8 {
                    Repr::U64
                } else {
                    Repr::U32
                }
            }
            Self::Float => Repr::F32,
            Self::Double => Repr::F64,
        }
    }

    pub fn is_float(self) -> bool {
        self.repr().is_float()
    }
}

/// Type descriptor of a variable binding or callback signature element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Scalar(ScalarType),
    /// Fixed-length sequence, sized from the host value at call time.
    Array(ScalarType),
    Str,
    /// Only meaningful as a callback return type.
    Void,
}

impl NativeType {
    /// Resolve a directive type token (`int`, `double[]`, `string`, `str`).
    pub fn parse(token: &str) -> Option<Self> {
        if let Some(elem) = token.strip_suffix("[]") {
            return ScalarType::from_token(elem).map(NativeType::Array);
        }
        match token {
            "string" | "str" => Some(NativeType::Str),
            "void" => Some(NativeType::Void),
            other => ScalarType::from_token(other).map(NativeType::Scalar),
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, NativeType::Scalar(_))
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::Scalar(s) => f.write_str(s.token()),
            NativeType::Array(s) => write!(f, "{}[]", s.token()),
            NativeType::Str => f.write_str("string"),
            NativeType::Void => f.write_str("void"),
        }
    }
}
