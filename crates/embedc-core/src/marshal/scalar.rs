//! Typed native storage for scalars and arrays.

use std::ffi::c_void;
use std::mem::size_of;

use libffi::middle::{Arg, Type};

use crate::error::MarshalError;
use crate::types::{Repr, ScalarType};

use super::HostValue;

/// One native scalar, stored with its exact C representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ScalarCell {
    Bool(u8),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl ScalarCell {
    /// Convert a host value to `ty`.
    ///
    /// Integers are range checked, never truncated. Ints widen to floats and
    /// bools count as integers; nothing else converts.
    pub(crate) fn from_host(
        name: &str,
        ty: ScalarType,
        value: &HostValue,
    ) -> Result<Self, MarshalError> {
        let repr = ty.repr();
        let mismatch = || MarshalError::KindMismatch {
            name: name.to_string(),
            expected: ty.token().to_string(),
            found: value.kind().to_string(),
        };

        if repr.is_float() {
            let x = match value {
                HostValue::Float(x) => *x,
                HostValue::Int(i) => *i as f64,
                _ => return Err(mismatch()),
            };
            return Ok(match repr {
                Repr::F32 => ScalarCell::F32(x as f32),
                _ => ScalarCell::F64(x),
            });
        }

        let int: i128 = match value {
            HostValue::Int(i) => (*i).into(),
            HostValue::Bool(b) => (*b).into(),
            _ => return Err(mismatch()),
        };
        let (min, max) = repr.int_range().ok_or_else(mismatch)?;
        if int < min || int > max {
            return Err(MarshalError::OutOfRange {
                name: name.to_string(),
                value: int.to_string(),
                ty: ty.token().to_string(),
            });
        }
        Ok(Self::from_bits(repr, int as u64))
    }

    /// Rebuild a cell from the low bits of a register-sized value.
    pub(crate) fn from_bits(repr: Repr, bits: u64) -> Self {
        match repr {
            Repr::Bool => ScalarCell::Bool((bits as u8 != 0) as u8),
            Repr::I8 => ScalarCell::I8(bits as i8),
            Repr::U8 => ScalarCell::U8(bits as u8),
            Repr::I16 => ScalarCell::I16(bits as i16),
            Repr::U16 => ScalarCell::U16(bits as u16),
            Repr::I32 => ScalarCell::I32(bits as i32),
            Repr::U32 => ScalarCell::U32(bits as u32),
            Repr::I64 => ScalarCell::I64(bits as i64),
            Repr::U64 => ScalarCell::U64(bits),
            Repr::F32 => ScalarCell::F32(f32::from_bits(bits as u32)),
            Repr::F64 => ScalarCell::F64(f64::from_bits(bits)),
        }
    }

    /// Zero of the given representation.
    pub(crate) fn zero(repr: Repr) -> Self {
        Self::from_bits(repr, 0)
    }

    /// Read a cell from native memory.
    ///
    /// # Safety
    /// `ptr` must point to a valid value of `repr`.
    pub(crate) unsafe fn read(repr: Repr, ptr: *const c_void) -> Self {
        unsafe {
            match repr {
                Repr::Bool => ScalarCell::Bool((*(ptr as *const u8) != 0) as u8),
                Repr::I8 => ScalarCell::I8(*(ptr as *const i8)),
                Repr::U8 => ScalarCell::U8(*(ptr as *const u8)),
                Repr::I16 => ScalarCell::I16(*(ptr as *const i16)),
                Repr::U16 => ScalarCell::U16(*(ptr as *const u16)),
                Repr::I32 => ScalarCell::I32(*(ptr as *const i32)),
                Repr::U32 => ScalarCell::U32(*(ptr as *const u32)),
                Repr::I64 => ScalarCell::I64(*(ptr as *const i64)),
                Repr::U64 => ScalarCell::U64(*(ptr as *const u64)),
                Repr::F32 => ScalarCell::F32(*(ptr as *const f32)),
                Repr::F64 => ScalarCell::F64(*(ptr as *const f64)),
            }
        }
    }

    /// Back to a host value.
    pub(crate) fn to_host(self, name: &str) -> Result<HostValue, MarshalError> {
        Ok(match self {
            ScalarCell::Bool(v) => HostValue::Bool(v != 0),
            ScalarCell::I8(v) => HostValue::Int(v.into()),
            ScalarCell::U8(v) => HostValue::Int(v.into()),
            ScalarCell::I16(v) => HostValue::Int(v.into()),
            ScalarCell::U16(v) => HostValue::Int(v.into()),
            ScalarCell::I32(v) => HostValue::Int(v.into()),
            ScalarCell::U32(v) => HostValue::Int(v.into()),
            ScalarCell::I64(v) => HostValue::Int(v),
            ScalarCell::U64(v) => {
                let v = i64::try_from(v).map_err(|_| MarshalError::OutOfRange {
                    name: name.to_string(),
                    value: v.to_string(),
                    ty: "int".to_string(),
                })?;
                HostValue::Int(v)
            }
            ScalarCell::F32(v) => HostValue::Float(v.into()),
            ScalarCell::F64(v) => HostValue::Float(v),
        })
    }

    /// libffi argument pointing at this cell's payload.
    pub(crate) fn arg(&self) -> Arg {
        match self {
            ScalarCell::Bool(v) | ScalarCell::U8(v) => Arg::new(v),
            ScalarCell::I8(v) => Arg::new(v),
            ScalarCell::I16(v) => Arg::new(v),
            ScalarCell::U16(v) => Arg::new(v),
            ScalarCell::I32(v) => Arg::new(v),
            ScalarCell::U32(v) => Arg::new(v),
            ScalarCell::I64(v) => Arg::new(v),
            ScalarCell::U64(v) => Arg::new(v),
            ScalarCell::F32(v) => Arg::new(v),
            ScalarCell::F64(v) => Arg::new(v),
        }
    }

    /// Address of the payload, for by-reference parameters.
    pub(crate) fn as_mut_ptr(&mut self) -> *mut c_void {
        match self {
            ScalarCell::Bool(v) | ScalarCell::U8(v) => v as *mut u8 as *mut c_void,
            ScalarCell::I8(v) => v as *mut i8 as *mut c_void,
            ScalarCell::I16(v) => v as *mut i16 as *mut c_void,
            ScalarCell::U16(v) => v as *mut u16 as *mut c_void,
            ScalarCell::I32(v) => v as *mut i32 as *mut c_void,
            ScalarCell::U32(v) => v as *mut u32 as *mut c_void,
            ScalarCell::I64(v) => v as *mut i64 as *mut c_void,
            ScalarCell::U64(v) => v as *mut u64 as *mut c_void,
            ScalarCell::F32(v) => v as *mut f32 as *mut c_void,
            ScalarCell::F64(v) => v as *mut f64 as *mut c_void,
        }
    }

    /// Store this cell into a libffi return slot.
    ///
    /// Integers narrower than a register are widened the way libffi expects
    /// (`ffi_arg`/`ffi_sarg`).
    ///
    /// # Safety
    /// `slot` must be a libffi closure result buffer for this cell's type.
    pub(crate) unsafe fn store_result(self, slot: *mut c_void) {
        unsafe {
            match self {
                ScalarCell::F32(v) => *(slot as *mut f32) = v,
                ScalarCell::F64(v) => *(slot as *mut f64) = v,
                ScalarCell::I64(v) if size_of::<usize>() < 8 => *(slot as *mut i64) = v,
                ScalarCell::U64(v) if size_of::<usize>() < 8 => *(slot as *mut u64) = v,
                signed @ (ScalarCell::I8(_)
                | ScalarCell::I16(_)
                | ScalarCell::I32(_)
                | ScalarCell::I64(_)) => {
                    *(slot as *mut isize) = signed.as_i64() as isize
                }
                unsigned => *(slot as *mut usize) = unsigned.as_u64() as usize,
            }
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            ScalarCell::I8(v) => v.into(),
            ScalarCell::I16(v) => v.into(),
            ScalarCell::I32(v) => v.into(),
            ScalarCell::I64(v) => v,
            other => other.as_u64() as i64,
        }
    }

    fn as_u64(self) -> u64 {
        match self {
            ScalarCell::Bool(v) | ScalarCell::U8(v) => v.into(),
            ScalarCell::U16(v) => v.into(),
            ScalarCell::U32(v) => v.into(),
            ScalarCell::U64(v) => v,
            ScalarCell::F32(v) => v.to_bits().into(),
            ScalarCell::F64(v) => v.to_bits(),
            signed => signed.as_i64() as u64,
        }
    }
}

/// libffi type of a representation.
pub(crate) fn ffi_type(repr: Repr) -> Type {
    match repr {
        Repr::Bool | Repr::U8 => Type::u8(),
        Repr::I8 => Type::i8(),
        Repr::I16 => Type::i16(),
        Repr::U16 => Type::u16(),
        Repr::I32 => Type::i32(),
        Repr::U32 => Type::u32(),
        Repr::I64 => Type::i64(),
        Repr::U64 => Type::u64(),
        Repr::F32 => Type::f32(),
        Repr::F64 => Type::f64(),
    }
}

/// Whether an integer return of `repr` must be read as a full 64-bit value
/// rather than a register word.
pub(crate) fn wider_than_word(repr: Repr) -> bool {
    matches!(repr, Repr::I64 | Repr::U64) && size_of::<usize>() < 8
}

macro_rules! array_buffer {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Contiguous element storage for an array parameter.
        #[derive(Debug, Clone, PartialEq)]
        pub(crate) enum ArrayBuffer {
            $($variant(Vec<$ty>),)*
        }

        impl ArrayBuffer {
            fn with_capacity(repr: Repr, len: usize) -> Self {
                match repr {
                    $(Repr::$variant => ArrayBuffer::$variant(Vec::with_capacity(len)),)*
                }
            }

            fn push(&mut self, cell: ScalarCell) {
                match (self, cell) {
                    $((ArrayBuffer::$variant(items), ScalarCell::$variant(v)) => items.push(v),)*
                    // Cells are always built for the buffer's own repr.
                    _ => {}
                }
            }

            pub(crate) fn len(&self) -> usize {
                match self {
                    $(ArrayBuffer::$variant(items) => items.len(),)*
                }
            }

            pub(crate) fn as_mut_ptr(&mut self) -> *mut c_void {
                match self {
                    $(ArrayBuffer::$variant(items) => items.as_mut_ptr() as *mut c_void,)*
                }
            }

            fn cells(&self) -> Vec<ScalarCell> {
                match self {
                    $(ArrayBuffer::$variant(items) => {
                        items.iter().map(|v| ScalarCell::$variant(*v)).collect()
                    })*
                }
            }
        }
    };
}

array_buffer!(
    Bool(u8),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
);

impl ArrayBuffer {
    /// Convert every element of a host sequence.
    pub(crate) fn from_host(
        name: &str,
        elem: ScalarType,
        items: &[HostValue],
    ) -> Result<Self, MarshalError> {
        let mut buffer = Self::with_capacity(elem.repr(), items.len());
        for (i, item) in items.iter().enumerate() {
            let cell = ScalarCell::from_host(&format!("{}[{}]", name, i), elem, item)?;
            buffer.push(cell);
        }
        Ok(buffer)
    }

    /// Elements as host values.
    pub(crate) fn to_host(&self, name: &str) -> Result<Vec<HostValue>, MarshalError> {
        self.cells()
            .into_iter()
            .enumerate()
            .map(|(i, cell)| cell.to_host(&format!("{}[{}]", name, i)))
            .collect()
    }
}
