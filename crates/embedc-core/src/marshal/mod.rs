//! Variable marshaling layer.
//!
//! Builds the wrapper's native argument list from a host frame, calls the
//! entry point through libffi, and writes by-reference values back.
//!
//! Argument order mirrors the generated parameter list: variable bindings
//! first (arrays and `&string` take two slots), then one function pointer
//! per DEF.
//!
//! Every conversion happens before native code runs, so a marshaling error
//! never leaves the host half-updated. Write-back runs only after a
//! successful call.

mod auto;
pub(crate) mod scalar;
mod value;

use std::ffi::{CStr, CString, c_char, c_void};

use libffi::middle::{Arg, Cif, CodePtr, Type};

use crate::compile::EntryPoint;
use crate::directive::{ImportMode, Manifest, VariableBinding};
use crate::error::{MarshalError, Result};
use crate::host::HostFrame;
use crate::proxy::{Proxy, ProxyState};
use crate::types::NativeType;

pub use auto::{infer_binding, infer_bindings};
pub use value::HostValue;

use scalar::{ArrayBuffer, ScalarCell, ffi_type, wider_than_word};

/// Options for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarshalOptions {
    /// Minimum buffer size handed out for `&string` imports.
    pub string_capacity: usize,
}

impl Default for MarshalOptions {
    fn default() -> Self {
        Self { string_capacity: 256 }
    }
}

/// The manifest a call is generated and marshaled with: the snippet's own
/// bindings plus, in automatic mode, everything inferred from `frame`.
pub fn resolve_manifest(manifest: &Manifest, frame: &dyn HostFrame) -> Manifest {
    if manifest.import_mode.imports_automatically() {
        let inferred = infer_bindings(frame);
        tracing::debug!(
            "Automatic import bound {} variable(s){}",
            inferred.len(),
            if manifest.import_mode == ImportMode::ExplicitWithAutomatic {
                " in addition to IMPORT lines"
            } else {
                ""
            }
        );
        manifest.with_imports(inferred)
    } else {
        manifest.clone()
    }
}

/// Native storage behind one variable binding.
enum Slot {
    Value(ScalarCell),
    Ref {
        binding: VariableBinding,
        cell: Box<ScalarCell>,
    },
    Array {
        binding: VariableBinding,
        buffer: ArrayBuffer,
    },
    Str(CString),
    StrRef {
        binding: VariableBinding,
        buffer: Vec<u8>,
    },
}

/// What libffi actually receives: a scalar by value, a pointer or a length.
enum Carrier {
    Scalar(ScalarCell),
    Ptr(*mut c_void),
    Size(usize),
}

impl Carrier {
    fn arg(&self) -> Arg {
        match self {
            Carrier::Scalar(cell) => cell.arg(),
            Carrier::Ptr(ptr) => Arg::new(ptr),
            Carrier::Size(n) => Arg::new(n),
        }
    }

    fn ffi_type(&self) -> Type {
        match self {
            Carrier::Scalar(cell) => ffi_type(cell_repr(cell)),
            Carrier::Ptr(_) => Type::pointer(),
            Carrier::Size(_) => Type::usize(),
        }
    }
}

fn cell_repr(cell: &ScalarCell) -> crate::types::Repr {
    use crate::types::Repr;
    match cell {
        ScalarCell::Bool(_) => Repr::Bool,
        ScalarCell::I8(_) => Repr::I8,
        ScalarCell::U8(_) => Repr::U8,
        ScalarCell::I16(_) => Repr::I16,
        ScalarCell::U16(_) => Repr::U16,
        ScalarCell::I32(_) => Repr::I32,
        ScalarCell::U32(_) => Repr::U32,
        ScalarCell::I64(_) => Repr::I64,
        ScalarCell::U64(_) => Repr::U64,
        ScalarCell::F32(_) => Repr::F32,
        ScalarCell::F64(_) => Repr::F64,
    }
}

/// Call a wrapper and apply write-back.
///
/// `manifest` must be the exact manifest the entry point was generated from.
pub fn call_entry(
    entry: &EntryPoint,
    manifest: &Manifest,
    frame: &mut dyn HostFrame,
    options: &MarshalOptions,
) -> Result<HostValue> {
    let mut slots = manifest
        .variables
        .iter()
        .map(|binding| build_slot(binding, &*frame, options))
        .collect::<std::result::Result<Vec<_>, MarshalError>>()?;

    let states = manifest
        .functions
        .iter()
        .map(|binding| {
            frame
                .function(&binding.name)
                .map(|function| ProxyState::new(binding.clone(), function))
                .ok_or_else(|| MarshalError::MissingFunction {
                    name: binding.name.clone(),
                })
        })
        .collect::<std::result::Result<Vec<_>, MarshalError>>()?;
    let proxies: Vec<Proxy<'_>> = states.iter().map(Proxy::new).collect();

    let mut carriers: Vec<Carrier> = Vec::new();
    for slot in &mut slots {
        push_carriers(slot, &mut carriers);
    }
    for proxy in &proxies {
        carriers.push(Carrier::Ptr(proxy.code_ptr() as *mut c_void));
    }

    let ret = manifest.return_type();
    let cif = Cif::new(
        carriers.iter().map(Carrier::ffi_type).collect::<Vec<_>>(),
        return_ffi_type(ret),
    );
    let args: Vec<Arg> = carriers.iter().map(Carrier::arg).collect();
    let code = CodePtr(entry.address() as *mut c_void);

    // SAFETY: the Cif mirrors the generated parameter list, and every
    // pointer in `carriers` refers to storage owned by `slots` or `proxies`,
    // both alive until after the call.
    let raw = unsafe { call_raw(&cif, code, &args, ret) };
    drop(args);

    for state in &states {
        if let Some(error) = state.take_failure() {
            return Err(error.into());
        }
    }

    let result = raw.into_host()?;
    for slot in &slots {
        write_back(slot, frame)?;
    }
    Ok(result)
}

fn build_slot(
    binding: &VariableBinding,
    frame: &dyn HostFrame,
    options: &MarshalOptions,
) -> std::result::Result<Slot, MarshalError> {
    let name = binding.name.as_str();
    let value = frame.read(name).ok_or_else(|| MarshalError::MissingVariable {
        name: name.to_string(),
    })?;
    let mismatch = |expected: &str| MarshalError::KindMismatch {
        name: name.to_string(),
        expected: expected.to_string(),
        found: value.kind().to_string(),
    };

    match binding.ty {
        NativeType::Scalar(s) => {
            let cell = ScalarCell::from_host(name, s, &value)?;
            if binding.is_by_ref() {
                Ok(Slot::Ref {
                    binding: binding.clone(),
                    cell: Box::new(cell),
                })
            } else {
                Ok(Slot::Value(cell))
            }
        }
        NativeType::Array(elem) => {
            let items = match &value {
                HostValue::List(items) => items,
                HostValue::Tuple(_) if binding.is_by_ref() => {
                    return Err(MarshalError::ImmutableTarget {
                        name: name.to_string(),
                    });
                }
                HostValue::Tuple(items) => items,
                _ => return Err(mismatch(&binding.ty.to_string())),
            };
            Ok(Slot::Array {
                binding: binding.clone(),
                buffer: ArrayBuffer::from_host(name, elem, items)?,
            })
        }
        NativeType::Str => {
            let text = value.as_str().ok_or_else(|| mismatch("string"))?;
            let owned = CString::new(text).map_err(|_| MarshalError::InteriorNul {
                name: name.to_string(),
            })?;
            if binding.is_by_ref() {
                let mut buffer = owned.into_bytes_with_nul();
                let capacity = buffer.len().max(options.string_capacity);
                buffer.resize(capacity, 0);
                Ok(Slot::StrRef {
                    binding: binding.clone(),
                    buffer,
                })
            } else {
                Ok(Slot::Str(owned))
            }
        }
        NativeType::Void => Err(mismatch("void")),
    }
}

fn push_carriers(slot: &mut Slot, carriers: &mut Vec<Carrier>) {
    match slot {
        Slot::Value(cell) => carriers.push(Carrier::Scalar(*cell)),
        Slot::Ref { cell, .. } => carriers.push(Carrier::Ptr(cell.as_mut_ptr())),
        Slot::Array { buffer, .. } => {
            carriers.push(Carrier::Ptr(buffer.as_mut_ptr()));
            carriers.push(Carrier::Size(buffer.len()));
        }
        Slot::Str(text) => carriers.push(Carrier::Ptr(text.as_ptr() as *mut c_void)),
        Slot::StrRef { buffer, .. } => {
            carriers.push(Carrier::Ptr(buffer.as_mut_ptr() as *mut c_void));
            carriers.push(Carrier::Size(buffer.len()));
        }
    }
}

fn write_back(slot: &Slot, frame: &mut dyn HostFrame) -> Result<()> {
    let (name, value) = match slot {
        Slot::Ref { binding, cell } => (&binding.name, cell.to_host(&binding.name)?),
        Slot::Array { binding, buffer } if binding.is_by_ref() => {
            (&binding.name, HostValue::List(buffer.to_host(&binding.name)?))
        }
        Slot::StrRef { binding, buffer } => {
            let end = buffer.iter().position(|b| *b == 0).unwrap_or(buffer.len());
            (
                &binding.name,
                HostValue::Str(String::from_utf8_lossy(&buffer[..end]).into_owned()),
            )
        }
        Slot::Value(_) | Slot::Array { .. } | Slot::Str(_) => return Ok(()),
    };
    frame.write(name, value).map_err(|reason| {
        MarshalError::WriteBack {
            name: name.clone(),
            reason,
        }
        .into()
    })
}

fn return_ffi_type(ret: NativeType) -> Type {
    match ret {
        NativeType::Scalar(s) => ffi_type(s.repr()),
        NativeType::Str => Type::pointer(),
        NativeType::Array(_) | NativeType::Void => Type::void(),
    }
}

/// Raw wrapper result, converted once the call is known to have succeeded.
enum RawReturn {
    Scalar(ScalarCell),
    Str(Option<String>),
    Void,
}

impl RawReturn {
    fn into_host(self) -> Result<HostValue> {
        Ok(match self {
            RawReturn::Scalar(cell) => cell.to_host("return value")?,
            RawReturn::Str(Some(s)) => HostValue::Str(s),
            RawReturn::Str(None) | RawReturn::Void => HostValue::None,
        })
    }
}

/// # Safety
/// `cif` must describe the function at `code` and `args` must match it.
unsafe fn call_raw(cif: &Cif, code: CodePtr, args: &[Arg], ret: NativeType) -> RawReturn {
    unsafe {
        match ret {
            NativeType::Scalar(s) => {
                let repr = s.repr();
                let cell = match repr {
                    crate::types::Repr::F32 => ScalarCell::F32(cif.call::<f32>(code, args)),
                    crate::types::Repr::F64 => ScalarCell::F64(cif.call::<f64>(code, args)),
                    // libffi widens narrow integer results to a full register.
                    _ if wider_than_word(repr) => {
                        ScalarCell::from_bits(repr, cif.call::<u64>(code, args))
                    }
                    _ => ScalarCell::from_bits(repr, cif.call::<usize>(code, args) as u64),
                };
                RawReturn::Scalar(cell)
            }
            NativeType::Str => {
                let ptr = cif.call::<*const c_char>(code, args);
                if ptr.is_null() {
                    RawReturn::Str(None)
                } else {
                    RawReturn::Str(Some(CStr::from_ptr(ptr).to_string_lossy().into_owned()))
                }
            }
            NativeType::Array(_) | NativeType::Void => {
                cif.call::<()>(code, args);
                RawReturn::Void
            }
        }
    }
}
