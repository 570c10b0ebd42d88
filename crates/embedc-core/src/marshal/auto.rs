//! Automatic import: bindings inferred from the runtime kinds of the
//! variables visible at the call site.
//!
//! | host value            | binding                  |
//! |-----------------------|--------------------------|
//! | `bool`                | `bool &name`             |
//! | `int`                 | `int64_t &name`          |
//! | `float`               | `double &name`           |
//! | `str`                 | `string &name`           |
//! | list of ints / empty  | `int64_t[] &name`        |
//! | list with a float     | `double[] &name`         |
//! | tuple                 | same element rules, by value |
//!
//! Everything else (None, opaque objects, nested or mixed sequences) is
//! skipped, as are names starting with `_` and names the generated code
//! cannot declare.

use crate::directive::{BindingMode, VariableBinding, is_identifier};
use crate::host::HostFrame;
use crate::types::{NativeType, ScalarType};

use super::HostValue;

/// C and C++ keywords that cannot be used as parameter names.
const RESERVED: &[&str] = &[
    "auto", "bool", "break", "case", "char", "class", "const", "continue", "default", "delete",
    "do", "double", "else", "enum", "extern", "false", "float", "for", "goto", "if", "inline",
    "int", "long", "namespace", "new", "operator", "private", "protected", "public", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "template",
    "this", "throw", "true", "try", "typedef", "typename", "union", "unsigned", "using",
    "virtual", "void", "volatile", "while", "NULL",
];

/// Bindings for every supported variable in `frame`, sorted by name.
pub fn infer_bindings(frame: &dyn HostFrame) -> Vec<VariableBinding> {
    let mut bindings: Vec<VariableBinding> = frame
        .variables()
        .into_iter()
        .filter(|(name, _)| is_importable_name(name))
        .filter_map(|(name, value)| {
            let binding = infer_binding(&name, &value);
            if binding.is_none() {
                tracing::trace!("Skipping `{}` ({}) in automatic import", name, value.kind());
            }
            binding
        })
        .collect();
    bindings.sort_by(|a, b| a.name.cmp(&b.name));
    bindings
}

/// The binding automatic import uses for one value, if any.
pub fn infer_binding(name: &str, value: &HostValue) -> Option<VariableBinding> {
    let (ty, mode) = match value {
        HostValue::Bool(_) => (NativeType::Scalar(ScalarType::Bool), BindingMode::ByReference),
        HostValue::Int(_) => (NativeType::Scalar(ScalarType::Int64), BindingMode::ByReference),
        HostValue::Float(_) => (NativeType::Scalar(ScalarType::Double), BindingMode::ByReference),
        // No C string can hold an interior NUL.
        HostValue::Str(s) if s.contains('\0') => return None,
        HostValue::Str(_) => (NativeType::Str, BindingMode::ByReference),
        HostValue::List(items) => {
            (NativeType::Array(element_type(items)?), BindingMode::ByReference)
        }
        HostValue::Tuple(items) => {
            (NativeType::Array(element_type(items)?), BindingMode::ByValue)
        }
        HostValue::None | HostValue::Opaque(_) => return None,
    };
    Some(VariableBinding::new(name, ty, mode))
}

fn element_type(items: &[HostValue]) -> Option<ScalarType> {
    let mut saw_float = false;
    for item in items {
        match item {
            HostValue::Int(_) => {}
            HostValue::Float(_) => saw_float = true,
            _ => return None,
        }
    }
    Some(if saw_float {
        ScalarType::Double
    } else {
        ScalarType::Int64
    })
}

fn is_importable_name(name: &str) -> bool {
    is_identifier(name)
        && !name.starts_with('_')
        && !name.starts_with("embedc_")
        && !RESERVED.contains(&name)
}
