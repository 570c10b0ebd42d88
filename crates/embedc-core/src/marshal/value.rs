//! Host-side values crossing the call boundary.

use std::fmt;

/// A value owned by the host program.
///
/// Only scalars, strings and flat sequences of scalars cross into native
/// code; everything else is carried as `Opaque` so automatic import can see
/// and skip it.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Mutable sequence; by-reference imports are written back.
    List(Vec<HostValue>),
    /// Immutable sequence; never written back.
    Tuple(Vec<HostValue>),
    /// Any other host object, described by its type name.
    Opaque(String),
}

impl HostValue {
    /// Host-facing kind name used in error messages.
    pub fn kind(&self) -> &str {
        match self {
            HostValue::None => "none",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Float(_) => "float",
            HostValue::Str(_) => "str",
            HostValue::List(_) => "list",
            HostValue::Tuple(_) => "tuple",
            HostValue::Opaque(name) => name,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            HostValue::Float(f) => Some(*f),
            HostValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::None => f.write_str("None"),
            HostValue::Bool(b) => write!(f, "{}", b),
            HostValue::Int(i) => write!(f, "{}", i),
            HostValue::Float(x) => write!(f, "{:?}", x),
            HostValue::Str(s) => write!(f, "{:?}", s),
            HostValue::List(items) => write_seq(f, "[", items, "]"),
            HostValue::Tuple(items) => write_seq(f, "(", items, ")"),
            HostValue::Opaque(name) => write!(f, "<{}>", name),
        }
    }
}

fn write_seq(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: &[HostValue],
    close: &str,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Bool(v)
    }
}

impl From<i64> for HostValue {
    fn from(v: i64) -> Self {
        HostValue::Int(v)
    }
}

impl From<i32> for HostValue {
    fn from(v: i32) -> Self {
        HostValue::Int(v.into())
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        HostValue::Float(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::Str(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::Str(v)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        HostValue::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(HostValue::from(3), HostValue::Int(3));
        assert_eq!(HostValue::from("hi"), HostValue::Str("hi".to_string()));
        assert_eq!(
            HostValue::from(vec![1.5, 2.0]),
            HostValue::List(vec![HostValue::Float(1.5), HostValue::Float(2.0)])
        );
    }

    #[test]
    fn test_kind_and_display() {
        assert_eq!(HostValue::Opaque("dict".to_string()).kind(), "dict");
        assert_eq!(HostValue::Tuple(vec![1.into(), 2.into()]).to_string(), "(1, 2)");
        assert_eq!(HostValue::List(vec![2.5.into()]).to_string(), "[2.5]");
        assert_eq!(HostValue::Int(4).as_float(), Some(4.0));
    }
}
