//! Host-side values passed to and returned from sends.

use crate::abi::StructValue;
use crate::error::{Error, Result};
use crate::proxy::{Peerable, Proxy};
use crate::runtime::Handle;

/// A message argument or result.
///
/// With coercion enabled, host values such as [`Value::Text`] are turned
/// into native objects on the way in and native results are turned back
/// into host values on the way out. With coercion disabled every argument
/// must already be native-compatible and results come back as
/// [`Value::Pointer`] (or [`Value::Float`] for floating-point returns).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// nil, NULL, or no value (void).
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    /// A raw native address.
    Pointer(Handle),
    /// A managed wrapper around a native object.
    Proxy(Proxy),
    /// A C structure passed by value.
    Struct(StructValue),
}

impl Value {
    /// Name of the variant, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Pointer(_) => "pointer",
            Value::Proxy(_) => "proxy",
            Value::Struct(_) => "struct",
        }
    }

    /// Returns true for [`Value::Null`] and the nil pointer.
    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Pointer(h) => h.is_null(),
            _ => false,
        }
    }

    /// The native handle carried by a pointer or proxy.
    #[must_use]
    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            Value::Pointer(h) => Some(*h),
            Value::Proxy(p) => Some(p.peer()),
            Value::Null => Some(Handle::NULL),
            _ => None,
        }
    }

    /// The text of a [`Value::Text`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::TypeMismatch {
            expected,
            found: self.kind().to_string(),
        }
    }

    /// Converts a result to a native address.
    ///
    /// Accepts pointers, proxies, null and integers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for any other shape.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn to_pointer(&self) -> Result<Handle> {
        match self {
            Value::Pointer(h) => Ok(*h),
            Value::Proxy(p) => Ok(p.peer()),
            Value::Null => Ok(Handle::NULL),
            Value::Int(v) => Ok(Handle::from_raw(*v as usize)),
            Value::UInt(v) => Ok(Handle::from_raw(*v as usize)),
            _ => Err(self.mismatch("pointer")),
        }
    }

    /// Converts a result to a boolean: non-zero is true.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for non-numeric shapes.
    pub fn to_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(v) => Ok(*v != 0),
            Value::UInt(v) => Ok(*v != 0),
            Value::Pointer(h) => Ok(!h.is_null()),
            Value::Null => Ok(false),
            _ => Err(self.mismatch("bool")),
        }
    }

    /// Converts a result to a signed integer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for non-integer shapes.
    #[allow(clippy::cast_possible_wrap)]
    pub fn to_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::UInt(v) => Ok(*v as i64),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Pointer(h) => Ok(h.addr() as i64),
            Value::Null => Ok(0),
            _ => Err(self.mismatch("int")),
        }
    }

    /// Converts a result to a double.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for non-numeric shapes.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_double(&self) -> Result<f64> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            Value::UInt(v) => Ok(*v as f64),
            _ => Err(self.mismatch("double")),
        }
    }

    /// Converts a result to a string; null becomes `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for anything but text and null.
    pub fn into_string(self) -> Result<Option<String>> {
        match self {
            Value::Text(s) => Ok(Some(s)),
            Value::Null => Ok(None),
            other => Err(other.mismatch("string")),
        }
    }

    /// Unwraps a proxy result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for anything but a proxy.
    pub fn into_proxy(self) -> Result<Proxy> {
        match self {
            Value::Proxy(p) => Ok(p),
            other => Err(other.mismatch("proxy")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Handle> for Value {
    fn from(v: Handle) -> Self {
        Value::Pointer(v)
    }
}

impl From<Proxy> for Value {
    fn from(v: Proxy) -> Self {
        Value::Proxy(v)
    }
}

impl From<&Proxy> for Value {
    fn from(v: &Proxy) -> Self {
        Value::Proxy(v.clone())
    }
}

impl From<StructValue> for Value {
    fn from(v: StructValue) -> Self {
        Value::Struct(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_conversions() {
        assert_eq!(Value::Int(1).to_bool(), Ok(true));
        assert_eq!(Value::UInt(0).to_bool(), Ok(false));
        assert_eq!(Value::Bool(true).to_int(), Ok(1));
        assert_eq!(Value::Int(3).to_double(), Ok(3.0));
        assert_eq!(Value::Null.to_pointer(), Ok(Handle::NULL));
        assert_eq!(
            Value::UInt(0x40).to_pointer(),
            Ok(Handle::from_raw(0x40))
        );
        assert_eq!(Value::Null.into_string(), Ok(None));
        assert_eq!(Value::from("x").into_string(), Ok(Some("x".into())));
    }

    #[test]
    fn test_mismatches() {
        assert_eq!(
            Value::Text("a".into()).to_int(),
            Err(Error::TypeMismatch {
                expected: "int",
                found: "text".into()
            })
        );
        assert!(Value::Float(1.0).to_pointer().is_err());
        assert!(Value::Int(1).into_string().is_err());
        assert!(Value::Null.into_proxy().is_err());
        assert!(Value::Pointer(Handle::from_raw(8)).to_double().is_err());
    }

    #[test]
    fn test_from_impls() {
        assert_eq!(Value::from(5i32), Value::Int(5));
        assert_eq!(Value::from(5usize), Value::UInt(5));
        assert_eq!(Value::from(None::<&str>), Value::Null);
        assert_eq!(Value::from(Some(2.0f64)), Value::Float(2.0));
        assert!(Value::Pointer(Handle::NULL).is_null());
        assert!(!Value::Int(0).is_null());
    }
}
