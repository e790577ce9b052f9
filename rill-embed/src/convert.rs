// rill-embed - Type conversion between Rust and Rill values
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Value marshaling across the host boundary.
//!
//! This module provides the [`IntoRill`] and [`FromRill`] traits for
//! converting between Rust types and [`Value`].
//!
//! # Built-in Conversions
//!
//! | Rust type | Rill kind |
//! |-----------|-----------|
//! | `()` | `null` |
//! | `bool` | `boolean` |
//! | integer and float types | `number` (64-bit float, lossy for large integers) |
//! | `String`, `&str` | `string` |
//! | `Vec<T>` | `array` |
//! | `HashMap<String, T>`, `IndexMap<String, T>` | `object` |
//! | `Option<T>` | `T` or `null` |
//!
//! Marshaling a host value in and back out is the identity for null,
//! booleans, numbers, strings and recursive arrays/objects (modulo float
//! precision on large integers).
//!
//! # Example
//!
//! ```
//! use rill_embed::{from_value, to_value};
//!
//! let v = to_value(vec![1.0_f64, 2.0, 3.0]);
//! let back: Vec<f64> = from_value(&v).unwrap();
//! assert_eq!(back, vec![1.0, 2.0, 3.0]);
//! ```

use std::collections::HashMap;

use indexmap::IndexMap;
use rill_vm::Value;

use crate::error::{EmbedError, Result};

/// Convert a Rust value into a Rill [`Value`].
pub trait IntoRill {
    fn into_rill(self) -> Value;
}

/// Convert a Rill [`Value`] into a Rust value.
pub trait FromRill: Sized {
    fn from_rill(value: &Value) -> Result<Self>;
}

/// Options controlling host-to-script marshaling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarshalOptions {
    /// Flag marshaled containers read-only, recursively, so script code
    /// cannot mutate the result.
    pub read_only: bool,
}

/// Convert a Rust value into a Rill value.
#[must_use]
pub fn to_value<T: IntoRill>(value: T) -> Value {
    value.into_rill()
}

/// Convert a Rust value into a Rill value under the given options.
#[must_use]
pub fn to_value_options<T: IntoRill>(value: T, options: MarshalOptions) -> Value {
    let converted = value.into_rill();
    if options.read_only {
        converted.mark_read_only();
    }
    converted
}

/// Shortcut for [`to_value_options`] with `read_only` set.
#[must_use]
pub fn to_value_read_only<T: IntoRill>(value: T) -> Value {
    to_value_options(value, MarshalOptions { read_only: true })
}

/// Convert a Rill value into a Rust value.
pub fn from_value<T: FromRill>(value: &Value) -> Result<T> {
    T::from_rill(value)
}

fn type_mismatch<T>(expected: &str, got: &Value) -> Result<T> {
    Err(EmbedError::Convert(format!(
        "expected {expected}, got {}",
        got.type_name()
    )))
}

// ============================================================================
// IntoRill implementations
// ============================================================================

impl IntoRill for Value {
    fn into_rill(self) -> Value {
        self
    }
}

impl IntoRill for () {
    fn into_rill(self) -> Value {
        Value::Null
    }
}

impl IntoRill for bool {
    fn into_rill(self) -> Value {
        Value::Bool(self)
    }
}

impl IntoRill for f64 {
    fn into_rill(self) -> Value {
        Value::Number(self)
    }
}

impl IntoRill for f32 {
    fn into_rill(self) -> Value {
        Value::Number(self as f64)
    }
}

macro_rules! impl_into_rill_int {
    ($($ty:ty),*) => {
        $(impl IntoRill for $ty {
            fn into_rill(self) -> Value {
                Value::Number(self as f64)
            }
        })*
    };
}

impl_into_rill_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl IntoRill for String {
    fn into_rill(self) -> Value {
        Value::string(self.as_str())
    }
}

impl IntoRill for &str {
    fn into_rill(self) -> Value {
        Value::string(self)
    }
}

impl<T: IntoRill> IntoRill for Vec<T> {
    fn into_rill(self) -> Value {
        Value::array(self.into_iter().map(IntoRill::into_rill).collect())
    }
}

impl<T: IntoRill> IntoRill for Option<T> {
    fn into_rill(self) -> Value {
        match self {
            Some(value) => value.into_rill(),
            None => Value::Null,
        }
    }
}

impl<T: IntoRill> IntoRill for HashMap<String, T> {
    fn into_rill(self) -> Value {
        let mut fields: Vec<(String, Value)> = self
            .into_iter()
            .map(|(k, v)| (k, v.into_rill()))
            .collect();
        // HashMap order is arbitrary; sort so the object's insertion order
        // is reproducible.
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        Value::object(fields.into_iter().collect())
    }
}

impl<T: IntoRill> IntoRill for IndexMap<String, T> {
    fn into_rill(self) -> Value {
        Value::object(self.into_iter().map(|(k, v)| (k, v.into_rill())).collect())
    }
}

// ============================================================================
// FromRill implementations
// ============================================================================

impl FromRill for Value {
    fn from_rill(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromRill for () {
    fn from_rill(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(()),
            other => type_mismatch("null", other),
        }
    }
}

impl FromRill for bool {
    fn from_rill(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => type_mismatch("boolean", other),
        }
    }
}

impl FromRill for f64 {
    fn from_rill(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => Ok(*n),
            other => type_mismatch("number", other),
        }
    }
}

impl FromRill for i64 {
    fn from_rill(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => Ok(*n as i64),
            other => type_mismatch("number", other),
        }
    }
}

impl FromRill for String {
    fn from_rill(value: &Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => type_mismatch("string", other),
        }
    }
}

impl<T: FromRill> FromRill for Vec<T> {
    fn from_rill(value: &Value) -> Result<Self> {
        match value {
            Value::Array(array) => array
                .elements
                .borrow()
                .iter()
                .map(T::from_rill)
                .collect(),
            other => type_mismatch("array", other),
        }
    }
}

impl<T: FromRill> FromRill for Option<T> {
    fn from_rill(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_rill(other).map(Some),
        }
    }
}

impl<T: FromRill> FromRill for HashMap<String, T> {
    fn from_rill(value: &Value) -> Result<Self> {
        match value {
            Value::Object(object) => object
                .fields
                .borrow()
                .iter()
                .map(|(k, v)| Ok((k.clone(), T::from_rill(v)?)))
                .collect(),
            other => type_mismatch("object", other),
        }
    }
}

impl<T: FromRill> FromRill for IndexMap<String, T> {
    fn from_rill(value: &Value) -> Result<Self> {
        match value {
            Value::Object(object) => object
                .fields
                .borrow()
                .iter()
                .map(|(k, v)| Ok((k.clone(), T::from_rill(v)?)))
                .collect(),
            other => type_mismatch("object", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trips() {
        assert_eq!(from_value::<bool>(&to_value(true)).unwrap(), true);
        assert_eq!(from_value::<f64>(&to_value(2.5_f64)).unwrap(), 2.5);
        assert_eq!(from_value::<i64>(&to_value(7_i64)).unwrap(), 7);
        assert_eq!(
            from_value::<String>(&to_value("hi")).unwrap(),
            "hi".to_string()
        );
        assert_eq!(from_value::<()>(&to_value(())).unwrap(), ());
    }

    #[test]
    fn test_integers_become_numbers() {
        assert_eq!(to_value(3_u8), Value::Number(3.0));
        assert_eq!(to_value(-2_i32), Value::Number(-2.0));
        assert_eq!(to_value(10_usize), Value::Number(10.0));
    }

    #[test]
    fn test_nested_round_trip() {
        let mut map: IndexMap<String, Vec<f64>> = IndexMap::new();
        map.insert("a".into(), vec![1.0, 2.0]);
        map.insert("b".into(), vec![]);
        let value = to_value(map.clone());
        let back: IndexMap<String, Vec<f64>> = from_value(&value).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_option_maps_to_null() {
        assert_eq!(to_value(None::<f64>), Value::Null);
        assert_eq!(to_value(Some(4.0_f64)), Value::Number(4.0));
        assert_eq!(from_value::<Option<f64>>(&Value::Null).unwrap(), None);
    }

    #[test]
    fn test_mismatch_reports_kinds() {
        let err = from_value::<bool>(&Value::Number(1.0)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "conversion error: expected boolean, got number"
        );
    }

    #[test]
    fn test_read_only_marking_is_recursive() {
        let value = to_value_read_only(vec![vec![1.0_f64], vec![2.0]]);
        assert!(value.is_read_only());
        let Value::Array(outer) = &value else {
            panic!("expected array");
        };
        assert!(outer.elements.borrow()[0].is_read_only());
    }

    #[test]
    fn test_marshal_options() {
        let frozen = to_value_options(vec![1.0_f64], MarshalOptions { read_only: true });
        assert!(frozen.is_read_only());

        let default = to_value_options(vec![1.0_f64], MarshalOptions::default());
        assert!(!default.is_read_only());
        assert_eq!(MarshalOptions::default(), MarshalOptions { read_only: false });
    }
}
