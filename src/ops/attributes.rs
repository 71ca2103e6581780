//! Operator attributes as they arrive from a graph definition.
//!
//! Graph loaders are outside this crate; they hand over each node's
//! attributes as an [`Attributes`] map and the node's op type string, and
//! [`super::Operator::from_node`] turns both into a typed descriptor.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// One attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
}

impl Attribute {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Ints(_) => "ints",
            Self::Floats(_) => "floats",
        }
    }
}

/// Attribute map of one graph node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: HashMap<String, Attribute>,
}

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `name`.
    pub fn set(&mut self, name: &str, value: Attribute) {
        self.values.insert(name.to_owned(), value);
    }

    #[must_use]
    pub fn with_int(mut self, name: &str, value: i64) -> Self {
        self.set(name, Attribute::Int(value));
        self
    }

    #[must_use]
    pub fn with_float(mut self, name: &str, value: f32) -> Self {
        self.set(name, Attribute::Float(value));
        self
    }

    #[must_use]
    pub fn with_string(mut self, name: &str, value: &str) -> Self {
        self.set(name, Attribute::String(value.to_owned()));
        self
    }

    #[must_use]
    pub fn with_ints(mut self, name: &str, value: &[i64]) -> Self {
        self.set(name, Attribute::Ints(value.to_vec()));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.values.get(name)
    }

    fn mismatch(op: &'static str, name: &'static str, expected: &str, found: &Attribute) -> Error {
        Error::attribute(op, name, format!("expected {expected}, found {}", found.type_name()))
    }

    /// Integer attribute, or `default` when absent.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAttribute`] when present with another type.
    pub fn int(&self, op: &'static str, name: &'static str, default: i64) -> Result<i64> {
        match self.get(name) {
            None => Ok(default),
            Some(Attribute::Int(v)) => Ok(*v),
            Some(other) => Err(Self::mismatch(op, name, "int", other)),
        }
    }

    /// Float attribute, or `default` when absent. Integer values are
    /// accepted and converted.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAttribute`] when present with another type.
    pub fn float(&self, op: &'static str, name: &'static str, default: f32) -> Result<f32> {
        match self.get(name) {
            None => Ok(default),
            Some(Attribute::Float(v)) => Ok(*v),
            Some(Attribute::Int(v)) => Ok(*v as f32),
            Some(other) => Err(Self::mismatch(op, name, "float", other)),
        }
    }

    /// String attribute, or `default` when absent.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAttribute`] when present with another type.
    pub fn string<'a>(&'a self, op: &'static str, name: &'static str, default: &'a str) -> Result<&'a str> {
        match self.get(name) {
            None => Ok(default),
            Some(Attribute::String(v)) => Ok(v),
            Some(other) => Err(Self::mismatch(op, name, "string", other)),
        }
    }

    /// Integer list attribute, `None` when absent.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAttribute`] when present with another type.
    pub fn ints(&self, op: &'static str, name: &'static str) -> Result<Option<Vec<i64>>> {
        match self.get(name) {
            None => Ok(None),
            Some(Attribute::Ints(v)) => Ok(Some(v.clone())),
            Some(other) => Err(Self::mismatch(op, name, "ints", other)),
        }
    }

    /// Non-negative integer list attribute.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAttribute`] for negative entries or a type
    /// mismatch.
    pub fn extents(&self, op: &'static str, name: &'static str) -> Result<Option<Vec<usize>>> {
        self.ints(op, name)?
            .map(|values| {
                values
                    .into_iter()
                    .map(|v| {
                        usize::try_from(v)
                            .map_err(|_| Error::attribute(op, name, format!("negative value {v}")))
                    })
                    .collect()
            })
            .transpose()
    }

    /// Signed integer list attribute (pads, axes).
    ///
    /// # Errors
    /// Returns [`Error::InvalidAttribute`] when present with another type.
    pub fn offsets(&self, op: &'static str, name: &'static str) -> Result<Option<Vec<isize>>> {
        Ok(self
            .ints(op, name)?
            .map(|values| values.into_iter().map(|v| v as isize).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_apply_defaults() {
        let attrs = Attributes::new().with_string("mode", "edge").with_ints("pads", &[1, 2]);
        assert_eq!(attrs.string("Pad", "mode", "constant").unwrap(), "edge");
        assert_eq!(attrs.float("Pad", "value", 0.5).unwrap(), 0.5);
        assert_eq!(attrs.offsets("Pad", "pads").unwrap(), Some(vec![1, 2]));
    }

    #[test]
    fn type_mismatch_is_invalid_attribute() {
        let attrs = Attributes::new().with_int("mode", 3);
        assert!(matches!(
            attrs.string("Pad", "mode", "constant"),
            Err(Error::InvalidAttribute { name: "mode", .. })
        ));
        let attrs = Attributes::new().with_ints("strides", &[1, -1]);
        assert!(attrs.extents("Conv", "strides").is_err());
    }
}
