//! Per-key deserialization results and error collection.

use super::error::FieldError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;
use std::collections::BTreeSet;

/// A configuration value as found in the document.
///
/// Deserializing a `Field` never fails: a type mismatch is kept as
/// [`Field::Invalid`] so that every bad key can be reported together.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Field<T> {
    Missing,
    Invalid(String),
    Present(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Missing
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(Field::Missing);
        }
        Ok(match T::deserialize(value) {
            Ok(v) => Field::Present(v),
            Err(e) => Field::Invalid(e.to_string()),
        })
    }
}

/// Collects problems found while validating a configuration.
#[derive(Default)]
pub(crate) struct Problems {
    errors: Vec<FieldError>,
    failed: BTreeSet<String>,
}

impl Problems {
    fn fail(&mut self, key: &str, message: impl Into<String>) {
        self.failed.insert(key.to_string());
        self.errors.push(FieldError::new(key, message));
    }

    /// The value of a required key, or a neutral default after recording why
    /// it is unusable.
    pub fn required<T: Default>(&mut self, key: &str, field: Field<T>) -> T {
        match field {
            Field::Present(v) => v,
            Field::Missing => {
                self.fail(key, "missing required key");
                T::default()
            }
            Field::Invalid(message) => {
                self.fail(key, message);
                T::default()
            }
        }
    }

    pub fn optional<T>(&mut self, key: &str, field: Field<T>, default: T) -> T {
        match field {
            Field::Present(v) => v,
            Field::Missing => default,
            Field::Invalid(message) => {
                self.fail(key, message);
                default
            }
        }
    }

    /// Record a semantic violation unless the key already failed to parse.
    pub fn ensure(&mut self, key: &str, ok: bool, message: impl Into<String>) {
        if !ok {
            self.reject(key, message);
        }
    }

    pub fn reject(&mut self, key: &str, message: impl Into<String>) {
        if !self.failed.contains(key) {
            self.fail(key, message);
        }
    }

    pub fn has_failed(&self, key: &str) -> bool {
        self.failed.contains(key)
    }

    pub fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Deserialize)]
    #[serde(default)]
    struct Doc {
        a: Field<u64>,
        b: Field<f64>,
        c: Field<bool>,
        n: Field<usize>,
    }

    fn doc(yaml: &str) -> Doc {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_fields_never_fail_deserialization() {
        let d = doc("a: 1\nb: text\nn: -3\n");
        assert_eq!(d.a, Field::Present(1));
        assert!(matches!(d.b, Field::Invalid(_)));
        assert_eq!(d.c, Field::Missing);
        assert!(matches!(d.n, Field::Invalid(_)));
    }

    #[test]
    fn test_collects_all_problems() {
        let d = doc("a: 1\nb: text\n");
        let mut problems = Problems::default();
        assert_eq!(problems.required("a", d.a), 1);
        problems.required("b", d.b);
        problems.required("c", d.c);
        let errors = problems.finish().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["b", "c"]);
        assert_eq!(errors[1].message, "missing required key");
    }

    #[test]
    fn test_ensure_skips_failed_fields() {
        let d = doc("n: -3\n");
        let mut problems = Problems::default();
        let n = problems.required("n", d.n);
        problems.ensure("n", n > 0, "must be > 0");
        let errors = problems.finish().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("-3"));
    }

    #[test]
    fn test_integers_read_as_floats() {
        let d = doc("b: 1\n");
        let mut problems = Problems::default();
        assert_eq!(problems.required("b", d.b), 1.0);
        assert!(problems.finish().is_ok());
    }

    #[test]
    fn test_optional_defaults() {
        let d = doc("a: 7\nc: ~\n");
        let mut problems = Problems::default();
        assert_eq!(problems.optional("a", d.a, 1), 7);
        assert_eq!(problems.optional("n", d.n, 1), 1);
        assert!(problems.optional("c", d.c, true));
        assert!(problems.finish().is_ok());
    }
}
