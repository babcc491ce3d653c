//! Change-set computation.
//!
//! A change-set is a task-specific struct of `Option` fields: a field is
//! `Some(desired)` when the actual object differs, `None` when it matches or
//! when the desired value is unspecified. [`Delta`] builds those fields
//! generically; [`changed_fields`] reads any serializable change-set back as
//! a field map for reporting and emptiness checks.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Field-by-field comparison of an actual object against the expected one
#[derive(Debug, Clone, Copy)]
pub struct Delta<'a, T> {
    actual: Option<&'a T>,
    expected: &'a T,
}

impl<'a, T> Delta<'a, T> {
    /// Compare `expected` against `actual`; a missing actual means every
    /// specified field changes
    pub fn new(actual: Option<&'a T>, expected: &'a T) -> Self {
        Self { actual, expected }
    }

    /// Whether the object does not exist yet
    pub fn is_create(&self) -> bool {
        self.actual.is_none()
    }

    /// Compare an optional field. An unset expected value never changes.
    pub fn opt<V, F>(&self, field: F) -> Option<V>
    where
        V: PartialEq + Clone,
        F: Fn(&T) -> &Option<V>,
    {
        let expected = field(self.expected).as_ref()?;
        match self.actual {
            Some(actual) if field(actual).as_ref() == Some(expected) => None,
            _ => Some(expected.clone()),
        }
    }

    /// Compare a plain field. A default (empty) expected value never changes.
    pub fn value<V, F>(&self, field: F) -> Option<V>
    where
        V: PartialEq + Clone + Default,
        F: Fn(&T) -> &V,
    {
        let expected = field(self.expected);
        if *expected == V::default() {
            return None;
        }
        match self.actual {
            Some(actual) if field(actual) == expected => None,
            _ => Some(expected.clone()),
        }
    }

    /// Compare a field that is always significant, even at its default value
    pub fn exact<V, F>(&self, field: F) -> Option<V>
    where
        V: PartialEq + Clone,
        F: Fn(&T) -> &V,
    {
        let expected = field(self.expected);
        match self.actual {
            Some(actual) if field(actual) == expected => None,
            _ => Some(expected.clone()),
        }
    }
}

/// Fields set in a change-set, keyed by field name.
///
/// `null` fields are dropped, so an empty map means "no change".
pub fn changed_fields<C: Serialize>(changes: &C) -> BTreeMap<String, Value> {
    match serde_json::to_value(changes) {
        Ok(Value::Object(map)) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        Ok(Value::Null) => BTreeMap::new(),
        Ok(other) => BTreeMap::from([("value".to_string(), other)]),
        Err(e) => {
            log::warn!("Could not inspect change-set: {}", e);
            BTreeMap::from([("<unreadable>".to_string(), Value::String(e.to_string()))])
        }
    }
}

/// Check if a change-set has no fields set
pub fn is_empty<C: Serialize>(changes: &C) -> bool {
    changed_fields(changes).is_empty()
}
