//! Record predicates combined with AND semantics.

use ratedeck_storage::{field_value, RecordFilter};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// An ordered list of predicates; a record matches if every one holds.
///
/// An empty filter matches everything.
#[derive(Clone, Default)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// Creates a filter that matches every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an arbitrary predicate.
    #[must_use]
    pub fn and<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Adds a predicate over the record decoded as `T`.
    ///
    /// Records that do not decode do not match.
    #[must_use]
    pub fn typed<T, F>(self, predicate: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.and(move |record| {
            serde_json::from_value::<T>(record.clone())
                .map(|typed| predicate(&typed))
                .unwrap_or(false)
        })
    }

    /// `field` equals `value` exactly.
    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        self.and(move |record| field_value(record, &field) == Some(&value))
    }

    /// `field` equals one of `values`.
    #[must_use]
    pub fn one_of<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let field = field.into();
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.and(move |record| field_value(record, &field).is_some_and(|v| values.contains(v)))
    }

    /// `field`, as text, contains `needle` ignoring case.
    #[must_use]
    pub fn contains_ci(self, field: impl Into<String>, needle: impl AsRef<str>) -> Self {
        let field = field.into();
        let needle = needle.as_ref().to_lowercase();
        self.and(move |record| match field_value(record, &field) {
            Some(Value::String(s)) => s.to_lowercase().contains(&needle),
            Some(Value::Number(n)) => n.to_string().contains(&needle),
            _ => false,
        })
    }

    /// `field` is a number within `[min, max]`; either bound may be open.
    ///
    /// Numeric strings are accepted.
    #[must_use]
    pub fn range(self, field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        let field = field.into();
        self.and(move |record| {
            let number = match field_value(record, &field) {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number.is_some_and(|n| min.map_or(true, |lo| n >= lo) && max.map_or(true, |hi| n <= hi))
        })
    }

    /// Number of predicates.
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Returns true if the filter matches everything.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Evaluates every predicate against `record`.
    pub fn matches(&self, record: &Value) -> bool {
        self.predicates.iter().all(|p| p(record))
    }

    /// The filter as an engine predicate, or `None` when it is empty.
    pub fn to_record_filter(&self) -> Option<RecordFilter> {
        if self.is_empty() {
            return None;
        }
        let filter = self.clone();
        Some(Arc::new(move |record: &Value| filter.matches(record)))
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn empty_filter_matches_all() {
        let filter = Filter::new();
        assert!(filter.matches(&json!({})));
        assert!(filter.to_record_filter().is_none());
    }

    #[test]
    fn predicates_are_anded() {
        let filter = Filter::new().eq("state", "NJ").range("rate", Some(0.01), None);

        assert!(filter.matches(&json!({"state": "NJ", "rate": 0.02})));
        assert!(!filter.matches(&json!({"state": "NJ", "rate": 0.001})));
        assert!(!filter.matches(&json!({"state": "NY", "rate": 0.02})));
    }

    #[test]
    fn one_of_and_contains() {
        let filter = Filter::new()
            .one_of("country", ["US", "CA"])
            .contains_ci("npa", "20");

        assert!(filter.matches(&json!({"country": "CA", "npa": "204"})));
        assert!(filter.matches(&json!({"country": "US", "npa": 201})));
        assert!(!filter.matches(&json!({"country": "MX", "npa": "201"})));
        assert!(!filter.matches(&json!({"country": "US"})));
    }

    #[test]
    fn contains_ignores_case() {
        let filter = Filter::new().contains_ci("state", "nj");
        assert!(filter.matches(&json!({"state": "NJ"})));
    }

    #[test]
    fn typed_predicate() {
        #[derive(Deserialize)]
        struct Row {
            npa: String,
        }

        let filter = Filter::new().typed(|row: &Row| row.npa.starts_with('2'));
        assert!(filter.matches(&json!({"npa": "201"})));
        assert!(!filter.matches(&json!({"npa": "301"})));
        assert!(!filter.matches(&json!({"other": 1})));
    }

    #[test]
    fn record_filter_delegates() {
        let filter = Filter::new().eq("npa", "201").to_record_filter().unwrap();
        assert!(filter(&json!({"npa": "201"})));
        assert!(!filter(&json!({"npa": "202"})));
    }
}
