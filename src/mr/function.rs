//! The MapReduce application plugin contract.
//!
//! Workers are parameterized by an object implementing [`MapReduceApp`]; how that object
//! is produced (linked in, loaded from a shared object, compiled per job) is a deployment
//! concern outside the core. `WordCount` below is the reference/demo application, selectable
//! by name so a worker process isn't compiled against one fixed application.

use crate::mr::task::KeyValue;

/// A MapReduce application: the user-supplied map and reduce callbacks.
pub trait MapReduceApp: Send + Sync {
    /// Map `contents` of `filename` into zero or more key/value pairs.
    fn map(&self, filename: &str, contents: &str) -> Vec<KeyValue>;

    /// Reduce all `values` associated with `key` into a single output value.
    fn reduce(&self, key: &str, values: &[String]) -> String;
}

/// Word count: map emits `(word, "1")` for each whitespace-separated token; reduce emits
/// the count of values as a string.
pub struct WordCount;

impl MapReduceApp for WordCount {
    fn map(&self, _filename: &str, contents: &str) -> Vec<KeyValue> {
        contents
            .split_whitespace()
            .map(|word| KeyValue::new(word, "1"))
            .collect()
    }

    fn reduce(&self, _key: &str, values: &[String]) -> String {
        values.len().to_string()
    }
}

/// Resolve a built-in application by name.
///
/// Dynamic plugin loading is out of scope for the core; this registry stands in for it so
/// the worker binary can be pointed at an application without a dynamic-linking mechanism.
pub fn lookup_app(name: &str) -> Option<Box<dyn MapReduceApp>> {
    match name {
        "wordcount" | "wc" => Some(Box::new(WordCount)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_count_maps_each_token_to_one() {
        let app = WordCount;
        let kvs = app.map("f", "hello world hello");
        assert_eq!(
            kvs,
            vec![
                KeyValue::new("hello", "1"),
                KeyValue::new("world", "1"),
                KeyValue::new("hello", "1"),
            ]
        );
    }

    #[test]
    fn word_count_reduce_counts_values() {
        let app = WordCount;
        let values = vec!["1".to_string(), "1".to_string(), "1".to_string()];
        assert_eq!(app.reduce("hello", &values), "3");
    }

    #[test]
    fn lookup_app_resolves_known_names_only() {
        assert!(lookup_app("wordcount").is_some());
        assert!(lookup_app("wc").is_some());
        assert!(lookup_app("nonexistent").is_none());
    }
}
