//! Registry of error objects that were already classified.
//!
//! A failed operation's error is held by the session and may be observed many
//! times. The registry remembers each error by identity without keeping it
//! alive, so an error is classified and applied at most once.

use std::sync::{Arc, Weak};

#[derive(Debug)]
pub struct ProcessedErrors<T> {
    seen: Vec<Weak<T>>,
}

impl<T> ProcessedErrors<T> {
    pub fn new() -> Self {
        Self { seen: Vec::new() }
    }

    /// Record `err`; returns true the first time this exact object is seen.
    pub fn first_sighting(&mut self, err: &Arc<T>) -> bool {
        // A live Weak pins its allocation, so dead entries can never alias a new error
        self.seen.retain(|weak| weak.strong_count() > 0);

        let candidate = Arc::downgrade(err);
        if self.seen.iter().any(|weak| weak.ptr_eq(&candidate)) {
            return false;
        }
        self.seen.push(candidate);
        true
    }

    pub fn contains(&self, err: &Arc<T>) -> bool {
        let candidate = Arc::downgrade(err);
        self.seen.iter().any(|weak| weak.ptr_eq(&candidate))
    }

    /// Number of tracked errors that are still alive.
    pub fn len(&self) -> usize {
        self.seen.iter().filter(|weak| weak.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ProcessedErrors<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sighting_once_per_object() {
        let mut registry = ProcessedErrors::new();
        let err = Arc::new("boom".to_string());

        assert!(registry.first_sighting(&err));
        assert!(!registry.first_sighting(&err));
        assert!(!registry.first_sighting(&err.clone()));
        assert!(registry.contains(&err));
    }

    #[test]
    fn test_equal_values_are_distinct_objects() {
        let mut registry = ProcessedErrors::new();
        let a = Arc::new("same".to_string());
        let b = Arc::new("same".to_string());

        assert!(registry.first_sighting(&a));
        assert!(registry.first_sighting(&b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_does_not_keep_errors_alive() {
        let mut registry = ProcessedErrors::new();
        let err = Arc::new(1u32);
        registry.first_sighting(&err);
        assert_eq!(Arc::strong_count(&err), 1);

        drop(err);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dead_entries_are_pruned() {
        let mut registry = ProcessedErrors::new();
        for i in 0..5u32 {
            let err = Arc::new(i);
            registry.first_sighting(&err);
        }
        let keep = Arc::new(99u32);
        registry.first_sighting(&keep);
        assert_eq!(registry.seen.len(), 1);
    }
}
