//! Session placeholder.
//!
//! Cookie serialization lives outside the core; this is the per-request
//! value bag a session interface would load and persist at the gateway
//! boundary. The `modified` flag tells that interface whether anything
//! needs writing back.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Session {
    values: HashMap<String, Value>,
    modified: bool,
}

impl Session {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
        self.modified = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.modified = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.values.is_empty() {
            self.modified = true;
        }
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_modified_tracking() {
        let mut session = Session::default();
        assert!(!session.is_modified());
        session.insert("user", json!({"id": 1}));
        assert!(session.is_modified());
        assert_eq!(session.get("user"), Some(&json!({"id": 1})));
    }
}
