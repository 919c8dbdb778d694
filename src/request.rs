//! Request: a single HTTP retrieval unit flowing through the scheduler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Scratch storage scoped to a single request chain (seed → follow-up → ...).
///
/// Mirrors the source's `Temp` cache: a rule stage can stash a value (e.g. a
/// book title scraped from a listing page) for a later stage parsing the
/// detail page to pick back up.
#[derive(Debug, Default, Clone)]
pub struct TmpData {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl TmpData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner
            .lock()
            .expect("tmp data mutex poisoned")
            .insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner
            .lock()
            .expect("tmp data mutex poisoned")
            .get(key)
            .cloned()
    }
}

/// A single HTTP retrieval unit.
///
/// `task_name` is a registry key, not a captured reference to the owning
/// `Task` — rule functions look the task back up through `Context` so rule
/// modules stay swappable (see DESIGN.md, cyclic references).
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub method: String,
    pub cookie: String,
    pub depth: u32,
    pub priority: i32,
    pub rule_name: String,
    pub task_name: String,
    pub tmp_data: TmpData,
}

impl Request {
    /// Build a root request for `task_name`, inheriting its default method (`GET`).
    pub fn new(task_name: impl Into<String>, url: impl Into<String>, rule_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            cookie: String::new(),
            depth: 0,
            priority: 0,
            rule_name: rule_name.into(),
            task_name: task_name.into(),
            tmp_data: TmpData::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = cookie.into();
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Construct a follow-up request one depth level below `self`, inheriting
    /// cookie and task.
    pub fn follow_up(&self, url: impl Into<String>, rule_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            cookie: self.cookie.clone(),
            depth: self.depth + 1,
            priority: 0,
            rule_name: rule_name.into(),
            task_name: self.task_name.clone(),
            tmp_data: TmpData::new(),
        }
    }

    /// Lowercase hex MD5 of `url || method`. Used for dedup and failure
    /// indexing only — no security claim.
    pub fn fingerprint(&self) -> String {
        let digest = md5::compute(format!("{}{}", self.url, self.method));
        format!("{digest:x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_same_url_and_method() {
        let a = Request::new("t", "https://example.com", "root");
        let b = Request::new("t", "https://example.com", "root");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_by_method() {
        let mut a = Request::new("t", "https://example.com", "root");
        let mut b = a.clone();
        a.method = "GET".to_string();
        b.method = "POST".to_string();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn follow_up_increments_depth_and_inherits_cookie() {
        let root = Request::new("t", "https://a", "root").with_cookie("sid=1");
        let next = root.follow_up("https://b", "list");
        assert_eq!(next.depth, 1);
        assert_eq!(next.cookie, "sid=1");
        assert_eq!(next.task_name, "t");
    }

    #[test]
    fn tmp_data_round_trips() {
        let tmp = TmpData::new();
        tmp.set("book_name", Value::String("Foo".into()));
        assert_eq!(tmp.get("book_name"), Some(Value::String("Foo".into())));
        assert_eq!(tmp.get("missing"), None);
    }
}
