//! Process-wide (or per-`Crawler`) registry of tasks.
//!
//! Built explicitly by whoever constructs the `Crawler` rather than exposed
//! as a global `static` — see SPEC_FULL.md §9, ownership-strict-language
//! guidance: tests build a private registry per test.

use std::collections::HashMap;
use std::sync::Arc;

use crate::task::Task;

/// Read-mostly mapping from task name to its registered `Task`.
///
/// Lookups after construction are concurrency-safe; registering the same
/// name twice is deterministic last-wins, matching a plain map insert.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<std::sync::RwLock<HashMap<String, Arc<Task>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task: Task) {
        let task = Arc::new(task);
        self.tasks
            .write()
            .unwrap()
            .insert(task.name.clone(), task);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Task>> {
        self.tasks.read().unwrap().get(name).cloned()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.read().unwrap().keys().cloned().collect()
    }

    /// Column order for `task_name`/`rule_name`, used by the storage adapter.
    pub fn fields(&self, task_name: &str, rule_name: &str) -> Option<Vec<String>> {
        let tasks = self.tasks.read().unwrap();
        let task = tasks.get(task_name)?;
        let rule = task.rule.trunk.get(rule_name)?;
        Some(rule.item_fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ParseResult;
    use crate::task::{Rule, RuleTree};

    fn dummy_task(name: &str) -> Task {
        let rule = RuleTree::new(
            || Ok(vec![]),
            vec![("root", Rule::new(vec!["a", "b"], |_| Ok(ParseResult::new())))],
        );
        Task::new(name, "https://example.com", rule)
    }

    #[test]
    fn duplicate_registration_is_last_wins() {
        let registry = TaskRegistry::new();
        registry.register(dummy_task("t"));
        registry.register(dummy_task("t"));
        assert_eq!(registry.task_names().len(), 1);
    }

    #[test]
    fn fields_resolves_through_task_and_rule() {
        let registry = TaskRegistry::new();
        registry.register(dummy_task("t"));
        assert_eq!(
            registry.fields("t", "root"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(registry.fields("t", "missing"), None);
        assert_eq!(registry.fields("missing", "root"), None);
    }
}
