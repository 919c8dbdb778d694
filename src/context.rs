//! Per-parse input/output: `Context`, `ParseResult`, and the heterogeneous
//! `OutputItem` a rule emits.

use std::sync::Arc;

use serde_json::Value;

use crate::request::Request;
use crate::storage::DataCell;
use crate::task::{Rule, Task};

/// Input handed to a rule's `parse_fn`: the fetched body, the request that
/// produced it, and the owning task (for sibling-rule lookups).
pub struct Context {
    pub body: String,
    pub req: Request,
    task: Arc<Task>,
}

impl Context {
    pub fn new(body: String, req: Request, task: Arc<Task>) -> Self {
        Self { body, req, task }
    }

    /// Look up a rule by name in the owning task's rule graph, the way a
    /// parse function hands a differently-shaped page off to a sibling rule
    /// without capturing it directly (see DESIGN.md, cyclic references).
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.task.rule.trunk.get(name)
    }

    /// Wrap a user payload into a `DataCell` stamped with this context's
    /// task, rule, URL, and the current local time.
    pub fn output(&self, data: Vec<(String, Value)>) -> DataCell {
        DataCell::new(
            self.req.task_name.clone(),
            self.req.rule_name.clone(),
            self.req.url.clone(),
            data,
        )
    }
}

/// An item a rule emits: either a structured record bound for storage, or a
/// raw value that should just be logged (see SPEC_FULL.md §9 on modeling
/// heterogeneous payloads as a tagged variant rather than `Box<dyn Any>`).
#[derive(Debug, Clone)]
pub enum OutputItem {
    DataCell(DataCell),
    Raw(String),
}

impl From<DataCell> for OutputItem {
    fn from(cell: DataCell) -> Self {
        OutputItem::DataCell(cell)
    }
}

/// What a rule's `parse_fn` returns: follow-up requests plus emitted items.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub requests: Vec<Request>,
    pub items: Vec<OutputItem>,
}

impl ParseResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requests(mut self, requests: Vec<Request>) -> Self {
        self.requests = requests;
        self
    }

    pub fn with_items(mut self, items: Vec<OutputItem>) -> Self {
        self.items = items;
        self
    }
}
