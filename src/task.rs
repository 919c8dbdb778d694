//! Task: a crawl job spec shared by every request it spawns.
//!
//! Grounded in the source's `collect.Task` / `Property` / `RuleTree` /
//! `Rule` struct literals (see `parse/doubanbook/book.go`).

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::context::{Context, ParseResult};
use crate::error::RuleError;
use crate::fetcher::Fetcher;
use crate::limiter::RateLimiter;
use crate::request::Request;
use crate::storage::Storage;

/// One named extraction rule: which fields it emits, and how to parse a page.
pub struct Rule {
    pub item_fields: Vec<String>,
    pub parse_fn: Arc<dyn Fn(&Context) -> Result<ParseResult, RuleError> + Send + Sync>,
}

impl Rule {
    pub fn new(
        item_fields: Vec<&str>,
        parse_fn: impl Fn(&Context) -> Result<ParseResult, RuleError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            item_fields: item_fields.into_iter().map(str::to_string).collect(),
            parse_fn: Arc::new(parse_fn),
        }
    }
}

/// A task's rule graph: the root seed generator plus a name → rule map.
pub struct RuleTree {
    pub root: Arc<dyn Fn() -> Result<Vec<Request>, RuleError> + Send + Sync>,
    pub trunk: std::collections::HashMap<String, Rule>,
}

impl RuleTree {
    pub fn new(
        root: impl Fn() -> Result<Vec<Request>, RuleError> + Send + Sync + 'static,
        trunk: Vec<(&str, Rule)>,
    ) -> Self {
        Self {
            root: Arc::new(root),
            trunk: trunk.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }
}

/// Collaborators a task needs before it can crawl. Filled in by
/// `Crawler::run`'s seed-expansion step, not by the rule author.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub storage: Arc<dyn Storage>,
    pub limiter: Arc<dyn RateLimiter>,
}

/// A crawl job spec: identity, crawl policy, rule graph, and (once attached)
/// its run-time collaborators.
pub struct Task {
    pub name: String,
    pub root_url: String,
    pub cookie: String,
    pub wait_time: Duration,
    pub max_depth: u32,
    pub reload: bool,
    pub rule: RuleTree,
    collaborators: RwLock<Option<Arc<Collaborators>>>,
}

impl Task {
    pub fn new(name: impl Into<String>, root_url: impl Into<String>, rule: RuleTree) -> Self {
        Self {
            name: name.into(),
            root_url: root_url.into(),
            cookie: String::new(),
            wait_time: Duration::from_millis(200),
            max_depth: 0,
            reload: false,
            rule,
            collaborators: RwLock::new(None),
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = cookie.into();
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_reload(mut self, reload: bool) -> Self {
        self.reload = reload;
        self
    }

    pub fn attach(&self, collaborators: Collaborators) {
        *self.collaborators.write().unwrap() = Some(Arc::new(collaborators));
    }

    pub fn fetcher(&self) -> Option<Arc<dyn Fetcher>> {
        self.collaborators.read().unwrap().as_ref().map(|c| c.fetcher.clone())
    }

    pub fn storage(&self) -> Option<Arc<dyn Storage>> {
        self.collaborators.read().unwrap().as_ref().map(|c| c.storage.clone())
    }

    pub fn limiter(&self) -> Option<Arc<dyn RateLimiter>> {
        self.collaborators.read().unwrap().as_ref().map(|c| c.limiter.clone())
    }
}
