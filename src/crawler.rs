//! The crawler engine: seed expansion, worker pool, visited set, failure
//! map, and result fan-in.
//!
//! Grounded in the source's `collect.Collector.Run` (seed expansion + worker
//! pool) and `collect.worker` (the fetch→parse→emit loop).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::{Context, OutputItem, ParseResult};
use crate::error::CrawlerError;
use crate::registry::TaskRegistry;
use crate::request::Request;
use crate::scheduler::{scheduler, Scheduler};
use crate::task::{Collaborators, Task};

/// Default short-body threshold (bytes): a fetched page under this size is
/// treated as a likely block/error page rather than real content.
pub const DEFAULT_SHORT_BODY_THRESHOLD: usize = 6000;

/// Tunables for one `Crawler::run` invocation.
pub struct CrawlerSettings {
    pub work_count: usize,
    pub short_body_threshold: usize,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            work_count: 4,
            short_body_threshold: DEFAULT_SHORT_BODY_THRESHOLD,
        }
    }
}

/// Cooperative shutdown handle returned by `Crawler::run`.
#[derive(Clone)]
pub struct ShutdownHandle {
    cancel: CancellationToken,
    handles: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

impl ShutdownHandle {
    /// Cancel the run and wait for the scheduler, every worker, and the
    /// result handler to actually quiesce before returning. Idempotent: a
    /// second call observes an already-cancelled token and an empty handle
    /// list, so it returns immediately.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Shared, lock-protected state the worker pool and result handler mutate.
struct CrawlState {
    visited: StdMutex<HashSet<String>>,
    failures: StdMutex<HashMap<String, Request>>,
}

/// The engine: owns the registry and drives one crawl run to completion (or
/// until cancelled).
pub struct Crawler {
    registry: TaskRegistry,
    settings: CrawlerSettings,
}

impl Crawler {
    pub fn new(registry: TaskRegistry, settings: CrawlerSettings) -> Self {
        Self { registry, settings }
    }

    /// Start a crawl over `seed_tasks` (task names already registered),
    /// attaching `collaborators` to each before expanding its seeds. Spawns
    /// the scheduler, worker pool, and result handler in the background and
    /// returns immediately with a `ShutdownHandle`; call `shutdown()` on it
    /// to cancel the run (workers drain their current step, then exit).
    pub async fn run(&self, seed_tasks: &[String], collaborators: Collaborators) -> ShutdownHandle {
        let cancel = CancellationToken::new();
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let (scheduler, scheduler_loop) = scheduler(cancel.clone());
        let scheduler = Arc::new(scheduler);
        let state = Arc::new(CrawlState {
            visited: StdMutex::new(HashSet::new()),
            failures: StdMutex::new(HashMap::new()),
        });
        let (out_tx, out_rx) = mpsc::channel::<(Arc<Task>, ParseResult)>(256);

        let mut seeds = Vec::new();
        for name in seed_tasks {
            let Some(task) = self.registry.get(name) else {
                let err = CrawlerError::UnknownTask(name.clone());
                error!(task = %name, error = %err, "seed task is not registered");
                continue;
            };
            task.attach(collaborators.clone());
            match (task.rule.root)() {
                Ok(reqs) => seeds.push((task, reqs)),
                Err(err) => error!(task = %name, error = %err, "root() failed for seed task"),
            }
        }

        handles.push(tokio::spawn(scheduler_loop.run()));

        for (_, reqs) in &seeds {
            scheduler.push(reqs.clone());
        }

        let short_body_threshold = self.settings.short_body_threshold;
        for _ in 0..self.settings.work_count {
            let scheduler = scheduler.clone();
            let state = state.clone();
            let out_tx = out_tx.clone();
            let registry = self.registry.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(worker_loop(
                scheduler,
                state,
                out_tx,
                registry,
                cancel,
                short_body_threshold,
            )));
        }
        // Drop the template sender: the result handler's `out_rx` closes once
        // every worker-held clone is gone, i.e. once every worker has exited.
        drop(out_tx);

        handles.push(tokio::spawn(result_handler_loop(
            out_rx,
            self.registry.clone(),
            scheduler,
            state,
        )));

        ShutdownHandle {
            cancel,
            handles: Arc::new(StdMutex::new(handles)),
        }
    }
}

async fn worker_loop(
    scheduler: Arc<Scheduler>,
    state: Arc<CrawlState>,
    out_tx: mpsc::Sender<(Arc<Task>, ParseResult)>,
    registry: TaskRegistry,
    cancel: CancellationToken,
    short_body_threshold: usize,
) {
    loop {
        let req = tokio::select! {
            _ = cancel.cancelled() => break,
            req = scheduler.pull() => match req {
                Some(req) => req,
                None => break,
            },
        };

        let Some(task) = registry.get(&req.task_name) else {
            let err = CrawlerError::UnknownTask(req.task_name.clone());
            error!(task = %req.task_name, url = %req.url, error = %err, "task is not registered");
            continue;
        };

        if req.depth > task.max_depth {
            let err = CrawlerError::DepthExceeded {
                task: task.name.clone(),
                depth: req.depth,
                max_depth: task.max_depth,
            };
            error!(url = %req.url, task = %task.name, error = %err, "depth exceeded");
            continue;
        }

        let fingerprint = req.fingerprint();
        if !task.reload {
            // `insert` both checks and marks atomically under one lock
            // acquisition: two workers racing on the same fingerprint must
            // not both observe "not yet visited".
            let newly_visited = state.visited.lock().unwrap().insert(fingerprint.clone());
            if !newly_visited {
                debug!(url = %req.url, task = %task.name, "already visited, skipping");
                continue;
            }
        }

        let (Some(fetcher), Some(limiter)) = (task.fetcher(), task.limiter()) else {
            error!(task = %task.name, "task has no collaborators attached");
            continue;
        };

        if let Err(err) = limiter.wait(&cancel).await {
            warn!(url = %req.url, task = %task.name, error = %err, "rate limiter wait failed");
            set_failure(&state, &scheduler, &task, &fingerprint, req.clone());
            continue;
        }

        let jitter_max = task.wait_time.as_millis() as u64;
        if jitter_max > 0 {
            let jitter = rand::thread_rng().gen_range(0..jitter_max);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        let body = match fetcher.get(&req).await {
            Ok(body) => body,
            Err(err) => {
                warn!(url = %req.url, task = %task.name, error = %err, "fetch failed");
                set_failure(&state, &scheduler, &task, &fingerprint, req.clone());
                continue;
            }
        };

        if body.len() < short_body_threshold {
            warn!(url = %req.url, task = %task.name, len = body.len(), "response body below short-body threshold");
            set_failure(&state, &scheduler, &task, &fingerprint, req.clone());
            continue;
        }

        let Some(rule) = task.rule.trunk.get(&req.rule_name) else {
            let err = CrawlerError::UnknownRule(task.name.clone(), req.rule_name.clone());
            error!(task = %task.name, rule = %req.rule_name, error = %err, "no rule named for this task");
            continue;
        };

        let ctx = Context::new(body, req.clone(), task.clone());
        let result = match (rule.parse_fn)(&ctx) {
            Ok(result) => result,
            Err(err) => {
                warn!(url = %req.url, task = %task.name, rule = %req.rule_name, error = %err, "parse failed");
                ParseResult::new()
            }
        };

        if !result.requests.is_empty() {
            let scheduler = scheduler.clone();
            let follow_ups = result.requests.clone();
            tokio::spawn(async move { scheduler.push(follow_ups) });
        }

        if out_tx.send((task, result)).await.is_err() {
            break;
        }
    }
}

/// First failure for `fingerprint` retries once; a repeat failure is parked.
fn set_failure(
    state: &CrawlState,
    scheduler: &Scheduler,
    task: &Task,
    fingerprint: &str,
    req: Request,
) {
    if !task.reload {
        state.visited.lock().unwrap().remove(fingerprint);
    }
    let already_failed = {
        let mut failures = state.failures.lock().unwrap();
        let seen_before = failures.contains_key(fingerprint);
        failures.entry(fingerprint.to_string()).or_insert_with(|| req.clone());
        seen_before
    };
    if already_failed {
        debug!(url = %req.url, task = %task.name, "second failure, parking request");
    } else {
        scheduler.push(vec![req]);
    }
}

async fn result_handler_loop(
    mut out_rx: mpsc::Receiver<(Arc<Task>, ParseResult)>,
    registry: TaskRegistry,
    scheduler: Arc<Scheduler>,
    _state: Arc<CrawlState>,
) {
    while let Some((task, result)) = out_rx.recv().await {
        if !result.requests.is_empty() {
            scheduler.push(result.requests.clone());
        }
        for item in result.items {
            match item {
                OutputItem::DataCell(cell) => {
                    let Some(owner) = registry.get(&cell.task) else {
                        let err = CrawlerError::UnknownTask(cell.task.clone());
                        error!(task = %cell.task, error = %err, "data cell references unregistered task");
                        continue;
                    };
                    let Some(storage) = owner.storage() else {
                        error!(task = %task.name, "task has no storage attached");
                        continue;
                    };
                    if let Err(err) = storage.save(&[cell]).await {
                        error!(task = %task.name, error = %err, "storage save failed");
                    }
                }
                OutputItem::Raw(s) => {
                    info!(task = %task.name, raw = %s, "rule emitted a raw item");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ParseResult;
    use crate::fetcher::Fetcher;
    use crate::limiter::RateLimiter;
    use crate::storage::MemoryStorage;
    use crate::task::{Rule, RuleTree};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFetcher {
        body: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn get(&self, _req: &Request) -> Result<String, crate::error::FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    struct NoopLimiter;

    #[async_trait]
    impl RateLimiter for NoopLimiter {
        async fn wait(&self, _cancel: &CancellationToken) -> Result<(), crate::error::LimiterError> {
            Ok(())
        }
        fn limit(&self) -> f64 {
            f64::INFINITY
        }
    }

    fn long_body() -> String {
        "x".repeat(DEFAULT_SHORT_BODY_THRESHOLD + 1)
    }

    #[tokio::test]
    async fn successful_fetch_emits_one_data_cell() {
        let registry = TaskRegistry::new();
        let rule = RuleTree::new(
            || Ok(vec![Request::new("demo", "https://example.com", "root")]),
            vec![(
                "root",
                Rule::new(vec!["title"], |ctx: &Context| {
                    Ok(ParseResult::new()
                        .with_items(vec![ctx.output(vec![("title".to_string(), "hi".into())]).into()]))
                }),
            )],
        );
        let task = Task::new("demo", "https://example.com", rule)
            .with_max_depth(1)
            .with_wait_time(Duration::from_millis(0));
        registry.register(task);

        let storage = Arc::new(MemoryStorage::new());
        let collaborators = Collaborators {
            fetcher: Arc::new(StaticFetcher {
                body: long_body(),
                calls: AtomicUsize::new(0),
            }),
            storage: storage.clone(),
            limiter: Arc::new(NoopLimiter),
        };

        let crawler = Crawler::new(
            registry,
            CrawlerSettings {
                work_count: 1,
                ..Default::default()
            },
        );
        let handle = crawler.run(&["demo".to_string()], collaborators).await;

        // Give the worker and result handler a moment to process the one
        // seed request before tearing the run down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;
        assert_eq!(storage.cells().len(), 1);
    }

    #[test]
    fn set_failure_retries_once_then_parks() {
        let state = CrawlState {
            visited: StdMutex::new(HashSet::new()),
            failures: StdMutex::new(HashMap::new()),
        };
        let rule = RuleTree::new(|| Ok(vec![]), vec![("root", Rule::new(vec![], |_| Ok(ParseResult::new())))]);
        let task = Task::new("demo", "https://example.com", rule);
        let (scheduler, _loop) = scheduler(CancellationToken::new());

        let req = Request::new("demo", "https://example.com/a", "root");
        let fp = req.fingerprint();

        set_failure(&state, &scheduler, &task, &fp, req.clone());
        assert!(state.failures.lock().unwrap().contains_key(&fp));

        set_failure(&state, &scheduler, &task, &fp, req.clone());
        assert!(state.failures.lock().unwrap().contains_key(&fp));
    }
}
