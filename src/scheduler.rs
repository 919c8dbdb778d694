//! Two-tier (priority, normal) FIFO frontier.
//!
//! Grounded in the source's dispatcher `select` over two unbuffered Go
//! channels (`engine/schedule.go`); the handoff to a waiting worker is
//! modeled as a single `pending` slot plus a `select!` so `tokio::mpsc`
//! (which has no true zero-capacity variant) reproduces the same handshake.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::request::Request;

/// Handle workers and seed/result code use to admit and await requests.
///
/// Cloning shares the same underlying channels; `run()` must be driven by
/// exactly one owner of the receiving halves (constructed once via `new`).
pub struct Scheduler {
    request_tx: mpsc::UnboundedSender<Request>,
    worker_rx: Mutex<mpsc::Receiver<Request>>,
    cancel: CancellationToken,
}

/// The loop `Scheduler::run` drives; owns both receiving halves and the
/// worker-facing sender, kept apart from `Scheduler` so it can be moved into
/// its own spawned task while `Scheduler` stays shared behind an `Arc`.
pub struct SchedulerLoop {
    request_rx: mpsc::UnboundedReceiver<Request>,
    worker_tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
}

/// Build a connected `(Scheduler, SchedulerLoop)` pair sharing `cancel`.
pub fn scheduler(cancel: CancellationToken) -> (Scheduler, SchedulerLoop) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    // Capacity 1 is a real buffer, not a zero-capacity handshake, but paired
    // with the `pending` slot below it behaves like one: the loop only ever
    // sends once a worker is already awaiting `recv()`.
    let (worker_tx, worker_rx) = mpsc::channel(1);
    (
        Scheduler {
            request_tx,
            worker_rx: Mutex::new(worker_rx),
            cancel: cancel.clone(),
        },
        SchedulerLoop {
            request_rx,
            worker_tx,
            cancel,
        },
    )
}

impl Scheduler {
    /// Admit requests without blocking the caller. Priority requests
    /// (`priority > 0`) are routed to the priority lane by the dispatch loop.
    pub fn push(&self, reqs: Vec<Request>) {
        for req in reqs {
            // An unbounded sender only ever fails if every receiver (i.e. the
            // dispatch loop) has already dropped, which only happens once
            // cancellation has already torn the scheduler down.
            let _ = self.request_tx.send(req);
        }
    }

    /// Await the next assignment, or `None` if the scheduler has shut down.
    pub async fn pull(&self) -> Option<Request> {
        let mut worker_rx = self.worker_rx.lock().unwrap();
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            req = worker_rx.recv() => req,
        }
    }
}

impl SchedulerLoop {
    /// Drive the dispatch loop until cancelled, then drop both channel
    /// halves so `pull()` callers observe closure.
    pub async fn run(mut self) {
        let mut pri_queue: VecDeque<Request> = VecDeque::new();
        let mut queue: VecDeque<Request> = VecDeque::new();
        let mut pending: Option<Request> = None;

        loop {
            if pending.is_none() {
                pending = pri_queue.pop_front().or_else(|| queue.pop_front());
            }

            match pending.clone() {
                Some(req) => {
                    // `select!` constructs every branch future up front, so
                    // `self.worker_tx.send(req)` would move `req` out before a
                    // branch is even chosen; the `incoming` arm then has no
                    // value left to re-stash into `pending`. Send a clone
                    // instead and only clear `pending` once that send future
                    // actually completes — the untouched original stays put
                    // (and gets cloned again next iteration) if `incoming`
                    // wins the race instead.
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        incoming = self.request_rx.recv() => {
                            match incoming {
                                Some(incoming) => {
                                    Self::route(incoming, &mut pri_queue, &mut queue);
                                }
                                None => break,
                            }
                        }
                        send_result = self.worker_tx.send(req) => {
                            match send_result {
                                Ok(()) => pending = None,
                                Err(_) => break,
                            }
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        incoming = self.request_rx.recv() => {
                            match incoming {
                                Some(incoming) => Self::route(incoming, &mut pri_queue, &mut queue),
                                None => break,
                            }
                        }
                    }
                }
            }
        }
    }

    fn route(req: Request, pri_queue: &mut VecDeque<Request>, queue: &mut VecDeque<Request>) {
        if req.priority > 0 {
            pri_queue.push_back(req);
        } else {
            queue.push_back(req);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    #[tokio::test]
    async fn priority_request_is_delivered_before_normal_when_pending_slot_empty() {
        let cancel = CancellationToken::new();
        let (scheduler, loop_) = scheduler(cancel.clone());
        let handle = tokio::spawn(loop_.run());

        // Give the dispatch loop a moment to block on an empty pending slot.
        tokio::task::yield_now().await;

        let normal = Request::new("t", "https://normal", "root");
        let priority = Request::new("t", "https://priority", "root").with_priority(1);
        scheduler.push(vec![normal.clone(), priority.clone()]);

        let first = scheduler.pull().await.unwrap();
        assert_eq!(first.url, "https://priority");
        let second = scheduler.pull().await.unwrap();
        assert_eq!(second.url, "https://normal");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn fifo_within_a_single_lane() {
        let cancel = CancellationToken::new();
        let (scheduler, loop_) = scheduler(cancel.clone());
        let handle = tokio::spawn(loop_.run());
        tokio::task::yield_now().await;

        scheduler.push(vec![
            Request::new("t", "https://a", "root"),
            Request::new("t", "https://b", "root"),
        ]);

        assert_eq!(scheduler.pull().await.unwrap().url, "https://a");
        assert_eq!(scheduler.pull().await.unwrap().url, "https://b");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn normal_already_pending_is_not_preempted_by_later_priority_arrival() {
        let cancel = CancellationToken::new();
        let (scheduler, loop_) = scheduler(cancel.clone());
        let handle = tokio::spawn(loop_.run());
        tokio::task::yield_now().await;

        // Push the normal first and give the dispatch loop a chance to stage
        // it as `pending` before the priority request arrives.
        scheduler.push(vec![Request::new("t", "https://normal", "root")]);
        tokio::task::yield_now().await;
        scheduler.push(vec![Request::new("t", "https://priority", "root").with_priority(1)]);

        let first = scheduler.pull().await.unwrap();
        assert_eq!(first.url, "https://normal");
        let second = scheduler.pull().await.unwrap();
        assert_eq!(second.url, "https://priority");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_closes_pull() {
        let cancel = CancellationToken::new();
        let (scheduler, loop_) = scheduler(cancel.clone());
        let handle = tokio::spawn(loop_.run());

        cancel.cancel();
        assert!(scheduler.pull().await.is_none());
        handle.await.unwrap();
    }
}
