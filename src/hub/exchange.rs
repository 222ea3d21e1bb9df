//! Bookkeeping for outstanding broadcast, dispatch and config-sync calls.
//!
//! Every call opens one entry in the [`ExchangeTable`] keyed by a fresh task
//! id. The entry leaves the table exactly once: either the completion path
//! removes it when enough responses have arrived, or the caller's timeout
//! path expires it. Removal is the "already resolved" guard, so whichever
//! path loses finds nothing and does nothing.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use super::types::Payload;

/// Which protocol an exchange belongs to. Responses are only matched
/// against exchanges of their own kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeKind {
    Command,
    Task,
    ConfigSync,
}

impl ExchangeKind {
    /// Wire tag of the response message for this kind.
    pub fn response_type(self) -> &'static str {
        match self {
            ExchangeKind::Command => "command_result",
            ExchangeKind::Task => "task_result",
            ExchangeKind::ConfigSync => "config_sync_ack",
        }
    }
}

/// What happened to a recorded response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Stored; the exchange is still waiting for more.
    Pending,
    /// Stored and the exchange resolved.
    Completed,
    /// No matching open exchange (late, duplicate after resolution, or unknown).
    Discarded,
}

struct Exchange {
    kind: ExchangeKind,
    expected: usize,
    /// Counted responses. Only task dispatch completes on this counter;
    /// broadcast and config sync complete on `results.len()`.
    received: usize,
    results: Vec<Payload>,
    done: Option<oneshot::Sender<Vec<Payload>>>,
    progress: Option<UnboundedSender<Payload>>,
}

impl Exchange {
    fn is_satisfied(&self) -> bool {
        match self.kind {
            ExchangeKind::Task => self.received == self.expected,
            ExchangeKind::Command | ExchangeKind::ConfigSync => self.results.len() >= self.expected,
        }
    }
}

#[derive(Default)]
pub struct ExchangeTable {
    open: HashMap<String, Exchange>,
}

impl ExchangeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an exchange expecting `expected` responses. Returns the generated
    /// task id and the receiver that yields the results on completion.
    pub fn open(
        &mut self,
        kind: ExchangeKind,
        expected: usize,
        progress: Option<UnboundedSender<Payload>>,
    ) -> (String, oneshot::Receiver<Vec<Payload>>) {
        let task_id = uuid::Uuid::new_v4().to_string();
        let (done, rx) = oneshot::channel();
        self.open.insert(
            task_id.clone(),
            Exchange {
                kind,
                expected,
                received: 0,
                results: Vec::with_capacity(expected),
                done: Some(done),
                progress,
            },
        );
        (task_id, rx)
    }

    /// Record one response. Resolves and removes the exchange once it is satisfied.
    pub fn record(&mut self, kind: ExchangeKind, task_id: &str, payload: Payload) -> RecordOutcome {
        let Some(exchange) = self.open.get_mut(task_id).filter(|e| e.kind == kind) else {
            return RecordOutcome::Discarded;
        };

        exchange.received += 1;
        exchange.results.push(payload);
        if !exchange.is_satisfied() {
            return RecordOutcome::Pending;
        }

        if let Some(Exchange {
            done: Some(done),
            results,
            ..
        }) = self.open.remove(task_id)
        {
            // The caller may already have given up; nothing to do then.
            let _ = done.send(results);
        }
        RecordOutcome::Completed
    }

    /// Forward a progress event to the exchange's progress channel.
    /// Returns `false` if there is no open task exchange for `task_id`.
    pub fn relay_progress(&self, task_id: &str, progress: Payload) -> bool {
        match self.open.get(task_id) {
            Some(Exchange {
                kind: ExchangeKind::Task,
                progress: slot,
                ..
            }) => {
                if let Some(tx) = slot {
                    let _ = tx.send(progress);
                }
                true
            }
            _ => false,
        }
    }

    /// Timeout path: remove the exchange and return whatever accumulated.
    /// Returns `None` if the exchange already resolved.
    pub fn expire(&mut self, task_id: &str) -> Option<Vec<Payload>> {
        self.open.remove(task_id).map(|e| e.results)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.open.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
