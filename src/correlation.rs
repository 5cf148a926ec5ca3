//! Pending-request table keyed by correlation id.
//!
//! Every outbound `execute-command` gets an entry holding a one-shot reply
//! sender and a deadline. An entry is removed exactly once: by its reply, by
//! its timeout, by channel teardown, or by the abandoned-entry sweep.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::warn;

use crate::error::BridgeError;

pub type Reply = Result<Value, BridgeError>;

struct PendingRequest {
    command: String,
    reply: oneshot::Sender<Reply>,
    deadline: Instant,
    /// How far a progress report pushes the deadline.
    timeout: Duration,
}

#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

/// Two independent random 64-bit tokens, as 32 hex digits.
pub(crate) fn random_id() -> String {
    format!("{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>())
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry under a fresh id.
    pub fn register(&self, command: &str, timeout: Duration) -> (String, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        let mut id = random_id();
        while pending.contains_key(&id) {
            id = random_id();
        }
        pending.insert(
            id.clone(),
            PendingRequest {
                command: command.to_string(),
                reply: tx,
                deadline: Instant::now() + timeout,
                timeout,
            },
        );
        (id, rx)
    }

    /// Hand a reply to the waiting caller. Returns `false` for an id with no
    /// live entry (a duplicate or a reply arriving after its timeout).
    pub fn resolve(&self, id: &str, reply: Reply) -> bool {
        self.answer(id, |_| reply)
    }

    /// Reject with the host's error text, attributed to the entry's command.
    pub fn reject(&self, id: &str, message: String) -> bool {
        self.answer(id, |command| {
            Err(BridgeError::Execution {
                command: command.to_string(),
                message,
            })
        })
    }

    /// Take the entry out under one lock and send what `reply` builds from its
    /// command name.
    fn answer(&self, id: &str, reply: impl FnOnce(&str) -> Reply) -> bool {
        let Some(entry) = self.pending.lock().remove(id) else {
            warn!(id, "dropping reply for unknown or expired request");
            return false;
        };
        if entry.reply.send(reply(&entry.command)).is_err() {
            warn!(id, command = %entry.command, "caller stopped waiting before reply arrived");
        }
        true
    }

    /// Remove an entry without answering it (the request never went out).
    pub fn forget(&self, id: &str) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    pub fn deadline(&self, id: &str) -> Option<Instant> {
        self.pending.lock().get(id).map(|e| e.deadline)
    }

    /// Push the deadline of a live entry out by its own timeout, measured from now.
    pub fn extend(&self, id: &str) -> bool {
        let mut pending = self.pending.lock();
        match pending.get_mut(id) {
            Some(entry) => {
                let pushed = Instant::now() + entry.timeout;
                if pushed > entry.deadline {
                    entry.deadline = pushed;
                }
                true
            }
            None => false,
        }
    }

    /// Remove the entry if its deadline is still `seen`. Returns `false` when
    /// the entry was already resolved or its deadline moved in the meantime.
    pub fn expire(&self, id: &str, seen: Instant) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(id) {
            Some(entry) if entry.deadline <= seen => {
                pending.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Reject every pending request. Used on channel teardown.
    pub fn fail_all(&self, error: &BridgeError) -> usize {
        let drained: Vec<(String, PendingRequest)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.reply.send(Err(error.clone()));
        }
        count
    }

    /// Drop entries whose caller has gone away. Returns how many were removed.
    pub fn sweep_abandoned(&self) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, entry| !entry.reply.is_closed());
        before - pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
