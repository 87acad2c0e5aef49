//! Pending-request table: request id → waiting caller.
//!
//! Each entry owns a oneshot completion slot. The slot is filled exactly
//! once: by the reader task on a matching response, by [`PendingTable::close`]
//! when the connection ends, or never (the caller timed out and removed it).
//! Once closed, the table refuses new registrations so a request issued
//! after the reader exited fails immediately instead of waiting out its
//! timeout.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::LspError;
use crate::protocol::RpcError;

pub(crate) type Completion = Result<Value, LspError>;

/// Why a connection stopped accepting requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// The server closed its output stream.
    Exited,
    /// The server wrote an unparseable frame.
    Protocol(String),
    /// We shut the connection down.
    Shutdown,
}

impl CloseReason {
    pub fn to_error(&self, language: &str) -> LspError {
        let language = language.to_string();
        match self {
            Self::Exited => LspError::ServerCrashed { language },
            Self::Protocol(message) => LspError::Protocol {
                language,
                message: message.clone(),
            },
            Self::Shutdown => LspError::Stopped { language },
        }
    }
}

pub(crate) struct PendingRequest {
    method: String,
    created: Instant,
    slot: oneshot::Sender<Completion>,
}

impl PendingRequest {
    pub fn created(&self) -> Instant {
        self.created
    }
}

#[derive(Default)]
struct Inner {
    requests: HashMap<u64, PendingRequest>,
    closed: Option<CloseReason>,
}

pub(crate) struct PendingTable {
    language: String,
    inner: Mutex<Inner>,
}

impl PendingTable {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for `id`. Fails if the connection already closed.
    pub fn register(
        &self,
        id: u64,
        method: &str,
    ) -> Result<oneshot::Receiver<Completion>, LspError> {
        let (slot, rx) = oneshot::channel();
        let mut inner = self.lock();
        if let Some(reason) = &inner.closed {
            return Err(reason.to_error(&self.language));
        }
        inner.requests.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                created: Instant::now(),
                slot,
            },
        );
        Ok(rx)
    }

    /// Deliver a response. Returns `false` if nobody is waiting on `id`
    /// (already timed out, or an id we never issued).
    pub fn complete(&self, id: u64, outcome: Result<Value, RpcError>) -> bool {
        let Some(request) = self.lock().requests.remove(&id) else {
            return false;
        };
        let outcome = outcome.map_err(|e| LspError::Server {
            language: self.language.clone(),
            method: request.method.clone(),
            code: e.code,
            message: e.message,
        });
        // The receiver may have been dropped by a cancelled caller.
        request.slot.send(outcome).is_ok()
    }

    /// Abandon a request (timeout or failed write).
    pub fn remove(&self, id: u64) -> Option<PendingRequest> {
        self.lock().requests.remove(&id)
    }

    /// Fail every in-flight request and refuse new ones. Idempotent; the
    /// first reason wins. Returns how many waiters were resolved.
    pub fn close(&self, reason: CloseReason) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut inner = self.lock();
            if inner.closed.is_none() {
                inner.closed = Some(reason);
            }
            inner.requests.drain().map(|(_, r)| r).collect()
        };

        let Some(reason) = self.close_reason() else {
            return 0;
        };
        let count = drained.len();
        for request in drained {
            tracing::debug!(
                language = %self.language,
                method = %request.method,
                "Failing in-flight request: connection closed"
            );
            let _ = request.slot.send(Err(reason.to_error(&self.language)));
        }
        count
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.lock().closed.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().requests.len()
    }
}
