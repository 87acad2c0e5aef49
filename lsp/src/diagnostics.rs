//! Diagnostics dispatch: reader tasks → bounded queue → handler thread.
//!
//! Reader tasks only ever `try_send` into the queue, so a slow or stuck
//! handler fills the queue and causes drops, never a stalled read loop.
//! The handler runs on its own OS thread under `catch_unwind`; a panicking
//! handler is logged and the next event is still delivered.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;

use crate::types::Diagnostic;

/// Queue depth shared by every session of one manager.
pub(crate) const DIAGNOSTICS_QUEUE_CAPACITY: usize = 256;

/// Caller-supplied sink, invoked once per `publishDiagnostics` push with
/// the document URI and the full diagnostic set for it (possibly empty,
/// which means "cleared").
pub type DiagnosticHandler = Arc<dyn Fn(&str, &[Diagnostic]) + Send + Sync>;

#[derive(Debug)]
pub(crate) struct PublishedDiagnostics {
    pub language: String,
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Producer side handed to each transport.
#[derive(Clone)]
pub(crate) struct DiagnosticsSender {
    tx: mpsc::Sender<PublishedDiagnostics>,
}

pub(crate) fn channel(capacity: usize) -> (DiagnosticsSender, mpsc::Receiver<PublishedDiagnostics>) {
    let (tx, rx) = mpsc::channel(capacity);
    (DiagnosticsSender { tx }, rx)
}

impl DiagnosticsSender {
    /// Enqueue without waiting. Drops (with a warning) when the queue is full.
    pub fn publish(&self, event: PublishedDiagnostics) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    language = %event.language,
                    uri = %event.uri,
                    "Diagnostics queue full, dropping publish"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Diagnostics dispatcher gone, dropping publish");
            }
        }
    }
}

type HandlerSlot = Arc<RwLock<Option<DiagnosticHandler>>>;

pub(crate) struct DiagnosticsDispatcher {
    sender: DiagnosticsSender,
    handler: HandlerSlot,
}

impl DiagnosticsDispatcher {
    /// Start the dispatcher thread. It exits once every sender is dropped.
    pub fn start() -> std::io::Result<Self> {
        let (sender, rx) = channel(DIAGNOSTICS_QUEUE_CAPACITY);
        let handler: HandlerSlot = Arc::new(RwLock::new(None));
        let thread_handler = handler.clone();
        std::thread::Builder::new()
            .name("lsp-diagnostics".to_string())
            .spawn(move || run(rx, &thread_handler))?;
        Ok(Self { sender, handler })
    }

    pub fn sender(&self) -> DiagnosticsSender {
        self.sender.clone()
    }

    pub fn set_handler(&self, handler: DiagnosticHandler) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }
}

fn run(mut rx: mpsc::Receiver<PublishedDiagnostics>, handler: &HandlerSlot) {
    while let Some(event) = rx.blocking_recv() {
        // Clone out of the lock; the handler runs with no lock held.
        let current = handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(current) = current else {
            tracing::trace!(uri = %event.uri, "No diagnostics handler registered");
            continue;
        };
        tracing::debug!(
            language = %event.language,
            uri = %event.uri,
            count = event.diagnostics.len(),
            "Dispatching diagnostics"
        );
        if catch_unwind(AssertUnwindSafe(|| current(&event.uri, &event.diagnostics))).is_err() {
            tracing::warn!(
                language = %event.language,
                uri = %event.uri,
                "Diagnostics handler panicked"
            );
        }
    }
}
