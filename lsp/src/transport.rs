//! Wire transport: framed JSON-RPC over one server's byte streams.
//!
//! Two tasks per transport. The writer task owns the output stream and
//! drains an unbounded command queue, so enqueueing never waits on the
//! server. The reader task owns the input stream and routes every frame:
//! responses to the pending table, server requests to an immediate reply,
//! diagnostics to the dispatch queue. Nothing on the read path awaits
//! anything but the next frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::diagnostics::{DiagnosticsSender, PublishedDiagnostics};
use crate::error::LspError;
use crate::pending::{CloseReason, PendingTable};
use crate::protocol::{self, Incoming, Notification, Request, error_codes};
use crate::responses::{LspDiagnostic, PublishDiagnosticsParams};

#[derive(Debug)]
enum WriterCommand {
    Send(Value),
    Shutdown,
}

pub(crate) struct Transport {
    language: String,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    next_id: AtomicU64,
    pending: Arc<PendingTable>,
    request_timeout: Duration,
    reader_handle: JoinHandle<()>,
    connection_lost: Option<oneshot::Receiver<CloseReason>>,
}

impl Transport {
    /// Start the reader and writer tasks. Must be called inside a tokio
    /// runtime.
    pub fn start<R, W>(
        language: &str,
        reader: R,
        writer: W,
        diagnostics: DiagnosticsSender,
        request_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending = Arc::new(PendingTable::new(language));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(
            FrameWriter::new(writer),
            writer_rx,
            pending.clone(),
            language.to_string(),
        ));

        let router = Router {
            language: language.to_string(),
            pending: pending.clone(),
            writer_tx: writer_tx.clone(),
            diagnostics,
        };
        let (lost_tx, lost_rx) = oneshot::channel();
        let reader_handle = tokio::spawn(read_loop(FrameReader::new(reader), router, lost_tx));

        Self {
            language: language.to_string(),
            writer_tx,
            next_id: AtomicU64::new(1),
            pending,
            request_timeout,
            reader_handle,
            connection_lost: Some(lost_rx),
        }
    }

    /// Send a request and wait for its response, bounded by the default
    /// request timeout.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, LspError> {
        self.call_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// Send a request and wait at most `timeout` for the matching response.
    ///
    /// A timeout abandons only this request: the entry is removed, the
    /// server is told to cancel it, and the connection stays up.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, LspError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.pending.register(id, method)?;
        let guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        self.enqueue(&Request::new(id, method, params))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => {
                std::mem::forget(guard);
                outcome
            }
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                let elapsed = self
                    .pending
                    .remove(id)
                    .map_or(timeout, |r| r.created().elapsed());
                std::mem::forget(guard);
                tracing::warn!(
                    language = %self.language,
                    method,
                    id,
                    in_flight = self.pending.len(),
                    "Request timed out after {}ms",
                    elapsed.as_millis()
                );
                let _ = self.notify("$/cancelRequest", Some(serde_json::json!({ "id": id })));
                Err(LspError::RequestTimeout {
                    language: self.language.clone(),
                    method: method.to_string(),
                    elapsed,
                })
            }
        }
    }

    /// Enqueue a notification. Never waits on the server; fails only if
    /// the connection is already closed.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        if let Some(reason) = self.pending.close_reason() {
            return Err(reason.to_error(&self.language));
        }
        self.enqueue(&Notification::new(method, params))
    }

    fn enqueue<T: Serialize>(&self, msg: &T) -> Result<(), LspError> {
        let frame = serde_json::to_value(msg).map_err(|e| LspError::Protocol {
            language: self.language.clone(),
            message: format!("serializing outgoing message: {e}"),
        })?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> LspError {
        self.pending
            .close_reason()
            .unwrap_or(CloseReason::Exited)
            .to_error(&self.language)
    }

    /// Why the connection ended, if it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.pending.close_reason()
    }

    pub fn is_closed(&self) -> bool {
        self.close_reason().is_some()
    }

    /// Stop the connection: flush queued frames, close the output stream
    /// and fail anything still in flight with [`LspError::Stopped`].
    pub fn close(&self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
        let failed = self.pending.close(CloseReason::Shutdown);
        if failed > 0 {
            tracing::debug!(language = %self.language, failed, "Closed transport with requests in flight");
        }
    }

    /// Resolves with the final close reason once the reader sees the end of
    /// the server's output. A connection ended by [`Transport::close`]
    /// reports [`CloseReason::Shutdown`]. Can be taken once.
    pub fn take_connection_lost(&mut self) -> Option<oneshot::Receiver<CloseReason>> {
        self.connection_lost.take()
    }
}

// The writer task is not aborted: once the reader (and its sender) is
// gone it drains what is queued, then exits.
impl Drop for Transport {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Removes the pending entry if the calling future is dropped mid-wait.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    pending: Arc<PendingTable>,
    language: String,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriterCommand::Send(frame) => {
                if let Err(e) = writer.write_frame(&frame).await {
                    tracing::warn!(language = %language, "LSP write error: {e}");
                    pending.close(CloseReason::Exited);
                    return;
                }
            }
            WriterCommand::Shutdown => {
                let _ = writer.close().await;
                return;
            }
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    router: Router,
    lost_tx: oneshot::Sender<CloseReason>,
) {
    let reason = loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => router.route(frame),
            Ok(None) => {
                tracing::info!(language = %router.language, "Language server closed its output");
                break CloseReason::Exited;
            }
            Err(e) => {
                tracing::warn!(language = %router.language, "Unreadable frame from language server: {e}");
                break CloseReason::Protocol(e.to_string());
            }
        }
    };
    router.pending.close(reason.clone());
    let _ = lost_tx.send(router.pending.close_reason().unwrap_or(reason));
}

/// Everything the reader task needs to route one frame.
struct Router {
    language: String,
    pending: Arc<PendingTable>,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    diagnostics: DiagnosticsSender,
}

impl Router {
    fn route(&self, frame: Value) {
        let Some(incoming) = protocol::classify(frame) else {
            tracing::trace!(language = %self.language, "Ignoring non-JSON-RPC frame");
            return;
        };

        match incoming {
            Incoming::Response { id, outcome } => {
                if !self.pending.complete(id, outcome) {
                    tracing::trace!(language = %self.language, id, "Response for abandoned request");
                }
            }
            Incoming::ServerRequest { id, method, params } => {
                self.answer_server_request(id, &method, params.as_ref());
            }
            Incoming::Notification { method, params } => {
                self.handle_notification(&method, params);
            }
        }
    }

    /// Servers block on some of their own requests, so every one gets an
    /// answer: a benign result for the ones we understand, `MethodNotFound`
    /// otherwise.
    fn answer_server_request(&self, id: Value, method: &str, params: Option<&Value>) {
        tracing::debug!(language = %self.language, "Server request: {method}");
        let reply = match method {
            "workspace/configuration" => {
                let items = params
                    .and_then(|p| p.get("items"))
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                protocol::response(id, Value::Array(vec![Value::Null; items]))
            }
            "client/registerCapability"
            | "client/unregisterCapability"
            | "window/workDoneProgress/create" => protocol::response(id, Value::Null),
            "workspace/applyEdit" => {
                protocol::response(id, serde_json::json!({ "applied": false }))
            }
            _ => protocol::error_response(
                id,
                error_codes::METHOD_NOT_FOUND,
                &format!("Method not found: {method}"),
            ),
        };
        let _ = self.writer_tx.send(WriterCommand::Send(reply));
    }

    fn handle_notification(&self, method: &str, params: Option<Value>) {
        match method {
            "textDocument/publishDiagnostics" => {
                let Some(params) = params else { return };
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(published) => self.diagnostics.publish(PublishedDiagnostics {
                        language: self.language.clone(),
                        uri: published.uri,
                        diagnostics: published
                            .diagnostics
                            .into_iter()
                            .map(LspDiagnostic::into_diagnostic)
                            .collect(),
                    }),
                    Err(e) => {
                        tracing::debug!(language = %self.language, "Bad publishDiagnostics: {e}");
                    }
                }
            }
            "window/logMessage" | "window/showMessage" => {
                let message = params
                    .as_ref()
                    .and_then(|p| p.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                tracing::debug!(language = %self.language, "{method}: {message}");
            }
            _ => {
                tracing::trace!(language = %self.language, "Ignoring notification: {method}");
            }
        }
    }
}
