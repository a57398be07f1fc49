//! Response demultiplexing.
//!
//! The backend answers requests strictly in the order they were sent, so
//! dispatch is a FIFO: every backend message belongs to the oldest pending
//! request, and ReadyForQuery ends it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use pg_protocol::backend::rows_affected;
use pg_protocol::{BackendMessage, Oid, ServerNotice, TransactionStatus};

use crate::error::RequestError;
use crate::request::{PendingResponse, PreparedDescription, ResultBatch, ServerRequest};

/// Notifications buffered per channel before the oldest are dropped.
pub const MAX_PENDING_NOTIFICATIONS: usize = 1024;

/// An asynchronous LISTEN/NOTIFY delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Notifying backend process id.
    pub process_id: i32,
    /// Channel name.
    pub channel: String,
    /// Payload.
    pub payload: String,
}

#[derive(Default)]
struct Accumulator {
    batches: Vec<ResultBatch>,
    current: ResultBatch,
    parameter_types: Vec<Oid>,
    function_result: Option<Bytes>,
    error: Option<ServerNotice>,
}

impl Accumulator {
    fn finish_batch(&mut self) {
        self.batches.push(std::mem::take(&mut self.current));
    }
}

struct Pending {
    name: &'static str,
    response: PendingResponse,
    acc: Accumulator,
}

/// A finished request whose handler has not run yet.
///
/// Handlers run after the dispatch lock is released, so a handler may submit
/// further requests on the same channel.
#[must_use]
pub(crate) struct Completion {
    response: PendingResponse,
    outcome: Result<Accumulator, RequestError>,
}

impl Completion {
    pub(crate) fn run(self) {
        let acc = match self.outcome {
            Ok(acc) => acc,
            Err(e) => return self.response.fail(e),
        };
        if let Some(notice) = acc.error {
            return self.response.fail(RequestError::Server(notice));
        }
        let Accumulator {
            mut batches,
            current,
            parameter_types,
            function_result,
            ..
        } = acc;
        match self.response {
            PendingResponse::Batches(h) => h.complete(Ok(batches)),
            PendingResponse::Batch(h) => h.complete(Ok(batches.pop().unwrap_or(current))),
            PendingResponse::Prepare(h) => h.complete(Ok(PreparedDescription {
                parameter_types,
                fields: current.fields,
            })),
            PendingResponse::Synchronized(h) => {
                if let Some(h) = h {
                    h.complete(Ok(()));
                }
            }
            PendingResponse::FunctionCall(h) => h.complete(Ok(function_result)),
            PendingResponse::Discard => {}
        }
    }
}

/// Per-channel response state.
pub(crate) struct MessageDispatch {
    pending: VecDeque<Pending>,
    status: TransactionStatus,
    parameters: HashMap<String, String>,
    backend_key: Option<(i32, i32)>,
    notifications: VecDeque<Notification>,
    /// Notifications dropped since the buffer was last drained.
    notifications_dropped: usize,
    trace: Option<Box<dyn Write + Send>>,
}

impl MessageDispatch {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            status: TransactionStatus::Idle,
            parameters: HashMap::new(),
            backend_key: None,
            notifications: VecDeque::new(),
            notifications_dropped: 0,
            trace: None,
        }
    }

    fn trace(&mut self, direction: &str, name: &str) {
        if let Some(sink) = self.trace.as_mut() {
            let _ = writeln!(sink, "{direction} {name}");
            let _ = sink.flush();
        }
    }

    fn register(&mut self, request: ServerRequest) {
        for name in request.messages() {
            self.trace(">>", name);
        }
        self.pending.push_back(Pending {
            name: request.name(),
            response: request.into_response(),
            acc: Accumulator::default(),
        });
    }

    fn handle(&mut self, message: BackendMessage) -> Option<Completion> {
        self.trace("<<", message.name());
        match message {
            BackendMessage::ReadyForQuery { status } => {
                self.status = status;
                let Some(head) = self.pending.pop_front() else {
                    tracing::debug!(status = ?status, "ready for query with no request pending");
                    return None;
                };
                tracing::trace!(request = head.name, status = ?status, "request complete");
                return Some(Completion {
                    response: head.response,
                    outcome: Ok(head.acc),
                });
            }
            BackendMessage::ParameterStatus { name, value } => {
                tracing::debug!(name = %name, value = %value, "parameter status");
                self.parameters.insert(name, value);
                return None;
            }
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => {
                self.backend_key = Some((process_id, secret_key));
                return None;
            }
            BackendMessage::NotificationResponse {
                process_id,
                channel,
                payload,
            } => {
                self.notify(Notification {
                    process_id,
                    channel,
                    payload,
                });
                return None;
            }
            BackendMessage::NoticeResponse(notice) => {
                tracing::info!(notice = %notice, "server notice");
                return None;
            }
            _ => {}
        }

        let Some(head) = self.pending.front_mut() else {
            tracing::warn!(message = message.name(), "unsolicited backend message");
            return None;
        };
        let acc = &mut head.acc;
        match message {
            BackendMessage::RowDescription { fields } => acc.current.fields = fields,
            BackendMessage::NoData => acc.current.fields.clear(),
            BackendMessage::ParameterDescription { types } => acc.parameter_types = types,
            BackendMessage::DataRow { values } => acc.current.rows.push(values),
            BackendMessage::CommandComplete { tag } => {
                acc.current.rows_affected = rows_affected(&tag);
                acc.current.command = tag;
                acc.finish_batch();
            }
            BackendMessage::EmptyQueryResponse => acc.finish_batch(),
            BackendMessage::PortalSuspended => {
                acc.current.suspended = true;
                acc.finish_batch();
            }
            BackendMessage::FunctionCallResponse { value } => acc.function_result = value,
            BackendMessage::ErrorResponse(notice) => {
                tracing::debug!(request = head.name, error = %notice, "request failed");
                acc.error.get_or_insert(notice);
            }
            BackendMessage::ParseComplete
            | BackendMessage::BindComplete
            | BackendMessage::CloseComplete => {}
            other => {
                tracing::warn!(message = other.name(), "unexpected backend message");
            }
        }
        None
    }

    fn notify(&mut self, notification: Notification) {
        if self.notifications.len() >= MAX_PENDING_NOTIFICATIONS {
            if let Some(oldest) = self.notifications.pop_front() {
                if self.notifications_dropped == 0 {
                    tracing::warn!(
                        channel = %oldest.channel,
                        capacity = MAX_PENDING_NOTIFICATIONS,
                        "notification buffer full, dropping oldest"
                    );
                }
                self.notifications_dropped += 1;
            }
        }
        self.notifications.push_back(notification);
    }

    fn take_notifications(&mut self) -> Vec<Notification> {
        if self.notifications_dropped > 0 {
            tracing::debug!(
                dropped = self.notifications_dropped,
                "notifications dropped since last drain"
            );
            self.notifications_dropped = 0;
        }
        self.notifications.drain(..).collect()
    }

    fn channel_closed(&mut self) -> Vec<Completion> {
        self.pending
            .drain(..)
            .map(|p| Completion {
                response: p.response,
                outcome: Err(RequestError::ChannelClosed),
            })
            .collect()
    }
}

/// Shared handle to a channel's response state.
#[derive(Clone)]
pub struct DispatchHandle {
    inner: Arc<Mutex<MessageDispatch>>,
}

impl DispatchHandle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MessageDispatch::new())),
        }
    }

    /// Transaction status from the latest ReadyForQuery.
    #[must_use]
    pub fn transaction_status(&self) -> TransactionStatus {
        self.inner.lock().status
    }

    /// Install or remove the protocol trace sink.
    ///
    /// Every frontend message written is traced as `>> Name` and every
    /// backend message read as `<< Name`. Sink errors are ignored.
    pub fn set_protocol_trace(&self, sink: Option<Box<dyn Write + Send>>) {
        self.inner.lock().trace = sink;
    }

    /// Latest value the server reported for a run-time parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.inner.lock().parameters.get(name).cloned()
    }

    /// Process id and secret key for cancellation, once reported.
    #[must_use]
    pub fn backend_key(&self) -> Option<(i32, i32)> {
        self.inner.lock().backend_key
    }

    /// Drain the notifications received so far, oldest first.
    ///
    /// At most [`MAX_PENDING_NOTIFICATIONS`] are kept between drains; older
    /// ones are dropped as new ones arrive.
    pub fn take_notifications(&self) -> Vec<Notification> {
        self.inner.lock().take_notifications()
    }

    /// Requests written and not yet completed.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub(crate) fn register(&self, request: ServerRequest) {
        self.inner.lock().register(request);
    }

    pub(crate) fn trace_outbound(&self, name: &str) {
        self.inner.lock().trace(">>", name);
    }

    pub(crate) fn handle(&self, message: BackendMessage) -> Option<Completion> {
        self.inner.lock().handle(message)
    }

    pub(crate) fn channel_closed(&self) -> Vec<Completion> {
        self.inner.lock().channel_closed()
    }
}

impl fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("DispatchHandle")
            .field("status", &inner.status)
            .field("pending", &inner.pending.len())
            .finish_non_exhaustive()
    }
}
