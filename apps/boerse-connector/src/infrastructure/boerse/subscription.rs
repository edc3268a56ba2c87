//! Stream Subscriptions
//!
//! Background receive loop for one server-push feed.
//!
//! A [`StreamSubscription`] owns at most one worker task at a time. The
//! worker opens the feed, parses every `message` event as JSON, stores it in
//! the subscription's buffer and hands it to the optional callback. It is
//! the only writer of the buffer; readers take a lock.
//!
//! # Lifecycle
//!
//! ```text
//!          start()              stop()             worker joined
//!   Idle ──────────► Running ──────────► Stopping ──────────────► Idle
//!                       │
//!                       └──── connection lost / open failed ─────► Idle
//! ```
//!
//! There is no reconnect. A subscription that fell back to `Idle` can be
//! started again.
//!
//! # Failure Reporting
//!
//! Unparseable events are skipped. Callback failures, callback panics, open
//! failures and disconnects are passed to the error hook, which logs them by
//! default. A failing callback never ends the loop.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::connector::Connector;
use crate::application::ports::EventSourcePort;
use crate::domain::params::Params;
use crate::domain::stream::{BufferMode, MessageBuffer, ServerEvent, StreamState};
use crate::infrastructure::metrics;

// =============================================================================
// Errors and Hooks
// =============================================================================

/// Boxed error type returned by callbacks and event sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with every parsed payload on the worker task.
///
/// Runs synchronously inside the receive loop; a slow callback delays the
/// next event.
pub type MessageCallback = Arc<dyn Fn(&Value) -> Result<(), BoxError> + Send + Sync>;

/// Hook receiving every failure the worker reports.
pub type ErrorHook = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// Failure reported by a subscription worker.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Feed could not be opened.
    #[error("failed to open stream {endpoint}: {source}")]
    Open {
        /// Endpoint name.
        endpoint: String,
        /// Underlying failure.
        source: BoxError,
    },
    /// Feed ended without a stop request.
    #[error("stream {endpoint} disconnected")]
    Disconnected {
        /// Endpoint name.
        endpoint: String,
        /// Read failure, if the feed did not simply end.
        #[source]
        cause: Option<BoxError>,
    },
    /// Callback returned an error or panicked.
    #[error("callback for stream {endpoint} failed: {message}")]
    Callback {
        /// Endpoint name.
        endpoint: String,
        /// Error text or panic message.
        message: String,
        /// Whether the callback panicked.
        panicked: bool,
    },
}

fn log_stream_error(err: &StreamError) {
    match err {
        StreamError::Disconnected { endpoint, cause } => {
            let cause = cause.as_ref().map(ToString::to_string);
            tracing::error!(endpoint = %endpoint, cause = ?cause, "Stream disconnected");
        }
        other => tracing::error!(error = %other, "Stream subscription error"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

// =============================================================================
// Subscription
// =============================================================================

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<StreamState>,
    buffer: RwLock<MessageBuffer>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background subscription to one feed.
///
/// Dropping the subscription cancels its worker, which then closes the
/// connection.
pub struct StreamSubscription<S: EventSourcePort = Connector> {
    source: Arc<S>,
    endpoint: String,
    params: Params,
    callback: Option<MessageCallback>,
    on_error: ErrorHook,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl<S: EventSourcePort> StreamSubscription<S> {
    /// Create an idle subscription keeping only the latest payload.
    #[must_use]
    pub fn new(source: Arc<S>, endpoint: impl Into<String>, params: Params) -> Self {
        Self {
            source,
            endpoint: endpoint.into(),
            params,
            callback: None,
            on_error: Arc::new(log_stream_error),
            shared: Arc::new(Shared::default()),
            worker: Mutex::new(None),
        }
    }

    /// Choose how payloads are retained. Clears the buffer.
    #[must_use]
    pub fn with_buffer_mode(self, mode: BufferMode) -> Self {
        *self.shared.buffer.write() = MessageBuffer::new(mode);
        self
    }

    /// Retain every payload instead of only the latest.
    #[must_use]
    pub fn with_cache(self, cache: bool) -> Self {
        self.with_buffer_mode(if cache {
            BufferMode::Cache
        } else {
            BufferMode::Latest
        })
    }

    /// Invoke `callback` with every parsed payload.
    #[must_use]
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Replace the default logging error hook.
    #[must_use]
    pub fn with_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(hook);
        self
    }

    /// Start the worker. No-op while running.
    ///
    /// Payloads retained from a previous run are discarded.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut worker = self.worker.lock();

        {
            let mut state = self.shared.state.write();
            if *state == StreamState::Running && worker.is_some() {
                tracing::debug!(endpoint = %self.endpoint, "Stream already running");
                return;
            }
            *state = StreamState::Running;
        }
        self.shared.buffer.write().clear();

        let cancel = CancellationToken::new();
        let task = WorkerTask {
            source: Arc::clone(&self.source),
            endpoint: self.endpoint.clone(),
            params: self.params.clone(),
            callback: self.callback.clone(),
            on_error: Arc::clone(&self.on_error),
            shared: Arc::clone(&self.shared),
            cancel: cancel.clone(),
        };

        let isin = self
            .params
            .get("isin")
            .and_then(Value::as_str)
            .unwrap_or("-");
        let span = tracing::info_span!("stream_worker", endpoint = %self.endpoint, isin = %isin);

        metrics::adjust_running_subscriptions(1.0);
        let handle = tokio::spawn(task.run().instrument(span));

        tracing::info!(endpoint = %self.endpoint, isin = %isin, "Stream subscription started");

        if let Some(previous) = worker.replace(Worker { cancel, handle }) {
            previous.cancel.cancel();
        }
    }

    /// Stop the worker and wait for it to exit. No-op when idle.
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        {
            let mut state = self.shared.state.write();
            if *state == StreamState::Running {
                *state = StreamState::Stopping;
            }
        }

        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            tracing::error!(endpoint = %self.endpoint, error = %e, "Stream worker failed");
        }

        {
            let mut state = self.shared.state.write();
            if *state == StreamState::Stopping {
                *state = StreamState::Idle;
            }
        }

        tracing::info!(endpoint = %self.endpoint, "Stream subscription stopped");
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.shared.state.read()
    }

    /// Whether a worker is receiving events.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == StreamState::Running
    }

    /// Most recent payload.
    #[must_use]
    pub fn latest(&self) -> Option<Value> {
        self.shared.buffer.read().latest().cloned()
    }

    /// All retained payloads, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<Value> {
        self.shared.buffer.read().all().to_vec()
    }

    /// Drop all retained payloads.
    pub fn clear(&self) {
        self.shared.buffer.write().clear();
    }

    /// Endpoint name.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Request parameters.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }
}

impl<S: EventSourcePort> std::fmt::Debug for StreamSubscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSubscription")
            .field("endpoint", &self.endpoint)
            .field("params", &self.params)
            .field("state", &self.state())
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: EventSourcePort> Drop for StreamSubscription<S> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

struct WorkerTask<S: EventSourcePort> {
    source: Arc<S>,
    endpoint: String,
    params: Params,
    callback: Option<MessageCallback>,
    on_error: ErrorHook,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl<S: EventSourcePort> WorkerTask<S> {
    async fn run(self) {
        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.finish(false);
                return;
            }
            opened = self.source.open(&self.endpoint, &self.params) => opened,
        };

        let mut events = match opened {
            Ok(events) => events,
            Err(e) => {
                (self.on_error)(&StreamError::Open {
                    endpoint: self.endpoint.clone(),
                    source: Box::new(e),
                });
                self.finish(true);
                return;
            }
        };

        tracing::debug!("Receiving events");

        let disconnected = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break false,
                next = events.next() => match next {
                    Some(Ok(event)) => self.handle_event(&event),
                    Some(Err(e)) => {
                        let cause: BoxError = Box::new(e);
                        self.report_disconnect(Some(cause));
                        break true;
                    }
                    None => {
                        self.report_disconnect(None);
                        break true;
                    }
                },
            }
        };

        drop(events);
        self.finish(disconnected);
    }

    fn handle_event(&self, event: &ServerEvent) {
        if !event.is_message() {
            return;
        }

        let payload: Value = match serde_json::from_str(&event.data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable event");
                metrics::record_stream_skipped(&self.endpoint);
                return;
            }
        };

        metrics::record_stream_message(&self.endpoint);

        let Some(callback) = &self.callback else {
            self.shared.buffer.write().push(payload);
            return;
        };

        self.shared.buffer.write().push(payload.clone());

        let failure = match catch_unwind(AssertUnwindSafe(|| callback(&payload))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => StreamError::Callback {
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
                panicked: false,
            },
            Err(panic) => StreamError::Callback {
                endpoint: self.endpoint.clone(),
                message: panic_message(&*panic),
                panicked: true,
            },
        };

        metrics::record_callback_failure(&self.endpoint);
        (self.on_error)(&failure);
    }

    fn report_disconnect(&self, cause: Option<BoxError>) {
        metrics::record_disconnect(&self.endpoint);
        (self.on_error)(&StreamError::Disconnected {
            endpoint: self.endpoint.clone(),
            cause,
        });
    }

    fn finish(&self, disconnected: bool) {
        if disconnected {
            let mut state = self.shared.state.write();
            if *state == StreamState::Running {
                *state = StreamState::Idle;
            }
        }
        metrics::adjust_running_subscriptions(-1.0);
        tracing::debug!(disconnected, "Stream worker exited");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::EventStream;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("fake source failure")]
    struct FakeError;

    /// Emits a fixed list of events, then ends.
    struct Scripted(Vec<ServerEvent>);

    #[async_trait]
    impl EventSourcePort for Scripted {
        type Error = FakeError;

        async fn open(&self, _: &str, _: &Params) -> Result<EventStream<FakeError>, FakeError> {
            Ok(futures_util::stream::iter(self.0.clone().into_iter().map(Ok)).boxed())
        }
    }

    fn collecting_hook() -> (Arc<Mutex<Vec<String>>>, impl Fn(&StreamError) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |err: &StreamError| sink.lock().push(err.to_string()))
    }

    async fn wait_idle<S: EventSourcePort>(sub: &StreamSubscription<S>) {
        for _ in 0..200 {
            if sub.state() == StreamState::Idle {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("subscription did not return to idle");
    }

    #[tokio::test]
    async fn skips_unparseable_and_non_message_events() {
        let events = vec![
            ServerEvent::message("{\"bid\": 1}"),
            ServerEvent::message("not json"),
            ServerEvent {
                event: "ping".to_string(),
                ..ServerEvent::message("{\"bid\": 99}")
            },
            ServerEvent::message("{\"bid\": 2}"),
        ];
        let (_, hook) = collecting_hook();
        let sub = StreamSubscription::new(Arc::new(Scripted(events)), "quote_box", Params::new())
            .with_cache(true)
            .with_error_hook(hook);

        sub.start();
        wait_idle(&sub).await;

        assert_eq!(sub.all(), vec![json!({"bid": 1}), json!({"bid": 2})]);
    }

    #[tokio::test]
    async fn end_of_stream_reports_disconnect_and_goes_idle() {
        let (seen, hook) = collecting_hook();
        let sub = StreamSubscription::new(
            Arc::new(Scripted(vec![ServerEvent::message("1")])),
            "bid_ask_overview",
            Params::new(),
        )
        .with_error_hook(hook);

        sub.start();
        wait_idle(&sub).await;

        assert_eq!(sub.latest(), Some(json!(1)));
        assert_eq!(*seen.lock(), vec!["stream bid_ask_overview disconnected"]);
        sub.stop().await;
        assert_eq!(sub.state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn callback_errors_and_panics_do_not_stop_the_loop() {
        let events = (0..4).map(|i| ServerEvent::message(i.to_string())).collect();
        let (seen, hook) = collecting_hook();
        let sub = StreamSubscription::new(Arc::new(Scripted(events)), "e", Params::new())
            .with_cache(true)
            .with_callback(|payload| match payload.as_u64() {
                Some(1) => Err("bad payload".into()),
                Some(2) => panic!("callback exploded"),
                _ => Ok(()),
            })
            .with_error_hook(hook);

        sub.start();
        wait_idle(&sub).await;

        assert_eq!(sub.all().len(), 4);
        let seen = seen.lock();
        assert_eq!(seen[0], "callback for stream e failed: bad payload");
        assert_eq!(seen[1], "callback for stream e failed: callback exploded");
        assert_eq!(seen[2], "stream e disconnected");
    }

    #[test]
    fn panic_message_handles_both_payload_kinds() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*s), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*owned), "owned");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }
}
