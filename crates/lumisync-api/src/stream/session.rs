//! Push stream subscription with fixed-delay reconnect.
//!
//! A [`StreamSession`] owns one background task that connects through a
//! [`Connector`], decodes and inflates the body, and forwards entity updates
//! over an unbounded channel in arrival order. Any termination other than
//! cancellation is reported and followed by exactly one reconnect after
//! [`StreamConfig::reconnect_delay`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lumisync_api::stream::{StreamConfig, StreamEvent, StreamSession};
//! use tokio::sync::mpsc;
//!
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let session = StreamSession::start(Arc::new(client), StreamConfig::default(), tx);
//!
//! while let Some(event) = rx.recv().await {
//!     if let StreamEvent::Update(update) = event {
//!         println!("{}", update.id());
//!     }
//! }
//!
//! session.cancel();
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::decoder::decode_patches;
use super::inflate::{EntityUpdate, inflate};
use crate::client::ByteStream;
use crate::error::Error;

/// Source of event stream bodies. Every attempt first re-validates the
/// session, then opens the body.
pub trait Connector: Send + Sync + 'static {
    /// Obtain a valid session, logging in or refreshing as needed.
    fn ensure_session(&self) -> BoxFuture<'_, Result<(), Error>>;

    /// Open the stream body.
    fn open(&self) -> BoxFuture<'_, Result<ByteStream, Error>>;
}

// ── StreamConfig ─────────────────────────────────────────────────────

/// Reconnect policy. The delay is fixed; there is no backoff.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Pause between a termination and the next connect. Default: 5s.
    pub reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(5000),
        }
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Streaming,
    Reconnecting { delay: Duration },
    Closed,
}

/// Everything a session reports to its owner.
#[derive(Debug)]
pub enum StreamEvent {
    /// State transition.
    State(StreamState),
    /// Emitted on every attempt except the first, after the session check
    /// and before the body is opened. The owner should refresh its
    /// snapshot before trusting the deltas that follow.
    BeforeReconnect,
    /// Decoded entity update.
    Update(EntityUpdate),
    /// Termination cause. Never a cancellation.
    Error(Error),
}

// ── StreamSession ────────────────────────────────────────────────────

/// Handle to a running stream subscription.
///
/// Dropping the handle cancels the session.
pub struct StreamSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamSession {
    /// Spawn the connect/read/reconnect loop.
    pub fn start<C: Connector>(
        connector: Arc<C>,
        config: StreamConfig,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            stream_loop(connector, config, events, task_cancel).await;
        });
        Self { cancel, task }
    }

    /// Abort the in-flight read and any pending reconnect. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the background task has exited.
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the background task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Background loop ──────────────────────────────────────────────────

/// session → connect → read → report → wait → reconnect, until cancelled.
async fn stream_loop<C: Connector>(
    connector: Arc<C>,
    config: StreamConfig,
    events: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
) {
    let mut first = true;

    loop {
        let _ = events.send(StreamEvent::State(StreamState::Connecting));

        let err = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            err = connect_and_read(connector.as_ref(), &events, first) => err,
        };

        if err.is_cancelled() {
            break;
        }
        tracing::warn!(error = %err, "event stream terminated");
        if events.send(StreamEvent::Error(err)).is_err() {
            break;
        }

        let delay = config.reconnect_delay;
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "waiting before reconnect"
        );
        let _ = events.send(StreamEvent::State(StreamState::Reconnecting { delay }));

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        first = false;
    }

    let _ = events.send(StreamEvent::State(StreamState::Closed));
    tracing::debug!("event stream loop exiting");
}

/// One connection lifecycle. Always ends in an error: a clean end of body
/// is [`Error::StreamEnded`], a dropped receiver is [`Error::Cancelled`].
async fn connect_and_read<C: Connector + ?Sized>(
    connector: &C,
    events: &mpsc::UnboundedSender<StreamEvent>,
    first: bool,
) -> Error {
    if let Err(e) = connector.ensure_session().await {
        return e;
    }
    if !first && events.send(StreamEvent::BeforeReconnect).is_err() {
        return Error::Cancelled;
    }

    let body = match connector.open().await {
        Ok(body) => body,
        Err(e) => return e,
    };

    tracing::info!("event stream connected");
    let _ = events.send(StreamEvent::State(StreamState::Streaming));

    let mut patches = std::pin::pin!(decode_patches(body));
    while let Some(item) = patches.next().await {
        let patch = match item {
            Ok(patch) => patch,
            Err(e) => return e,
        };
        tracing::trace!(path = %patch.path, kind = ?patch.kind, "stream patch");

        let Some(inflated) = inflate(&patch.path, patch.data) else {
            continue;
        };
        for update in inflated.into_updates() {
            if events.send(StreamEvent::Update(update)).is_err() {
                return Error::Cancelled;
            }
        }
    }

    Error::StreamEnded
}

// ── Tests ────────────────────────────────────────────────────────────
