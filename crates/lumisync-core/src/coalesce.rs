// ── Command coalescing ──
//
// Folds bursts of control intents into one outbound command. Every
// `submit` pushes the quiescence deadline out to `window` after the most
// recent call; when the deadline passes, the accumulated intent is sent
// once and every waiter receives a clone of the same outcome.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CoreError;

/// Quiescence window applied when none is given.
pub const DEFAULT_QUIESCENCE_WINDOW: Duration = Duration::from_millis(150);

/// A partial control intent that can absorb a later one.
pub trait Intent: Send + 'static {
    /// Fold `next` into `self`; `next` wins where the two overlap.
    fn fold(&mut self, next: Self);
}

/// Partial device record, merged key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlPatch(pub Map<String, Value>);

impl ControlPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl Intent for ControlPatch {
    fn fold(&mut self, next: Self) {
        self.0.extend(next.0);
    }
}

type Dispatch<I, T> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<T, CoreError>> + Send + Sync>;
type Waiter<T> = oneshot::Sender<Result<T, CoreError>>;

struct PendingBatch<I, T> {
    generation: u64,
    deadline: Instant,
    intent: I,
    waiters: Vec<Waiter<T>>,
    timer: Option<JoinHandle<()>>,
}

struct Shared<I, T> {
    window: Duration,
    dispatch: Dispatch<I, T>,
    pending: Mutex<Option<PendingBatch<I, T>>>,
    next_generation: Mutex<u64>,
}

impl<I, T> Shared<I, T> {
    fn pending(&self) -> MutexGuard<'_, Option<PendingBatch<I, T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_generation(&self) -> u64 {
        let mut next = self
            .next_generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *next += 1;
        *next
    }
}

/// Debounces intents for one target and issues a single command per burst.
///
/// Dropping the coalescer aborts any open batch; its waiters receive
/// [`CoreError::Cancelled`].
pub struct CommandCoalescer<I: Intent, T: Clone + Send + 'static> {
    shared: Arc<Shared<I, T>>,
}

impl<I: Intent, T: Clone + Send + 'static> CommandCoalescer<I, T> {
    /// Coalesce with the default 150 ms window.
    pub fn new<F, Fut>(dispatch: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        Self::with_window(DEFAULT_QUIESCENCE_WINDOW, dispatch)
    }

    pub fn with_window<F, Fut>(window: Duration, dispatch: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        let dispatch: Dispatch<I, T> =
            Arc::new(move |intent: I| -> BoxFuture<'static, Result<T, CoreError>> {
                Box::pin(dispatch(intent))
            });
        Self {
            shared: Arc::new(Shared {
                window,
                dispatch,
                pending: Mutex::new(None),
                next_generation: Mutex::new(0),
            }),
        }
    }

    /// Add `intent` to the open batch (or open one) and wait for the batch
    /// to settle.
    pub async fn submit(&self, intent: I) -> Result<T, CoreError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending();
            let deadline = Instant::now() + self.shared.window;

            if let Some(batch) = pending.as_mut() {
                batch.intent.fold(intent);
                batch.deadline = deadline;
                batch.waiters.push(tx);
            } else {
                let generation = self.shared.bump_generation();
                let timer = tokio::spawn(run_batch(Arc::clone(&self.shared), generation));
                *pending = Some(PendingBatch {
                    generation,
                    deadline,
                    intent,
                    waiters: vec![tx],
                    timer: Some(timer),
                });
            }
        }

        rx.await.map_err(|_| CoreError::Cancelled)?
    }

    /// Whether a batch is waiting for its window to close.
    pub fn is_pending(&self) -> bool {
        self.shared.pending().is_some()
    }

    /// Drop the open batch without sending it. Waiters receive
    /// [`CoreError::Cancelled`]. Idempotent.
    pub fn abort(&self) {
        let Some(batch) = self.shared.pending().take() else {
            return;
        };
        if let Some(timer) = batch.timer {
            timer.abort();
        }
        debug!(waiters = batch.waiters.len(), "coalesced batch aborted");
        for waiter in batch.waiters {
            let _ = waiter.send(Err(CoreError::Cancelled));
        }
    }
}

impl<I: Intent, T: Clone + Send + 'static> Drop for CommandCoalescer<I, T> {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Sleep until the batch's (moving) deadline passes, then send it.
async fn run_batch<I: Intent, T: Clone + Send + 'static>(
    shared: Arc<Shared<I, T>>,
    generation: u64,
) {
    let batch = loop {
        let deadline = {
            let mut pending = shared.pending();
            let deadline = match pending.as_ref() {
                Some(batch) if batch.generation == generation => batch.deadline,
                _ => return,
            };
            if Instant::now() >= deadline {
                break pending.take();
            }
            deadline
        };
        tokio::time::sleep_until(deadline).await;
    };
    let Some(batch) = batch else { return };

    debug!(waiters = batch.waiters.len(), "dispatching coalesced command");
    let result = (shared.dispatch)(batch.intent).await;
    for waiter in batch.waiters {
        let _ = waiter.send(result.clone());
    }
}
