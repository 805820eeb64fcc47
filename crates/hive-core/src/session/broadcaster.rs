//! Per-generation fan-out of live run events.
//!
//! A [`Broadcaster`] belongs to one session worker. Each processed request is
//! a *generation*: [`Broadcaster::start_gen`] clears the replay buffer, then
//! every event the run emits is buffered and pushed to all subscribers.
//!
//! Publishing never waits. Each subscriber owns a bounded channel and a full
//! or closed channel simply misses the event. A subscriber that joins late
//! first receives a snapshot of the buffer taken under the same lock that
//! registers it, so it can neither miss nor duplicate an event.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use hive_types::event::RunEvent;
use tokio::sync::mpsc;

use crate::agent::sink::EventSink;

/// Capacity of each subscriber's live channel.
pub const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Default)]
struct State {
    subscribers: HashMap<String, (u64, mpsc::Sender<RunEvent>)>,
    buffer: Vec<RunEvent>,
    generation: u64,
    done: bool,
}

/// Fan-out hub for one session's run events.
#[derive(Default)]
pub struct Broadcaster {
    state: Mutex<State>,
    next_token: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a new generation: clear the buffer and the done flag.
    ///
    /// Returns the new generation number.
    pub fn start_gen(&self) -> u64 {
        let mut state = self.lock();
        state.buffer.clear();
        state.done = false;
        state.generation += 1;
        state.generation
    }

    /// Buffer `event` and deliver it to every current subscriber.
    pub fn publish(&self, event: RunEvent) {
        let targets: Vec<(String, mpsc::Sender<RunEvent>)> = {
            let mut state = self.lock();
            if event.is_terminal() {
                state.done = true;
            }
            state.buffer.push(event.clone());
            state
                .subscribers
                .iter()
                .map(|(id, (_, tx))| (id.clone(), tx.clone()))
                .collect()
        };

        for (id, tx) in targets {
            if let Err(e) = tx.try_send(event.clone()) {
                tracing::debug!(subscriber = %id, kind = event.kind(), "dropped event for subscriber: {e}");
            }
        }
    }

    /// Register subscriber `id` and return its event stream.
    ///
    /// The stream starts with everything buffered for the current
    /// generation. If the generation has already finished the stream ends
    /// after that replay; otherwise live events follow until the
    /// subscription is dropped. Re-subscribing with the same `id` replaces
    /// the previous registration.
    pub fn subscribe(self: &Arc<Self>, id: impl Into<String>) -> Subscription {
        let id = id.into();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);

        let mut state = self.lock();
        let replay: VecDeque<RunEvent> = state.buffer.iter().cloned().collect();
        if !state.done {
            state.subscribers.insert(id.clone(), (token, tx));
        }
        drop(state);

        Subscription {
            id,
            token,
            replay,
            live: rx,
            owner: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: &str, token: u64) {
        let mut state = self.lock();
        if state.subscribers.get(id).is_some_and(|(t, _)| *t == token) {
            state.subscribers.remove(id);
        }
    }

    /// Whether the current generation has published its terminal event.
    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Events buffered for the current generation.
    pub fn buffer_len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl EventSink for Broadcaster {
    fn emit(&self, event: RunEvent) {
        self.publish(event);
    }
}

/// A subscriber's view of a [`Broadcaster`]: buffered replay, then live.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: String,
    token: u64,
    replay: VecDeque<RunEvent>,
    live: mpsc::Receiver<RunEvent>,
    owner: Weak<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        if let Some(event) = self.replay.pop_front() {
            return Some(event);
        }
        self.live.recv().await
    }

    /// Receive events up to and including the next terminal event.
    pub async fn until_terminal(&mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }
}

impl Stream for Subscription {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(event) = self.replay.pop_front() {
            return Poll::Ready(Some(event));
        }
        self.live.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.unsubscribe(&self.id, self.token);
        }
    }
}
