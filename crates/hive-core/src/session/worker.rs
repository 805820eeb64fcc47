//! Per-session sequential workers.
//!
//! Every active session gets exactly one [`SessionWorker`]: a bounded
//! request queue drained by one background task, plus the session's
//! [`Broadcaster`]. Requests for the same session therefore never overlap,
//! while different sessions run in parallel.
//!
//! A worker is independent of whoever enqueued a request. Clients may
//! disconnect and reconnect through [`Broadcaster::subscribe`]; only the idle
//! timeout or an explicit [`SessionWorker::stop`] ends it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use hive_types::config::RuntimeConfig;
use hive_types::error::WorkerError;
use hive_types::event::RunEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::broadcaster::Broadcaster;

/// The body of a request: runs one turn, publishing to the broadcaster.
pub type RunFn = Box<dyn FnOnce(Arc<Broadcaster>) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// One queued turn for a session.
pub struct RunRequest {
    pub agent_id: String,
    pub session_id: String,
    pub message: String,
    pub run: RunFn,
}

impl RunRequest {
    pub fn new<F, Fut>(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        message: impl Into<String>,
        run: F,
    ) -> Self
    where
        F: FnOnce(Arc<Broadcaster>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            message: message.into(),
            run: Box::new(move |b| Box::pin(run(b))),
        }
    }
}

impl fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRequest")
            .field("agent_id", &self.agent_id)
            .field("session_id", &self.session_id)
            .field("message_len", &self.message.len())
            .finish_non_exhaustive()
    }
}

/// Queue and lifetime settings for session workers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_capacity: usize,
    pub idle_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for WorkerConfig {
    fn from(runtime: &RuntimeConfig) -> Self {
        Self {
            queue_capacity: runtime.worker_queue_capacity.max(1),
            idle_timeout: Duration::from_secs(runtime.worker_idle_timeout_secs),
        }
    }
}

/// Sequential executor for one session.
pub struct SessionWorker {
    session_id: String,
    broadcaster: Arc<Broadcaster>,
    tx: mpsc::Sender<RunRequest>,
    busy: AtomicBool,
    stopped: AtomicBool,
    cancel: CancellationToken,
}

impl SessionWorker {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Whether a request is executing right now.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Queue a request without waiting.
    ///
    /// Fails with [`WorkerError::QueueFull`] when the queue is at capacity
    /// and [`WorkerError::Stopped`] once the worker has shut down.
    pub fn enqueue(&self, request: RunRequest) -> Result<(), WorkerError> {
        if self.is_stopped() {
            return Err(WorkerError::Stopped {
                session_id: self.session_id.clone(),
            });
        }
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::QueueFull {
                session_id: self.session_id.clone(),
            },
            mpsc::error::TrySendError::Closed(_) => WorkerError::Stopped {
                session_id: self.session_id.clone(),
            },
        })
    }

    /// Stop the worker. Safe to call more than once.
    ///
    /// A request already executing runs to completion; queued requests are
    /// answered with an error event.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!(session_id = %self.session_id, "stopping session worker");
            self.cancel.cancel();
        }
    }

    async fn process(&self, request: RunRequest) {
        self.busy.store(true, Ordering::Release);
        let generation = self.broadcaster.start_gen();
        let span = tracing::info_span!(
            "session_run",
            session_id = %request.session_id,
            agent_id = %request.agent_id,
            generation,
        );

        // Own task so a panicking run cannot take the worker down with it.
        let run = (request.run)(Arc::clone(&self.broadcaster)).instrument(span);
        match tokio::spawn(run).await {
            Ok(Ok(())) => {
                if !self.broadcaster.is_done() {
                    self.broadcaster.publish(RunEvent::Error {
                        error: "run finished without a result".to_string(),
                    });
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id = %self.session_id, "session run failed: {e:#}");
                self.broadcaster.publish(RunEvent::Error {
                    error: format!("{e:#}"),
                });
            }
            Err(join) => {
                tracing::error!(session_id = %self.session_id, "session run aborted: {join}");
                self.broadcaster.publish(RunEvent::Error {
                    error: "internal error: run aborted".to_string(),
                });
            }
        }
        self.busy.store(false, Ordering::Release);
    }

    async fn run_loop(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<RunRequest>,
        idle_timeout: Duration,
        pool: Weak<PoolInner>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = tokio::time::timeout(idle_timeout, rx.recv()) => next,
            };
            match next {
                Ok(Some(request)) => self.process(request).await,
                Ok(None) => break,
                Err(_) => {
                    tracing::info!(session_id = %self.session_id, "session worker idle, stopping");
                    break;
                }
            }
        }

        self.stop();
        rx.close();
        while let Ok(request) = rx.try_recv() {
            tracing::debug!(session_id = %request.session_id, "discarding request queued on stopped worker");
            self.broadcaster.start_gen();
            self.broadcaster.publish(RunEvent::Error {
                error: format!("session {} worker stopped", self.session_id),
            });
        }

        if let Some(pool) = pool.upgrade() {
            pool.remove_if_same(&self);
        }
    }
}

impl fmt::Debug for SessionWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionWorker")
            .field("session_id", &self.session_id)
            .field("busy", &self.is_busy())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

struct PoolInner {
    workers: Mutex<HashMap<String, Arc<SessionWorker>>>,
    config: WorkerConfig,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<SessionWorker>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_if_same(&self, worker: &Arc<SessionWorker>) {
        let mut workers = self.lock();
        if workers
            .get(&worker.session_id)
            .is_some_and(|w| Arc::ptr_eq(w, worker))
        {
            workers.remove(&worker.session_id);
        }
    }
}

/// Registry of live session workers. Cheap to clone.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                workers: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Return the session's worker, starting one if none is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn get_or_create(&self, session_id: &str) -> Arc<SessionWorker> {
        let mut workers = self.inner.lock();
        if let Some(worker) = workers.get(session_id) {
            if !worker.is_stopped() {
                return Arc::clone(worker);
            }
        }

        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity);
        let worker = Arc::new(SessionWorker {
            session_id: session_id.to_string(),
            broadcaster: Broadcaster::new(),
            tx,
            busy: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        workers.insert(session_id.to_string(), Arc::clone(&worker));
        drop(workers);

        tracing::debug!(session_id, "started session worker");
        tokio::spawn(Arc::clone(&worker).run_loop(
            rx,
            self.inner.config.idle_timeout,
            Arc::downgrade(&self.inner),
        ));
        worker
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionWorker>> {
        self.inner.lock().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every worker. Used at process shutdown.
    pub fn stop_all(&self) {
        let workers: Vec<_> = self.inner.lock().drain().map(|(_, w)| w).collect();
        for worker in workers {
            worker.stop();
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn pool(capacity: usize, idle: Duration) -> WorkerPool {
        WorkerPool::new(WorkerConfig {
            queue_capacity: capacity,
            idle_timeout: idle,
        })
    }

    fn done() -> RunEvent {
        RunEvent::Done {
            session_id: None,
            token_estimate: 0,
        }
    }

    #[tokio::test]
    async fn requests_run_sequentially() {
        let pool = pool(8, Duration::from_secs(60));
        let worker = pool.get_or_create("ses-1");
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut sub = worker.broadcaster().subscribe("watch");

        for name in ["first", "second"] {
            let log = Arc::clone(&log);
            worker
                .enqueue(RunRequest::new("main", "ses-1", name, move |b| async move {
                    log.lock().unwrap().push(format!("{name}:start"));
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    b.publish(RunEvent::TextDelta { text: name.into() });
                    b.publish(done());
                    log.lock().unwrap().push(format!("{name}:done"));
                    anyhow::Ok(())
                }))
                .unwrap();
        }

        loop {
            let events = sub.until_terminal().await;
            if events.contains(&RunEvent::TextDelta {
                text: "second".into(),
            }) {
                break;
            }
        }
        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["first:start", "first:done", "second:start", "second:done"]
        );
    }

    #[tokio::test]
    async fn overflow_is_queue_full() {
        let pool = pool(1, Duration::from_secs(60));
        let worker = pool.get_or_create("ses-full");
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        worker
            .enqueue(RunRequest::new("main", "ses-full", "block", move |b| async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                b.publish(done());
                anyhow::Ok(())
            }))
            .unwrap();
        started_rx.await.unwrap();
        assert!(worker.is_busy());

        let noop = || RunRequest::new("main", "ses-full", "x", |_| async { anyhow::Ok(()) });
        worker.enqueue(noop()).unwrap();
        let err = worker.enqueue(noop()).unwrap_err();
        assert!(matches!(err, WorkerError::QueueFull { .. }));

        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn failed_run_publishes_terminal_error() {
        let pool = pool(8, Duration::from_secs(60));
        let worker = pool.get_or_create("ses-err");
        let mut sub = worker.broadcaster().subscribe("c");
        worker
            .enqueue(RunRequest::new("main", "ses-err", "hi", |_| async {
                Err::<(), _>(anyhow::anyhow!("provider exploded"))
            }))
            .unwrap();

        let events = sub.until_terminal().await;
        assert_eq!(
            events.last(),
            Some(&RunEvent::Error {
                error: "provider exploded".into()
            })
        );

        // The worker survives and serves the next request.
        worker
            .enqueue(RunRequest::new("main", "ses-err", "again", |b| async move {
                b.publish(done());
                anyhow::Ok(())
            }))
            .unwrap();
        assert_eq!(sub.until_terminal().await, vec![done()]);
    }

    #[tokio::test]
    async fn panicking_run_does_not_kill_worker() {
        let pool = pool(8, Duration::from_secs(60));
        let worker = pool.get_or_create("ses-panic");
        let mut sub = worker.broadcaster().subscribe("c");
        worker
            .enqueue(RunRequest::new("main", "ses-panic", "hi", |_| async {
                if true {
                    panic!("boom");
                }
                anyhow::Ok(())
            }))
            .unwrap();
        let events = sub.until_terminal().await;
        assert!(matches!(events.last(), Some(RunEvent::Error { .. })));
        assert!(!worker.is_stopped());
    }

    #[tokio::test]
    async fn idle_worker_removes_itself() {
        let pool = pool(8, Duration::from_millis(30));
        let worker = pool.get_or_create("ses-idle");
        assert_eq!(pool.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(worker.is_stopped());
        assert!(pool.is_empty());

        let err = worker
            .enqueue(RunRequest::new("main", "ses-idle", "late", |_| async { anyhow::Ok(()) }))
            .unwrap_err();
        assert!(matches!(err, WorkerError::Stopped { .. }));

        let fresh = pool.get_or_create("ses-idle");
        assert!(!Arc::ptr_eq(&worker, &fresh));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_stop_all_clears_pool() {
        let pool = pool(8, Duration::from_secs(60));
        let a = pool.get_or_create("a");
        let _b = pool.get_or_create("b");
        assert!(Arc::ptr_eq(&a, &pool.get_or_create("a")));
        a.stop();
        a.stop();
        assert!(a.is_stopped());

        pool.stop_all();
        assert!(pool.is_empty());
        assert!(pool.get("b").is_none());
    }
}
