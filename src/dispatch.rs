//! Serialized dispatch loop.
//!
//! All window manager state is owned by one loop that handles window-system
//! events strictly one at a time. Other tasks and threads (the IPC listener,
//! signal handlers) never touch that state directly: they submit closures
//! through an [`ExecHandle`] and wait for the result. Jobs run between
//! events, never concurrently with one another or with event handling.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A unit of work run against the loop's state.
type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Errors returned to job submitters.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Dispatch loop has shut down")]
    Closed,

    #[error("Dispatch loop dropped the job before completing it")]
    Dropped,
}

/// Submits jobs to a [`Dispatcher`].
///
/// Must not be used from inside a job on the same dispatcher: the job would
/// wait on itself.
pub struct ExecHandle<S> {
    tx: mpsc::Sender<Job<S>>,
}

impl<S> Clone for ExecHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: 'static> ExecHandle<S> {
    fn wrap<T, F>(f: F) -> (Job<S>, oneshot::Receiver<T>)
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job<S> = Box::new(move |state| {
            if done_tx.send(f(state)).is_err() {
                debug!("Job submitter went away before completion");
            }
        });
        (job, done_rx)
    }

    /// Run `f` on the dispatch loop and wait for its result.
    pub async fn exec<T, F>(&self, f: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, done) = Self::wrap(f);
        self.tx.send(job).await.map_err(|_| DispatchError::Closed)?;
        done.await.map_err(|_| DispatchError::Dropped)
    }

    /// Blocking variant of [`exec`](Self::exec) for plain threads.
    ///
    /// Panics if called from within an async runtime.
    pub fn exec_blocking<T, F>(&self, f: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, done) = Self::wrap(f);
        self.tx
            .blocking_send(job)
            .map_err(|_| DispatchError::Closed)?;
        done.blocking_recv().map_err(|_| DispatchError::Dropped)
    }
}

/// The single consumer of events and jobs.
pub struct Dispatcher<S> {
    jobs: mpsc::Receiver<Job<S>>,
    shutdown: CancellationToken,
}

impl<S: 'static> Dispatcher<S> {
    /// Create a dispatcher whose job queue holds at most `capacity` entries.
    pub fn new(capacity: usize, shutdown: CancellationToken) -> (Self, ExecHandle<S>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                jobs: rx,
                shutdown,
            },
            ExecHandle { tx },
        )
    }

    /// Run until shutdown is requested or the event source closes.
    ///
    /// Pending jobs are dropped on exit; their submitters see
    /// [`DispatchError::Dropped`].
    pub async fn run<E, H>(mut self, state: &mut S, mut events: mpsc::Receiver<E>, mut handle: H)
    where
        H: FnMut(&mut S, E),
    {
        info!("Dispatch loop started");

        loop {
            if self.shutdown.is_cancelled() {
                info!("Shutdown requested, leaving dispatch loop");
                break;
            }

            // Unbiased: a busy event stream must not starve submitted jobs.
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested, leaving dispatch loop");
                    break;
                }

                event = events.recv() => match event {
                    Some(event) => handle(state, event),
                    None => {
                        warn!("Event source closed, leaving dispatch loop");
                        break;
                    }
                },

                Some(job) = self.jobs.recv() => job(state),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Log {
        entries: Vec<String>,
        busy: bool,
    }

    impl Log {
        fn record(&mut self, entry: String) {
            assert!(!self.busy, "overlapping work on serialized state");
            self.busy = true;
            self.entries.push(entry);
            self.busy = false;
        }
    }

    #[tokio::test]
    async fn test_exec_returns_result() {
        let shutdown = CancellationToken::new();
        let (dispatcher, exec) = Dispatcher::<Log>::new(4, shutdown.clone());
        let (_events_tx, events_rx) = mpsc::channel::<u32>(4);

        let client = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let len = exec
                    .exec(|log: &mut Log| {
                        log.record("job".to_string());
                        log.entries.len()
                    })
                    .await;
                shutdown.cancel();
                len
            }
        });

        let mut log = Log::default();
        dispatcher
            .run(&mut log, events_rx, |log, n| log.record(format!("event {n}")))
            .await;

        assert_eq!(client.await.unwrap(), Ok(1));
        assert_eq!(log.entries, vec!["job".to_string()]);
    }

    #[tokio::test]
    async fn test_events_and_jobs_are_serialized() {
        let shutdown = CancellationToken::new();
        let (dispatcher, exec) = Dispatcher::<Log>::new(2, shutdown.clone());
        let (events_tx, events_rx) = mpsc::channel::<u32>(8);

        let producers: Vec<_> = (0..4)
            .map(|worker| {
                let exec = exec.clone();
                tokio::spawn(async move {
                    for i in 0..25 {
                        exec.exec(move |log: &mut Log| log.record(format!("job {worker}/{i}")))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();

        let feeder = tokio::spawn(async move {
            for n in 0..50 {
                events_tx.send(n).await.unwrap();
            }
            events_tx
        });

        let stopper = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                for producer in producers {
                    producer.await.unwrap();
                }
                let events_tx = feeder.await.unwrap();
                // Let the loop drain what the feeder queued
                while events_tx.capacity() < events_tx.max_capacity() {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                shutdown.cancel();
            }
        });

        let mut log = Log::default();
        dispatcher
            .run(&mut log, events_rx, |log, n| log.record(format!("event {n}")))
            .await;
        stopper.await.unwrap();

        let events: Vec<_> = log
            .entries
            .iter()
            .filter(|e| e.starts_with("event"))
            .cloned()
            .collect();
        let expected: Vec<_> = (0..50).map(|n| format!("event {n}")).collect();
        assert_eq!(events, expected, "events handled in order");
        assert_eq!(log.entries.len(), 150);
    }

    #[tokio::test]
    async fn test_jobs_not_starved_by_event_flood() {
        const FLOOD: u32 = 10_000;

        let shutdown = CancellationToken::new();
        let (dispatcher, exec) = Dispatcher::<Log>::new(4, shutdown.clone());
        let (events_tx, events_rx) = mpsc::channel::<u32>(64);

        let feeder = tokio::spawn(async move {
            for n in 0..FLOOD {
                if events_tx.send(n).await.is_err() {
                    break;
                }
            }
        });

        let submitter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let seen = exec
                    .exec(|log: &mut Log| log.entries.len())
                    .await
                    .unwrap();
                shutdown.cancel();
                seen
            }
        });

        let mut log = Log::default();
        dispatcher
            .run(&mut log, events_rx, |log, n| log.record(format!("event {n}")))
            .await;

        let seen = submitter.await.unwrap();
        assert!(
            seen < usize::try_from(FLOOD).unwrap(),
            "job ran only after {seen} events"
        );
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_after_shutdown() {
        let shutdown = CancellationToken::new();
        let (dispatcher, exec) = Dispatcher::<Log>::new(1, shutdown.clone());
        let (_events_tx, events_rx) = mpsc::channel::<u32>(1);

        shutdown.cancel();
        let mut log = Log::default();
        dispatcher.run(&mut log, events_rx, |_, _| {}).await;

        let result = exec.exec(|log: &mut Log| log.entries.len()).await;
        assert_eq!(result, Err(DispatchError::Closed));
    }

    #[tokio::test]
    async fn test_closed_event_source_stops_loop() {
        let (dispatcher, _exec) = Dispatcher::<Log>::new(1, CancellationToken::new());
        let (events_tx, events_rx) = mpsc::channel::<u32>(1);
        drop(events_tx);

        let mut log = Log::default();
        dispatcher.run(&mut log, events_rx, |_, _| {}).await;
        assert!(log.entries.is_empty());
    }

    #[test]
    fn test_exec_blocking_from_thread() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let shutdown = CancellationToken::new();
        let (dispatcher, exec) = Dispatcher::<Log>::new(1, shutdown.clone());
        let (_events_tx, events_rx) = mpsc::channel::<u32>(1);

        let worker = std::thread::spawn(move || {
            let result = exec.exec_blocking(|log: &mut Log| {
                log.record("from thread".to_string());
                42
            });
            shutdown.cancel();
            result
        });

        let mut log = Log::default();
        runtime.block_on(dispatcher.run(&mut log, events_rx, |_, _| {}));

        assert_eq!(worker.join().unwrap(), Ok(42));
        assert_eq!(log.entries, vec!["from thread".to_string()]);
    }
}
