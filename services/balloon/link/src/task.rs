//! Cooperative tasks.
//!
//! A [`Task`] pairs a [`Source`], which decides how each cycle waits, with a
//! [`Worker`] that handles what the source yields. The task runs `started`
//! once, then cycles until the source ends, a cycle fails, or the handle asks
//! it to stop. `stopped` runs exactly once on every exit path, including
//! panics, and is told the abnormal cause if there was one.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::TaskError;

/// Something a task waits on each cycle
#[async_trait]
pub trait Source: Send + 'static {
    /// Unit of work handed to the worker
    type Item: Send + 'static;

    /// Wait for the next item. `Ok(None)` ends the task normally.
    async fn next(&mut self) -> Result<Option<Self::Item>, TaskError>;
}

/// Per-task behavior
#[async_trait]
pub trait Worker<T: Send + 'static>: Send + 'static {
    /// Runs once before the first cycle
    async fn started(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Handle one item. An error ends the task.
    async fn work(&mut self, item: T) -> Result<(), TaskError>;

    /// Runs exactly once when the task ends
    async fn stopped(&mut self, _cause: Option<&TaskError>) {}
}

/// Handle to a running task. Dropping it stops the task.
#[derive(Debug)]
pub struct Task {
    name: String,
    stop_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    handle: JoinHandle<Result<(), TaskError>>,
}

impl Task {
    /// Spawn a task on the current runtime
    pub fn spawn<S, W>(name: impl Into<String>, source: S, worker: W) -> Task
    where
        S: Source,
        W: Worker<S::Item>,
    {
        let name = name.into();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        let handle = tokio::spawn(run(name.clone(), source, worker, stop_rx, done_tx));

        Task {
            name,
            stop_tx,
            done_rx,
            handle,
        }
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the task to stop. The current wait is aborted.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Whether the task is still cycling
    pub fn is_running(&self) -> bool {
        !*self.stop_tx.borrow() && !self.is_finished()
    }

    /// Whether `stopped` has run
    pub fn is_finished(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Wait until the task has ended, without consuming the handle
    pub async fn finished(&self) {
        let mut done = self.done_rx.clone();
        let _ = done.wait_for(|done| *done).await;
    }

    /// Wait for the task to end on its own and return its cause
    pub async fn join(self) -> Result<(), TaskError> {
        let Task {
            stop_tx, handle, ..
        } = self;
        let result = handle
            .await
            .unwrap_or_else(|e| Err(TaskError::Panicked(e.to_string())));
        drop(stop_tx);
        result
    }

    /// Stop the task and wait for `stopped` to finish
    pub async fn shutdown(self) -> Result<(), TaskError> {
        self.stop();
        self.join().await
    }
}

async fn run<S, W>(
    name: String,
    mut source: S,
    mut worker: W,
    mut stop_rx: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
) -> Result<(), TaskError>
where
    S: Source,
    W: Worker<S::Item>,
{
    debug!("Task {} started", name);

    let outcome = {
        let cycle = AssertUnwindSafe(cycle(&mut source, &mut worker)).catch_unwind();
        tokio::select! {
            biased;
            _ = stop_requested(&mut stop_rx) => Ok(()),
            result = cycle => match result {
                Ok(result) => result,
                Err(panic) => Err(TaskError::Panicked(panic_message(panic))),
            },
        }
    };

    match &outcome {
        Ok(()) => debug!("Task {} stopped", name),
        Err(e) => warn!("Task {} stopped: {}", name, e),
    }

    let hook = AssertUnwindSafe(worker.stopped(outcome.as_ref().err())).catch_unwind();
    if let Err(panic) = hook.await {
        warn!("Task {} panicked in stopped hook: {}", name, panic_message(panic));
    }

    done_tx.send_replace(true);
    outcome
}

async fn cycle<S, W>(source: &mut S, worker: &mut W) -> Result<(), TaskError>
where
    S: Source,
    W: Worker<S::Item>,
{
    worker.started().await?;
    while let Some(item) = source.next().await? {
        worker.work(item).await?;
    }
    Ok(())
}

/// Resolves once a stop is requested or every handle is gone
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Interval;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, Default)]
    struct Journal {
        started: usize,
        work: usize,
        stopped: Vec<Option<String>>,
    }

    struct Recorder {
        journal: Arc<Mutex<Journal>>,
        fail_at: Option<usize>,
        panic_at: Option<usize>,
    }

    #[async_trait]
    impl Worker<()> for Recorder {
        async fn started(&mut self) -> Result<(), TaskError> {
            self.journal.lock().unwrap().started += 1;
            Ok(())
        }

        async fn work(&mut self, _item: ()) -> Result<(), TaskError> {
            let n = {
                let mut journal = self.journal.lock().unwrap();
                journal.work += 1;
                journal.work
            };
            if Some(n) == self.panic_at {
                panic!("cycle {} blew up", n);
            }
            if Some(n) == self.fail_at {
                return Err(TaskError::Closed);
            }
            Ok(())
        }

        async fn stopped(&mut self, cause: Option<&TaskError>) {
            self.journal
                .lock()
                .unwrap()
                .stopped
                .push(cause.map(|c| c.to_string()));
        }
    }

    fn recorder(
        fail_at: Option<usize>,
        panic_at: Option<usize>,
    ) -> (Recorder, Arc<Mutex<Journal>>) {
        let journal = Arc::new(Mutex::new(Journal::default()));
        (
            Recorder {
                journal: journal.clone(),
                fail_at,
                panic_at,
            },
            journal,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_lifecycle() {
        let (worker, journal) = recorder(None, None);
        let task = Task::spawn("ticker", Interval::new(Duration::from_secs(1)), worker);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(task.is_running());
        assert_eq!(journal.lock().unwrap().work, 3);

        task.shutdown().await.unwrap();

        let journal = journal.lock().unwrap();
        assert_eq!(journal.started, 1);
        assert_eq!(journal.work, 3);
        assert_eq!(journal.stopped, vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_ends_task() {
        let (worker, journal) = recorder(Some(2), None);
        let task = Task::spawn("failing", Interval::new(Duration::from_secs(1)), worker);

        assert!(matches!(task.join().await, Err(TaskError::Closed)));

        let journal = journal.lock().unwrap();
        assert_eq!(journal.work, 2);
        assert_eq!(journal.stopped, vec![Some("closed".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_caught() {
        let (worker, journal) = recorder(None, Some(1));
        let task = Task::spawn("panicky", Interval::new(Duration::from_secs(1)), worker);

        task.finished().await;
        assert!(task.is_finished());
        assert!(!task.is_running());
        match task.join().await {
            Err(TaskError::Panicked(msg)) => assert_eq!(msg, "cycle 1 blew up"),
            other => panic!("unexpected outcome {:?}", other),
        }

        let journal = journal.lock().unwrap();
        assert_eq!(journal.stopped.len(), 1);
        assert!(journal.stopped[0].as_deref().unwrap().contains("cycle 1 blew up"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_task() {
        let (worker, journal) = recorder(None, None);
        let task = Task::spawn("dropped", Interval::new(Duration::from_secs(1)), worker);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(task);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let journal = journal.lock().unwrap();
        assert_eq!(journal.work, 1);
        assert_eq!(journal.stopped, vec![None]);
    }

    struct Echo {
        seen: mpsc::UnboundedSender<u32>,
    }

    #[async_trait]
    impl Worker<u32> for Echo {
        async fn work(&mut self, item: u32) -> Result<(), TaskError> {
            self.seen.send(item).map_err(|_| TaskError::Closed)
        }
    }

    #[tokio::test]
    async fn test_source_end_is_normal() {
        let (tx, rx) = mpsc::channel(4);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let task = Task::spawn(
            "queue",
            crate::source::Queue::new(Arc::new(tokio::sync::Mutex::new(rx))),
            Echo { seen: seen_tx },
        );

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        task.join().await.unwrap();
        assert_eq!(seen_rx.recv().await, Some(1));
        assert_eq!(seen_rx.recv().await, Some(2));
    }
}
