//! Concurrent-task supervisor.
//!
//! [`Supervisor`] registers long-running functions, launches each as an
//! independent task with its own one-shot cancellation signal, and fans all
//! failures into one shared error sink the caller awaits. There is no
//! automatic restart: a function that reports an error has already stopped;
//! restart policy belongs to whoever reads the sink.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};

/// A task's cancellation signal; resolves when `stop` broadcasts.
pub type CancelSignal = watch::Receiver<bool>;

/// Where supervised tasks report their terminal failures.
pub type ErrorSink = mpsc::Sender<Error>;

type TaskFn =
    Box<dyn FnOnce(CancelSignal, ErrorSink) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Registers and launches a set of supervised long-running tasks.
#[derive(Default)]
pub struct Supervisor {
    tasks: Vec<TaskFn>,
    cancels: Vec<watch::Sender<bool>>,
    started: bool,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("registered", &self.tasks.len())
            .field("started", &self.started)
            .finish()
    }
}

impl Supervisor {
    /// Creates an empty supervisor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task function. Must be called before `start`.
    ///
    /// # Errors
    ///
    /// Returns a supervisor-misuse error after `start` has run.
    pub fn add<F, Fut>(&mut self, task: F) -> Result<()>
    where
        F: FnOnce(CancelSignal, ErrorSink) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.started {
            return Err(Error::Supervisor {
                message: "add called after start".to_string(),
            });
        }
        self.tasks
            .push(Box::new(move |cancel, sink| Box::pin(task(cancel, sink))));
        Ok(())
    }

    /// Launches every registered task and returns the shared error sink.
    ///
    /// The sink is buffered to the number of tasks so a reporting task never
    /// blocks even if the caller drains lazily.
    ///
    /// # Errors
    ///
    /// Returns a supervisor-misuse error on a second start.
    pub fn start(&mut self) -> Result<mpsc::Receiver<Error>> {
        if self.started {
            return Err(Error::Supervisor {
                message: "start called twice".to_string(),
            });
        }
        self.started = true;

        let (error_tx, error_rx) = mpsc::channel(self.tasks.len().max(1));
        for task in self.tasks.drain(..) {
            let (cancel_tx, cancel_rx) = watch::channel(false);
            self.cancels.push(cancel_tx);
            let sink = error_tx.clone();
            tokio::spawn(task(cancel_rx, sink));
        }

        Ok(error_rx)
    }

    /// Broadcasts cancellation to every launched task.
    pub fn stop(&self) {
        for cancel in &self.cancels {
            let _ = cancel.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn tasks_run_and_report_errors() {
        let mut supervisor = Supervisor::new();
        supervisor
            .add(|_cancel, sink: ErrorSink| async move {
                let _ = sink
                    .send(Error::precondition("deliberate failure"))
                    .await;
            })
            .unwrap();

        let mut errors = supervisor.start().unwrap();
        let err = errors.recv().await.unwrap();
        assert!(matches!(err, Error::Precondition { .. }));
    }

    #[tokio::test]
    async fn stop_cancels_every_task() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let mut supervisor = Supervisor::new();

        for _ in 0..3 {
            let stopped = Arc::clone(&stopped);
            supervisor
                .add(move |mut cancel: CancelSignal, _sink| async move {
                    let _ = cancel.changed().await;
                    stopped.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        let _errors = supervisor.start().unwrap();
        supervisor.stop();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stopped.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn add_after_start_is_rejected() {
        let mut supervisor = Supervisor::new();
        supervisor.add(|_c, _s| async {}).unwrap();
        let _errors = supervisor.start().unwrap();

        let err = supervisor.add(|_c, _s| async {}).unwrap_err();
        assert!(matches!(err, Error::Supervisor { .. }));
    }

    #[tokio::test]
    async fn error_sink_is_buffered_per_task() {
        let mut supervisor = Supervisor::new();
        for i in 0..4 {
            supervisor
                .add(move |_cancel, sink: ErrorSink| async move {
                    // Nobody is draining yet; the buffered sink must accept it.
                    let _ = sink
                        .send(Error::precondition(format!("task {i}")))
                        .await;
                })
                .unwrap();
        }

        let mut errors = supervisor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        for _ in 0..4 {
            assert!(errors.recv().await.is_some());
        }
    }
}
