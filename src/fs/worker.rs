// Single-threaded task executor
//
// Every blocking SMB call runs on one dedicated thread that owns the state it
// operates on. Callers post closures and return immediately; tasks run in the
// order they were posted. The owned state is created on the worker thread and
// dropped there once the queue has been closed and drained, so nothing posted
// can ever observe it after teardown. A panicking task is logged and the
// worker moves on to the next one.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

/// A FIFO task queue with a single consumer thread owning `S`.
pub struct Worker<S> {
    tx: Option<mpsc::UnboundedSender<Task<S>>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: 'static> Worker<S> {
    /// Start the worker thread; `init` builds the state on that thread.
    pub fn spawn<F>(name: &str, init: F) -> io::Result<Self>
    where
        F: FnOnce() -> S + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task<S>>();
        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut state = init();
            while let Some(task) = rx.blocking_recv() {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task(&mut state))) {
                    tracing::error!(panic = panic_message(&*payload), "Worker task panicked");
                }
            }
            tracing::debug!("Worker queue closed, tearing down state");
            drop(state);
        })?;

        Ok(Self { tx: Some(tx), thread: Some(thread) })
    }

    /// Queue a task. Returns false if the worker has stopped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        match &self.tx {
            Some(tx) => tx.send(Box::new(task)).is_ok(),
            None => false,
        }
    }

    /// Close the queue, run what is already queued, drop the state and join.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl<S> Drop for Worker<S> {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Worker thread panicked during teardown");
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
