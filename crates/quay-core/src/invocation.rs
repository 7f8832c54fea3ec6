//! Queued invocations executed on an event-loop context.
//!
//! Every closure handed to [`Context::schedule`](crate::Context::schedule) is
//! wrapped in a [`QueuedInvocation`] and pushed onto the loop's FIFO queue.
//! Callers that need to wait for the closure to finish pair the invocation
//! with a [`CompletionHandle`] and block on the matching [`CompletionWaiter`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A type-erased closure waiting to run on a context.
pub struct QueuedInvocation {
    invoke: Box<dyn FnOnce() + Send>,
    completion: Option<CompletionHandle>,
}

impl QueuedInvocation {
    /// Create a new queued invocation.
    pub fn new<F>(invoke: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
            completion: None,
        }
    }

    /// Create a queued invocation that signals `completion` once it has run.
    pub fn with_completion<F>(invoke: F, completion: CompletionHandle) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
            completion: Some(completion),
        }
    }

    /// Run the invocation.
    ///
    /// The completion handle (if any) is signalled even when the closure
    /// panics, so a blocked waiter is never left hanging.
    pub fn execute(self) {
        let Self { invoke, completion } = self;
        invoke();
        drop(completion);
    }
}

impl std::fmt::Debug for QueuedInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedInvocation")
            .field("blocking", &self.completion.is_some())
            .finish()
    }
}

/// The signalling side of a blocking invocation.
///
/// The waiter is released when the handle is dropped, whether or not the
/// invocation it belongs to ever ran.
pub struct CompletionHandle {
    inner: Arc<CompletionState>,
}

impl CompletionHandle {
    fn signal_done(&self) {
        let mut done = self.inner.done.lock();
        *done = true;
        self.inner.condvar.notify_all();
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        self.signal_done();
    }
}

/// The waiting side of a blocking invocation.
pub struct CompletionWaiter {
    inner: Arc<CompletionState>,
}

impl CompletionWaiter {
    /// Block until the invocation has run.
    ///
    /// Calling this on the context that is supposed to run the invocation
    /// deadlocks.
    pub fn wait(self) {
        let mut done = self.inner.done.lock();
        while !*done {
            self.inner.condvar.wait(&mut done);
        }
    }

    /// Block until the invocation has run or `timeout` elapses.
    ///
    /// Returns `true` if the invocation completed.
    pub fn wait_timeout(self, timeout: Duration) -> bool {
        let mut done = self.inner.done.lock();
        if *done {
            return true;
        }
        let result = self.inner.condvar.wait_for(&mut done, timeout);
        *done || !result.timed_out()
    }
}

struct CompletionState {
    done: Mutex<bool>,
    condvar: Condvar,
}

/// Create a completion handle/waiter pair for blocking invocations.
pub fn completion_pair() -> (CompletionHandle, CompletionWaiter) {
    let state = Arc::new(CompletionState {
        done: Mutex::new(false),
        condvar: Condvar::new(),
    });

    (
        CompletionHandle {
            inner: state.clone(),
        },
        CompletionWaiter { inner: state },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_execute_runs_closure() {
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        QueuedInvocation::new(move || {
            executed_clone.store(true, Ordering::SeqCst);
        })
        .execute();

        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_completion_pair() {
        let (handle, waiter) = completion_pair();

        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            drop(handle);
        });

        waiter.wait();
        thread.join().unwrap();
    }

    #[test]
    fn test_completion_with_invocation() {
        let executed = Arc::new(AtomicBool::new(false));
        let (handle, waiter) = completion_pair();

        let executed_clone = executed.clone();
        let invocation = QueuedInvocation::with_completion(
            move || {
                executed_clone.store(true, Ordering::SeqCst);
            },
            handle,
        );

        let thread = std::thread::spawn(move || invocation.execute());

        waiter.wait();
        thread.join().unwrap();
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_completion_signalled_on_panic() {
        let (handle, waiter) = completion_pair();
        let invocation = QueuedInvocation::with_completion(|| panic!("boom"), handle);

        let result = std::thread::spawn(move || invocation.execute()).join();
        assert!(result.is_err());
        assert!(waiter.wait_timeout(Duration::from_millis(100)));
    }

    #[test]
    fn test_dropped_invocation_releases_waiter() {
        let (handle, waiter) = completion_pair();
        let invocation = QueuedInvocation::with_completion(|| {}, handle);
        drop(invocation);
        assert!(waiter.wait_timeout(Duration::from_millis(100)));
    }

    #[test]
    fn test_completion_timeout() {
        let (_handle, waiter) = completion_pair();
        assert!(!waiter.wait_timeout(Duration::from_millis(10)));
    }
}
