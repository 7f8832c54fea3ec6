//! Event-loop contexts.
//!
//! An [`EventLoop`] owns one dedicated thread that drains a FIFO queue of
//! closures and fires timers. The loop is reached through its [`Context`], a
//! cheap cloneable handle that any thread can use to post work onto the loop.
//! Everything posted to a context runs on that one thread, one closure at a
//! time, so code that lives on a context never races with itself.
//!
//! # Example
//!
//! ```no_run
//! use quay_core::EventLoop;
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new("io-loop");
//! let context = event_loop.context().clone();
//!
//! context
//!     .schedule(|| println!("runs on the loop thread"))
//!     .unwrap();
//!
//! context.set_timer(Duration::from_millis(50), || println!("timer fired"));
//!
//! let answer = context.execute_blocking(|| 6 * 7);
//! assert_eq!(answer, Some(42));
//!
//! event_loop.stop_and_join();
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;

use crate::error::{ContextError, Result};
use crate::invocation::{QueuedInvocation, completion_pair};
use crate::logging::targets;
use crate::timer::{SharedTimerManager, TimerId};

/// Longest time the loop sleeps when no timer is armed.
const IDLE_WAIT: Duration = Duration::from_millis(100);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// A process-unique identifier for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value of this id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Configuration for creating an event loop.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Name for the loop thread.
    pub name: String,
    /// Stack size for the loop thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            name: "quay-context".to_string(),
            stack_size: None,
        }
    }
}

impl ContextConfig {
    /// Create a new configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the stack size for the loop thread.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }
}

enum LoopMessage {
    Run(QueuedInvocation),
    /// Recompute the sleep deadline (a timer was armed from another thread).
    Wake,
    Shutdown,
}

struct ContextInner {
    id: ContextId,
    name: String,
    sender: Sender<LoopMessage>,
    running: AtomicBool,
    timers: SharedTimerManager,
}

/// A handle to an event-loop context.
///
/// Cloning is cheap; all clones refer to the same loop.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

static_assertions::assert_impl_all!(Context: Send, Sync, Clone);

impl Context {
    /// The context whose loop thread is the calling thread, if any.
    pub fn current() -> Option<Context> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// The identifier of this context.
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// The name of the loop thread.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the owning loop still accepts work.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Whether the caller is running on this context.
    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .is_some_and(|c| c.inner.id == self.inner.id)
        })
    }

    /// Post a closure for later execution on this context.
    ///
    /// The closure never runs inline, even when called from the context
    /// itself. Closures run in the order they were scheduled.
    pub fn schedule<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(QueuedInvocation::new(task))
    }

    fn post(&self, invocation: QueuedInvocation) -> Result<()> {
        if !self.is_running() {
            return Err(ContextError::Stopped);
        }
        self.inner
            .sender
            .send(LoopMessage::Run(invocation))
            .map_err(|_| ContextError::Stopped)
    }

    /// Run a closure on this context and block until it returns.
    ///
    /// Returns `None` when called from this context (it would deadlock), when
    /// the loop has stopped before running the closure, or when the closure
    /// panicked.
    pub fn execute_blocking<F, T>(&self, task: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            tracing::warn!(
                target: targets::CONTEXT,
                context = %self.inner.id,
                error = %ContextError::WouldDeadlock,
                "execute_blocking called on its own context"
            );
            return None;
        }

        let slot = Arc::new(Mutex::new(None));
        let slot_for_task = slot.clone();
        let (handle, waiter) = completion_pair();
        let invocation = QueuedInvocation::with_completion(
            move || {
                *slot_for_task.lock() = Some(task());
            },
            handle,
        );

        self.post(invocation).ok()?;
        waiter.wait();
        slot.lock().take()
    }

    /// Arm a one-shot timer whose callback runs on this context after `delay`.
    pub fn set_timer<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callback = Some(callback);
        let id = self.inner.timers.start_one_shot(
            delay,
            Box::new(move |_| {
                if let Some(callback) = callback.take() {
                    callback();
                }
            }),
        );
        self.wake();
        id
    }

    /// Arm a periodic timer whose callback runs on this context every `interval`.
    pub fn set_periodic<F>(&self, interval: Duration, callback: F) -> TimerId
    where
        F: FnMut(TimerId) + Send + 'static,
    {
        let id = self.inner.timers.start_periodic(interval, Box::new(callback));
        self.wake();
        id
    }

    /// Cancel a timer. Returns `true` if the timer was still armed.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.inner.timers.cancel(id)
    }

    /// Check if a timer is still armed.
    pub fn is_timer_active(&self, id: TimerId) -> bool {
        self.inner.timers.is_active(id)
    }

    fn wake(&self) {
        if !self.is_current() {
            let _ = self.inner.sender.send(LoopMessage::Wake);
        }
    }

    /// Report an error nobody else handled.
    ///
    /// This is the diagnostics sink of last resort; it only logs.
    pub fn report_exception(&self, cause: &dyn fmt::Display) {
        tracing::error!(
            target: targets::CONTEXT,
            context = %self.inner.id,
            name = %self.inner.name,
            error = %cause,
            "unhandled exception on context"
        );
    }

    /// Panic unless the caller is running on this context.
    #[track_caller]
    pub fn assert_current(&self) {
        if !self.is_current() {
            self.panic_wrong_context();
        }
    }

    #[cold]
    #[inline(never)]
    #[track_caller]
    fn panic_wrong_context(&self) -> ! {
        let current = thread::current();
        let current_name = current.name().unwrap_or("<unnamed>");
        let current_context = match Context::current() {
            Some(context) => context.inner.id.to_string(),
            None => "none".to_string(),
        };

        panic!(
            "\n\
            ══════════════════════════════════════════════════════════════════════\n\
            CONTEXT AFFINITY VIOLATION\n\
            ══════════════════════════════════════════════════════════════════════\n\
            \n\
            Expected to run on context {} (\"{}\")\n\
            Current thread: \"{current_name}\" (context: {current_context})\n\
            \n\
            Use Context::schedule to move work onto the right context.\n\
            ══════════════════════════════════════════════════════════════════════\n",
            self.inner.id, self.inner.name
        );
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("running", &self.is_running())
            .finish()
    }
}

/// A dedicated thread running one [`Context`].
///
/// Dropping the loop requests a stop without waiting for the thread.
pub struct EventLoop {
    context: Context,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Start a loop with the given thread name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(ContextConfig::with_name(name))
    }

    /// Start a loop with custom configuration.
    pub fn with_config(config: ContextConfig) -> Self {
        let (sender, receiver) = unbounded();
        let context = Context {
            inner: Arc::new(ContextInner {
                id: ContextId::next(),
                name: config.name.clone(),
                sender,
                running: AtomicBool::new(true),
                timers: SharedTimerManager::new(),
            }),
        };

        let mut builder = thread::Builder::new().name(config.name);
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_context = context.clone();
        let handle = builder
            .spawn(move || run_loop(receiver, thread_context))
            .expect("Failed to spawn event loop thread");

        tracing::debug!(target: targets::CONTEXT, context = %context.id(), name = context.name(), "event loop started");

        Self {
            context,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// The context driven by this loop.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Whether the loop still accepts work.
    pub fn is_running(&self) -> bool {
        self.context.is_running()
    }

    /// Request the loop to stop after running the closures already queued.
    ///
    /// Non-blocking. Scheduling fails with [`ContextError::Stopped`] afterwards.
    pub fn stop(&self) {
        if self.context.inner.running.swap(false, Ordering::AcqRel) {
            let _ = self.context.inner.sender.send(LoopMessage::Shutdown);
        }
    }

    /// Wait for the loop thread to finish.
    ///
    /// Returns `true` if the thread was joined, `false` if it was already
    /// joined, it panicked, or this is called from the loop thread itself.
    pub fn join(&self) -> bool {
        if self.context.is_current() {
            return false;
        }
        let mut handle = self.handle.lock();
        match handle.take() {
            Some(h) => h.join().is_ok(),
            None => false,
        }
    }

    /// Stop the loop and wait for it to finish.
    pub fn stop_and_join(&self) -> bool {
        self.stop();
        self.join()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("context", &self.context)
            .finish()
    }
}

fn run_loop(receiver: Receiver<LoopMessage>, context: Context) {
    CURRENT.with(|current| *current.borrow_mut() = Some(context.clone()));

    loop {
        run_expired_timers(&context);

        let timeout = context
            .inner
            .timers
            .time_until_next()
            .map_or(IDLE_WAIT, |until| until.min(IDLE_WAIT));

        match receiver.recv_timeout(timeout) {
            Ok(LoopMessage::Run(invocation)) => run_task(&context, invocation),
            Ok(LoopMessage::Wake) => {}
            Ok(LoopMessage::Shutdown) => {
                while let Ok(message) = receiver.try_recv() {
                    if let LoopMessage::Run(invocation) = message {
                        run_task(&context, invocation);
                    }
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    context.inner.running.store(false, Ordering::Release);
    tracing::debug!(target: targets::CONTEXT, context = %context.id(), "event loop exited");
    CURRENT.with(|current| current.borrow_mut().take());
}

fn run_task(context: &Context, invocation: QueuedInvocation) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| invocation.execute())) {
        context.report_exception(&panic_message(payload.as_ref()));
    }
}

fn run_expired_timers(context: &Context) {
    for mut timer in context.inner.timers.take_expired() {
        let id = timer.id;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (timer.callback)(id))) {
            context.report_exception(&panic_message(payload.as_ref()));
        }
        context.inner.timers.restore(id, timer.callback);
    }
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
