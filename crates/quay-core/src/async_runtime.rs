//! Tokio integration for quay.
//!
//! Socket I/O runs on a tokio runtime while user callbacks run on event-loop
//! contexts. This module owns the runtime and bridges the two: futures are
//! spawned on tokio and their output is posted back to a [`Context`].
//!
//! # Example: Delivering a Result to a Context
//!
//! ```no_run
//! use quay_core::EventLoop;
//! use quay_core::async_runtime::AsyncRuntime;
//!
//! # async fn lookup() -> u32 { 7 }
//! let event_loop = EventLoop::new("app");
//! let runtime = AsyncRuntime::global();
//!
//! runtime.spawn_on_context(lookup(), event_loop.context(), |value| {
//!     // Runs on the event loop thread.
//!     println!("got {value}");
//! });
//! ```
//!
//! # Runtime Types
//!
//! - **Multi-threaded** (default): tokio's multi-threaded scheduler.
//! - **Single-threaded**: a current-thread runtime driven by one dedicated thread.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;

use crate::context::Context;
use crate::error::AsyncRuntimeError;
use crate::logging::targets;

/// Global async runtime instance.
static GLOBAL_RUNTIME: OnceLock<AsyncRuntime> = OnceLock::new();

/// Counter for unique task IDs.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// The type of async runtime to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeType {
    /// Multi-threaded runtime using tokio's default scheduler.
    #[default]
    MultiThreaded,

    /// Single-threaded runtime on a dedicated thread.
    SingleThreaded,
}

/// Configuration for the async runtime.
#[derive(Debug, Clone)]
pub struct AsyncRuntimeConfig {
    /// The type of runtime to create.
    pub runtime_type: RuntimeType,
    /// Number of worker threads for multi-threaded runtime.
    /// Defaults to the number of CPU cores.
    pub worker_threads: Option<usize>,
    /// Name prefix for runtime threads.
    pub thread_name: String,
}

impl Default for AsyncRuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_type: RuntimeType::MultiThreaded,
            worker_threads: None,
            thread_name: "quay-io".to_string(),
        }
    }
}

impl AsyncRuntimeConfig {
    /// Create a configuration for a multi-threaded runtime.
    pub fn multi_threaded() -> Self {
        Self {
            runtime_type: RuntimeType::MultiThreaded,
            ..Default::default()
        }
    }

    /// Create a configuration for a single-threaded runtime.
    pub fn single_threaded() -> Self {
        Self {
            runtime_type: RuntimeType::SingleThreaded,
            ..Default::default()
        }
    }

    /// Set the number of worker threads (multi-threaded runtime only).
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = Some(count);
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// A handle to a spawned async task.
#[derive(Debug)]
pub struct AsyncTaskHandle<T> {
    id: u64,
    receiver: oneshot::Receiver<T>,
}

impl<T> AsyncTaskHandle<T> {
    /// Get the unique task ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the task to complete, blocking the current thread.
    ///
    /// Returns `None` if the task was dropped before producing a value.
    /// Do not call this from inside the runtime.
    pub fn blocking_wait(self) -> Option<T> {
        self.receiver.blocking_recv().ok()
    }

    /// Try to get the result without blocking.
    pub fn try_get(mut self) -> Result<T, Self> {
        match self.receiver.try_recv() {
            Ok(value) => Ok(value),
            Err(_) => Err(self),
        }
    }

    /// Await the result from async code.
    pub async fn wait(self) -> Option<T> {
        self.receiver.await.ok()
    }
}

/// Internal state for the single-threaded runtime.
struct SingleThreadedState {
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: oneshot::Sender<()>,
}

/// The async runtime manager.
pub struct AsyncRuntime {
    /// Kept alive so the multi-threaded runtime is not shut down.
    #[allow(dead_code)]
    runtime: Option<Runtime>,
    handle: Handle,
    single_threaded: Option<SingleThreadedState>,
    runtime_type: RuntimeType,
    active_tasks: Arc<AtomicU64>,
}

impl AsyncRuntime {
    /// Get the global async runtime, creating it with default settings on first use.
    pub fn global() -> &'static AsyncRuntime {
        GLOBAL_RUNTIME.get_or_init(|| {
            AsyncRuntime::new(AsyncRuntimeConfig::default())
                .expect("Failed to create global async runtime")
        })
    }

    /// Install the global async runtime with custom configuration.
    ///
    /// Must run before anything touches [`AsyncRuntime::global`].
    pub fn init_global(
        config: AsyncRuntimeConfig,
    ) -> Result<&'static AsyncRuntime, AsyncRuntimeError> {
        let runtime = AsyncRuntime::new(config)?;
        let mut installed = false;
        let global = GLOBAL_RUNTIME.get_or_init(|| {
            installed = true;
            runtime
        });
        if installed {
            Ok(global)
        } else {
            Err(AsyncRuntimeError::AlreadyInitialized)
        }
    }

    /// Create a new async runtime with the given configuration.
    pub fn new(config: AsyncRuntimeConfig) -> Result<Self, AsyncRuntimeError> {
        match config.runtime_type {
            RuntimeType::MultiThreaded => Self::new_multi_threaded(config),
            RuntimeType::SingleThreaded => Self::new_single_threaded(config),
        }
    }

    fn new_multi_threaded(config: AsyncRuntimeConfig) -> Result<Self, AsyncRuntimeError> {
        let mut builder = Builder::new_multi_thread();
        builder.thread_name(&config.thread_name).enable_all();

        if let Some(workers) = config.worker_threads {
            builder.worker_threads(workers);
        }

        let runtime = builder
            .build()
            .map_err(|e| AsyncRuntimeError::CreationFailed(e.to_string()))?;
        let handle = runtime.handle().clone();

        tracing::debug!(target: targets::RUNTIME, thread_name = %config.thread_name, "multi-threaded runtime started");

        Ok(Self {
            runtime: Some(runtime),
            handle,
            single_threaded: None,
            runtime_type: RuntimeType::MultiThreaded,
            active_tasks: Arc::new(AtomicU64::new(0)),
        })
    }

    fn new_single_threaded(config: AsyncRuntimeConfig) -> Result<Self, AsyncRuntimeError> {
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread_handle = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));

                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })
            .map_err(|e| AsyncRuntimeError::CreationFailed(e.to_string()))?;

        let handle = handle_rx
            .recv()
            .map_err(|_| {
                AsyncRuntimeError::CreationFailed("runtime thread exited early".to_string())
            })?
            .map_err(AsyncRuntimeError::CreationFailed)?;

        tracing::debug!(target: targets::RUNTIME, thread_name = %config.thread_name, "single-threaded runtime started");

        Ok(Self {
            runtime: None,
            handle,
            single_threaded: Some(SingleThreadedState {
                thread_handle: Mutex::new(Some(thread_handle)),
                shutdown_tx,
            }),
            runtime_type: RuntimeType::SingleThreaded,
            active_tasks: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Get the runtime type.
    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    /// Get the number of spawned tasks that have not finished yet.
    pub fn active_tasks(&self) -> u64 {
        self.active_tasks.load(Ordering::Acquire)
    }

    /// Get a handle to the tokio runtime.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn an async task on the runtime.
    pub fn spawn<F, T>(&self, future: F) -> AsyncTaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let active_tasks = self.active_tasks.clone();

        active_tasks.fetch_add(1, Ordering::AcqRel);

        self.handle.spawn(async move {
            let result = future.await;
            active_tasks.fetch_sub(1, Ordering::AcqRel);
            let _ = sender.send(result);
        });

        AsyncTaskHandle { id, receiver }
    }

    /// Spawn an async task and deliver its output to `callback` on `context`.
    ///
    /// If the context has stopped by the time the future finishes, the
    /// output is dropped and a warning is logged.
    pub fn spawn_on_context<F, T, C>(&self, future: F, context: &Context, callback: C)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let context = context.clone();
        let active_tasks = self.active_tasks.clone();
        active_tasks.fetch_add(1, Ordering::AcqRel);

        self.handle.spawn(async move {
            let result = future.await;
            if let Err(e) = context.schedule(move || callback(result)) {
                tracing::warn!(target: targets::RUNTIME, context = %context.id(), error = %e, "dropping task output");
            }
            active_tasks.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Block on a future, running it to completion.
    ///
    /// Do not call this from inside the runtime or from an event-loop
    /// context; it blocks the calling thread.
    pub fn block_on<F, T>(&self, future: F) -> T
    where
        F: Future<Output = T>,
    {
        self.handle.block_on(future)
    }

    /// Shut the runtime down.
    ///
    /// For single-threaded runtimes, this stops and joins the runtime thread.
    pub fn shutdown(mut self) {
        if let Some(state) = self.single_threaded.take() {
            let _ = state.shutdown_tx.send(());
            if let Some(handle) = state.thread_handle.lock().take() {
                let _ = handle.join();
            }
        }
    }
}

impl std::fmt::Debug for AsyncRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRuntime")
            .field("runtime_type", &self.runtime_type)
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventLoop;
    use std::sync::atomic::AtomicI32;
    use std::time::Duration;

    #[test]
    fn test_spawn_and_wait() {
        let runtime = AsyncRuntime::new(AsyncRuntimeConfig::multi_threaded()).unwrap();
        let handle = runtime.spawn(async { 42 });
        assert_eq!(handle.blocking_wait(), Some(42));
    }

    #[test]
    fn test_spawn_async_computation() {
        let runtime = AsyncRuntime::new(AsyncRuntimeConfig::multi_threaded()).unwrap();
        let handle = runtime.spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            "hello"
        });
        assert_eq!(handle.blocking_wait(), Some("hello"));
    }

    #[test]
    fn test_multiple_tasks() {
        let runtime = AsyncRuntime::new(AsyncRuntimeConfig::multi_threaded()).unwrap();
        let counter = Arc::new(AtomicI32::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let counter = counter.clone();
                runtime.spawn(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.blocking_wait();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_single_threaded_runtime() {
        let runtime = AsyncRuntime::new(AsyncRuntimeConfig::single_threaded()).unwrap();
        assert_eq!(runtime.runtime_type(), RuntimeType::SingleThreaded);

        let handle = runtime.spawn(async { 42 });
        assert_eq!(handle.blocking_wait(), Some(42));
        runtime.shutdown();
    }

    #[test]
    fn test_block_on() {
        let runtime = AsyncRuntime::new(AsyncRuntimeConfig::multi_threaded()).unwrap();
        let result = runtime.block_on(async { 42 });
        assert_eq!(result, 42);
    }

    #[test]
    fn test_active_task_count() {
        let runtime = AsyncRuntime::new(AsyncRuntimeConfig::multi_threaded()).unwrap();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                runtime.spawn(async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                })
            })
            .collect();

        let active = runtime.active_tasks();
        assert!(active > 0 && active <= 3);

        for handle in handles {
            handle.blocking_wait();
        }
        assert_eq!(runtime.active_tasks(), 0);
    }

    #[test]
    fn test_spawn_on_context_delivers_on_context() {
        let runtime = AsyncRuntime::new(AsyncRuntimeConfig::multi_threaded()).unwrap();
        let event_loop = EventLoop::new("runtime-bridge");
        let context = event_loop.context().clone();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let context_clone = context.clone();
        runtime.spawn_on_context(
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                7
            },
            &context,
            move |value| {
                let _ = tx.send((value, context_clone.is_current()));
            },
        );

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok((7, true)));
        event_loop.stop_and_join();
    }

    #[test]
    fn test_handle_wait_async() {
        let runtime = AsyncRuntime::new(AsyncRuntimeConfig::multi_threaded()).unwrap();
        let handle = runtime.spawn(async { 42 });
        let result = runtime.block_on(handle.wait());
        assert_eq!(result, Some(42));
    }
}
