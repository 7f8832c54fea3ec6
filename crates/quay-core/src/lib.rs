//! Runtime systems for quay.
//!
//! This crate provides the execution model that quay's I/O crates build on:
//!
//! - **Contexts**: single-threaded event loops that serialize callbacks
//! - **Timers**: one-shot and periodic timers firing on a context
//! - **Async bridge**: a tokio runtime whose results are delivered to contexts
//! - **Logging**: stable `tracing` targets for every subsystem
//!
//! # Example
//!
//! ```no_run
//! use quay_core::EventLoop;
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new("app");
//! let context = event_loop.context().clone();
//!
//! context.schedule(|| println!("hello from the loop")).unwrap();
//! context.set_timer(Duration::from_secs(1), || println!("one second later"));
//!
//! event_loop.stop_and_join();
//! ```

pub mod async_runtime;
mod context;
mod error;
pub mod invocation;
pub mod logging;
mod timer;

pub use async_runtime::{AsyncRuntime, AsyncRuntimeConfig, AsyncTaskHandle, RuntimeType};
pub use context::{Context, ContextConfig, ContextId, EventLoop, panic_message};
pub use error::{AsyncRuntimeError, ContextError, Result};
pub use logging::PerfSpan;
pub use timer::{TimerCallback, TimerId, TimerKind, TimerManager};
