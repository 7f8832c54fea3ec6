//! One-shot completion delivery for endpoint operations.

use std::sync::Arc;

use super::endpoint::EndpointCore;
use crate::error::{AsyncResult, DatagramError};

/// A completion handler for an asynchronous endpoint operation.
///
/// Invoked exactly once, on the endpoint's context.
pub type Handler<T> = Box<dyn FnOnce(AsyncResult<T>) + Send + 'static>;

/// Box a closure as an optional completion handler.
///
/// ```ignore
/// server.listen(1234, handler(|result| match result {
///     Ok(server) => println!("bound to {:?}", server.local_address()),
///     Err(e) => eprintln!("listen failed: {e}"),
/// }));
/// ```
pub fn handler<T, F>(f: F) -> Option<Handler<T>>
where
    F: FnOnce(AsyncResult<T>) + Send + 'static,
{
    Some(Box::new(f))
}

type Deliver = Box<dyn FnOnce(AsyncResult<()>) + Send>;

/// The pending result of one operation.
///
/// Consumed by [`complete`](Completion::complete). A completion dropped
/// without being completed reports [`DatagramError::ClosedEndpoint`], so every
/// handler fires exactly once even when the driver goes away first.
pub(crate) struct Completion {
    deliver: Option<Deliver>,
}

impl Completion {
    /// Wrap `handler`, which receives `value` on success.
    ///
    /// Without a handler, failures go to the endpoint's exception handler.
    pub fn new<T>(handler: Option<Handler<T>>, value: T, core: Arc<EndpointCore>) -> Self
    where
        T: Send + 'static,
    {
        Self::build(handler, value, core, false)
    }

    /// Like [`new`](Completion::new), but a success that has not reached the
    /// handler by the time the endpoint closes is reported as
    /// [`DatagramError::ClosedEndpoint`].
    pub fn abortable<T>(handler: Option<Handler<T>>, value: T, core: Arc<EndpointCore>) -> Self
    where
        T: Send + 'static,
    {
        Self::build(handler, value, core, true)
    }

    fn build<T>(handler: Option<Handler<T>>, value: T, core: Arc<EndpointCore>, abortable: bool) -> Self
    where
        T: Send + 'static,
    {
        let deliver: Deliver = match handler {
            Some(handler) => Box::new(move |result: AsyncResult<()>| {
                let owner = core.clone();
                core.post(move || {
                    let result = match result {
                        Ok(()) if abortable && owner.phase.is_closed() => {
                            Err(DatagramError::ClosedEndpoint)
                        }
                        result => result.map(|()| value),
                    };
                    handler(result);
                });
            }),
            None => Box::new(move |result: AsyncResult<()>| {
                if let Err(error) = result {
                    core.unsolicited(error);
                }
            }),
        };
        Self {
            deliver: Some(deliver),
        }
    }

    pub fn complete(mut self, result: AsyncResult<()>) {
        if let Some(deliver) = self.deliver.take() {
            deliver(result);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(deliver) = self.deliver.take() {
            deliver(Err(DatagramError::ClosedEndpoint));
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.deliver.is_some())
            .finish()
    }
}
