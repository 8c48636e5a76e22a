use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use hearth_http::protocol::{BodyError, SendError};
use hearth_http::request::Request;
use hearth_http::response::Response;
use thiserror::Error;

/// What a route handler reports back to the dispatcher.
///
/// Returning `Ok(())` without concluding the response is fine, the dispatcher ends it.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Answer with this status and its reason phrase, unless the response already
    /// concluded.
    #[error("respond with status {0}")]
    Status(u16),

    #[error(transparent)]
    Body(#[from] BodyError),

    #[error(transparent)]
    Send(#[from] SendError),

    /// An application failure, answered with a 500.
    #[error("{0}")]
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    pub fn other<E: Into<Box<dyn Error + Send + Sync>>>(e: E) -> Self {
        Self::Other(e.into())
    }
}

pub type HandlerResult = Result<(), HandlerError>;

#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, req: &mut Request, res: &mut Response) -> HandlerResult;
}

/// A closure holder which represents an async route handler
pub struct FnHandler<F> {
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Turns a closure returning a boxed future into a [`RouteHandler`].
///
/// ```
/// use futures::FutureExt;
/// use hearth_web::handler_fn;
///
/// let hello = handler_fn(|_req, res| {
///     async move {
///         res.send("hello").await?;
///         Ok(())
///     }
///     .boxed()
/// });
/// # drop(hello);
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<F> RouteHandler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    async fn handle(&self, req: &mut Request, res: &mut Response) -> HandlerResult {
        (self.f)(req, res).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn assert_is_handler<T: RouteHandler>(_handler: &T) {
        // no op
    }

    #[test]
    fn closure_is_route_handler() {
        let handler = handler_fn(|_req, res| {
            async move {
                res.status(200);
                Ok(())
            }
            .boxed()
        });
        assert_is_handler(&handler);
    }

    #[test]
    fn errors_convert() {
        let err: HandlerError = BodyError::LengthRequired.into();
        assert!(matches!(err, HandlerError::Body(BodyError::LengthRequired)));

        let err = HandlerError::other("boom");
        assert_eq!(err.to_string(), "boom");
    }
}
